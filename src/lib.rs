//! Realtime presence-and-room WebSocket chat coordinator
//!
//! The server-side counterpart to a browser chat client: it tracks live
//! connections, registered usernames, named rooms with append-only message
//! histories, and ephemeral typing indicators, and pushes updated state to
//! the affected audience after every mutation.
//!
//! # Features
//! - WebSocket connection handling
//! - Username registration with server-assigned colors and avatars
//! - Rooms created on first join, deleted on request
//! - Room-scoped message history and presence
//! - Typing indicators
//! - Disconnection cascade (a connection's users leave everything they joined)
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor managing all state
//! - Each connection has a `handler` task communicating with the server
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use chatroom_server::{ChatServer, handle_connection};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:4000").await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!
//!     tokio::spawn(ChatServer::new(cmd_rx).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         tokio::spawn(handle_connection(stream, cmd_tx));
//!     }
//! }
//! ```

pub mod connection;
pub mod error;
pub mod handler;
pub mod message;
pub mod room;
pub mod server;
pub mod typing;
pub mod types;
pub mod user;

// Re-export main types for convenience
pub use connection::Connection;
pub use error::{AppError, SendError};
pub use handler::handle_connection;
pub use message::{ClientEvent, ServerEvent};
pub use room::{Room, RoomDirectory, RoomSummary, StoredMessage};
pub use server::{ChatServer, ServerCommand};
pub use typing::TypingTracker;
pub use types::ConnectionId;
pub use user::{User, UserDirectory, UserSummary};
