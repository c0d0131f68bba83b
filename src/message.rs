//! Event protocol definitions
//!
//! JSON-based bidirectional event protocol using Serde's tagged enum
//! for type-safe serialization/deserialization. Tags match the event
//! names the browser client emits and listens for.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::room::{RoomSummary, StoredMessage};
use crate::user::UserSummary;

/// Client → Server event
///
/// All events from client to server. Uses tagged enum with snake_case naming;
/// the fields the browser client spells in camelCase (`roomName`,
/// `typingState`) keep that spelling on the wire. Unknown extra fields (the
/// reference client also sends its color and avatar with chat messages) are
/// ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Register a username on this connection
    Register { username: String },
    /// Join a room, creating it on first reference
    JoinRoom {
        #[serde(rename = "roomName")]
        room_name: String,
        username: String,
    },
    /// Delete a room and its history
    DeleteRoom { room_name: String },
    /// Delete every username owned by the identified connection
    DeleteUsers { client_id: String },
    /// Delete every registered username
    DeleteAllUsers,
    /// Post a chat message to a room
    ChatMessage {
        message: String,
        username: String,
        room: String,
    },
    /// Typing indicator changed
    HandleTyping {
        #[serde(rename = "typingState")]
        typing_state: bool,
        username: String,
        room: String,
    },
}

/// Server → Client event
///
/// All events from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Initial snapshot pushed to a freshly accepted connection
    Connection {
        users: Vec<UserSummary>,
        rooms: Vec<RoomSummary>,
    },
    /// Full user list (all connections)
    GetUsers { users: Vec<UserSummary> },
    /// Full room list after a join (all connections)
    JoinedRoom { rooms: Vec<RoomSummary> },
    /// Full room list after a delete (all connections)
    DeletedRoom { rooms: Vec<RoomSummary> },
    /// Room-scoped presence (the room's connections)
    ActiveUsers { users: Vec<UserSummary> },
    /// Full history of the room just joined (joining connection only)
    CurrentRoom { messages: Vec<StoredMessage> },
    /// Registration succeeded (originating connection only)
    RegisteredUser { user_id: String, username: String },
    /// Room join succeeded (originating connection only)
    RegisteredRoom { room_name: String },
    /// Full history after a post (the room's connections)
    SentMessage { messages: Vec<StoredMessage> },
    /// Typing indicator (room's connections except the sender)
    IsTyping {
        #[serde(rename = "typingState")]
        typing_state: bool,
        username: String,
    },
    /// Recoverable error (originating connection only)
    ErrorMessage { error: String },
}

/// Convert AppError to ServerEvent for client notification
///
/// User-facing errors carry their display text; fatal errors are not
/// normally converted (the connection closes) and fall back to a generic
/// notice.
impl From<AppError> for ServerEvent {
    fn from(err: AppError) -> Self {
        let error = if err.is_user_facing() {
            err.to_string()
        } else {
            "Internal error".to_string()
        };
        ServerEvent::ErrorMessage { error }
    }
}
