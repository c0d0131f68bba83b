//! Connection struct definition
//!
//! Represents one live transport session: its outbound message channel and
//! the usernames it has registered. A connection may own several usernames
//! at once; disconnecting cascades to all of them.

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerEvent;
use crate::types::ConnectionId;

/// A live transport session
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Server → Client event channel
    pub sender: mpsc::Sender<ServerEvent>,
    /// Usernames registered over this connection, in registration order
    usernames: Vec<String>,
}

impl Connection {
    /// Create a new connection with the given ID and sender channel
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            sender,
            usernames: Vec::new(),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns an error if the channel is closed (client disconnected).
    pub async fn send(&self, event: ServerEvent) -> Result<(), SendError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Record a username registered over this connection
    pub fn add_username(&mut self, username: String) {
        if !self.owns(&username) {
            self.usernames.push(username);
        }
    }

    /// Forget a username (after it was deleted from the directory)
    pub fn remove_username(&mut self, username: &str) {
        self.usernames.retain(|u| u != username);
    }

    /// Forget every username (after a delete-all)
    pub fn clear_usernames(&mut self) {
        self.usernames.clear();
    }

    /// Whether this connection registered the given username
    pub fn owns(&self, username: &str) -> bool {
        self.usernames.iter().any(|u| u == username)
    }

    /// Usernames owned by this connection
    pub fn usernames(&self) -> &[String] {
        &self.usernames
    }
}
