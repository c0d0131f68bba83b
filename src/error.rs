//! Error types for the chat coordinator
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (send an `error_message` back to the client).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Username already registered by an active user
    #[error("User already exist")]
    DuplicateUsername,

    /// Empty or blank username
    #[error("Please enter a username")]
    InvalidUsername,

    /// Username is not currently registered
    #[error("User '{0}' is not registered")]
    UnknownUser(String),

    /// No room with the given name
    #[error("Room '{0}' does not exist")]
    UnknownRoom(String),

    /// Empty or blank room name
    #[error("Please enter a room name")]
    InvalidRoomName,
}

impl AppError {
    /// Whether this error is recoverable and should be reported to the
    /// originating connection as a plain-text `error_message`.
    ///
    /// Fatal transport errors close the connection instead.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AppError::DuplicateUsername
                | AppError::InvalidUsername
                | AppError::UnknownUser(_)
                | AppError::UnknownRoom(_)
                | AppError::InvalidRoomName
        )
    }
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
