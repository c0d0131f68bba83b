//! Ephemeral typing indicators
//!
//! Tracks a per-(room, username) boolean. Flags are overwritten on every
//! typing event, never persisted, and never included in history. A flag
//! left true by a disconnecting client stays until the next typing event
//! in that room (accepted staleness).

use std::collections::HashSet;

/// Per-room "who is typing" state
///
/// Holds the (room, username) pairs currently typing; a false flag is
/// represented by absence, keeping the set bounded by active typists.
#[derive(Debug, Default)]
pub struct TypingTracker {
    flags: HashSet<(String, String)>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the flag for (room, username)
    ///
    /// A false flag is stored as absence, so the map only ever holds
    /// currently-typing entries and stays bounded by active typists.
    pub fn set(&mut self, room_name: &str, username: &str, typing: bool) {
        let key = (room_name.to_string(), username.to_string());
        if typing {
            self.flags.insert(key);
        } else {
            self.flags.remove(&key);
        }
    }

    /// Current flag for (room, username); false if never set
    pub fn is_typing(&self, room_name: &str, username: &str) -> bool {
        self.flags
            .contains(&(room_name.to_string(), username.to_string()))
    }

    /// Drop all flags for a room (on room deletion)
    pub fn clear_room(&mut self, room_name: &str) {
        self.flags.retain(|(room, _)| room != room_name);
    }
}
