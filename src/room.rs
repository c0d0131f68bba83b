//! Room model and directory
//!
//! A `Room` is a named channel with an ordered membership list and an
//! append-only message history. The `RoomDirectory` creates rooms on first
//! join, assigns monotonic message ids, and keeps rooms (and their history)
//! alive until an explicit delete.

use chrono::Utc;
use serde::Serialize;

use crate::error::AppError;
use crate::user::User;

/// An immutable chat message, owned by its room
///
/// `color` is serialized as `randomColor` because that is the field name
/// the browser client renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub id: u64,
    pub message: String,
    pub username: String,
    #[serde(rename = "randomColor")]
    pub color: String,
    pub avatar: String,
    pub time: String,
    pub room: String,
}

/// Room fields exposed to clients in `joined_room` / `deleted_room`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub id: u64,
    pub room_name: String,
    pub member_count: usize,
}

/// A named chat channel
///
/// Membership references usernames weakly; the user directory owns the
/// users themselves. History survives members leaving.
#[derive(Debug)]
pub struct Room {
    pub id: u64,
    pub name: String,
    /// Usernames in join order, no duplicates
    members: Vec<String>,
    /// Append-only
    messages: Vec<StoredMessage>,
}

impl Room {
    fn new(id: u64, name: String) -> Self {
        Self {
            id,
            name,
            members: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Add a member; returns false if already present (idempotent)
    pub fn add_member(&mut self, username: &str) -> bool {
        if self.is_member(username) {
            false
        } else {
            self.members.push(username.to_string());
            true
        }
    }

    /// Remove a member; returns true if they were present
    pub fn remove_member(&mut self, username: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != username);
        self.members.len() != before
    }

    pub fn is_member(&self, username: &str) -> bool {
        self.members.iter().any(|m| m == username)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Member usernames in join order
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Full message history in submission order
    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            room_name: self.name.clone(),
            member_count: self.members.len(),
        }
    }
}

/// All rooms, in creation order
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: Vec<Room>,
    next_room_id: u64,
    next_message_id: u64,
}

/// Result of a join: was the room created, and did membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub created: bool,
    pub newly_joined: bool,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a room, creating it on first reference
    ///
    /// Fails with `InvalidRoomName` on a blank name. Adding an existing
    /// member is a no-op on membership.
    pub fn join(&mut self, room_name: &str, username: &str) -> Result<JoinOutcome, AppError> {
        if room_name.trim().is_empty() {
            return Err(AppError::InvalidRoomName);
        }

        let created = self.get(room_name).is_none();
        if created {
            let id = self.next_room_id;
            self.next_room_id += 1;
            self.rooms.push(Room::new(id, room_name.to_string()));
        }

        let room = self.get_mut(room_name).unwrap();
        let newly_joined = room.add_member(username);
        Ok(JoinOutcome { created, newly_joined })
    }

    /// Delete a room and all its messages; no-op if absent
    pub fn delete(&mut self, room_name: &str) -> bool {
        let before = self.rooms.len();
        self.rooms.retain(|r| r.name != room_name);
        self.rooms.len() != before
    }

    /// Append a message to a room's history
    ///
    /// Fails with `UnknownRoom` if the room is absent; never creates rooms.
    /// Attribution (color, avatar) is taken from the server's user record,
    /// not from anything the client sent.
    pub fn post_message(
        &mut self,
        room_name: &str,
        sender: &User,
        text: String,
    ) -> Result<&StoredMessage, AppError> {
        if !self.contains(room_name) {
            return Err(AppError::UnknownRoom(room_name.to_string()));
        }
        let id = self.next_message_id;
        self.next_message_id += 1;

        let room = self.get_mut(room_name).unwrap();
        room.messages.push(StoredMessage {
            id,
            message: text,
            username: sender.username.clone(),
            color: sender.color.clone(),
            avatar: sender.avatar.clone(),
            time: Utc::now().format("%H:%M:%S").to_string(),
            room: room_name.to_string(),
        });
        Ok(room.messages.last().unwrap())
    }

    pub fn get(&self, room_name: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.name == room_name)
    }

    pub fn get_mut(&mut self, room_name: &str) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| r.name == room_name)
    }

    pub fn contains(&self, room_name: &str) -> bool {
        self.get(room_name).is_some()
    }

    /// Remove a username from every room's membership
    ///
    /// Returns the names of the rooms that actually changed.
    pub fn remove_member_everywhere(&mut self, username: &str) -> Vec<String> {
        let mut affected = Vec::new();
        for room in self.rooms.iter_mut() {
            if room.remove_member(username) {
                affected.push(room.name.clone());
            }
        }
        affected
    }

    /// Empty every room's membership, keeping rooms and histories
    ///
    /// Returns the names of all rooms.
    pub fn clear_memberships(&mut self) -> Vec<String> {
        self.rooms
            .iter_mut()
            .map(|r| {
                r.members.clear();
                r.name.clone()
            })
            .collect()
    }

    /// Wire-format list of all rooms, in creation order
    pub fn summaries(&self) -> Vec<RoomSummary> {
        self.rooms.iter().map(Room::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
