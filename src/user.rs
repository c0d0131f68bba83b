//! User model and directory
//!
//! A `User` is a registered chat identity owned by a connection. The
//! `UserDirectory` keeps all active registrations in insertion order and
//! enforces username uniqueness.

use rand::Rng;
use serde::Serialize;

use crate::error::AppError;
use crate::types::ConnectionId;

/// A registered chat identity
#[derive(Debug, Clone)]
pub struct User {
    /// Unique among currently-registered users
    pub username: String,
    /// The connection that owns this registration
    pub connection_id: ConnectionId,
    /// Display color, 6 lowercase hex digits, assigned at registration
    pub color: String,
    /// Avatar URL, deterministic from the username
    pub avatar: String,
}

impl User {
    /// Create a user with a freshly sampled color and derived avatar
    pub fn new(username: String, connection_id: ConnectionId) -> Self {
        let avatar = avatar_url(&username);
        Self {
            username,
            connection_id,
            color: random_color(),
            avatar,
        }
    }

    /// Wire-format summary of this user
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            username: self.username.clone(),
            color: self.color.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// User fields exposed to clients in `get_users` / `active_users`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub username: String,
    pub color: String,
    pub avatar: String,
}

/// Sample a uniform 24-bit display color as 6 lowercase hex digits
pub fn random_color() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{:06x}", value)
}

/// Derive the avatar URL for a username
pub fn avatar_url(username: &str) -> String {
    format!(
        "https://avatars.dicebear.com/api/pixel-art-neutral/{}.svg",
        username
    )
}

/// All active registrations, in insertion order
///
/// Owned by the server actor and mutated only from its event loop, so no
/// interior locking is needed. Lookups are linear; the directory is bounded
/// by the number of live registrations.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: Vec<User>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self { users: Vec::new() }
    }

    /// Register a username for a connection
    ///
    /// Fails with `InvalidUsername` on a blank name and `DuplicateUsername`
    /// if the name is taken, leaving the directory unchanged in both cases.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        username: String,
    ) -> Result<&User, AppError> {
        if username.trim().is_empty() {
            return Err(AppError::InvalidUsername);
        }
        if self.contains(&username) {
            return Err(AppError::DuplicateUsername);
        }

        self.users.push(User::new(username, connection_id));
        Ok(self.users.last().unwrap())
    }

    /// Check whether a username is currently registered
    pub fn contains(&self, username: &str) -> bool {
        self.users.iter().any(|u| u.username == username)
    }

    /// Look up a user by username
    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    /// Remove every user owned by a connection
    ///
    /// Returns the removed usernames in registration order.
    pub fn delete_by_connection(&mut self, connection_id: ConnectionId) -> Vec<String> {
        let mut removed = Vec::new();
        self.users.retain(|u| {
            if u.connection_id == connection_id {
                removed.push(u.username.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Remove every registered user
    pub fn delete_all(&mut self) {
        self.users.clear();
    }

    /// Wire-format list of all users, in registration order
    pub fn summaries(&self) -> Vec<UserSummary> {
        self.users.iter().map(User::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
