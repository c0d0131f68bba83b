//! ChatServer Actor implementation
//!
//! The central actor that serializes every state mutation: connections,
//! users, rooms and typing flags all live here, and commands are processed
//! one at a time off an mpsc channel. This is the event router: it validates
//! inbound events, mutates the directories, and decides which connections
//! receive which outbound broadcasts.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::AppError;
use crate::message::ServerEvent;
use crate::room::RoomDirectory;
use crate::typing::TypingTracker;
use crate::types::ConnectionId;
use crate::user::{UserDirectory, UserSummary};

/// Commands sent from connection handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection accepted
    Connect {
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerEvent>,
    },
    /// Connection closed
    Disconnect {
        connection_id: ConnectionId,
    },
    /// Register a username on this connection
    Register {
        connection_id: ConnectionId,
        username: String,
    },
    /// Join (and possibly create) a room
    JoinRoom {
        connection_id: ConnectionId,
        room_name: String,
        username: String,
    },
    /// Delete a room
    DeleteRoom {
        connection_id: ConnectionId,
        room_name: String,
    },
    /// Delete every username owned by the identified connection
    DeleteUsers {
        connection_id: ConnectionId,
        client_id: String,
    },
    /// Delete every registered username
    DeleteAllUsers {
        connection_id: ConnectionId,
    },
    /// Post a chat message to a room
    ChatMessage {
        connection_id: ConnectionId,
        room_name: String,
        username: String,
        message: String,
    },
    /// Typing indicator changed
    HandleTyping {
        connection_id: ConnectionId,
        room_name: String,
        username: String,
        typing_state: bool,
    },
}

/// The main ChatServer actor
///
/// Owns the connection registry, user directory, room directory and typing
/// tracker. All broadcasts are fire-and-forget; a push to a connection that
/// has since dropped its receiver is silently discarded.
pub struct ChatServer {
    /// All live connections: ConnectionId -> Connection
    connections: HashMap<ConnectionId, Connection>,
    /// Registered users, insertion-ordered
    users: UserDirectory,
    /// Rooms, creation-ordered
    rooms: RoomDirectory,
    /// Ephemeral per-room typing flags
    typing: TypingTracker,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            connections: HashMap::new(),
            users: UserDirectory::new(),
            rooms: RoomDirectory::new(),
            typing: TypingTracker::new(),
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are
    /// dropped. Processing one command at a time is what serializes every
    /// mutation of the shared directories.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { connection_id, sender } => {
                self.handle_connect(connection_id, sender).await;
            }
            ServerCommand::Disconnect { connection_id } => {
                self.handle_disconnect(connection_id).await;
            }
            ServerCommand::Register { connection_id, username } => {
                self.handle_register(connection_id, username).await;
            }
            ServerCommand::JoinRoom { connection_id, room_name, username } => {
                self.handle_join_room(connection_id, room_name, username).await;
            }
            ServerCommand::DeleteRoom { connection_id, room_name } => {
                self.handle_delete_room(connection_id, room_name).await;
            }
            ServerCommand::DeleteUsers { connection_id, client_id } => {
                self.handle_delete_users(connection_id, client_id).await;
            }
            ServerCommand::DeleteAllUsers { connection_id } => {
                self.handle_delete_all_users(connection_id).await;
            }
            ServerCommand::ChatMessage { connection_id, room_name, username, message } => {
                self.handle_chat_message(connection_id, room_name, username, message)
                    .await;
            }
            ServerCommand::HandleTyping { connection_id, room_name, username, typing_state } => {
                self.handle_typing(connection_id, room_name, username, typing_state)
                    .await;
            }
        }
    }

    /// Handle new connection: register it and push the current snapshot
    async fn handle_connect(&mut self, connection_id: ConnectionId, sender: mpsc::Sender<ServerEvent>) {
        info!("Connection {} opened", connection_id);
        let connection = Connection::new(connection_id, sender);
        self.connections.insert(connection_id, connection);

        let snapshot = ServerEvent::Connection {
            users: self.users.summaries(),
            rooms: self.rooms.summaries(),
        };
        self.send_to(connection_id, snapshot).await;

        debug!(
            "Total connections: {}, users: {}, rooms: {}",
            self.connections.len(),
            self.users.len(),
            self.rooms.len()
        );
    }

    /// Handle connection close
    ///
    /// Idempotent: a second disconnect for the same id finds no connection
    /// and does nothing. Cascades to every username the connection owned.
    async fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        if self.connections.remove(&connection_id).is_none() {
            return;
        }
        info!("Connection {} closed", connection_id);

        self.cascade_delete_users(connection_id).await;

        debug!(
            "Total connections: {}, users: {}, rooms: {}",
            self.connections.len(),
            self.users.len(),
            self.rooms.len()
        );
    }

    /// Handle a register request
    async fn handle_register(&mut self, connection_id: ConnectionId, username: String) {
        let user_id = match self.users.register(connection_id, username.clone()) {
            Ok(user) => user.connection_id.to_string(),
            Err(err) => {
                debug!("Register '{}' rejected: {}", username, err);
                self.send_error(connection_id, err).await;
                return;
            }
        };

        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.add_username(username.clone());
        }

        info!("Connection {} registered '{}'", connection_id, username);

        self.send_to(
            connection_id,
            ServerEvent::RegisteredUser { user_id, username },
        )
        .await;
        self.broadcast_all(ServerEvent::GetUsers {
            users: self.users.summaries(),
        })
        .await;
    }

    /// Handle a join request
    ///
    /// Creates the room on first reference. The joiner alone receives the
    /// room's history; everyone learns the new room list; the room's members
    /// get refreshed presence.
    async fn handle_join_room(
        &mut self,
        connection_id: ConnectionId,
        room_name: String,
        username: String,
    ) {
        if !self.users.contains(&username) {
            self.send_error(connection_id, AppError::UnknownUser(username)).await;
            return;
        }

        let outcome = match self.rooms.join(&room_name, &username) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.send_error(connection_id, err).await;
                return;
            }
        };

        if outcome.created {
            info!("Room '{}' created by '{}'", room_name, username);
        } else {
            debug!("'{}' joined room '{}'", username, room_name);
        }

        self.broadcast_all(ServerEvent::JoinedRoom {
            rooms: self.rooms.summaries(),
        })
        .await;

        let presence = self.room_presence(&room_name);
        self.broadcast_room(&room_name, ServerEvent::ActiveUsers { users: presence })
            .await;

        let messages = self
            .rooms
            .get(&room_name)
            .map(|r| r.messages().to_vec())
            .unwrap_or_default();
        self.send_to(connection_id, ServerEvent::CurrentRoom { messages }).await;
        self.send_to(connection_id, ServerEvent::RegisteredRoom { room_name }).await;
    }

    /// Handle a room delete request; silent no-op if the room is absent
    async fn handle_delete_room(&mut self, _connection_id: ConnectionId, room_name: String) {
        if !self.rooms.delete(&room_name) {
            debug!("Delete of unknown room '{}' ignored", room_name);
            return;
        }

        self.typing.clear_room(&room_name);
        info!("Room '{}' deleted", room_name);

        self.broadcast_all(ServerEvent::DeletedRoom {
            rooms: self.rooms.summaries(),
        })
        .await;
    }

    /// Handle a bulk delete of the users owned by a connection
    ///
    /// The client echoes back the id it was issued at registration. A stale
    /// or garbled id falls back to the originating connection rather than
    /// touching anyone else's users.
    async fn handle_delete_users(&mut self, connection_id: ConnectionId, client_id: String) {
        let target = ConnectionId::parse(&client_id).unwrap_or(connection_id);
        info!("Deleting users owned by connection {}", target);
        self.cascade_delete_users(target).await;
    }

    /// Handle a delete of every registered user
    ///
    /// Rooms and histories survive; memberships are reset to empty. The
    /// per-room audience is captured before the reset so the now-former
    /// members still learn their membership was cleared.
    async fn handle_delete_all_users(&mut self, _connection_id: ConnectionId) {
        info!("Deleting all {} registered users", self.users.len());

        let audiences: Vec<(String, Vec<ConnectionId>)> = self
            .rooms
            .summaries()
            .into_iter()
            .map(|s| {
                let audience = self.room_audience(&s.room_name);
                (s.room_name, audience)
            })
            .collect();

        self.users.delete_all();
        self.rooms.clear_memberships();
        for connection in self.connections.values_mut() {
            connection.clear_usernames();
        }

        self.broadcast_all(ServerEvent::GetUsers { users: Vec::new() }).await;
        for (_room_name, audience) in audiences {
            for id in audience {
                self.send_to(id, ServerEvent::ActiveUsers { users: Vec::new() }).await;
            }
        }
    }

    /// Handle a chat message
    ///
    /// Appends to the room's history and pushes the full history to every
    /// member connection. Attribution comes from the server's user record.
    async fn handle_chat_message(
        &mut self,
        connection_id: ConnectionId,
        room_name: String,
        username: String,
        message: String,
    ) {
        if !self.rooms.contains(&room_name) {
            self.send_error(connection_id, AppError::UnknownRoom(room_name)).await;
            return;
        }
        let Some(sender) = self.users.get(&username).cloned() else {
            self.send_error(connection_id, AppError::UnknownUser(username)).await;
            return;
        };

        if let Err(err) = self.rooms.post_message(&room_name, &sender, message) {
            self.send_error(connection_id, err).await;
            return;
        }

        // Posting implies the sender stopped typing
        if self.typing.is_typing(&room_name, &username) {
            self.typing.set(&room_name, &username, false);
            self.broadcast_room_except(
                &room_name,
                connection_id,
                ServerEvent::IsTyping {
                    typing_state: false,
                    username: username.clone(),
                },
            )
            .await;
        }

        debug!("'{}' posted to room '{}'", username, room_name);

        let messages = self
            .rooms
            .get(&room_name)
            .map(|r| r.messages().to_vec())
            .unwrap_or_default();
        self.broadcast_room(&room_name, ServerEvent::SentMessage { messages })
            .await;
    }

    /// Handle a typing indicator change
    ///
    /// Overwrites the flag and notifies the room's other members; the
    /// sender already knows.
    async fn handle_typing(
        &mut self,
        connection_id: ConnectionId,
        room_name: String,
        username: String,
        typing_state: bool,
    ) {
        if !self.rooms.contains(&room_name) {
            self.send_error(connection_id, AppError::UnknownRoom(room_name)).await;
            return;
        }
        if !self.users.contains(&username) {
            self.send_error(connection_id, AppError::UnknownUser(username)).await;
            return;
        }

        self.typing.set(&room_name, &username, typing_state);

        self.broadcast_room_except(
            &room_name,
            connection_id,
            ServerEvent::IsTyping { typing_state, username },
        )
        .await;
    }

    /// Helper: remove a connection's users everywhere and broadcast
    ///
    /// Shared by disconnect and the explicit delete_users event: removes the
    /// users from the directory, detaches them from the owning connection if
    /// it is still open, strips them from all room memberships, then pushes
    /// the new user list to everyone and refreshed presence to each affected
    /// room's remaining members.
    async fn cascade_delete_users(&mut self, target: ConnectionId) {
        let removed = self.users.delete_by_connection(target);
        if removed.is_empty() {
            return;
        }

        if let Some(connection) = self.connections.get_mut(&target) {
            for username in &removed {
                connection.remove_username(username);
            }
        }

        let mut affected: Vec<String> = Vec::new();
        for username in &removed {
            for room_name in self.rooms.remove_member_everywhere(username) {
                if !affected.contains(&room_name) {
                    affected.push(room_name);
                }
            }
        }

        debug!("Removed users {:?}, affected rooms {:?}", removed, affected);

        self.broadcast_all(ServerEvent::GetUsers {
            users: self.users.summaries(),
        })
        .await;
        for room_name in affected {
            let presence = self.room_presence(&room_name);
            self.broadcast_room(&room_name, ServerEvent::ActiveUsers { users: presence })
                .await;
        }
    }

    /// Helper: send an event to one connection, dropping it if closed
    async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) {
        if let Some(connection) = self.connections.get(&connection_id) {
            if connection.send(event).await.is_err() {
                warn!("Dropped event for closed connection {}", connection_id);
            }
        }
    }

    /// Helper: report a recoverable error to the originating connection only
    async fn send_error(&self, connection_id: ConnectionId, err: AppError) {
        debug!("Rejected event from {}: {}", connection_id, err);
        self.send_to(connection_id, err.into()).await;
    }

    /// Helper: push an event to every live connection
    async fn broadcast_all(&self, event: ServerEvent) {
        for connection in self.connections.values() {
            let _ = connection.send(event.clone()).await;
        }
    }

    /// Helper: push an event to every connection with a member in the room
    async fn broadcast_room(&self, room_name: &str, event: ServerEvent) {
        for id in self.room_audience(room_name) {
            self.send_to(id, event.clone()).await;
        }
    }

    /// Helper: room broadcast excluding one connection (typing indicators)
    async fn broadcast_room_except(
        &self,
        room_name: &str,
        except: ConnectionId,
        event: ServerEvent,
    ) {
        for id in self.room_audience(room_name) {
            if id != except {
                self.send_to(id, event.clone()).await;
            }
        }
    }

    /// Helper: the connections owning the room's members, deduplicated
    fn room_audience(&self, room_name: &str) -> Vec<ConnectionId> {
        let Some(room) = self.rooms.get(room_name) else {
            return Vec::new();
        };
        let mut audience = Vec::new();
        for username in room.members() {
            if let Some(user) = self.users.get(username) {
                if !audience.contains(&user.connection_id) {
                    audience.push(user.connection_id);
                }
            }
        }
        audience
    }

    /// Helper: wire-format presence list for a room, in join order
    fn room_presence(&self, room_name: &str) -> Vec<UserSummary> {
        let Some(room) = self.rooms.get(room_name) else {
            return Vec::new();
        };
        room.members()
            .iter()
            .filter_map(|username| self.users.get(username))
            .map(|user| user.summary())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn new_server() -> ChatServer {
        let (_tx, rx) = mpsc::channel(8);
        ChatServer::new(rx)
    }

    async fn connect(server: &mut ChatServer) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(64);
        server
            .handle_command(ServerCommand::Connect { connection_id, sender: tx })
            .await;
        (connection_id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    fn usernames(users: &[UserSummary]) -> Vec<&str> {
        users.iter().map(|u| u.username.as_str()).collect()
    }

    async fn register(server: &mut ChatServer, conn: ConnectionId, name: &str) {
        server
            .handle_command(ServerCommand::Register {
                connection_id: conn,
                username: name.to_string(),
            })
            .await;
    }

    async fn join(server: &mut ChatServer, conn: ConnectionId, room: &str, name: &str) {
        server
            .handle_command(ServerCommand::JoinRoom {
                connection_id: conn,
                room_name: room.to_string(),
                username: name.to_string(),
            })
            .await;
    }

    async fn post(server: &mut ChatServer, conn: ConnectionId, room: &str, name: &str, text: &str) {
        server
            .handle_command(ServerCommand::ChatMessage {
                connection_id: conn,
                room_name: room.to_string(),
                username: name.to_string(),
                message: text.to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_connect_pushes_snapshot() {
        let mut server = new_server();
        let (_c1, mut rx1) = connect(&mut server).await;

        let events = drain(&mut rx1);
        assert!(matches!(
            events[0],
            ServerEvent::Connection { ref users, ref rooms } if users.is_empty() && rooms.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_register_broadcasts_user_list() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        let (_c2, mut rx2) = connect(&mut server).await;
        drain(&mut rx1);
        drain(&mut rx2);

        register(&mut server, c1, "alice").await;

        let events = drain(&mut rx1);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::RegisteredUser { user_id, username }
                if *user_id == c1.to_string() && username == "alice"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::GetUsers { users } if usernames(users) == ["alice"]
        )));

        // The other connection sees the user list too, but no registration ack
        let events = drain(&mut rx2);
        assert!(events.iter().any(|e| matches!(e, ServerEvent::GetUsers { .. })));
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::RegisteredUser { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected_without_mutation() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        let (c2, mut rx2) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        drain(&mut rx1);
        drain(&mut rx2);

        register(&mut server, c2, "alice").await;

        let events = drain(&mut rx2);
        assert_eq!(
            events,
            vec![ServerEvent::ErrorMessage { error: "User already exist".to_string() }]
        );
        // No broadcast reached anyone else
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(server.users.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_username_rejected() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        drain(&mut rx1);

        register(&mut server, c1, "   ").await;

        let events = drain(&mut rx1);
        assert_eq!(
            events,
            vec![ServerEvent::ErrorMessage { error: "Please enter a username".to_string() }]
        );
    }

    #[tokio::test]
    async fn test_join_scopes_broadcasts() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        let (_c2, mut rx2) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        drain(&mut rx1);
        drain(&mut rx2);

        join(&mut server, c1, "general", "alice").await;

        let events = drain(&mut rx1);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::JoinedRoom { rooms }
                if rooms.len() == 1 && rooms[0].room_name == "general" && rooms[0].member_count == 1
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::ActiveUsers { users } if usernames(users) == ["alice"]
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::CurrentRoom { messages } if messages.is_empty()
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::RegisteredRoom { room_name } if room_name == "general"
        )));

        // Everyone learns the room list; only the joiner gets history
        let events = drain(&mut rx2);
        assert!(events.iter().any(|e| matches!(e, ServerEvent::JoinedRoom { .. })));
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::CurrentRoom { .. })));
    }

    #[tokio::test]
    async fn test_join_requires_registered_user() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        drain(&mut rx1);

        join(&mut server, c1, "general", "ghost").await;

        let events = drain(&mut rx1);
        assert_eq!(
            events,
            vec![ServerEvent::ErrorMessage {
                error: "User 'ghost' is not registered".to_string()
            }]
        );
        assert!(server.rooms.is_empty());
    }

    #[tokio::test]
    async fn test_chat_broadcast_to_member_connections_only() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        let (c2, mut rx2) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        register(&mut server, c2, "bob").await;
        join(&mut server, c1, "general", "alice").await;
        join(&mut server, c2, "random", "bob").await;
        drain(&mut rx1);
        drain(&mut rx2);

        post(&mut server, c1, "general", "alice", "hi").await;

        let events = drain(&mut rx1);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::SentMessage { messages }
                if messages.len() == 1
                    && messages[0].message == "hi"
                    && messages[0].username == "alice"
        )));
        // bob is in another room and hears nothing
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_chat_to_missing_room_never_creates_it() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        drain(&mut rx1);

        post(&mut server, c1, "nowhere", "alice", "hi").await;

        let events = drain(&mut rx1);
        assert_eq!(
            events,
            vec![ServerEvent::ErrorMessage {
                error: "Room 'nowhere' does not exist".to_string()
            }]
        );
        assert!(server.rooms.is_empty());
    }

    #[tokio::test]
    async fn test_history_grows_in_submission_order() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        join(&mut server, c1, "general", "alice").await;

        for i in 0..3 {
            post(&mut server, c1, "general", "alice", &format!("msg {}", i)).await;
        }

        let events = drain(&mut rx1);
        let last_history = events
            .iter()
            .rev()
            .find_map(|e| match e {
                ServerEvent::SentMessage { messages } => Some(messages),
                _ => None,
            })
            .unwrap();
        let texts: Vec<_> = last_history.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["msg 0", "msg 1", "msg 2"]);
    }

    #[tokio::test]
    async fn test_typing_reaches_other_members_not_sender() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        let (c2, mut rx2) = connect(&mut server).await;
        let (c3, mut rx3) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        register(&mut server, c2, "bob").await;
        register(&mut server, c3, "carol").await;
        join(&mut server, c1, "general", "alice").await;
        join(&mut server, c2, "general", "bob").await;
        join(&mut server, c3, "random", "carol").await;
        drain(&mut rx1);
        drain(&mut rx2);
        drain(&mut rx3);

        server
            .handle_command(ServerCommand::HandleTyping {
                connection_id: c1,
                room_name: "general".to_string(),
                username: "alice".to_string(),
                typing_state: true,
            })
            .await;

        assert_eq!(
            drain(&mut rx2),
            vec![ServerEvent::IsTyping {
                typing_state: true,
                username: "alice".to_string()
            }]
        );
        // Not the sender, and not members of other rooms
        assert!(drain(&mut rx1).is_empty());
        assert!(drain(&mut rx3).is_empty());
    }

    #[tokio::test]
    async fn test_posting_clears_typing_flag() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        let (c2, mut rx2) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        register(&mut server, c2, "bob").await;
        join(&mut server, c1, "general", "alice").await;
        join(&mut server, c2, "general", "bob").await;
        server
            .handle_command(ServerCommand::HandleTyping {
                connection_id: c1,
                room_name: "general".to_string(),
                username: "alice".to_string(),
                typing_state: true,
            })
            .await;
        drain(&mut rx1);
        drain(&mut rx2);

        post(&mut server, c1, "general", "alice", "hi").await;

        let events = drain(&mut rx2);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::IsTyping { typing_state: false, username } if username == "alice"
        )));
        assert!(!server.typing.is_typing("general", "alice"));
    }

    #[tokio::test]
    async fn test_delete_room_broadcasts_and_missing_is_noop() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        join(&mut server, c1, "general", "alice").await;
        drain(&mut rx1);

        server
            .handle_command(ServerCommand::DeleteRoom {
                connection_id: c1,
                room_name: "general".to_string(),
            })
            .await;

        let events = drain(&mut rx1);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::DeletedRoom { rooms } if rooms.is_empty()
        )));

        // Deleting again: silent no-op, no broadcast
        server
            .handle_command(ServerCommand::DeleteRoom {
                connection_id: c1,
                room_name: "general".to_string(),
            })
            .await;
        assert!(drain(&mut rx1).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_cascades_to_owned_users_only() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        let (c2, mut rx2) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        register(&mut server, c1, "alice2").await;
        register(&mut server, c2, "bob").await;
        join(&mut server, c1, "general", "alice").await;
        join(&mut server, c2, "general", "bob").await;
        drain(&mut rx1);
        drain(&mut rx2);

        server
            .handle_command(ServerCommand::Disconnect { connection_id: c1 })
            .await;

        let events = drain(&mut rx2);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::GetUsers { users } if usernames(users) == ["bob"]
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::ActiveUsers { users } if usernames(users) == ["bob"]
        )));

        // Idempotent: a second disconnect produces nothing
        server
            .handle_command(ServerCommand::Disconnect { connection_id: c1 })
            .await;
        assert!(drain(&mut rx2).is_empty());
        drop(rx1);
    }

    #[tokio::test]
    async fn test_delete_users_falls_back_to_origin_on_bad_id() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        drain(&mut rx1);

        server
            .handle_command(ServerCommand::DeleteUsers {
                connection_id: c1,
                client_id: "garbled".to_string(),
            })
            .await;

        let events = drain(&mut rx1);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::GetUsers { users } if users.is_empty()
        )));
        assert!(server.users.is_empty());
    }

    #[tokio::test]
    async fn test_delete_all_users_clears_memberships_keeps_rooms() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        let (c2, mut rx2) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        register(&mut server, c2, "bob").await;
        join(&mut server, c1, "general", "alice").await;
        join(&mut server, c2, "general", "bob").await;
        drain(&mut rx1);
        drain(&mut rx2);

        server
            .handle_command(ServerCommand::DeleteAllUsers { connection_id: c1 })
            .await;

        for rx in [&mut rx1, &mut rx2] {
            let events = drain(rx);
            assert!(events.iter().any(|e| matches!(
                e,
                ServerEvent::GetUsers { users } if users.is_empty()
            )));
            assert!(events.iter().any(|e| matches!(
                e,
                ServerEvent::ActiveUsers { users } if users.is_empty()
            )));
        }

        assert!(server.users.is_empty());
        assert_eq!(server.rooms.len(), 1);
        assert_eq!(server.rooms.get("general").unwrap().member_count(), 0);
    }

    #[tokio::test]
    async fn test_rejoining_room_resends_retained_history() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        register(&mut server, c1, "alice").await;
        join(&mut server, c1, "general", "alice").await;
        post(&mut server, c1, "general", "alice", "hi").await;
        server
            .handle_command(ServerCommand::Disconnect { connection_id: c1 })
            .await;
        drop(rx1);

        // New connection, same username, same room
        let (c2, mut rx2) = connect(&mut server).await;
        register(&mut server, c2, "alice").await;
        join(&mut server, c2, "general", "alice").await;

        let events = drain(&mut rx2);
        let history = events
            .iter()
            .find_map(|e| match e {
                ServerEvent::CurrentRoom { messages } => Some(messages),
                _ => None,
            })
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "hi");
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let mut server = new_server();
        let (c1, mut rx1) = connect(&mut server).await;
        let (c2, mut rx2) = connect(&mut server).await;
        drain(&mut rx1);
        drain(&mut rx2);

        // C1 registers "alice"
        register(&mut server, c1, "alice").await;
        let events = drain(&mut rx1);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::RegisteredUser { user_id, username }
                if *user_id == c1.to_string() && username == "alice"
        )));

        // C1 joins "general": room created, membership ["alice"]
        join(&mut server, c1, "general", "alice").await;
        assert_eq!(server.rooms.get("general").unwrap().members(), ["alice"]);

        // C1 posts "hi"
        post(&mut server, c1, "general", "alice", "hi").await;
        let history = server.rooms.get("general").unwrap().messages();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "hi");
        assert_eq!(history[0].username, "alice");

        // C2 tries to register "alice": rejected
        register(&mut server, c2, "alice").await;
        let events = drain(&mut rx2);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::ErrorMessage { error } if error == "User already exist"
        )));

        // C1 disconnects: alice gone from directory and from the room
        server
            .handle_command(ServerCommand::Disconnect { connection_id: c1 })
            .await;
        assert!(server.users.is_empty());
        assert_eq!(server.rooms.get("general").unwrap().member_count(), 0);
    }
}
