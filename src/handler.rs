//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake,
//! event parsing, and bidirectional communication with the ChatServer.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::{ClientEvent, ServerEvent};
use crate::server::ServerCommand;
use crate::types::ConnectionId;

/// Handle a new TCP connection
///
/// Performs WebSocket handshake, sets up bidirectional communication,
/// and manages the connection lifecycle. The Connect command is sent
/// before anything else so the actor pushes its snapshot first; the
/// Disconnect command is sent exactly once, when either pump ends.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Assign connection ID
    let connection_id = ConnectionId::new();
    info!("Connection {} accepted from {}", connection_id, peer_addr);

    // Create channel for server -> client events
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(32);

    // Register with ChatServer
    if cmd_tx
        .send(ServerCommand::Connect {
            connection_id,
            sender: event_tx,
        })
        .await
        .is_err()
    {
        error!("Failed to register connection {} - server closed", connection_id);
        return Err(AppError::ChannelSend);
    }

    // Clone cmd_tx for read task
    let cmd_tx_read = cmd_tx.clone();

    // Spawn read task (WebSocket -> ServerCommand)
    let read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => {
                            let cmd = client_event_to_command(connection_id, event);
                            if cmd_tx_read.send(cmd).await.is_err() {
                                debug!("Server closed, ending read task for {}", connection_id);
                                break;
                            }
                        }
                        Err(e) => {
                            // Malformed events are a no-op; the client keeps its connection
                            warn!("Invalid JSON from {}: {}", connection_id, e);
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Connection {} sent close frame", connection_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", connection_id);
                }
                Ok(Message::Pong(_)) => {
                    debug!("Pong from {}", connection_id);
                }
                Ok(_) => {
                    // Binary or other message types - ignore
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", connection_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", connection_id);
    });

    // Spawn write task (ServerEvent -> WebSocket)
    let write_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    // Continue - don't break on serialization errors
                }
            }
        }
        debug!("Write task ended for connection");

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = read_task => {
            debug!("Read task completed for {}", connection_id);
        }
        _ = write_task => {
            debug!("Write task completed for {}", connection_id);
        }
    }

    // Send disconnect command; the actor's cascade is idempotent
    let _ = cmd_tx
        .send(ServerCommand::Disconnect { connection_id })
        .await;

    info!("Connection {} closed", connection_id);

    Ok(())
}

/// Convert a ClientEvent to a ServerCommand
fn client_event_to_command(connection_id: ConnectionId, event: ClientEvent) -> ServerCommand {
    match event {
        ClientEvent::Register { username } => ServerCommand::Register { connection_id, username },
        ClientEvent::JoinRoom { room_name, username } => ServerCommand::JoinRoom {
            connection_id,
            room_name,
            username,
        },
        ClientEvent::DeleteRoom { room_name } => ServerCommand::DeleteRoom {
            connection_id,
            room_name,
        },
        ClientEvent::DeleteUsers { client_id } => ServerCommand::DeleteUsers {
            connection_id,
            client_id,
        },
        ClientEvent::DeleteAllUsers => ServerCommand::DeleteAllUsers { connection_id },
        ClientEvent::ChatMessage { message, username, room } => ServerCommand::ChatMessage {
            connection_id,
            room_name: room,
            username,
            message,
        },
        ClientEvent::HandleTyping { typing_state, username, room } => ServerCommand::HandleTyping {
            connection_id,
            room_name: room,
            username,
            typing_state,
        },
    }
}
