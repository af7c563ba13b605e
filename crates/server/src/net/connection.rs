//! Per-client connection handling.
//!
//! [`Session`] holds the protocol logic and knows nothing about sockets;
//! [`handle_socket`] drives a session from a WebSocket and the world's
//! change bus.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use voxelsrv_engine::world::position::ChunkPos;

use super::ServerState;
use crate::event_bus::{ChangeKind, ChangeSource, WorldChange};
use crate::protocol::{
    self, ChunkDataMessage, ChunkUpdate, ClientMessage, Heartbeat, PROTOCOL_VERSION, RegistrySync, ServerMessage,
    Welcome,
};

pub struct Session {
    id: u64,
    state: Arc<ServerState>,
    /// Chunks this client has been sent and not told to unload.
    tracked: HashSet<ChunkPos>,
}

impl Session {
    pub fn new(id: u64, state: Arc<ServerState>) -> Self {
        Self {
            id,
            state,
            tracked: HashSet::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_tracking(&self, pos: ChunkPos) -> bool {
        self.tracked.contains(&pos)
    }

    /// Messages sent right after connecting.
    pub fn greeting(&self) -> Vec<ServerMessage> {
        let world = &self.state.world;
        vec![
            ServerMessage::Welcome(Welcome {
                message: format!("Connected to {}", world.name()),
                protocol_version: PROTOCOL_VERSION,
                world: world.name().to_string(),
                chunk_size: world.chunk_size(),
                height: world.height(),
            }),
            ServerMessage::RegistrySync(RegistrySync::from_registry(&self.state.registry)),
        ]
    }

    /// Handle one text frame. Bad input gets an `error` reply; it never
    /// ends the session.
    pub async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        let message = match protocol::parse_client_message(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Client {}: rejected message: {}", self.id, e);
                return vec![ServerMessage::error(e.to_string())];
            }
        };

        match message {
            ClientMessage::ChunkRequest(request) => {
                let pos = request.pos();
                let chunk = self.state.world.get_chunk(pos).await;
                let data = ChunkDataMessage::from_chunk(&chunk.read());
                self.tracked.insert(pos);
                vec![ServerMessage::ChunkData(data)]
            }
            ClientMessage::ChunkUpdate(update) => self.apply_update(update).await,
            ClientMessage::Ping(_) => vec![ServerMessage::Pong(Heartbeat::now())],
        }
    }

    async fn apply_update(&mut self, update: ChunkUpdate) -> Vec<ServerMessage> {
        let world = &self.state.world;
        let valid = match update.validate(world.chunk_size(), world.height(), &self.state.registry) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!("Client {}: rejected update: {}", self.id, e);
                return vec![ServerMessage::error(e.to_string())];
            }
        };

        match world
            .store()
            .apply_update(valid.chunk, valid.local, valid.block, valid.metadata)
            .await
        {
            Ok(true) => {
                world.publish(WorldChange {
                    source: ChangeSource::Player(self.id),
                    kind: ChangeKind::BlockSet {
                        chunk: valid.chunk,
                        local: valid.local,
                        block: valid.block,
                        metadata: valid.metadata,
                    },
                });
                Vec::new()
            }
            Ok(false) => Vec::new(),
            Err(e) => {
                tracing::warn!("Client {}: edit refused: {}", self.id, e);
                vec![ServerMessage::error(e.to_string())]
            }
        }
    }

    /// Fresh copies of every chunk this client holds. Sent when the client
    /// fell behind the change bus and may have missed updates.
    pub async fn resync(&mut self) -> Vec<ServerMessage> {
        let mut positions: Vec<ChunkPos> = self.tracked.iter().copied().collect();
        positions.sort();
        let mut messages = Vec::with_capacity(positions.len());
        for pos in positions {
            let chunk = self.state.world.get_chunk(pos).await;
            messages.push(ServerMessage::ChunkData(ChunkDataMessage::from_chunk(&chunk.read())));
        }
        messages
    }

    /// Translate a world change into a message for this client, if it
    /// concerns a chunk the client holds and did not come from this client.
    pub fn on_world_change(&mut self, change: &WorldChange) -> Option<ServerMessage> {
        if change.source == ChangeSource::Player(self.id) {
            return None;
        }
        match change.kind {
            ChangeKind::BlockSet {
                chunk,
                local,
                block,
                metadata,
            } if self.tracked.contains(&chunk) => {
                Some(ServerMessage::ChunkUpdate(ChunkUpdate::new(chunk, local, block, metadata)))
            }
            ChangeKind::ChunkUnloaded(chunk) if self.tracked.remove(&chunk) => {
                Some(ServerMessage::ChunkUnload(chunk.into()))
            }
            _ => None,
        }
    }
}

/// Run one client until it disconnects.
pub async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    let id = state.next_connection_id();
    let metrics = state.world.store().metrics();
    metrics.client_joined();
    tracing::info!("Client {} connected", id);

    let mut changes = state.world.subscribe();
    let mut closing = state.closing();
    let mut session = Session::new(id, Arc::clone(&state));
    if pump(&mut socket, &mut session, &mut changes, &mut closing).await.is_err() {
        tracing::debug!("Client {}: send failed", id);
    }

    metrics.client_left();
    tracing::info!("Client {} disconnected", id);
}

async fn pump(
    socket: &mut WebSocket,
    session: &mut Session,
    changes: &mut broadcast::Receiver<WorldChange>,
    closing: &mut watch::Receiver<bool>,
) -> Result<(), ()> {
    if *closing.borrow() {
        return Ok(());
    }
    for message in session.greeting() {
        send_message(socket, &message).await?;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        for reply in session.handle_text(&text).await {
                            send_message(socket, &reply).await?;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        send_message(socket, &ServerMessage::error("binary frames are not supported")).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {} // ping/pong frames are answered by axum
                    Some(Err(e)) => {
                        tracing::debug!("Client {}: socket error: {}", session.id(), e);
                        return Ok(());
                    }
                }
            }

            change = changes.recv() => {
                match change {
                    Ok(change) => {
                        if let Some(message) = session.on_world_change(&change) {
                            send_message(socket, &message).await?;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Client {} lagged, {} world changes dropped; resending its chunks", session.id(), missed);
                        for message in session.resync().await {
                            send_message(socket, &message).await?;
                        }
                    }
                    Err(RecvError::Closed) => return Ok(()),
                }
            }

            _ = closing.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let text = match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode server message: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await.map_err(|_| ())
}
