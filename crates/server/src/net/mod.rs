//! WebSocket front end: one [`connection::Session`] per client, all sharing a
//! [`ServerState`].

pub mod connection;
pub mod listener;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::registry::BlockRegistry;
use crate::world_manager::World;

/// State shared by every connection.
pub struct ServerState {
    pub registry: Arc<BlockRegistry>,
    pub world: Arc<World>,
    next_connection_id: AtomicU64,
    closing: watch::Sender<bool>,
}

impl ServerState {
    pub fn new(registry: Arc<BlockRegistry>, world: Arc<World>) -> Self {
        Self {
            registry,
            world,
            next_connection_id: AtomicU64::new(1),
            closing: watch::channel(false).0,
        }
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Tell every connection to close. Connections opened afterwards close
    /// right away.
    pub fn close_sessions(&self) {
        self.closing.send_replace(true);
    }

    pub fn closing(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }
}
