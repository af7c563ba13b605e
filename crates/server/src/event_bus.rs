//! Per-world change bus.
//!
//! Every accepted block edit and every chunk eviction is published as a
//! [`WorldChange`] on the world's `tokio::sync::broadcast` channel. Each
//! connection subscribes and forwards the changes that concern chunks its
//! client holds, except changes it originated itself.

use tokio::sync::broadcast;
use voxelsrv_engine::world::block::BlockId;
use voxelsrv_engine::world::position::{ChunkPos, LocalBlockPos};

/// Capacity of each world's broadcast channel. A subscriber that falls this
/// far behind skips ahead and resends its client the chunks it holds.
pub const BUS_CAPACITY: usize = 256;

/// Where a change originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeSource {
    /// A client connection (identified by connection ID).
    Player(u64),
    /// The chunk store's own maintenance.
    Store,
    /// Server-side code calling the world API directly.
    Server,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    BlockSet {
        chunk: ChunkPos,
        local: LocalBlockPos,
        block: BlockId,
        metadata: Option<u16>,
    },
    ChunkUnloaded(ChunkPos),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorldChange {
    pub source: ChangeSource,
    pub kind: ChangeKind,
}

pub fn channel() -> broadcast::Sender<WorldChange> {
    broadcast::channel(BUS_CAPACITY).0
}

/// Publish a change. Having no subscribers is normal and not an error.
pub fn publish(bus: &broadcast::Sender<WorldChange>, change: WorldChange) {
    let _ = bus.send(change);
}
