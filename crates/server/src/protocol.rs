//! Chunk wire protocol.
//!
//! Every message is a JSON object `{"type": "<snake_case>", "data": {...}}`
//! with camelCase fields inside `data`. Chunk block arrays travel as plain
//! `u16` arrays in the chunk's `x + y·size + z·size·height` order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use voxelsrv_engine::world::block::BlockId;
use voxelsrv_engine::world::chunk::ChunkData;
use voxelsrv_engine::world::position::{ChunkPos, LocalBlockPos};

use crate::block::{BlockType, ItemDefinition};
use crate::persistence::unix_millis;
use crate::registry::BlockRegistry;

/// Protocol revision sent in `welcome`.
pub const PROTOCOL_VERSION: u32 = 2;

/// Registry format revision sent in `registry_sync`, for client-side caching.
pub const REGISTRY_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("position ({x}, {y}, {z}) is outside the chunk")]
    OutOfRange { x: i64, y: i64, z: i64 },
    #[error("unknown block ID {0}")]
    UnknownBlock(u16),
}

// ── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub chunk_x: i32,
    pub chunk_z: i32,
}

impl ChunkRequest {
    pub fn pos(&self) -> ChunkPos {
        ChunkPos::new(self.chunk_x, self.chunk_z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDataMessage {
    pub chunk_x: i32,
    pub chunk_z: i32,
    pub size: usize,
    pub height: usize,
    pub data: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<u16>>,
    #[serde(default)]
    pub compressed: bool,
}

impl ChunkDataMessage {
    pub fn from_chunk(chunk: &ChunkData) -> Self {
        Self {
            chunk_x: chunk.pos().x,
            chunk_z: chunk.pos().z,
            size: chunk.size(),
            height: chunk.height(),
            data: chunk.raw_blocks(),
            metadata: chunk.metadata().map(<[u16]>::to_vec),
            compressed: false,
        }
    }
}

/// One block change, in either direction. Coordinates are chunk-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUpdate {
    pub chunk_x: i32,
    pub chunk_z: i32,
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub block_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<u16>,
}

/// A client update that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidUpdate {
    pub chunk: ChunkPos,
    pub local: LocalBlockPos,
    pub block: BlockId,
    pub metadata: Option<u16>,
}

impl ChunkUpdate {
    pub fn new(chunk: ChunkPos, local: LocalBlockPos, block: BlockId, metadata: Option<u16>) -> Self {
        Self {
            chunk_x: chunk.x,
            chunk_z: chunk.z,
            x: local.x as i64,
            y: local.y as i64,
            z: local.z as i64,
            block_id: block.0,
            metadata,
        }
    }

    /// Check bounds against the world's chunk dimensions and the block ID
    /// against the registry.
    pub fn validate(
        &self,
        chunk_size: usize,
        height: usize,
        registry: &BlockRegistry,
    ) -> Result<ValidUpdate, ProtocolError> {
        let in_range = |v: i64, limit: usize| v >= 0 && (v as u64) < limit as u64;
        if !(in_range(self.x, chunk_size) && in_range(self.y, height) && in_range(self.z, chunk_size)) {
            return Err(ProtocolError::OutOfRange {
                x: self.x,
                y: self.y,
                z: self.z,
            });
        }
        let block = BlockId(self.block_id);
        if !registry.is_known_id(block) {
            return Err(ProtocolError::UnknownBlock(self.block_id));
        }
        Ok(ValidUpdate {
            chunk: ChunkPos::new(self.chunk_x, self.chunk_z),
            local: LocalBlockPos::new(self.x as u16, self.y as u16, self.z as u16),
            block,
            metadata: self.metadata,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUnload {
    pub chunk_x: i32,
    pub chunk_z: i32,
}

impl From<ChunkPos> for ChunkUnload {
    fn from(pos: ChunkPos) -> Self {
        Self {
            chunk_x: pos.x,
            chunk_z: pos.z,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub message: String,
    pub protocol_version: u32,
    pub world: String,
    pub chunk_size: usize,
    pub height: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySync {
    pub blocks: Vec<BlockType>,
    pub items: Vec<ItemDefinition>,
    pub version: String,
}

impl RegistrySync {
    pub fn from_registry(registry: &BlockRegistry) -> Self {
        Self {
            blocks: registry.blocks().cloned().collect(),
            items: registry.items().cloned().collect(),
            version: REGISTRY_VERSION.to_string(),
        }
    }
}

/// Payload of `ping` and `pong`: sender's unix time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Heartbeat {
    #[serde(default)]
    pub time: u64,
}

impl Heartbeat {
    pub fn now() -> Self {
        Self { time: unix_millis() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

// ── Envelopes ────────────────────────────────────────────────────────────────

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    ChunkRequest(ChunkRequest),
    ChunkUpdate(ChunkUpdate),
    Ping(Heartbeat),
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(Welcome),
    RegistrySync(RegistrySync),
    ChunkData(ChunkDataMessage),
    ChunkUpdate(ChunkUpdate),
    ChunkUnload(ChunkUnload),
    Pong(Heartbeat),
    Error(ErrorMessage),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorMessage {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
