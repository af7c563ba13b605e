use super::block::BlockId;
use super::position::{ChunkPos, LocalBlockPos};

/// Default vertical extent of a chunk column.
pub const DEFAULT_HEIGHT: usize = 256;
/// Default horizontal edge length of a chunk column.
pub const DEFAULT_CHUNK_SIZE: usize = 32;

/// Number of blocks in a `chunk_size × chunk_size × height` column.
pub const fn volume(chunk_size: usize, height: usize) -> usize {
    chunk_size * chunk_size * height
}

/// A full chunk column stored as one flat array.
///
/// Blocks are laid out `x + y * size + z * size * height`, so each fixed-`z`
/// slab of `size * height` entries is contiguous. The optional metadata array
/// has the same length and carries packed per-block state (rotation, facing)
/// that this crate moves around but never interprets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    pos: ChunkPos,
    size: usize,
    height: usize,
    blocks: Vec<BlockId>,
    metadata: Option<Vec<u16>>,
}

impl ChunkData {
    pub fn new_filled(pos: ChunkPos, size: usize, height: usize, block: BlockId) -> Self {
        Self {
            pos,
            size,
            height,
            blocks: vec![block; volume(size, height)],
            metadata: None,
        }
    }

    pub fn new_empty(pos: ChunkPos, size: usize, height: usize) -> Self {
        Self::new_filled(pos, size, height, BlockId::AIR)
    }

    /// Build a chunk from existing arrays. Returns `None` if either array does
    /// not hold exactly `size² × height` entries.
    pub fn from_parts(
        pos: ChunkPos,
        size: usize,
        height: usize,
        blocks: Vec<BlockId>,
        metadata: Option<Vec<u16>>,
    ) -> Option<Self> {
        let expected = volume(size, height);
        if blocks.len() != expected {
            return None;
        }
        if metadata.as_ref().is_some_and(|m| m.len() != expected) {
            return None;
        }
        Some(Self {
            pos,
            size,
            height,
            blocks,
            metadata,
        })
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Mutable view of the raw block array, for generators filling whole slabs.
    pub fn blocks_mut(&mut self) -> &mut [BlockId] {
        &mut self.blocks
    }

    pub fn metadata(&self) -> Option<&[u16]> {
        self.metadata.as_deref()
    }

    /// Flat array index of a local position, or `None` if outside the chunk.
    #[inline]
    pub fn index(&self, pos: LocalBlockPos) -> Option<usize> {
        let (x, y, z) = (pos.x as usize, pos.y as usize, pos.z as usize);
        if x >= self.size || z >= self.size || y >= self.height {
            return None;
        }
        Some(x + y * self.size + z * self.size * self.height)
    }

    /// Block at a local position; out-of-range positions read as air.
    pub fn get_block(&self, pos: LocalBlockPos) -> BlockId {
        self.index(pos)
            .map(|i| self.blocks[i])
            .unwrap_or(BlockId::AIR)
    }

    /// Write a block. Returns `false` (and changes nothing) if the position is
    /// outside the chunk.
    pub fn set_block(&mut self, pos: LocalBlockPos, block: BlockId) -> bool {
        match self.index(pos) {
            Some(i) => {
                self.blocks[i] = block;
                true
            }
            None => false,
        }
    }

    pub fn get_metadata(&self, pos: LocalBlockPos) -> u16 {
        match (self.index(pos), &self.metadata) {
            (Some(i), Some(meta)) => meta[i],
            _ => 0,
        }
    }

    /// Write packed metadata, allocating the metadata array on first use.
    pub fn set_metadata(&mut self, pos: LocalBlockPos, value: u16) -> bool {
        let Some(i) = self.index(pos) else {
            return false;
        };
        let len = self.blocks.len();
        self.metadata.get_or_insert_with(|| vec![0; len])[i] = value;
        true
    }

    /// Raw block IDs as `u16`, the form used on the wire and on disk.
    pub fn raw_blocks(&self) -> Vec<u16> {
        self.blocks.iter().map(|b| b.0).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.is_air())
    }
}
