//! Flat world generator.
//!
//! Every column is identical:
//! - `y < ground - 5`: stone
//! - `ground - 5 <= y < ground - 1`: dirt
//! - `y == ground - 1`: grass
//! - `y >= ground`: air

use rayon::prelude::*;

use super::{TerrainBlocks, WorldGenerator, layered_block};
use crate::world::chunk::ChunkData;
use crate::world::position::ChunkPos;

pub const NAME: &str = "flat";

/// Default ground level: the first air block above the grass layer.
pub const DEFAULT_GROUND_LEVEL: i64 = 64;

pub struct FlatGenerator {
    ground_level: i64,
    blocks: TerrainBlocks,
}

impl FlatGenerator {
    pub fn new(blocks: TerrainBlocks) -> Self {
        Self {
            ground_level: DEFAULT_GROUND_LEVEL,
            blocks,
        }
    }

    pub fn with_ground_level(mut self, ground_level: i64) -> Self {
        self.ground_level = ground_level;
        self
    }

    pub fn ground_level(&self) -> i64 {
        self.ground_level
    }
}

pub(super) fn factory(_seed: i64, blocks: TerrainBlocks) -> Box<dyn WorldGenerator> {
    Box::new(FlatGenerator::new(blocks))
}

impl WorldGenerator for FlatGenerator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn generate_chunk(&self, pos: ChunkPos, chunk_size: usize, height: usize) -> ChunkData {
        let mut chunk = ChunkData::new_empty(pos, chunk_size, height);
        if chunk_size == 0 || height == 0 {
            return chunk;
        }
        let blocks = &self.blocks;
        let ground = self.ground_level;

        // One fixed-z slab per task; slabs are contiguous in the array.
        chunk
            .blocks_mut()
            .par_chunks_mut(chunk_size * height)
            .for_each(|slab| {
                for y in 0..height {
                    let block = layered_block(y as i64, ground, blocks.grass, blocks);
                    let row = y * chunk_size;
                    slab[row..row + chunk_size].fill(block);
                }
            });
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block::BlockId;
    use crate::world::position::LocalBlockPos;

    fn blocks() -> TerrainBlocks {
        TerrainBlocks {
            stone: BlockId(1),
            dirt: BlockId(2),
            grass: BlockId(3),
        }
    }

    #[test]
    fn layer_layout() {
        let generator = FlatGenerator::new(blocks());
        let chunk = generator.generate_chunk(ChunkPos::new(0, 0), 4, 80);

        let at = |y| chunk.get_block(LocalBlockPos::new(1, y, 2));
        assert_eq!(at(0), BlockId(1));
        assert_eq!(at(58), BlockId(1));
        assert_eq!(at(59), BlockId(2));
        assert_eq!(at(62), BlockId(2));
        assert_eq!(at(63), BlockId(3));
        assert_eq!(at(64), BlockId::AIR);
        assert_eq!(at(79), BlockId::AIR);
    }

    #[test]
    fn height_below_ground_level_does_not_overrun() {
        let generator = FlatGenerator::new(blocks());
        let chunk = generator.generate_chunk(ChunkPos::new(3, -3), 4, 3);
        assert_eq!(chunk.blocks().len(), 4 * 4 * 3);
        assert!(chunk.blocks().iter().all(|&b| b == BlockId(1)));
    }

    #[test]
    fn custom_ground_level() {
        let generator = FlatGenerator::new(blocks()).with_ground_level(2);
        let chunk = generator.generate_chunk(ChunkPos::new(0, 0), 2, 4);
        let at = |y| chunk.get_block(LocalBlockPos::new(0, y, 0));
        assert_eq!(at(0), BlockId(2));
        assert_eq!(at(1), BlockId(3));
        assert_eq!(at(2), BlockId::AIR);
    }
}
