//! Noise-based terrain generator.
//!
//! Samples seeded 2D OpenSimplex noise at three scales per column to get a
//! surface height around `BASE_HEIGHT`, then fills the column with stone,
//! dirt, and a grass (above water) or dirt (at or below water) surface.

use noise::{NoiseFn, OpenSimplex};
use rayon::prelude::*;

use super::{TerrainBlocks, WorldGenerator, layered_block};
use crate::world::chunk::ChunkData;
use crate::world::position::ChunkPos;

pub const NAME: &str = "noise";

/// Surface blocks at or above this height are grass; below it they are dirt.
pub const WATER_LEVEL: i64 = 62;
const BASE_HEIGHT: f64 = 64.0;
const HEIGHT_VARIATION: f64 = 32.0;

/// `(frequency, weight)` per octave. Weights sum to 1.
const OCTAVES: [(f64, f64); 3] = [(0.01, 0.6), (0.05, 0.3), (0.1, 0.1)];

pub struct NoiseGenerator {
    noise: OpenSimplex,
    blocks: TerrainBlocks,
}

impl NoiseGenerator {
    pub fn new(seed: i64, blocks: TerrainBlocks) -> Self {
        Self {
            noise: OpenSimplex::new(fold_seed(seed)),
            blocks,
        }
    }

    /// Surface height (first air block) of the column at world `(x, z)`.
    pub fn surface_height(&self, world_x: i64, world_z: i64) -> i64 {
        let combined: f64 = OCTAVES
            .iter()
            .map(|&(freq, weight)| {
                self.noise.get([world_x as f64 * freq, world_z as f64 * freq]) * weight
            })
            .sum();
        (BASE_HEIGHT + combined * HEIGHT_VARIATION).floor() as i64
    }
}

/// Fold a 64-bit world seed into the 32-bit noise seed, keeping both halves.
fn fold_seed(seed: i64) -> u32 {
    let seed = seed as u64;
    (seed ^ (seed >> 32)) as u32
}

pub(super) fn factory(seed: i64, blocks: TerrainBlocks) -> Box<dyn WorldGenerator> {
    Box::new(NoiseGenerator::new(seed, blocks))
}

impl WorldGenerator for NoiseGenerator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn generate_chunk(&self, pos: ChunkPos, chunk_size: usize, height: usize) -> ChunkData {
        let mut chunk = ChunkData::new_empty(pos, chunk_size, height);
        if chunk_size == 0 || height == 0 {
            return chunk;
        }
        let origin = pos.block_origin(chunk_size, 0);
        let blocks = &self.blocks;

        chunk
            .blocks_mut()
            .par_chunks_mut(chunk_size * height)
            .enumerate()
            .for_each(|(z, slab)| {
                for x in 0..chunk_size {
                    let surface = self.surface_height(origin.x + x as i64, origin.z + z as i64);
                    let top = if surface - 1 >= WATER_LEVEL {
                        blocks.grass
                    } else {
                        blocks.dirt
                    };
                    for y in 0..height {
                        slab[x + y * chunk_size] = layered_block(y as i64, surface, top, blocks);
                    }
                }
            });
        chunk
    }
}
