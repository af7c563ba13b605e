//! Deterministic terrain generation.
//!
//! A generator is a pure function from `(chunk, chunk_size, height)` plus its
//! construction-time seed to a fresh [`ChunkData`]. Generators are looked up
//! by name through a [`GeneratorTable`], so a world's stored generator name
//! is resolved once, at world creation or load, not on every chunk.

pub mod flat;
pub mod terrain;

use std::collections::HashMap;

use crate::world::block::BlockId;
use crate::world::chunk::ChunkData;
use crate::world::position::ChunkPos;

pub use flat::FlatGenerator;
pub use terrain::NoiseGenerator;

/// Block IDs the built-in generators place. Resolved from the block registry
/// so generated chunks use whatever IDs the palette assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerrainBlocks {
    pub stone: BlockId,
    pub dirt: BlockId,
    pub grass: BlockId,
}

pub trait WorldGenerator: Send + Sync {
    /// Name this generator is registered under.
    fn name(&self) -> &'static str;

    /// Produce a chunk. Must be byte-identical for identical inputs and seed.
    fn generate_chunk(&self, pos: ChunkPos, chunk_size: usize, height: usize) -> ChunkData;
}

/// Builds a generator for a world from its seed and the resolved terrain blocks.
pub type GeneratorFactory = fn(seed: i64, blocks: TerrainBlocks) -> Box<dyn WorldGenerator>;

/// Name → factory table. Lookups of unknown names fail; there is no default.
#[derive(Clone, Default)]
pub struct GeneratorTable {
    factories: HashMap<String, GeneratorFactory>,
}

impl GeneratorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in `flat` and `noise` generators.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(flat::NAME, flat::factory);
        table.register(terrain::NAME, terrain::factory);
        table
    }

    /// Register a factory. Re-registering a name replaces the previous
    /// factory and returns `true`.
    pub fn register(&mut self, name: impl Into<String>, factory: GeneratorFactory) -> bool {
        let name = name.into();
        let replaced = self.factories.insert(name.clone(), factory).is_some();
        if replaced {
            tracing::warn!("Generator '{}' re-registered, previous factory replaced", name);
        } else {
            tracing::debug!("Registered generator '{}'", name);
        }
        replaced
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the generator registered under `name`.
    pub fn create(&self, name: &str, seed: i64, blocks: TerrainBlocks) -> Option<Box<dyn WorldGenerator>> {
        self.factories.get(name).map(|factory| factory(seed, blocks))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Block for height `y` in a column whose topmost solid block is at
/// `surface - 1`: stone up to five below the surface, then dirt, then a
/// surface block, then air. Works for any `surface`, including ones outside
/// the chunk's height range.
#[inline]
pub(crate) fn layered_block(y: i64, surface: i64, top: BlockId, blocks: &TerrainBlocks) -> BlockId {
    if y < surface - 5 {
        blocks.stone
    } else if y < surface - 1 {
        blocks.dirt
    } else if y == surface - 1 {
        top
    } else {
        BlockId::AIR
    }
}
