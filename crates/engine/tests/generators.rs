//! Generator contract tests: determinism, seeds, and name lookup.

use voxelsrv_engine::generator::{FlatGenerator, GeneratorTable, NoiseGenerator, TerrainBlocks, WorldGenerator};
use voxelsrv_engine::world::block::BlockId;
use voxelsrv_engine::world::chunk::volume;
use voxelsrv_engine::world::position::ChunkPos;

const BLOCKS: TerrainBlocks = TerrainBlocks {
    stone: BlockId(1),
    dirt: BlockId(2),
    grass: BlockId(3),
};

#[test]
fn noise_generation_is_deterministic() {
    let a = NoiseGenerator::new(1234, BLOCKS);
    let b = NoiseGenerator::new(1234, BLOCKS);
    for pos in [ChunkPos::new(0, 0), ChunkPos::new(-5, 17)] {
        let first = a.generate_chunk(pos, 16, 128);
        let again = a.generate_chunk(pos, 16, 128);
        let other_instance = b.generate_chunk(pos, 16, 128);
        assert_eq!(first.blocks(), again.blocks());
        assert_eq!(first.blocks(), other_instance.blocks());
    }
}

#[test]
fn different_seeds_give_different_terrain() {
    let a = NoiseGenerator::new(1, BLOCKS).generate_chunk(ChunkPos::new(3, 3), 16, 128);
    let b = NoiseGenerator::new(2, BLOCKS).generate_chunk(ChunkPos::new(3, 3), 16, 128);
    assert_ne!(a.blocks(), b.blocks());
}

#[test]
fn flat_generation_is_deterministic_and_position_independent() {
    let generator = FlatGenerator::new(BLOCKS);
    let a = generator.generate_chunk(ChunkPos::new(0, 0), 8, 96);
    let b = generator.generate_chunk(ChunkPos::new(-40, 12), 8, 96);
    assert_eq!(a.blocks(), b.blocks());
    assert_eq!(a.blocks().len(), volume(8, 96));
    assert_eq!(b.pos(), ChunkPos::new(-40, 12));
}

#[test]
fn standard_table_resolves_builtin_names() {
    let table = GeneratorTable::standard();
    assert_eq!(table.names(), vec!["flat", "noise"]);

    let flat = table.create("flat", 0, BLOCKS).unwrap();
    assert_eq!(flat.name(), "flat");
    let noise = table.create("noise", 99, BLOCKS).unwrap();
    assert_eq!(noise.name(), "noise");

    assert!(table.create("amplified", 0, BLOCKS).is_none());
}

#[test]
fn registering_replaces_existing_factory() {
    fn always_flat(_seed: i64, blocks: TerrainBlocks) -> Box<dyn WorldGenerator> {
        Box::new(FlatGenerator::new(blocks).with_ground_level(1))
    }

    let mut table = GeneratorTable::standard();
    assert!(!table.register("custom", always_flat));
    assert!(table.register("noise", always_flat));
    assert_eq!(table.create("noise", 5, BLOCKS).unwrap().name(), "flat");
}
