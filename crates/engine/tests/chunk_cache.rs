//! Cache bookkeeping tests: identity, dirty revisions, and eviction rules.
//! All block values are opaque `BlockId`s.

use std::sync::Arc;
use std::time::Duration;

use voxelsrv_engine::world::ChunkCache;
use voxelsrv_engine::world::block::BlockId;
use voxelsrv_engine::world::chunk::ChunkData;
use voxelsrv_engine::world::position::{ChunkPos, LocalBlockPos};

fn chunk(x: i32, z: i32) -> ChunkData {
    ChunkData::new_empty(ChunkPos::new(x, z), 4, 8)
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[test]
fn repeated_gets_share_one_instance() {
    let cache = ChunkCache::new();
    let inserted = cache.insert(chunk(0, 0), false);
    let a = cache.get(&ChunkPos::new(0, 0)).unwrap();
    let b = cache.get(&ChunkPos::new(0, 0)).unwrap();
    assert!(Arc::ptr_eq(&inserted, &a));
    assert!(Arc::ptr_eq(&a, &b));

    a.edit(|c| c.set_block(LocalBlockPos::new(1, 1, 1), BlockId(4)));
    assert_eq!(b.read().get_block(LocalBlockPos::new(1, 1, 1)), BlockId(4));
}

#[test]
fn second_insert_keeps_existing_entry() {
    let cache = ChunkCache::new();
    let first = cache.insert(chunk(1, 1), false);
    first.edit(|c| c.set_block(LocalBlockPos::new(0, 0, 0), BlockId(9)));

    let second = cache.insert(chunk(1, 1), true);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.read().get_block(LocalBlockPos::new(0, 0, 0)), BlockId(9));
    assert_eq!(cache.len(), 1);
}

// ---------------------------------------------------------------------------
// Dirty tracking
// ---------------------------------------------------------------------------

#[test]
fn generated_chunks_start_dirty_loaded_chunks_clean() {
    let cache = ChunkCache::new();
    assert!(cache.insert(chunk(0, 0), true).is_dirty());
    assert!(!cache.insert(chunk(0, 1), false).is_dirty());
    assert_eq!(cache.dirty_count(), 1);
}

#[test]
fn edit_marks_dirty_only_when_changed() {
    let cache = ChunkCache::new();
    let entry = cache.insert(chunk(0, 0), false);

    assert_eq!(entry.edit(|c| c.set_block(LocalBlockPos::new(9, 0, 0), BlockId(1))), Some(false));
    assert!(!entry.is_dirty());

    assert_eq!(entry.edit(|c| c.set_block(LocalBlockPos::new(0, 0, 0), BlockId(1))), Some(true));
    assert!(entry.is_dirty());
}

#[test]
fn save_of_older_revision_keeps_newer_edit_dirty() {
    let cache = ChunkCache::new();
    let entry = cache.insert(chunk(0, 0), false);
    entry.edit(|c| c.set_block(LocalBlockPos::new(0, 0, 0), BlockId(1)));

    let (snapshot, revision) = entry.snapshot();
    assert_eq!(snapshot.get_block(LocalBlockPos::new(0, 0, 0)), BlockId(1));

    // An edit lands while the snapshot is being written.
    entry.edit(|c| c.set_block(LocalBlockPos::new(1, 0, 0), BlockId(2)));
    entry.mark_saved(revision);
    assert!(entry.is_dirty());

    let (_, revision) = entry.snapshot();
    entry.mark_saved(revision);
    assert!(!entry.is_dirty());
}

// ---------------------------------------------------------------------------
// Eviction
// ---------------------------------------------------------------------------

#[test]
fn dirty_chunks_are_never_evicted() {
    let cache = ChunkCache::new();
    let entry = cache.insert(chunk(0, 0), true);
    assert!(!cache.try_evict(&ChunkPos::new(0, 0), Duration::ZERO));
    assert!(cache.contains(&ChunkPos::new(0, 0)));
    assert!(!entry.is_evicted());
}

#[test]
fn clean_stale_chunk_is_evicted_and_rejects_late_edits() {
    let cache = ChunkCache::new();
    let entry = cache.insert(chunk(0, 0), false);
    assert!(cache.try_evict(&ChunkPos::new(0, 0), Duration::ZERO));
    assert!(!cache.contains(&ChunkPos::new(0, 0)));
    assert!(entry.is_evicted());
    assert_eq!(entry.edit(|c| c.set_block(LocalBlockPos::new(0, 0, 0), BlockId(3))), None);
}

#[test]
fn recently_used_chunks_are_kept() {
    let cache = ChunkCache::new();
    cache.insert(chunk(0, 0), false);
    assert!(cache.stale_entries(Duration::from_secs(60)).is_empty());
    assert!(!cache.try_evict(&ChunkPos::new(0, 0), Duration::from_secs(60)));
}

#[test]
fn force_loaded_chunks_are_kept() {
    let cache = ChunkCache::new();
    cache.insert(chunk(2, 2), false);
    assert!(cache.set_force_loaded(&ChunkPos::new(2, 2), true));
    assert!(cache.stale_entries(Duration::ZERO).is_empty());
    assert!(!cache.try_evict(&ChunkPos::new(2, 2), Duration::ZERO));

    assert!(cache.set_force_loaded(&ChunkPos::new(2, 2), false));
    assert!(cache.try_evict(&ChunkPos::new(2, 2), Duration::ZERO));
    assert!(!cache.set_force_loaded(&ChunkPos::new(2, 2), true));
}
