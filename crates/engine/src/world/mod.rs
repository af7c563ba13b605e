pub mod block;
pub mod chunk;
pub mod position;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

use chunk::ChunkData;
use dashmap::DashMap;
use position::ChunkPos;

/// One cached chunk plus its bookkeeping.
///
/// Dirtiness is tracked as a pair of revisions rather than a flag: every edit
/// bumps `revision` while holding the chunk's write lock, and a successful
/// save records the revision it wrote in `saved`. The chunk is dirty while
/// `revision > saved`, so a save that raced with a later edit can never
/// clear the later edit's dirtiness.
pub struct CacheEntry {
    chunk: RwLock<ChunkData>,
    revision: AtomicU64,
    saved: AtomicU64,
    last_access: Mutex<Instant>,
    force_loaded: AtomicBool,
    /// Set (under the chunk write lock) when the entry leaves the cache.
    evicted: AtomicBool,
}

impl CacheEntry {
    fn new(chunk: ChunkData, dirty: bool) -> Self {
        Self {
            chunk: RwLock::new(chunk),
            revision: AtomicU64::new(u64::from(dirty)),
            saved: AtomicU64::new(0),
            last_access: Mutex::new(Instant::now()),
            force_loaded: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
        }
    }

    /// Shared read access to the chunk data.
    pub fn read(&self) -> RwLockReadGuard<'_, ChunkData> {
        self.chunk.read().expect("chunk lock poisoned")
    }

    /// Apply an edit under the chunk's write lock.
    ///
    /// The closure returns whether it changed anything; if so the entry is
    /// marked dirty before the lock is released. Returns `None` if the entry
    /// was evicted, in which case the caller must fetch the chunk again.
    pub fn edit<F>(&self, f: F) -> Option<bool>
    where
        F: FnOnce(&mut ChunkData) -> bool,
    {
        let mut chunk = self.chunk.write().expect("chunk lock poisoned");
        if self.evicted.load(Ordering::Acquire) {
            return None;
        }
        let changed = f(&mut chunk);
        if changed {
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        drop(chunk);
        self.touch();
        Some(changed)
    }

    /// Consistent copy of the chunk together with the revision it reflects.
    pub fn snapshot(&self) -> (ChunkData, u64) {
        let chunk = self.chunk.read().expect("chunk lock poisoned");
        let revision = self.revision.load(Ordering::Acquire);
        (chunk.clone(), revision)
    }

    /// Record that `revision` has been durably written.
    pub fn mark_saved(&self, revision: u64) {
        self.saved.fetch_max(revision, Ordering::AcqRel);
    }

    pub fn is_dirty(&self) -> bool {
        self.revision.load(Ordering::Acquire) > self.saved.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        *self.last_access.lock().expect("access lock poisoned") = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock().expect("access lock poisoned"))
    }

    pub fn is_force_loaded(&self) -> bool {
        self.force_loaded.load(Ordering::Acquire)
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }
}

/// Shared handle to a cached chunk. Every caller asking for the same
/// coordinate while it stays cached gets a clone of the same `Arc`.
pub type ChunkHandle = Arc<CacheEntry>;

/// In-memory chunk cache for one world. Thread-safe, lock-sharded by chunk.
///
/// This is pure bookkeeping: loading, generating and saving chunks is the
/// caller's job. The cache only guarantees that a dirty chunk can never be
/// evicted and that an edit can never land on an evicted entry.
pub struct ChunkCache {
    chunks: DashMap<ChunkPos, ChunkHandle>,
}

impl ChunkCache {
    pub fn new() -> Self {
        Self {
            chunks: DashMap::new(),
        }
    }

    /// Look up a cached chunk, refreshing its last-access time.
    pub fn get(&self, pos: &ChunkPos) -> Option<ChunkHandle> {
        let entry = self.chunks.get(pos).map(|e| Arc::clone(e.value()))?;
        entry.touch();
        Some(entry)
    }

    /// Insert a freshly loaded (`dirty = false`) or generated (`dirty = true`)
    /// chunk. If the coordinate is already cached the existing entry wins and
    /// is returned, so identity is preserved.
    pub fn insert(&self, chunk: ChunkData, dirty: bool) -> ChunkHandle {
        let pos = chunk.pos();
        let entry = self
            .chunks
            .entry(pos)
            .or_insert_with(|| Arc::new(CacheEntry::new(chunk, dirty)));
        entry.touch();
        Arc::clone(entry.value())
    }

    pub fn contains(&self, pos: &ChunkPos) -> bool {
        self.chunks.contains_key(pos)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.chunks.iter().filter(|e| e.is_dirty()).count()
    }

    /// All entries currently dirty. Handles are cloned out so no shard lock
    /// is held while the caller does I/O.
    pub fn dirty_entries(&self) -> Vec<(ChunkPos, ChunkHandle)> {
        self.chunks
            .iter()
            .filter(|e| e.is_dirty())
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect()
    }

    /// Entries idle for at least `max_age` that are not force-loaded.
    pub fn stale_entries(&self, max_age: Duration) -> Vec<(ChunkPos, ChunkHandle)> {
        let now = Instant::now();
        self.chunks
            .iter()
            .filter(|e| !e.is_force_loaded() && e.idle_for(now) >= max_age)
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect()
    }

    /// Remove a chunk if it is clean, still stale, not force-loaded, and no
    /// edit is in progress. Returns whether it was removed.
    ///
    /// Dirtiness is checked at removal time, not from an earlier snapshot.
    pub fn try_evict(&self, pos: &ChunkPos, max_age: Duration) -> bool {
        let now = Instant::now();
        self.chunks
            .remove_if(pos, |_, entry| {
                if entry.is_force_loaded() || entry.idle_for(now) < max_age {
                    return false;
                }
                // Holding the write lock excludes a concurrent edit between
                // the dirty check and the evicted flag.
                let Ok(_guard) = entry.chunk.try_write() else {
                    return false;
                };
                if entry.is_dirty() {
                    return false;
                }
                entry.evicted.store(true, Ordering::Release);
                true
            })
            .is_some()
    }

    /// Exempt (or stop exempting) a cached chunk from eviction.
    /// Returns `false` if the chunk is not cached.
    pub fn set_force_loaded(&self, pos: &ChunkPos, force: bool) -> bool {
        match self.chunks.get(pos) {
            Some(entry) => {
                entry.force_loaded.store(force, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new()
    }
}
