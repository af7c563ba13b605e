//! Per-world chunk store: cache, load-or-generate, flush and eviction.
//!
//! A chunk is served from the cache if present, otherwise loaded from
//! storage, otherwise generated. Concurrent requests for the same missing
//! chunk share one load. Edits mark a chunk dirty; dirty chunks are written
//! back by [`ChunkStore::flush_dirty`] and are never evicted. Two maintenance
//! tasks run the flush and the eviction sweep on timers until
//! [`ChunkStore::shutdown`]. A store that has been shut down rejects edits.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{OnceCell, broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use voxelsrv_engine::generator::WorldGenerator;
use voxelsrv_engine::world::block::BlockId;
use voxelsrv_engine::world::chunk::ChunkData;
use voxelsrv_engine::world::position::{ChunkPos, LocalBlockPos};
use voxelsrv_engine::world::{ChunkCache, ChunkHandle};

use crate::event_bus::{self, ChangeKind, ChangeSource, WorldChange};
use crate::metrics::{MetricsSnapshot, WorldMetrics};
use crate::persistence::{ChunkStorage, decode_chunk, encode_chunk};

/// Timer settings for a store's maintenance tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub flush_interval: Duration,
    pub evict_interval: Duration,
    /// A chunk untouched for this long may be evicted.
    pub max_chunk_age: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            evict_interval: Duration::from_secs(5),
            max_chunk_age: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("world '{0}' is shut down")]
    Closed(String),
}

/// Outcome of one flush pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: usize,
}

struct Maintenance {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct ChunkStore {
    inner: Arc<StoreInner>,
    maintenance: Mutex<Option<Maintenance>>,
}

struct StoreInner {
    world: String,
    chunk_size: usize,
    height: usize,
    settings: StoreSettings,
    cache: ChunkCache,
    generator: Arc<dyn WorldGenerator>,
    storage: Arc<dyn ChunkStorage>,
    /// Loads in flight. Every caller for the same coordinate awaits the same cell.
    pending: DashMap<ChunkPos, Arc<OnceCell<ChunkHandle>>>,
    /// One flush at a time, so an older snapshot can never overwrite a newer one.
    flush_lock: tokio::sync::Mutex<()>,
    /// `false` once shutdown has begun. Edits hold the read side while they
    /// run, so shutdown's final flush starts only after the last edit landed.
    open: RwLock<bool>,
    metrics: WorldMetrics,
    bus: broadcast::Sender<WorldChange>,
}

impl ChunkStore {
    pub fn new(
        world: impl Into<String>,
        chunk_size: usize,
        height: usize,
        generator: Box<dyn WorldGenerator>,
        storage: Arc<dyn ChunkStorage>,
        settings: StoreSettings,
        bus: broadcast::Sender<WorldChange>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                world: world.into(),
                chunk_size,
                height,
                settings,
                cache: ChunkCache::new(),
                generator: Arc::from(generator),
                storage,
                pending: DashMap::new(),
                flush_lock: tokio::sync::Mutex::new(()),
                open: RwLock::new(true),
                metrics: WorldMetrics::new(),
                bus,
            }),
            maintenance: Mutex::new(None),
        }
    }

    /// Start the periodic flush and eviction tasks. Must be called from
    /// within a tokio runtime. Calling it again while they run does nothing.
    pub fn start_maintenance(&self) {
        let mut slot = self.maintenance.lock().expect("maintenance lock poisoned");
        if slot.is_some() {
            return;
        }
        let (shutdown, rx) = watch::channel(false);
        let tasks = vec![
            spawn_flush_loop(Arc::clone(&self.inner), rx.clone()),
            spawn_evict_loop(Arc::clone(&self.inner), rx),
        ];
        *slot = Some(Maintenance { shutdown, tasks });
        tracing::debug!(
            "World '{}': maintenance started (flush every {:?}, evict every {:?}, max age {:?})",
            self.inner.world,
            self.inner.settings.flush_interval,
            self.inner.settings.evict_interval,
            self.inner.settings.max_chunk_age
        );
    }

    /// Cached chunk, loading or generating it first if needed. While a chunk
    /// stays cached every caller gets the same handle.
    pub async fn get_chunk(&self, pos: ChunkPos) -> ChunkHandle {
        self.inner.get_chunk(pos).await
    }

    pub async fn get_block(&self, pos: ChunkPos, local: LocalBlockPos) -> BlockId {
        self.get_chunk(pos).await.read().get_block(local)
    }

    /// Write one block, loading the chunk if needed. Returns `false` if
    /// `local` lies outside the chunk or the store is shut down.
    pub async fn set_block(&self, pos: ChunkPos, local: LocalBlockPos, block: BlockId) -> bool {
        matches!(self.apply_update(pos, local, block, None).await, Ok(true))
    }

    /// Write a block and, optionally, its metadata as one edit. `Ok(false)`
    /// means `local` lies outside the chunk.
    pub async fn apply_update(
        &self,
        pos: ChunkPos,
        local: LocalBlockPos,
        block: BlockId,
        metadata: Option<u16>,
    ) -> Result<bool, StoreError> {
        loop {
            self.ensure_open()?;
            let handle = self.get_chunk(pos).await;
            let edited = {
                let open = self.inner.open.read().expect("store gate poisoned");
                if !*open {
                    return Err(self.closed());
                }
                handle.edit(|chunk| {
                    if !chunk.set_block(local, block) {
                        return false;
                    }
                    if let Some(value) = metadata {
                        chunk.set_metadata(local, value);
                    }
                    true
                })
            };
            // `None`: evicted between lookup and edit; fetch it again.
            if let Some(changed) = edited {
                if changed {
                    self.inner.metrics.block_updated();
                }
                return Ok(changed);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        !*self.inner.open.read().expect("store gate poisoned")
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(self.closed());
        }
        Ok(())
    }

    fn closed(&self) -> StoreError {
        StoreError::Closed(self.inner.world.clone())
    }

    /// Write every dirty chunk to storage. Chunks whose save fails stay dirty.
    pub async fn flush_dirty(&self) -> FlushReport {
        self.inner.flush_dirty().await
    }

    /// Evict chunks idle for longer than the configured max age. Stale dirty
    /// chunks are saved first; any that fail to save stay cached.
    pub async fn evict_stale(&self) -> usize {
        self.inner.evict_stale().await
    }

    /// Exempt a cached chunk from eviction. Returns `false` if not cached.
    pub fn set_force_loaded(&self, pos: ChunkPos, force: bool) -> bool {
        self.inner.cache.set_force_loaded(&pos, force)
    }

    /// Close the store to edits, stop maintenance and wait for it, then
    /// flush. Safe to call more than once.
    pub async fn shutdown(&self) -> FlushReport {
        // Waits out any edit still holding the read side.
        *self.inner.open.write().expect("store gate poisoned") = false;
        let maintenance = self.maintenance.lock().expect("maintenance lock poisoned").take();
        if let Some(Maintenance { shutdown, tasks }) = maintenance {
            let _ = shutdown.send(true);
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!("World '{}': maintenance task ended abnormally: {}", self.inner.world, e);
                }
            }
        }
        let report = self.flush_dirty().await;
        tracing::info!(
            "World '{}': chunk store shut down ({} saved, {} failed, {} still dirty)",
            self.inner.world,
            report.saved,
            report.failed,
            self.inner.cache.dirty_count()
        );
        report
    }

    pub fn is_cached(&self, pos: ChunkPos) -> bool {
        self.inner.cache.contains(&pos)
    }

    pub fn cached_count(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.inner.cache.dirty_count()
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    pub fn height(&self) -> usize {
        self.inner.height
    }

    pub fn metrics(&self) -> &WorldMetrics {
        &self.inner.metrics
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .metrics
            .snapshot(self.cached_count() as u64, self.dirty_count() as u64)
    }
}

impl Drop for ChunkStore {
    fn drop(&mut self) {
        // Tasks hold their own reference to the store internals; tell them to stop.
        if let Ok(mut slot) = self.maintenance.lock() {
            if let Some(maintenance) = slot.take() {
                let _ = maintenance.shutdown.send(true);
            }
        }
    }
}

impl StoreInner {
    async fn get_chunk(&self, pos: ChunkPos) -> ChunkHandle {
        loop {
            if let Some(handle) = self.cache.get(&pos) {
                if !handle.is_evicted() {
                    return handle;
                }
            }
            let cell = self.pending.entry(pos).or_default().value().clone();
            let handle = Arc::clone(cell.get_or_init(|| self.materialize(pos)).await);
            self.pending.remove_if(&pos, |_, current| Arc::ptr_eq(current, &cell));
            if !handle.is_evicted() {
                return handle;
            }
        }
    }

    async fn materialize(&self, pos: ChunkPos) -> ChunkHandle {
        // A load that finished just before this cell was created.
        if let Some(handle) = self.cache.get(&pos) {
            return handle;
        }
        let (chunk, dirty) = self.load_or_generate(pos).await;
        self.cache.insert(chunk, dirty)
    }

    /// Stored chunk (clean) or a freshly generated one (dirty). A chunk that
    /// cannot be read or decoded counts as absent.
    async fn load_or_generate(&self, pos: ChunkPos) -> (ChunkData, bool) {
        let (chunk_size, height) = (self.chunk_size, self.height);

        let storage = Arc::clone(&self.storage);
        let loaded = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<ChunkData>> {
            match storage.read(pos)? {
                Some(bytes) => decode_chunk(pos, chunk_size, height, &bytes).map(Some),
                None => Ok(None),
            }
        })
        .await;
        match loaded {
            Ok(Ok(Some(chunk))) => {
                self.metrics.chunk_loaded();
                tracing::debug!("World '{}': loaded chunk {}", self.world, pos);
                return (chunk, false);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                self.metrics.load_failed();
                tracing::warn!("World '{}': unreadable chunk {}, regenerating: {:#}", self.world, pos, e);
            }
            Err(e) => {
                self.metrics.load_failed();
                tracing::warn!("World '{}': load task for chunk {} failed, regenerating: {}", self.world, pos, e);
            }
        }

        let generator = Arc::clone(&self.generator);
        match tokio::task::spawn_blocking(move || generator.generate_chunk(pos, chunk_size, height)).await {
            Ok(chunk) => {
                self.metrics.chunk_generated();
                tracing::debug!("World '{}': generated chunk {}", self.world, pos);
                (chunk, true)
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                // Runtime shutting down. Serve air but never persist it.
                tracing::error!("World '{}': generator task for chunk {} cancelled: {}", self.world, pos, e);
                (ChunkData::new_empty(pos, chunk_size, height), false)
            }
        }
    }

    async fn flush_dirty(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        let dirty = self.cache.dirty_entries();
        self.save_entries(dirty).await
    }

    /// Save each entry on a blocking thread. A save marks exactly the
    /// revision it snapshotted, so edits made meanwhile stay dirty.
    /// Callers hold `flush_lock`.
    async fn save_entries(&self, entries: Vec<(ChunkPos, ChunkHandle)>) -> FlushReport {
        let mut report = FlushReport::default();
        if entries.is_empty() {
            return report;
        }

        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for (pos, handle) in entries {
            let storage = Arc::clone(&self.storage);
            tasks.spawn_blocking(move || {
                let (chunk, revision) = handle.snapshot();
                let result = encode_chunk(&chunk).and_then(|bytes| storage.write(pos, &bytes));
                (pos, handle, revision, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, handle, revision, Ok(()))) => {
                    handle.mark_saved(revision);
                    report.saved += 1;
                }
                Ok((pos, _, _, Err(e))) => {
                    tracing::error!("World '{}': failed to save chunk {}: {:#}", self.world, pos, e);
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::error!("World '{}': save task failed: {}", self.world, e);
                    report.failed += 1;
                }
            }
        }

        self.metrics.record_flush(report.saved as u64, report.failed as u64);
        tracing::info!(
            "World '{}': flushed {} chunks ({} failed) in {:?}",
            self.world,
            report.saved,
            report.failed,
            started.elapsed()
        );
        report
    }

    async fn evict_stale(&self) -> usize {
        let max_age = self.settings.max_chunk_age;
        let stale = self.cache.stale_entries(max_age);
        if stale.is_empty() {
            return 0;
        }

        let dirty: Vec<_> = stale.iter().filter(|(_, handle)| handle.is_dirty()).cloned().collect();
        if !dirty.is_empty() {
            let _guard = self.flush_lock.lock().await;
            self.save_entries(dirty).await;
        }

        // The cache re-checks dirtiness at removal, so a failed save or a
        // fresh edit keeps the chunk.
        let evicted: Vec<ChunkPos> = stale
            .into_iter()
            .map(|(pos, _)| pos)
            .filter(|pos| self.cache.try_evict(pos, max_age))
            .collect();

        for &pos in &evicted {
            event_bus::publish(
                &self.bus,
                WorldChange {
                    source: ChangeSource::Store,
                    kind: ChangeKind::ChunkUnloaded(pos),
                },
            );
        }
        self.metrics.record_evictions(evicted.len() as u64);
        if !evicted.is_empty() {
            tracing::debug!(
                "World '{}': evicted {} chunks, {} cached",
                self.world,
                evicted.len(),
                self.cache.len()
            );
        }
        evicted.len()
    }
}

// ── Maintenance loops ────────────────────────────────────────────────────────

fn spawn_flush_loop(inner: Arc<StoreInner>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(inner.settings.flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // first tick is immediate, skip it
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    inner.flush_dirty().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

fn spawn_evict_loop(inner: Arc<StoreInner>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(inner.settings.evict_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    inner.evict_stale().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}
