//! Named worlds: creation, loading, unloading.
//!
//! Each world lives in its own directory under the worlds root and owns one
//! [`ChunkStore`]. At most one store exists per world name in a process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use tokio::task::JoinSet;

use voxelsrv_engine::generator::{GeneratorFactory, GeneratorTable, TerrainBlocks};
use voxelsrv_engine::world::ChunkHandle;
use voxelsrv_engine::world::block::BlockId;
use voxelsrv_engine::world::chunk::{DEFAULT_CHUNK_SIZE, DEFAULT_HEIGHT};
use voxelsrv_engine::world::position::{BlockPos, ChunkPos};

use crate::chunk_store::{ChunkStore, FlushReport, StoreSettings};
use crate::event_bus::{self, ChangeKind, ChangeSource, WorldChange};
use crate::persistence::{self, DiskStorage, JsonPaletteStore, WorldMetadata};
use crate::registry::{Palette, PaletteStore};

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world '{0}' already exists")]
    AlreadyExists(String),
    #[error("world '{0}' is already loaded")]
    AlreadyLoaded(String),
    #[error("world '{0}' not found")]
    NotFound(String),
    #[error("unknown generator '{0}'")]
    UnknownGenerator(String),
    #[error("invalid world config: {0}")]
    InvalidConfig(String),
    #[error("world metadata at {path}: {source:#}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("block palette at {path}: {source:#}")]
    Palette {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parameters for a new world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldConfig {
    pub name: String,
    pub seed: i64,
    pub generator: String,
    pub chunk_size: usize,
    pub height: usize,
}

impl WorldConfig {
    pub fn new(name: impl Into<String>, generator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: 0,
            generator: generator.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_dimensions(mut self, chunk_size: usize, height: usize) -> Self {
        self.chunk_size = chunk_size;
        self.height = height;
        self
    }
}

/// A loaded world.
pub struct World {
    metadata: WorldMetadata,
    dir: PathBuf,
    store: ChunkStore,
    bus: broadcast::Sender<WorldChange>,
}

impl World {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &WorldMetadata {
        &self.metadata
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn chunk_size(&self) -> usize {
        self.metadata.chunk_size
    }

    pub fn height(&self) -> usize {
        self.metadata.world_height
    }

    pub async fn get_chunk(&self, pos: ChunkPos) -> ChunkHandle {
        self.store.get_chunk(pos).await
    }

    /// Block at a world position. Positions above or below the world read as air.
    pub async fn get_block(&self, pos: BlockPos) -> BlockId {
        match pos.local(self.chunk_size(), self.height()) {
            Some(local) => self.store.get_block(pos.chunk(self.chunk_size()), local).await,
            None => BlockId::AIR,
        }
    }

    /// Set a block at a world position and tell subscribers. Returns `false`
    /// for positions above or below the world.
    pub async fn set_block(&self, pos: BlockPos, block: BlockId) -> bool {
        let Some(local) = pos.local(self.chunk_size(), self.height()) else {
            return false;
        };
        let chunk = pos.chunk(self.chunk_size());
        if !self.store.set_block(chunk, local, block).await {
            return false;
        }
        event_bus::publish(
            &self.bus,
            WorldChange {
                source: ChangeSource::Server,
                kind: ChangeKind::BlockSet {
                    chunk,
                    local,
                    block,
                    metadata: None,
                },
            },
        );
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorldChange> {
        self.bus.subscribe()
    }

    pub fn publish(&self, change: WorldChange) {
        event_bus::publish(&self.bus, change);
    }

    pub async fn shutdown(&self) -> FlushReport {
        self.store.shutdown().await
    }
}

pub struct WorldManager {
    worlds_dir: PathBuf,
    generators: GeneratorTable,
    terrain: TerrainBlocks,
    settings: StoreSettings,
    /// Written into every world directory this manager opens.
    palette: Option<Palette>,
    /// Per-name lifecycle locks. Create, load and unload of one name run
    /// one at a time, so a world is fully flushed before it can reopen.
    lifecycle: DashMap<String, Arc<Mutex<()>>>,
    loaded: Mutex<HashMap<String, Arc<World>>>,
}

impl WorldManager {
    /// Manager with the built-in `flat` and `noise` generators.
    pub fn new(worlds_dir: impl Into<PathBuf>, terrain: TerrainBlocks, settings: StoreSettings) -> Self {
        Self {
            worlds_dir: worlds_dir.into(),
            generators: GeneratorTable::standard(),
            terrain,
            settings,
            palette: None,
            lifecycle: DashMap::new(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Keep a copy of the block palette in each world directory.
    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = Some(palette);
        self
    }

    /// Register (or replace) a generator factory.
    pub fn register_generator(&mut self, name: &str, factory: GeneratorFactory) {
        self.generators.register(name, factory);
    }

    pub fn generator_names(&self) -> Vec<&str> {
        self.generators.names()
    }

    pub fn world_dir(&self, name: &str) -> PathBuf {
        self.worlds_dir.join(name)
    }

    /// Whether a world with this name has been created on disk.
    pub fn exists(&self, name: &str) -> bool {
        persistence::metadata_path(&self.world_dir(name)).is_file()
    }

    pub async fn create_world(&self, config: WorldConfig) -> Result<Arc<World>, WorldError> {
        validate_name(&config.name)?;
        validate_dimensions(config.chunk_size, config.height)?;

        let _lifecycle = self.lock_name(&config.name).await;
        if self.live(&config.name).await.is_some() {
            return Err(WorldError::AlreadyLoaded(config.name));
        }
        if self.exists(&config.name) {
            return Err(WorldError::AlreadyExists(config.name));
        }
        if !self.generators.contains(&config.generator) {
            return Err(WorldError::UnknownGenerator(config.generator));
        }

        let dir = self.world_dir(&config.name);
        let metadata = WorldMetadata::new(
            &config.name,
            config.seed,
            &config.generator,
            config.chunk_size,
            config.height,
        );
        let (task_dir, task_metadata) = (dir.clone(), metadata.clone());
        blocking(move || -> Result<(), WorldError> {
            std::fs::create_dir_all(task_dir.join(persistence::CHUNKS_DIR))?;
            persistence::write_metadata(&task_dir, &task_metadata).map_err(|source| WorldError::Metadata {
                path: persistence::metadata_path(&task_dir),
                source,
            })
        })
        .await?;

        let world = self.open(metadata, dir).await?;
        tracing::info!(
            "Created world '{}' (generator {}, seed {}, {}x{}x{} chunks)",
            config.name,
            config.generator,
            config.seed,
            config.chunk_size,
            config.height,
            config.chunk_size
        );
        self.loaded.lock().await.insert(config.name, Arc::clone(&world));
        Ok(world)
    }

    /// Load a world from disk. A world that is already loaded is returned
    /// as is; one that is being unloaded is reopened after its final flush.
    pub async fn load_world(&self, name: &str) -> Result<Arc<World>, WorldError> {
        validate_name(name)?;

        let _lifecycle = self.lock_name(name).await;
        if let Some(world) = self.live(name).await {
            return Ok(world);
        }
        if !self.exists(name) {
            return Err(WorldError::NotFound(name.to_string()));
        }

        let dir = self.world_dir(name);
        let task_dir = dir.clone();
        let metadata = blocking(move || {
            persistence::read_metadata(&task_dir).map_err(|source| WorldError::Metadata {
                path: persistence::metadata_path(&task_dir),
                source,
            })
        })
        .await?;
        validate_dimensions(metadata.chunk_size, metadata.world_height)?;
        if metadata.name != name {
            tracing::warn!("World directory '{}' holds metadata named '{}'", name, metadata.name);
        }

        let world = self.open(metadata, dir).await?;
        tracing::info!(
            "Loaded world '{}' (generator {}, seed {})",
            name,
            world.metadata.generator_name,
            world.metadata.seed
        );
        self.loaded.lock().await.insert(name.to_string(), Arc::clone(&world));
        Ok(world)
    }

    /// Load the world if it exists, otherwise create it from `config`.
    pub async fn load_or_create(&self, config: WorldConfig) -> Result<Arc<World>, WorldError> {
        if self.exists(&config.name) {
            self.load_world(&config.name).await
        } else {
            self.create_world(config).await
        }
    }

    /// Flush a world and drop it from the loaded set. The name stays taken
    /// until the flush is done. Returns `false` if it was not loaded.
    pub async fn unload_world(&self, name: &str) -> bool {
        let _lifecycle = self.lock_name(name).await;
        let Some(world) = self.loaded.lock().await.get(name).cloned() else {
            tracing::warn!("Unload requested for world '{}', which is not loaded", name);
            return false;
        };
        world.shutdown().await;
        self.loaded.lock().await.remove(name);
        tracing::info!("Unloaded world '{}'", name);
        true
    }

    /// Shut down every loaded world concurrently.
    pub async fn shutdown_all(&self) {
        let mut names: Vec<String> = self.loaded.lock().await.keys().cloned().collect();
        if names.is_empty() {
            return;
        }
        // Sorted, so two concurrent callers take the name locks in the same order.
        names.sort();
        let mut guards = Vec::with_capacity(names.len());
        for name in &names {
            guards.push(self.lock_name(name).await);
        }

        let worlds: Vec<Arc<World>> = {
            let loaded = self.loaded.lock().await;
            names.iter().filter_map(|name| loaded.get(name).cloned()).collect()
        };
        tracing::info!("Shutting down {} worlds...", worlds.len());
        let mut tasks = JoinSet::new();
        for world in worlds {
            tasks.spawn(async move {
                let report = world.shutdown().await;
                (world.name().to_string(), report)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, report)) if report.failed > 0 => {
                    tracing::error!("World '{}': {} chunks could not be saved at shutdown", name, report.failed)
                }
                Ok(_) => {}
                Err(e) => tracing::error!("World shutdown task failed: {}", e),
            }
        }

        let mut loaded = self.loaded.lock().await;
        for name in &names {
            loaded.remove(name);
        }
    }

    /// A loaded world that is still accepting edits.
    pub async fn get(&self, name: &str) -> Option<Arc<World>> {
        self.loaded
            .lock()
            .await
            .get(name)
            .filter(|world| !world.store.is_closed())
            .cloned()
    }

    pub async fn loaded_worlds(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn lock_name(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self.lifecycle.entry(name.to_string()).or_default().value().clone();
        lock.lock_owned().await
    }

    /// The loaded world under `name`. Callers hold the name's lifecycle
    /// lock. A closed store left behind by an interrupted unload is dropped.
    async fn live(&self, name: &str) -> Option<Arc<World>> {
        let mut loaded = self.loaded.lock().await;
        match loaded.get(name) {
            Some(world) if !world.store.is_closed() => Some(Arc::clone(world)),
            Some(_) => {
                tracing::warn!("World '{}' was left half unloaded, reopening", name);
                loaded.remove(name);
                None
            }
            None => None,
        }
    }

    async fn open(&self, metadata: WorldMetadata, dir: PathBuf) -> Result<Arc<World>, WorldError> {
        let generator = self
            .generators
            .create(&metadata.generator_name, metadata.seed, self.terrain)
            .ok_or_else(|| WorldError::UnknownGenerator(metadata.generator_name.clone()))?;

        if let Some(palette) = self.palette.clone() {
            let task_dir = dir.clone();
            blocking(move || {
                JsonPaletteStore::in_world(&task_dir)
                    .save(&palette)
                    .map_err(|source| WorldError::Palette {
                        path: task_dir.join(persistence::PALETTE_FILE),
                        source,
                    })
            })
            .await?;
        }

        let bus = event_bus::channel();
        let store = ChunkStore::new(
            metadata.name.clone(),
            metadata.chunk_size,
            metadata.world_height,
            generator,
            Arc::new(DiskStorage::new(&dir)),
            self.settings,
            bus.clone(),
        );
        store.start_maintenance();
        Ok(Arc::new(World {
            metadata,
            dir,
            store,
            bus,
        }))
    }
}

/// Run filesystem work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, WorldError>
where
    F: FnOnce() -> Result<T, WorldError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorldError::Io(std::io::Error::other(e)))?
}

fn validate_name(name: &str) -> Result<(), WorldError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|c| matches!(c, '/' | '\\' | ':') || c.is_control());
    if bad {
        return Err(WorldError::InvalidConfig(format!("'{}' is not a valid world name", name)));
    }
    Ok(())
}

/// Largest chunk edge length.
pub const MAX_CHUNK_SIZE: usize = 256;
/// Largest world height.
pub const MAX_HEIGHT: usize = 4096;
/// Largest number of blocks in one chunk (32 MiB of block IDs).
pub const MAX_CHUNK_VOLUME: usize = 1 << 24;

fn validate_dimensions(chunk_size: usize, height: usize) -> Result<(), WorldError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(WorldError::InvalidConfig(format!(
            "chunk size {} must be between 1 and {}",
            chunk_size, MAX_CHUNK_SIZE
        )));
    }
    if height == 0 || height > MAX_HEIGHT {
        return Err(WorldError::InvalidConfig(format!(
            "height {} must be between 1 and {}",
            height, MAX_HEIGHT
        )));
    }
    let volume = chunk_size.checked_mul(chunk_size).and_then(|area| area.checked_mul(height));
    match volume {
        Some(volume) if volume <= MAX_CHUNK_VOLUME => Ok(()),
        _ => Err(WorldError::InvalidConfig(format!(
            "{}x{}x{} chunks exceed {} blocks",
            chunk_size, height, chunk_size, MAX_CHUNK_VOLUME
        ))),
    }
}
