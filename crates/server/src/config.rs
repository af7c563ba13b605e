//! Server configuration loaded from a TOML file.
//!
//! Every section and key is optional; anything left out takes its default.
//! A missing config file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::chunk_store::StoreSettings;
use crate::world_manager::WorldConfig;

pub const DEFAULT_CONFIG_PATH: &str = "voxelsrv.toml";

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub world: WorldSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".into()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Deserialize)]
pub struct WorldSection {
    #[serde(default = "default_world_name")]
    pub name: String,
    #[serde(default)]
    pub seed: i64,
    #[serde(default = "default_generator")]
    pub generator: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_height")]
    pub height: usize,
    /// Directory holding one sub-directory per world.
    #[serde(default = "default_worlds_dir")]
    pub worlds_dir: PathBuf,
}

fn default_world_name() -> String {
    "world".into()
}

fn default_generator() -> String {
    "flat".into()
}

fn default_chunk_size() -> usize {
    voxelsrv_engine::world::chunk::DEFAULT_CHUNK_SIZE
}

fn default_height() -> usize {
    voxelsrv_engine::world::chunk::DEFAULT_HEIGHT
}

fn default_worlds_dir() -> PathBuf {
    "worlds".into()
}

impl Default for WorldSection {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: 0,
            generator: default_generator(),
            chunk_size: default_chunk_size(),
            height: default_height(),
            worlds_dir: default_worlds_dir(),
        }
    }
}

impl WorldSection {
    pub fn world_config(&self) -> WorldConfig {
        WorldConfig::new(self.name.clone(), self.generator.clone())
            .with_seed(self.seed)
            .with_dimensions(self.chunk_size, self.height)
    }
}

/// Chunk store timers, in seconds.
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_evict_interval")]
    pub evict_interval_secs: u64,
    #[serde(default = "default_max_chunk_age")]
    pub max_chunk_age_secs: u64,
}

fn default_flush_interval() -> u64 {
    30
}

fn default_evict_interval() -> u64 {
    5
}

fn default_max_chunk_age() -> u64 {
    60
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
            evict_interval_secs: default_evict_interval(),
            max_chunk_age_secs: default_max_chunk_age(),
        }
    }
}

impl StorageSection {
    /// Zero intervals are clamped to one second; tokio rejects zero periods.
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            flush_interval: Duration::from_secs(self.flush_interval_secs.max(1)),
            evict_interval: Duration::from_secs(self.evict_interval_secs.max(1)),
            max_chunk_age: Duration::from_secs(self.max_chunk_age_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

impl ServerConfig {
    /// Read `path`, or fall back to defaults if it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Apply `--bind <addr>` and `--world <name>` overrides.
    pub fn apply_args(&mut self, args: &[String]) {
        if let Some(bind) = flag_value(args, "--bind") {
            self.server.bind = bind.to_string();
        }
        if let Some(world) = flag_value(args, "--world") {
            self.world.name = world.to_string();
        }
    }
}

/// Value following `flag` on the command line, if any.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .skip_while(|a| a.as_str() != flag)
        .nth(1)
        .map(String::as_str)
}
