//! On-disk world layout.
//!
//! ```text
//! <worlds_dir>/<name>/world.json        world metadata
//! <worlds_dir>/<name>/blocks.json       block palette (name → ID)
//! <worlds_dir>/<name>/chunks/{x},{z}.chk
//! ```
//!
//! A `.chk` file is a zlib stream of:
//!
//! ```text
//! flags: u8                      bit 0 = metadata present
//! blocks: [u16 LE; size²·height]
//! metadata: [u16 LE; size²·height]   only if flagged
//! ```
//!
//! Every file is written to a `.tmp` sibling first and renamed into place, so
//! a crash mid-write leaves the previous version intact.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use voxelsrv_engine::world::block::BlockId;
use voxelsrv_engine::world::chunk::{ChunkData, volume};
use voxelsrv_engine::world::position::ChunkPos;

use crate::registry::{Palette, PaletteStore};

pub const WORLD_FILE: &str = "world.json";
pub const PALETTE_FILE: &str = "blocks.json";
pub const CHUNKS_DIR: &str = "chunks";
pub const CHUNK_EXTENSION: &str = "chk";

/// Metadata layout written by this version.
pub const SCHEMA_VERSION: u32 = 2;

const FLAG_METADATA: u8 = 0b0000_0001;

// ── World metadata ───────────────────────────────────────────────────────────

/// Contents of `world.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldMetadata {
    pub name: String,
    pub seed: i64,
    pub generator_name: String,
    pub chunk_size: usize,
    pub world_height: usize,
    /// Unix time in milliseconds.
    pub created_at: u64,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl WorldMetadata {
    pub fn new(name: &str, seed: i64, generator_name: &str, chunk_size: usize, world_height: usize) -> Self {
        Self {
            name: name.to_string(),
            seed,
            generator_name: generator_name.to_string(),
            chunk_size,
            world_height,
            created_at: unix_millis(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Current unix time in milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn metadata_path(world_dir: &Path) -> PathBuf {
    world_dir.join(WORLD_FILE)
}

pub fn read_metadata(world_dir: &Path) -> Result<WorldMetadata> {
    let path = metadata_path(world_dir);
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn write_metadata(world_dir: &Path, metadata: &WorldMetadata) -> Result<()> {
    let json = serde_json::to_vec_pretty(metadata)?;
    write_atomic(&metadata_path(world_dir), &json)
}

// ── Block palette ────────────────────────────────────────────────────────────

/// [`PaletteStore`] backed by a JSON object `{ "name": id, ... }`.
pub struct JsonPaletteStore {
    path: PathBuf,
}

impl JsonPaletteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_world(world_dir: &Path) -> Self {
        Self::new(world_dir.join(PALETTE_FILE))
    }
}

impl PaletteStore for JsonPaletteStore {
    fn load(&self) -> Result<Option<Palette>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let palette = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(palette))
    }

    fn save(&self, palette: &Palette) -> Result<()> {
        let json = serde_json::to_vec_pretty(palette)?;
        write_atomic(&self.path, &json)?;
        tracing::info!("Saved block palette ({} entries) to {}", palette.len(), self.path.display());
        Ok(())
    }
}

// ── Chunk codec ──────────────────────────────────────────────────────────────

pub fn encode_chunk(chunk: &ChunkData) -> Result<Vec<u8>> {
    let n = chunk.blocks().len();
    let metadata = chunk.metadata();
    let mut raw = Vec::with_capacity(1 + n * 2 * if metadata.is_some() { 2 } else { 1 });
    raw.push(if metadata.is_some() { FLAG_METADATA } else { 0 });
    for block in chunk.blocks() {
        raw.extend_from_slice(&block.0.to_le_bytes());
    }
    if let Some(metadata) = metadata {
        for value in metadata {
            raw.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

/// Decode a `.chk` payload for a chunk of the given dimensions. Any size
/// mismatch is an error, never a silently truncated chunk.
pub fn decode_chunk(pos: ChunkPos, chunk_size: usize, height: usize, bytes: &[u8]) -> Result<ChunkData> {
    let mut raw = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut raw)
        .context("inflating chunk data")?;

    let Some((&flags, body)) = raw.split_first() else {
        bail!("empty chunk payload");
    };
    let n = volume(chunk_size, height);
    let has_metadata = flags & FLAG_METADATA != 0;
    let expected = n * 2 * if has_metadata { 2 } else { 1 };
    if body.len() != expected {
        bail!(
            "chunk payload is {} bytes, expected {} for {}x{}x{}",
            body.len(),
            expected,
            chunk_size,
            height,
            chunk_size
        );
    }

    let mut words = body
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    let blocks: Vec<BlockId> = words.by_ref().take(n).map(BlockId).collect();
    let metadata = has_metadata.then(|| words.collect::<Vec<u16>>());

    ChunkData::from_parts(pos, chunk_size, height, blocks, metadata)
        .context("chunk payload does not match chunk dimensions")
}

// ── Chunk storage ────────────────────────────────────────────────────────────

/// Blocking byte store for encoded chunks. Called from blocking threads only.
pub trait ChunkStorage: Send + Sync {
    /// `Ok(None)` if the chunk was never saved.
    fn read(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>>;
    fn write(&self, pos: ChunkPos, bytes: &[u8]) -> Result<()>;
}

/// One file per chunk under `<world>/chunks/`.
pub struct DiskStorage {
    chunks_dir: PathBuf,
}

impl DiskStorage {
    pub fn new(world_dir: &Path) -> Self {
        Self {
            chunks_dir: world_dir.join(CHUNKS_DIR),
        }
    }

    pub fn chunk_path(&self, pos: ChunkPos) -> PathBuf {
        self.chunks_dir.join(chunk_file_name(pos))
    }
}

impl ChunkStorage for DiskStorage {
    fn read(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>> {
        let path = self.chunk_path(pos);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn write(&self, pos: ChunkPos, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.chunk_path(pos), bytes)
    }
}

/// `{x},{z}.chk`
pub fn chunk_file_name(pos: ChunkPos) -> String {
    format!("{}.{}", pos.key(), CHUNK_EXTENSION)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxelsrv_engine::world::position::LocalBlockPos;

    fn temp_world(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("voxelsrv_persist_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_chunk(with_metadata: bool) -> ChunkData {
        let mut chunk = ChunkData::new_empty(ChunkPos::new(-3, 7), 4, 8);
        chunk.set_block(LocalBlockPos::new(0, 0, 0), BlockId(1));
        chunk.set_block(LocalBlockPos::new(3, 7, 3), BlockId(513));
        chunk.set_block(LocalBlockPos::new(1, 2, 3), BlockId(u16::MAX));
        if with_metadata {
            chunk.set_metadata(LocalBlockPos::new(1, 2, 3), 0xBEEF);
        }
        chunk
    }

    #[test]
    fn chunk_codec_preserves_blocks_and_metadata() {
        for with_metadata in [false, true] {
            let chunk = sample_chunk(with_metadata);
            let bytes = encode_chunk(&chunk).unwrap();
            let decoded = decode_chunk(chunk.pos(), 4, 8, &bytes).unwrap();
            assert_eq!(decoded, chunk);
        }
    }

    #[test]
    fn decode_rejects_wrong_dimensions() {
        let bytes = encode_chunk(&sample_chunk(false)).unwrap();
        assert!(decode_chunk(ChunkPos::new(-3, 7), 4, 16, &bytes).is_err());
        assert!(decode_chunk(ChunkPos::new(-3, 7), 2, 8, &bytes).is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_chunk(ChunkPos::new(0, 0), 4, 8, b"not zlib at all").is_err());

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[]).unwrap();
        let empty = encoder.finish().unwrap();
        assert!(decode_chunk(ChunkPos::new(0, 0), 4, 8, &empty).is_err());
    }

    #[test]
    fn disk_storage_round_trip_and_missing() {
        let dir = temp_world("disk");
        let storage = DiskStorage::new(&dir);
        let pos = ChunkPos::new(-1, 2);

        assert!(storage.read(pos).unwrap().is_none());
        storage.write(pos, b"abc").unwrap();
        assert_eq!(storage.read(pos).unwrap().as_deref(), Some(&b"abc"[..]));
        assert!(dir.join("chunks").join("-1,2.chk").exists());
        assert!(!dir.join("chunks").join("-1,2.tmp").exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn metadata_uses_camel_case_fields() {
        let dir = temp_world("meta");
        let meta = WorldMetadata::new("w1", 42, "flat", 32, 256);
        write_metadata(&dir, &meta).unwrap();

        let text = fs::read_to_string(dir.join(WORLD_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["generatorName"], "flat");
        assert_eq!(json["chunkSize"], 32);
        assert_eq!(json["worldHeight"], 256);
        assert_eq!(json["schemaVersion"], 2);
        assert!(json["createdAt"].as_u64().unwrap() > 0);

        assert_eq!(read_metadata(&dir).unwrap(), meta);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn palette_store_missing_then_saved() {
        let dir = temp_world("palette");
        let store = JsonPaletteStore::in_world(&dir);
        assert!(store.load().unwrap().is_none());

        let palette = Palette::from([("air".to_string(), 0), ("stone".to_string(), 1)]);
        store.save(&palette).unwrap();
        assert_eq!(store.load().unwrap(), Some(palette));
        let _ = fs::remove_dir_all(&dir);
    }
}
