use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Absolute block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl BlockPos {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// The chunk column this block belongs to, for a given horizontal chunk size.
    pub fn chunk(&self, chunk_size: usize) -> ChunkPos {
        let size = chunk_size as i64;
        ChunkPos {
            x: self.x.div_euclid(size) as i32,
            z: self.z.div_euclid(size) as i32,
        }
    }

    /// Position within the chunk. `None` if `y` is outside `0..height`.
    pub fn local(&self, chunk_size: usize, height: usize) -> Option<LocalBlockPos> {
        if self.y < 0 || self.y >= height as i64 {
            return None;
        }
        let size = chunk_size as i64;
        Some(LocalBlockPos {
            x: self.x.rem_euclid(size) as u16,
            y: self.y as u16,
            z: self.z.rem_euclid(size) as u16,
        })
    }
}

/// Chunk column coordinate.
///
/// The canonical map/file key is `"{x},{z}"`, which round-trips exactly
/// through [`ChunkPos::key`] and [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }

    /// World-space block position of this chunk's `(0, y, 0)` corner.
    pub const fn block_origin(&self, chunk_size: usize, y: i64) -> BlockPos {
        BlockPos::new(
            self.x as i64 * chunk_size as i64,
            y,
            self.z as i64 * chunk_size as i64,
        )
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChunkPosError(String);

impl fmt::Display for ParseChunkPosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid chunk key {:?}", self.0)
    }
}

impl std::error::Error for ParseChunkPosError {}

impl FromStr for ChunkPos {
    type Err = ParseChunkPosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseChunkPosError(s.to_string());
        let (x, z) = s.split_once(',').ok_or_else(err)?;
        Ok(Self {
            x: x.parse().map_err(|_| err())?,
            z: z.parse().map_err(|_| err())?,
        })
    }
}

/// Block position local to a chunk (x, z in `0..chunk_size`, y in `0..height`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalBlockPos {
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl LocalBlockPos {
    pub const fn new(x: u16, y: u16, z: u16) -> Self {
        Self { x, y, z }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_key_roundtrip_with_negatives() {
        for pos in [
            ChunkPos::new(0, 0),
            ChunkPos::new(-1, 7),
            ChunkPos::new(i32::MIN, i32::MAX),
        ] {
            let key = pos.key();
            assert_eq!(key.parse::<ChunkPos>().unwrap(), pos, "key {key}");
        }
        assert_eq!(ChunkPos::new(-3, 12).key(), "-3,12");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!("".parse::<ChunkPos>().is_err());
        assert!("1".parse::<ChunkPos>().is_err());
        assert!("1,2,3".parse::<ChunkPos>().is_err());
        assert!("a,b".parse::<ChunkPos>().is_err());
    }

    #[test]
    fn negative_block_positions_floor_into_chunks() {
        let pos = BlockPos::new(-1, 10, -33);
        assert_eq!(pos.chunk(32), ChunkPos::new(-1, -2));
        assert_eq!(pos.local(32, 256), Some(LocalBlockPos::new(31, 10, 31)));
    }

    #[test]
    fn local_rejects_y_outside_height() {
        assert_eq!(BlockPos::new(0, -1, 0).local(32, 256), None);
        assert_eq!(BlockPos::new(0, 256, 0).local(32, 256), None);
        assert!(BlockPos::new(0, 255, 0).local(32, 256).is_some());
    }

    #[test]
    fn block_origin_matches_chunk() {
        let chunk = ChunkPos::new(-2, 3);
        let origin = chunk.block_origin(16, 0);
        assert_eq!(origin, BlockPos::new(-32, 0, 48));
        assert_eq!(origin.chunk(16), chunk);
    }
}
