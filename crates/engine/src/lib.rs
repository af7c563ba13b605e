//! Voxel chunk core: block IDs, chunk arrays, chunk cache bookkeeping, and
//! deterministic terrain generators. Contains no I/O.

pub mod generator;
pub mod world;
