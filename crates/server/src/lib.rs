//! Voxel world server: block registry, per-world chunk stores, world
//! lifecycle, on-disk layout, and the WebSocket chunk protocol.

pub mod block;
pub mod chunk_store;
pub mod config;
pub mod event_bus;
pub mod metrics;
pub mod net;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod world_manager;
