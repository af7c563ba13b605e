//! Lock-free per-world counters.
//!
//! The chunk store and connections bump these with relaxed atomics; nothing
//! on the hot path ever blocks on them. Read them through [`WorldMetrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::Instant;

pub struct WorldMetrics {
    chunks_generated: AtomicU64,
    chunks_loaded: AtomicU64,
    load_failures: AtomicU64,
    chunks_saved: AtomicU64,
    save_failures: AtomicU64,
    chunks_evicted: AtomicU64,
    block_updates: AtomicU64,

    // Gauges
    clients_connected: AtomicU64,

    started_at: Instant,
}

impl WorldMetrics {
    pub fn new() -> Self {
        Self {
            chunks_generated: AtomicU64::new(0),
            chunks_loaded: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            chunks_saved: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            chunks_evicted: AtomicU64::new(0),
            block_updates: AtomicU64::new(0),
            clients_connected: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn chunk_generated(&self) {
        self.chunks_generated.fetch_add(1, Relaxed);
    }

    pub fn chunk_loaded(&self) {
        self.chunks_loaded.fetch_add(1, Relaxed);
    }

    pub fn load_failed(&self) {
        self.load_failures.fetch_add(1, Relaxed);
    }

    pub fn record_flush(&self, saved: u64, failed: u64) {
        self.chunks_saved.fetch_add(saved, Relaxed);
        self.save_failures.fetch_add(failed, Relaxed);
    }

    pub fn record_evictions(&self, evicted: u64) {
        self.chunks_evicted.fetch_add(evicted, Relaxed);
    }

    pub fn block_updated(&self) {
        self.block_updates.fetch_add(1, Relaxed);
    }

    pub fn client_joined(&self) {
        self.clients_connected.fetch_add(1, Relaxed);
    }

    pub fn client_left(&self) {
        self.clients_connected.fetch_sub(1, Relaxed);
    }

    pub fn snapshot(&self, chunks_cached: u64, chunks_dirty: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            chunks_cached,
            chunks_dirty,
            chunks_generated: self.chunks_generated.load(Relaxed),
            chunks_loaded: self.chunks_loaded.load(Relaxed),
            load_failures: self.load_failures.load(Relaxed),
            chunks_saved: self.chunks_saved.load(Relaxed),
            save_failures: self.save_failures.load(Relaxed),
            chunks_evicted: self.chunks_evicted.load(Relaxed),
            block_updates: self.block_updates.load(Relaxed),
            clients: self.clients_connected.load(Relaxed),
        }
    }
}

impl Default for WorldMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable point-in-time view of a world's counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub chunks_cached: u64,
    pub chunks_dirty: u64,
    pub chunks_generated: u64,
    pub chunks_loaded: u64,
    pub load_failures: u64,
    pub chunks_saved: u64,
    pub save_failures: u64,
    pub chunks_evicted: u64,
    pub block_updates: u64,
    pub clients: u64,
}
