//! Process-wide counters
//!
//! Every counter is an atomic so sessions running on any runtime worker can
//! bump them without coordination. Readers take a [`StatsSnapshot`], which is
//! never used to write back.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the per-session scratch pools, see [`crate::scratch::Scratch`]
#[derive(Debug, Default)]
pub struct MemoryStats {
    pub(crate) pools_allocated: AtomicU64,
    pub(crate) pools_freed: AtomicU64,
    pub(crate) bytes_allocated: AtomicU64,
    pub(crate) chunks_allocated: AtomicU64,
    pub(crate) shared_chunks_allocated: AtomicU64,
    pub(crate) chunks_freed: AtomicU64,
}

#[derive(Debug, Default)]
pub struct Stats {
    messages_scanned: AtomicU64,
    messages_learned: AtomicU64,
    connections_count: AtomicU64,
    control_connections_count: AtomicU64,
    memory: MemoryStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_scanned: u64,
    pub messages_learned: u64,
    pub connections_count: u64,
    pub control_connections_count: u64,
    pub pools_allocated: u64,
    pub pools_freed: u64,
    pub bytes_allocated: u64,
    pub chunks_allocated: u64,
    pub shared_chunks_allocated: u64,
    pub chunks_freed: u64,
}

impl Stats {
    pub fn record_learned(&self) {
        self.messages_learned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control_connection(&self) {
        self.control_connections_count
            .fetch_add(1, Ordering::Relaxed);
    }

    pub const fn memory(&self) -> &MemoryStats {
        &self.memory
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        StatsSnapshot {
            messages_scanned: load(&self.messages_scanned),
            messages_learned: load(&self.messages_learned),
            connections_count: load(&self.connections_count),
            control_connections_count: load(&self.control_connections_count),
            pools_allocated: load(&self.memory.pools_allocated),
            pools_freed: load(&self.memory.pools_freed),
            bytes_allocated: load(&self.memory.bytes_allocated),
            chunks_allocated: load(&self.memory.chunks_allocated),
            shared_chunks_allocated: load(&self.memory.shared_chunks_allocated),
            chunks_freed: load(&self.memory.chunks_freed),
        }
    }
}
