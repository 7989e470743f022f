//! Per-session scratch pool
//!
//! Every connection owns exactly one [`Scratch`]. Transient copies a session
//! makes (command arguments, learn parameters, payload buffers) are taken
//! through it so their footprint shows up in the process-wide
//! [`MemoryStats`](crate::stats::MemoryStats). The pool is released when it
//! is dropped, which ownership guarantees happens exactly once.

use std::sync::{Arc, atomic::Ordering};

use crate::stats::Stats;

#[derive(Debug)]
pub struct Scratch {
    stats: Arc<Stats>,
    chunks: u64,
    bytes: u64,
}

impl Scratch {
    pub fn new(stats: Arc<Stats>) -> Self {
        stats
            .memory()
            .pools_allocated
            .fetch_add(1, Ordering::Relaxed);

        Self {
            stats,
            chunks: 0,
            bytes: 0,
        }
    }

    fn account(&mut self, len: usize) {
        let len = len as u64;
        self.chunks += 1;
        self.bytes += len;

        let memory = self.stats.memory();
        memory.chunks_allocated.fetch_add(1, Ordering::Relaxed);
        memory.bytes_allocated.fetch_add(len, Ordering::Relaxed);
    }

    /// Copy a string into the pool
    pub fn strdup(&mut self, value: &str) -> String {
        self.account(value.len());
        value.to_owned()
    }

    /// Account for a buffer the session has taken ownership of
    pub fn adopt(&mut self, buffer: Vec<u8>) -> Vec<u8> {
        self.account(buffer.len());
        buffer
    }

    /// Account for an allocation that is shared with another owner
    pub fn share(&mut self, len: usize) {
        self.account(len);
        self.stats
            .memory()
            .shared_chunks_allocated
            .fetch_add(1, Ordering::Relaxed);
    }

    pub const fn chunks(&self) -> u64 {
        self.chunks
    }

    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Release the pool; equivalent to dropping it
    pub fn release(self) {
        tracing::trace!(
            chunks = self.chunks,
            bytes = self.bytes,
            "Releasing session scratch"
        );
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let memory = self.stats.memory();
        memory.pools_freed.fetch_add(1, Ordering::Relaxed);
        memory
            .chunks_freed
            .fetch_add(self.chunks, Ordering::Relaxed);
    }
}
