//! Per-key write serialization.
//!
//! A fixed set of mutexes; a key always maps to the same shard, so two writers
//! for one content hash never overlap. Unrelated keys rarely share a shard and
//! at worst wait on each other briefly.

use std::sync::{Mutex, MutexGuard};

const DEFAULT_SHARDS: usize = 64;

pub(crate) struct KeyLocks {
    shards: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub(crate) fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1)).map(|_| Mutex::new(())).collect();
        Self { shards }
    }

    /// Block until `key` is free and hold it until the guard drops.
    pub(crate) fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let shard = &self.shards[self.shard_for(key)];
        // The mutex guards no data, so a panic in a previous holder leaves nothing torn.
        shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn shard_for(&self, key: &str) -> usize {
        // FNV-1a 64-bit
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in key.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.shards.len() as u64) as usize
    }
}
