//! Staging caches for uncommitted mutations.
//!
//! Sharded uuid-keyed map of small `{vector, ts}` records. The insert
//! cache stores the staged vector; the delete cache stores an empty one.
//! Last writer wins at this layer — the coordinator imposes ordering
//! with its timestamps, not the cache.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

/// A staged mutation record.
#[derive(Debug, Clone, PartialEq)]
pub struct VEntry {
    /// Staged vector; empty for delete records.
    pub vector: Vec<f32>,
    /// Nanosecond timestamp that orders racing mutations on one uuid.
    pub ts: i64,
}

pub struct VCache {
    shards: Vec<RwLock<HashMap<String, VEntry>>>,
    mask: usize,
}

impl Default for VCache {
    fn default() -> Self {
        Self::new(8)
    }
}

impl VCache {
    /// `shard_hint` is rounded up to the next power of two, minimum one.
    pub fn new(shard_hint: usize) -> Self {
        let count = shard_hint.max(1).next_power_of_two();
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
            mask: count - 1,
        }
    }

    fn shard(&self, uuid: &str) -> &RwLock<HashMap<String, VEntry>> {
        let mut hasher = DefaultHasher::new();
        uuid.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.mask]
    }

    pub fn load(&self, uuid: &str) -> Option<VEntry> {
        self.shard(uuid).read().get(uuid).cloned()
    }

    pub fn store(&self, uuid: String, entry: VEntry) {
        self.shard(&uuid).write().insert(uuid, entry);
    }

    pub fn delete(&self, uuid: &str) -> Option<VEntry> {
        self.shard(uuid).write().remove(uuid)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every entry; returning `false` stops the iteration. Each
    /// shard is visited under its own read lock, so entries stored into
    /// an already-visited shard during the walk are not seen — callers
    /// gate on timestamps, not on iteration atomicity.
    pub fn range(&self, mut visitor: impl FnMut(&str, &VEntry) -> bool) {
        for shard in &self.shards {
            let guard = shard.read();
            for (uuid, entry) in guard.iter() {
                if !visitor(uuid, entry) {
                    return;
                }
            }
        }
    }
}
