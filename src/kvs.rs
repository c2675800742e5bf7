//! Bidirectional uuid ↔ oid map.
//!
//! One logical entity with two hash indices behind a single lock, so the
//! forward and reverse views can never disagree. Readers share the lock;
//! writes are short (two hash-map operations).
//!
//! Oid 0 is the engine's "unassigned" marker and is silently rejected on
//! insert — it must never be stored.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Default)]
struct Indices {
    forward: HashMap<String, u32>,
    reverse: HashMap<u32, String>,
}

#[derive(Default)]
pub struct BidiMap {
    inner: RwLock<Indices>,
}

impl BidiMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uuid: &str) -> Option<u32> {
        self.inner.read().forward.get(uuid).copied()
    }

    pub fn get_inverse(&self, oid: u32) -> Option<String> {
        self.inner.read().reverse.get(&oid).cloned()
    }

    /// Upsert the pair. Any previous binding of either the uuid or the
    /// oid is removed from both indices first.
    pub fn set(&self, uuid: String, oid: u32) {
        if oid == 0 {
            return;
        }
        let mut inner = self.inner.write();
        if let Some(old_oid) = inner.forward.remove(&uuid) {
            inner.reverse.remove(&old_oid);
        }
        if let Some(old_uuid) = inner.reverse.remove(&oid) {
            inner.forward.remove(&old_uuid);
        }
        inner.forward.insert(uuid.clone(), oid);
        inner.reverse.insert(oid, uuid);
    }

    /// Remove both directions; returns the oid the uuid was bound to.
    pub fn delete(&self, uuid: &str) -> Option<u32> {
        let mut inner = self.inner.write();
        let oid = inner.forward.remove(uuid)?;
        inner.reverse.remove(&oid);
        Some(oid)
    }

    pub fn len(&self) -> usize {
        self.inner.read().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every pair under the read lock; returning `false` stops the
    /// iteration. The view is a point-in-time snapshot of the whole map.
    pub fn range(&self, mut visitor: impl FnMut(&str, u32) -> bool) {
        let inner = self.inner.read();
        for (uuid, &oid) in &inner.forward {
            if !visitor(uuid, oid) {
                break;
            }
        }
    }
}
