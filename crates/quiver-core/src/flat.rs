//! Slab-backed exact-scan index with a pending pool.
//!
//! The slab assigns object ids (`oid = slot + 1`; 0 is never handed out)
//! and keeps two populations per slot: *pending* vectors that were bulk
//! inserted but not yet built, and *committed* vectors that the scan
//! snapshot covers. [`FlatIndex::create_index`] promotes pending slots and
//! rebuilds the snapshot; until then, pending vectors are readable through
//! [`FlatIndex::get_vector`] but invisible to [`FlatIndex::search`].
//!
//! Mutations and searches synchronize on one internal `RwLock`, so the
//! engine stays memory-safe even if the caller violates the single-flight
//! contract; it just blocks.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::distance::{l2_norm, DistanceKind};

/// File name of the engine snapshot inside the index directory.
pub const INDEX_FILE_NAME: &str = "quiver-flat.vidx";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector contains a non-finite value")]
    InvalidValue,

    #[error("invalid dimension: {0}")]
    InvalidDimension(usize),

    #[error("unknown object id: {0}")]
    UnknownObjectId(u32),

    #[error("unknown object ids: {0:?}")]
    UnknownObjectIds(Vec<u32>),

    #[error("unsupported distance type: {0}")]
    UnsupportedDistanceType(String),

    #[error("unsupported object type: {0}")]
    UnsupportedObjectType(String),

    #[error("engine is closed")]
    Closed,

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Element type stored by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Float32,
}

impl std::str::FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float" | "float32" | "f32" => Ok(Self::Float32),
            other => Err(other.to_string()),
        }
    }
}

/// Construction options for [`FlatIndex`]. The engine stores f32
/// elements only; callers validate their object-type strings against
/// [`ObjectKind`] before construction.
#[derive(Debug, Clone)]
pub struct FlatIndexOptions {
    /// Directory the snapshot file lives in; `None` means in-memory only.
    pub path: Option<PathBuf>,
    pub dimension: usize,
    pub distance: DistanceKind,
    /// Upper bound on how many vectors one write-lock acquisition admits.
    pub bulk_insert_chunk_size: usize,
}

impl FlatIndexOptions {
    pub fn new(dimension: usize) -> Self {
        Self {
            path: None,
            dimension,
            distance: DistanceKind::L2,
            bulk_insert_chunk_size: 100,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_distance(mut self, distance: DistanceKind) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_bulk_insert_chunk_size(mut self, size: usize) -> Self {
        self.bulk_insert_chunk_size = size;
        self
    }
}

/// A search result row: engine-internal id plus distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub oid: u32,
    pub distance: f32,
}

#[derive(Serialize, Deserialize)]
struct SlotData {
    vector: Vec<f32>,
    committed: bool,
}

/// On-disk snapshot. Norms are derived state and recomputed on load.
#[derive(Serialize, Deserialize)]
struct FlatIndexData {
    dimension: usize,
    distance: DistanceKind,
    slots: Vec<Option<SlotData>>,
    free: Vec<u32>,
    pending: Vec<u32>,
    committed: Vec<u32>,
}

#[derive(Default)]
struct Inner {
    slots: Vec<Option<SlotData>>,
    /// Slot indices (0-based) available for reuse.
    free: Vec<u32>,
    /// Oids inserted but not yet promoted by `create_index`.
    pending: Vec<u32>,
    /// Oids covered by the scan snapshot. May lag removals; search
    /// skips dead slots.
    committed: Vec<u32>,
    /// L2 norms parallel to `committed`.
    norms: Vec<f32>,
    closed: bool,
}

/// Exact-scan ANN engine over a slab of vector slots.
pub struct FlatIndex {
    opts: FlatIndexOptions,
    inner: RwLock<Inner>,
}

impl FlatIndex {
    pub fn new(opts: FlatIndexOptions) -> Result<Self, EngineError> {
        if opts.dimension == 0 {
            return Err(EngineError::InvalidDimension(0));
        }
        Ok(Self {
            opts,
            inner: RwLock::new(Inner::default()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.opts.dimension
    }

    /// Number of live vectors, pending and committed alike.
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self, vec: &[f32]) -> Result<(), EngineError> {
        if vec.len() != self.opts.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.opts.dimension,
                actual: vec.len(),
            });
        }
        if vec.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidValue);
        }
        Ok(())
    }

    /// Stage `vecs` into the slab. Returns one oid per input position
    /// (0 for positions that failed validation) plus the per-position
    /// errors. Staged vectors stay invisible to `search` until
    /// [`FlatIndex::create_index`] runs.
    pub fn bulk_insert(&self, vecs: &[Vec<f32>]) -> (Vec<u32>, Vec<EngineError>) {
        let chunk = self.opts.bulk_insert_chunk_size.max(1);
        let mut oids = Vec::with_capacity(vecs.len());
        let mut errs = Vec::new();

        for batch in vecs.chunks(chunk) {
            let mut inner = self.inner.write();
            if inner.closed {
                for _ in batch {
                    oids.push(0);
                }
                errs.push(EngineError::Closed);
                continue;
            }
            for vec in batch {
                if let Err(e) = self.validate(vec) {
                    oids.push(0);
                    errs.push(e);
                    continue;
                }
                let slot = SlotData {
                    vector: vec.clone(),
                    committed: false,
                };
                let idx = match inner.free.pop() {
                    Some(idx) => {
                        inner.slots[idx as usize] = Some(slot);
                        idx
                    }
                    None => {
                        inner.slots.push(Some(slot));
                        (inner.slots.len() - 1) as u32
                    }
                };
                let oid = idx + 1;
                inner.pending.push(oid);
                oids.push(oid);
            }
        }

        (oids, errs)
    }

    /// Free the given slots. Every known oid is removed even when others
    /// in the batch are unknown; the unknowns come back as one
    /// aggregated error.
    pub fn bulk_remove(&self, oids: &[u32]) -> Result<(), EngineError> {
        let mut guard = self.inner.write();
        if guard.closed {
            return Err(EngineError::Closed);
        }
        let inner = &mut *guard;

        let mut missing = Vec::new();
        let mut removed = HashSet::with_capacity(oids.len());
        for &oid in oids {
            let Some(idx) = oid.checked_sub(1) else {
                missing.push(oid);
                continue;
            };
            match inner.slots.get_mut(idx as usize) {
                Some(slot) if slot.is_some() => {
                    *slot = None;
                    inner.free.push(idx);
                    removed.insert(oid);
                }
                _ => missing.push(oid),
            }
        }
        inner.pending.retain(|oid| !removed.contains(oid));

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::UnknownObjectIds(missing))
        }
    }

    /// Promote pending slots and rebuild the scan snapshot.
    ///
    /// `pool_size` bounds the norm-computation worker pool; 0 uses the
    /// process-global rayon pool. Holds the write lock for the whole
    /// build, so searches block rather than observe a half-built
    /// snapshot.
    pub fn create_index(&self, pool_size: u32) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }

        let pending = std::mem::take(&mut inner.pending);
        for oid in pending {
            let Some(idx) = oid.checked_sub(1) else {
                continue;
            };
            if let Some(slot) = inner.slots.get_mut(idx as usize).and_then(Option::as_mut) {
                slot.committed = true;
            }
        }

        let committed: Vec<u32> = inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref()
                    .filter(|s| s.committed)
                    .map(|_| idx as u32 + 1)
            })
            .collect();

        let slots = &inner.slots;
        let compute = || {
            committed
                .par_iter()
                .map(|&oid| {
                    oid.checked_sub(1)
                        .and_then(|idx| slots.get(idx as usize))
                        .and_then(Option::as_ref)
                        .map(|s| l2_norm(&s.vector))
                        .unwrap_or(0.0)
                })
                .collect::<Vec<f32>>()
        };
        let norms = if pool_size > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(pool_size as usize)
                .build()
                .map_err(|e| EngineError::WorkerPool(e.to_string()))?
                .install(compute)
        } else {
            compute()
        };

        inner.committed = committed;
        inner.norms = norms;
        Ok(())
    }

    /// Exact top-k scan over the committed snapshot.
    ///
    /// A non-negative `radius` keeps only hits with
    /// `distance <= radius * (1 + epsilon)`; a negative radius is
    /// unbounded. Epsilon never affects recall here — the scan is exact.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        epsilon: f32,
        radius: f32,
    ) -> Result<Vec<Neighbor>, EngineError> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        self.validate(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let bound = if radius < 0.0 {
            f32::INFINITY
        } else {
            radius * (1.0 + epsilon.max(0.0))
        };
        let query_norm = l2_norm(query);

        // Max-heap on distance keeps the k closest seen so far.
        #[derive(PartialEq)]
        struct Candidate(Neighbor);
        impl Eq for Candidate {}
        impl PartialOrd for Candidate {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for Candidate {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.0.distance.total_cmp(&other.0.distance)
            }
        }

        let mut heap = std::collections::BinaryHeap::with_capacity(k + 1);
        for (pos, &oid) in inner.committed.iter().enumerate() {
            let Some(slot) = oid
                .checked_sub(1)
                .and_then(|idx| inner.slots.get(idx as usize))
                .and_then(Option::as_ref)
            else {
                // Removed after the last build; skip.
                continue;
            };
            let distance =
                self.opts
                    .distance
                    .distance(query, &slot.vector, query_norm, inner.norms[pos]);
            if distance > bound {
                continue;
            }
            if heap.len() < k {
                heap.push(Candidate(Neighbor { oid, distance }));
            } else if let Some(worst) = heap.peek() {
                if distance < worst.0.distance {
                    heap.pop();
                    heap.push(Candidate(Neighbor { oid, distance }));
                }
            }
        }

        let mut out: Vec<Neighbor> = heap.into_iter().map(|c| c.0).collect();
        out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(out)
    }

    /// Read any live vector, pending or committed.
    pub fn get_vector(&self, oid: u32) -> Result<Vec<f32>, EngineError> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        oid.checked_sub(1)
            .and_then(|idx| inner.slots.get(idx as usize))
            .and_then(|slot| slot.as_ref())
            .map(|s| s.vector.clone())
            .ok_or(EngineError::UnknownObjectId(oid))
    }

    /// Write the snapshot to `<path>/quiver-flat.vidx`, creating the
    /// directory on first save. No-op without a configured path.
    pub fn save_index(&self) -> Result<(), EngineError> {
        let Some(dir) = &self.opts.path else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        let inner = self.inner.read();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        let data = FlatIndexData {
            dimension: self.opts.dimension,
            distance: self.opts.distance,
            slots: inner
                .slots
                .iter()
                .map(|slot| {
                    slot.as_ref().map(|s| SlotData {
                        vector: s.vector.clone(),
                        committed: s.committed,
                    })
                })
                .collect(),
            free: inner.free.clone(),
            pending: inner.pending.clone(),
            committed: inner.committed.clone(),
        };
        drop(inner);

        let file = File::create(dir.join(INDEX_FILE_NAME))?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, &data)?;
        Ok(())
    }

    /// Replace in-memory state with the snapshot at
    /// `<path>/quiver-flat.vidx`. No-op without a configured path.
    pub fn load(&self) -> Result<(), EngineError> {
        let Some(dir) = &self.opts.path else {
            return Ok(());
        };
        let file = File::open(dir.join(INDEX_FILE_NAME))?;
        let reader = BufReader::new(file);
        let data: FlatIndexData = bincode::deserialize_from(reader)?;
        if data.dimension != self.opts.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.opts.dimension,
                actual: data.dimension,
            });
        }

        let norms = data
            .committed
            .iter()
            .map(|&oid| {
                oid.checked_sub(1)
                    .and_then(|idx| data.slots.get(idx as usize))
                    .and_then(|s| s.as_ref())
                    .map(|s| l2_norm(&s.vector))
                    .unwrap_or(0.0)
            })
            .collect();

        let mut inner = self.inner.write();
        if inner.closed {
            return Err(EngineError::Closed);
        }
        *inner = Inner {
            slots: data.slots,
            free: data.free,
            pending: data.pending,
            committed: data.committed,
            norms,
            closed: false,
        };
        Ok(())
    }

    /// Drop all state and refuse further operations.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        *inner = Inner {
            closed: true,
            ..Inner::default()
        };
    }
}
