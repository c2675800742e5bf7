//! Engine adapter contract.
//!
//! The coordinator is polymorphic over the capability set an ANN engine
//! exposes; the real engine and the scripted fakes the tests use both
//! satisfy [`AnnEngine`].
//!
//! Concurrency contract: only one of `bulk_insert` / `bulk_remove` /
//! `create_index` / `save_index` / `close` may be in flight at a time,
//! and `search` / `get_vector` must not overlap `create_index`. The
//! coordinator enforces this with its indexing flag; implementations
//! should still carry their own lock so a violation degrades to
//! blocking.

use quiver_core::{DistanceKind, EngineError, FlatIndex, FlatIndexOptions, ObjectKind};

use crate::config::IndexConfig;

/// A raw engine hit, before identifier translation.
///
/// Engines may emit rows with `oid == 0` or an attached error; the
/// coordinator discards those.
#[derive(Debug)]
pub struct EngineHit {
    pub oid: u32,
    pub distance: f32,
    pub err: Option<EngineError>,
}

pub trait AnnEngine: Send + Sync {
    fn search(
        &self,
        vec: &[f32],
        k: usize,
        epsilon: f32,
        radius: f32,
    ) -> Result<Vec<EngineHit>, EngineError>;

    fn get_vector(&self, oid: u32) -> Result<Vec<f32>, EngineError>;

    /// One oid per input position, 0 where that position failed, plus
    /// the per-position errors.
    fn bulk_insert(&self, vecs: &[Vec<f32>]) -> (Vec<u32>, Vec<EngineError>);

    /// Best effort; one aggregated error for the whole batch.
    fn bulk_remove(&self, oids: &[u32]) -> Result<(), EngineError>;

    /// Rebuild the searchable structure from the engine's pending set.
    /// May block for seconds.
    fn create_index(&self, pool_size: u32) -> Result<(), EngineError>;

    /// Persist engine state to its configured path.
    fn save_index(&self) -> Result<(), EngineError>;

    /// Restore engine state from its configured path.
    fn load(&self) -> Result<(), EngineError>;

    fn close(&self);
}

/// The reference engine behind the adapter contract.
pub struct CoreEngine {
    index: FlatIndex,
}

impl CoreEngine {
    /// Build the engine from the coordinator's configuration. The
    /// distance and object type strings must name something the engine
    /// recognizes; the edge-size knobs apply only to graph-building
    /// engines and are ignored here.
    pub fn from_config(cfg: &IndexConfig) -> Result<Self, EngineError> {
        let distance: DistanceKind = cfg
            .distance_type
            .parse()
            .map_err(EngineError::UnsupportedDistanceType)?;
        cfg.object_type
            .parse::<ObjectKind>()
            .map_err(EngineError::UnsupportedObjectType)?;

        let mut opts = FlatIndexOptions::new(cfg.dimension)
            .with_distance(distance)
            .with_bulk_insert_chunk_size(cfg.bulk_insert_chunk_size);
        let path = cfg.index_path.trim_end_matches('/');
        if !cfg.enable_in_memory_mode && !path.is_empty() {
            opts = opts.with_path(path);
        }

        Ok(Self {
            index: FlatIndex::new(opts)?,
        })
    }
}

impl AnnEngine for CoreEngine {
    fn search(
        &self,
        vec: &[f32],
        k: usize,
        epsilon: f32,
        radius: f32,
    ) -> Result<Vec<EngineHit>, EngineError> {
        let neighbors = self.index.search(vec, k, epsilon, radius)?;
        Ok(neighbors
            .into_iter()
            .map(|n| EngineHit {
                oid: n.oid,
                distance: n.distance,
                err: None,
            })
            .collect())
    }

    fn get_vector(&self, oid: u32) -> Result<Vec<f32>, EngineError> {
        self.index.get_vector(oid)
    }

    fn bulk_insert(&self, vecs: &[Vec<f32>]) -> (Vec<u32>, Vec<EngineError>) {
        self.index.bulk_insert(vecs)
    }

    fn bulk_remove(&self, oids: &[u32]) -> Result<(), EngineError> {
        self.index.bulk_remove(oids)
    }

    fn create_index(&self, pool_size: u32) -> Result<(), EngineError> {
        self.index.create_index(pool_size)
    }

    fn save_index(&self) -> Result<(), EngineError> {
        self.index.save_index()
    }

    fn load(&self) -> Result<(), EngineError> {
        self.index.load()
    }

    fn close(&self) {
        self.index.close();
    }
}
