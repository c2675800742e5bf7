//! The index coordinator.
//!
//! Mediates between low-latency queries and a mutation-heavy write
//! stream against an engine whose searchable structure is expensive to
//! rebuild and unsafe to mutate concurrently with reads. Mutations land
//! in staging caches and stay visible by identifier immediately; a
//! commit drains everything staged at commit start into the engine,
//! rebuilds its structure, and publishes the resulting uuid ↔ oid
//! bindings.
//!
//! Three pieces of state move together: the bidirectional identifier
//! map, the insert cache and the delete cache. Racing mutations on one
//! uuid are ordered by strictly monotone timestamps; the commit uses the
//! same timestamps to drain exactly what was staged when it started,
//! leaving anything newer for the next round.

mod daemon;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

use crate::clock::Clock;
use crate::config::{parse_duration, IndexConfig};
use crate::engine::{AnnEngine, CoreEngine};
use crate::error::IndexError;
use crate::kvs::BidiMap;
use crate::meta;
use crate::model::Distance;
use crate::vcache::{VCache, VEntry};

pub struct Indexer {
    /// Threshold of staged inserts that triggers a background commit.
    alen: usize,
    /// True exactly while a commit is in progress.
    indexing: AtomicBool,
    /// Hard-deadline commit period (driver).
    lim: Duration,
    /// Threshold-check period (driver).
    dur: Duration,
    /// Save period (driver).
    sdur: Duration,
    /// Randomized initial driver delay, spreads commits across a fleet.
    idelay: Duration,
    /// Pool size the driver hands to commits.
    dps: u32,
    /// Staged-insert counter; best effort, only drives commit triggering.
    ic: AtomicI64,
    /// Number of completed commit executions.
    nocie: AtomicU64,
    /// Insert staging cache.
    ivc: VCache,
    /// Delete staging cache.
    dvc: VCache,
    path: Option<PathBuf>,
    kvs: BidiMap,
    engine: Box<dyn AnnEngine>,
    clock: Clock,
    /// Commit daemon disabled (no check period or no threshold).
    dcd: bool,
}

fn join_subtask<T>(
    handle: std::thread::ScopedJoinHandle<'_, Result<T, IndexError>>,
) -> Result<T, IndexError> {
    match handle.join() {
        Ok(res) => res,
        Err(_) => Err(IndexError::Io(std::io::Error::other(
            "background subtask panicked",
        ))),
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer").finish_non_exhaustive()
    }
}

impl Indexer {
    /// Build a coordinator over the reference engine. Loads prior state
    /// when the index path already exists and in-memory mode is off.
    pub fn new(cfg: IndexConfig) -> Result<Self, IndexError> {
        let engine = CoreEngine::from_config(&cfg)?;
        Self::with_engine(cfg, Box::new(engine))
    }

    /// Build a coordinator over a caller-supplied engine. The engine
    /// must be freshly constructed; recovery calls its `load`.
    pub fn with_engine(cfg: IndexConfig, engine: Box<dyn AnnEngine>) -> Result<Self, IndexError> {
        let index_path = cfg.index_path.trim_end_matches('/').to_string();
        // `path` doubles as the durability switch: `None` in in-memory
        // mode or with no path configured means nothing loads or saves.
        let path = if !cfg.enable_in_memory_mode && !index_path.is_empty() {
            Some(PathBuf::from(&index_path))
        } else {
            None
        };

        let kvs = BidiMap::new();
        if let Some(dir) = path.as_deref().filter(|p| p.exists()) {
            // Engine state and the identifier map restore in parallel;
            // both must succeed.
            let (engine_res, meta_res) = std::thread::scope(|s| {
                let meta_task = s.spawn(|| meta::load(dir, &kvs));
                let engine_res = engine.load().map_err(IndexError::Engine);
                (engine_res, join_subtask(meta_task))
            });
            engine_res?;
            meta_res?;
        }

        let dur = parse_duration(&cfg.auto_index_check_duration);
        let lim = parse_duration(&cfg.auto_index_duration_limit);
        let sdur = parse_duration(&cfg.auto_save_index_duration);
        let idelay_max = parse_duration(&cfg.initial_delay_max_duration).as_secs();
        let idelay = if idelay_max > 0 {
            Duration::from_secs(rand::thread_rng().gen_range(0..=idelay_max))
        } else {
            Duration::ZERO
        };
        let alen = cfg.auto_index_length;

        Ok(Self {
            alen,
            indexing: AtomicBool::new(false),
            lim,
            dur,
            sdur,
            idelay,
            dps: cfg.default_pool_size,
            ic: AtomicI64::new(0),
            nocie: AtomicU64::new(0),
            ivc: VCache::default(),
            dvc: VCache::default(),
            path,
            kvs,
            engine,
            clock: Clock::new(),
            dcd: dur.is_zero() || alen == 0,
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Nearest neighbors of `vec`. Returns an empty result set, not an
    /// error, while a commit is in progress. Hits whose oid is 0,
    /// carries an engine error, or is no longer bound are dropped.
    pub fn search(
        &self,
        vec: &[f32],
        size: u32,
        epsilon: f32,
        radius: f32,
    ) -> Result<Vec<Distance>, IndexError> {
        if self.indexing.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let hits = self.engine.search(vec, size as usize, epsilon, radius)?;
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.oid == 0 || hit.err.is_some() {
                if let Some(err) = &hit.err {
                    tracing::debug!("dropping engine hit oid={} err={err}", hit.oid);
                }
                continue;
            }
            // A commit may have retired the binding since the engine
            // answered; such hits just disappear.
            if let Some(uuid) = self.kvs.get_inverse(hit.oid) {
                out.push(Distance {
                    uuid,
                    distance: hit.distance,
                });
            }
        }
        Ok(out)
    }

    /// Resolve `uuid` to its vector, then search with it.
    pub fn search_by_id(
        &self,
        uuid: &str,
        size: u32,
        epsilon: f32,
        radius: f32,
    ) -> Result<Vec<Distance>, IndexError> {
        if self.indexing.load(Ordering::SeqCst) {
            tracing::debug!("search_by_id: commit in progress, returning empty");
            return Ok(Vec::new());
        }
        let vec = self.get_object(uuid)?;
        self.search(&vec, size, epsilon, radius)
    }

    /// The vector bound or staged for `uuid`: committed objects come
    /// from the engine, uncommitted ones from the insert cache.
    pub fn get_object(&self, uuid: &str) -> Result<Vec<f32>, IndexError> {
        match self.kvs.get(uuid) {
            Some(oid) => self
                .engine
                .get_vector(oid)
                .map_err(|source| IndexError::ObjectNotFound {
                    uuid: uuid.to_string(),
                    source,
                }),
            None => {
                tracing::debug!("get_object: uuid {uuid} unbound, trying insert cache");
                self.insert_cache_visible(uuid)
                    .map(|entry| entry.vector)
                    .ok_or_else(|| IndexError::ObjectIdNotFound {
                        uuid: uuid.to_string(),
                    })
            }
        }
    }

    /// `(oid, true)` when bound, `(0, true)` when staged, `(0, false)`
    /// otherwise.
    pub fn exists(&self, uuid: &str) -> (u32, bool) {
        match self.kvs.get(uuid) {
            Some(oid) => (oid, true),
            None => (0, self.insert_cache_visible(uuid).is_some()),
        }
    }

    /// The visibility rule for staged inserts: a staged insert is
    /// visible unless a strictly newer staged delete shadows it. A
    /// shadowed entry is dropped on sight. A delete with the same
    /// timestamp does NOT shadow — update issues its insert one tick
    /// after its delete, so equal stamps only arise from direct
    /// reinsertion, which should stay observable.
    fn insert_cache_visible(&self, uuid: &str) -> Option<VEntry> {
        let iv = self.ivc.load(uuid)?;
        match self.dvc.load(uuid) {
            None => Some(iv),
            Some(dv) if dv.ts <= iv.ts => Some(iv),
            Some(_) => {
                self.ivc.delete(uuid);
                self.ic.fetch_sub(1, Ordering::SeqCst);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Stage a vector for `uuid`. Fails when the uuid is already bound
    /// or already staged.
    pub fn insert(&self, uuid: &str, vec: Vec<f32>) -> Result<(), IndexError> {
        self.insert_at(uuid, vec, self.clock.now(), true)
    }

    fn insert_at(
        &self,
        uuid: &str,
        vec: Vec<f32>,
        t: i64,
        validate: bool,
    ) -> Result<(), IndexError> {
        if uuid.is_empty() {
            return Err(IndexError::UuidNotFound);
        }
        if validate {
            if let Some(oid) = self.kvs.get(uuid) {
                return Err(IndexError::UuidAlreadyExists {
                    uuid: uuid.to_string(),
                    oid,
                });
            }
            if self.insert_cache_visible(uuid).is_some() {
                return Err(IndexError::UuidAlreadyExists {
                    uuid: uuid.to_string(),
                    oid: 0,
                });
            }
        }
        self.ivc.store(uuid.to_string(), VEntry { vector: vec, ts: t });
        self.ic.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Stage many inserts under one shared timestamp. Every entry is
    /// attempted; failures accumulate.
    pub fn insert_multiple(
        &self,
        vecs: std::collections::HashMap<String, Vec<f32>>,
    ) -> Result<(), IndexError> {
        let t = self.clock.now();
        let mut acc = None;
        for (uuid, vec) in vecs {
            if let Err(e) = self.insert_at(&uuid, vec, t, true) {
                acc = IndexError::chain(acc, e);
            }
        }
        IndexError::into_result(acc)
    }

    /// Stage a delete for `uuid`. A pending insert older than the
    /// delete is cancelled outright — it never reaches the engine.
    pub fn delete(&self, uuid: &str) -> Result<(), IndexError> {
        self.delete_at(uuid, self.clock.now())
    }

    fn delete_at(&self, uuid: &str, t: i64) -> Result<(), IndexError> {
        if uuid.is_empty() {
            return Err(IndexError::UuidNotFound);
        }
        if self.kvs.get(uuid).is_none() && self.insert_cache_visible(uuid).is_none() {
            return Err(IndexError::ObjectIdNotFound {
                uuid: uuid.to_string(),
            });
        }
        if let Some(iv) = self.ivc.load(uuid) {
            if iv.ts < t {
                self.ivc.delete(uuid);
                self.ic.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.dvc.store(
            uuid.to_string(),
            VEntry {
                vector: Vec::new(),
                ts: t,
            },
        );
        Ok(())
    }

    /// Stage many deletes under one shared timestamp. Ordering within
    /// the batch relative to the caller's iteration order is
    /// unspecified; ordering against other calls is by real time.
    pub fn delete_multiple(&self, uuids: &[String]) -> Result<(), IndexError> {
        let t = self.clock.now();
        let mut acc = None;
        for uuid in uuids {
            if let Err(e) = self.delete_at(uuid, t) {
                acc = IndexError::chain(acc, e);
            }
        }
        IndexError::into_result(acc)
    }

    /// Delete-then-insert under timestamps `t` and `t + 1`. The insert
    /// skips validation — the delete just cleared any binding. A failed
    /// delete aborts without inserting.
    pub fn update(&self, uuid: &str, vec: Vec<f32>) -> Result<(), IndexError> {
        let t = self.clock.now();
        self.delete_at(uuid, t)?;
        self.insert_at(uuid, vec, t + 1, false)
    }

    /// Batch update: all deletes at one timestamp, then all inserts at
    /// a strictly later one. If the delete phase fails, the delete
    /// records this call staged are rolled back and nothing is
    /// inserted. A per-key insert failure rolls back that key's staging
    /// state.
    pub fn update_multiple(
        &self,
        vecs: std::collections::HashMap<String, Vec<f32>>,
    ) -> Result<(), IndexError> {
        let t = self.clock.now();
        let mut acc = None;
        for uuid in vecs.keys() {
            if let Err(e) = self.delete_at(uuid, t) {
                acc = IndexError::chain(acc, e);
            }
        }
        if let Some(err) = acc {
            for uuid in vecs.keys() {
                if self.dvc.load(uuid).map(|dv| dv.ts == t).unwrap_or(false) {
                    self.dvc.delete(uuid);
                }
            }
            return Err(err);
        }

        let t = self.clock.now();
        let mut acc = None;
        for (uuid, vec) in vecs {
            if let Err(e) = self.insert_at(&uuid, vec, t, false) {
                self.dvc.delete(&uuid);
                self.ivc.delete(&uuid);
                self.ic.fetch_sub(1, Ordering::SeqCst);
                acc = IndexError::chain(acc, e);
            }
        }
        IndexError::into_result(acc)
    }

    // ------------------------------------------------------------------
    // Commit machine
    // ------------------------------------------------------------------

    /// Drain everything staged before now into the engine and rebuild
    /// its searchable structure. Single-flight: a concurrent call
    /// returns immediately with `Ok`. With nothing staged, returns
    /// [`IndexError::UncommittedIndexNotFound`].
    ///
    /// Sub-errors accumulate; the machine runs every phase regardless
    /// so the system keeps moving forward.
    pub fn create_index(&self, pool_size: u32) -> Result<(), IndexError> {
        if self.indexing.load(Ordering::SeqCst) {
            return Ok(());
        }
        let ic = self.ic.load(Ordering::SeqCst);
        if ic == 0 {
            return Err(IndexError::UncommittedIndexNotFound);
        }
        if self
            .indexing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.ic.store(0, Ordering::SeqCst);
        let t = self.clock.now();
        let cap = ic.max(0) as usize;
        tracing::info!("commit started, staged inserts = {ic}");

        let mut acc: Option<IndexError> = None;

        // Deletes staged before the cutoff; anything newer belongs to
        // the next round. A staged insert both older than the cutoff
        // and older than its delete is superseded — drop it.
        let mut del_list: Vec<String> = Vec::with_capacity(cap);
        self.dvc.range(|uuid, dv| {
            if dv.ts > t {
                return true;
            }
            if let Some(iv) = self.ivc.load(uuid) {
                if iv.ts < t && iv.ts < dv.ts {
                    self.ivc.delete(uuid);
                }
            }
            del_list.push(uuid.to_string());
            true
        });

        // Retire bindings for the drained deletes.
        let mut doids: Vec<u32> = Vec::with_capacity(del_list.len());
        for uuid in &del_list {
            self.dvc.delete(uuid);
            match self.kvs.delete(uuid) {
                Some(oid) => doids.push(oid),
                // A delete that cancelled a never-committed insert has
                // no binding to retire.
                None => tracing::warn!("no binding to retire for uuid {uuid}"),
            }
        }

        if !doids.is_empty() {
            tracing::info!("removing {} retired objects from engine", doids.len());
            if let Err(e) = self.engine.bulk_remove(&doids) {
                tracing::error!("engine bulk remove failed: {e}");
                acc = IndexError::chain(acc, IndexError::Engine(e));
            }
        }

        // Inserts staged before the cutoff.
        let mut uuids: Vec<String> = Vec::with_capacity(cap);
        let mut vecs: Vec<Vec<f32>> = Vec::with_capacity(cap);
        self.ivc.range(|uuid, iv| {
            if iv.ts <= t {
                uuids.push(uuid.to_string());
                vecs.push(iv.vector.clone());
            }
            true
        });

        tracing::info!("handing {} staged vectors to engine", vecs.len());
        let (oids, errs) = self.engine.bulk_insert(&vecs);
        for e in errs {
            tracing::error!("engine bulk insert entry failed: {e}");
            acc = IndexError::chain(acc, IndexError::Engine(e));
        }

        // Publish bindings. Positions the engine rejected stay unbound
        // but are drained from the staging cache regardless.
        for (i, uuid) in uuids.iter().enumerate() {
            self.ivc.delete(uuid);
            if let Some(&oid) = oids.get(i) {
                if oid != 0 {
                    self.kvs.set(uuid.clone(), oid);
                }
            }
        }

        tracing::info!("rebuilding searchable structure, pool size = {pool_size}");
        if let Err(e) = self.engine.create_index(pool_size) {
            tracing::error!("engine index build failed: {e}");
            acc = IndexError::chain(acc, IndexError::Engine(e));
        }

        self.indexing.store(false, Ordering::SeqCst);
        self.nocie.fetch_add(1, Ordering::Relaxed);
        tracing::info!("commit finished");
        IndexError::into_result(acc)
    }

    /// Persist the identifier map and the engine state, in parallel;
    /// both must succeed. Skipped entirely in in-memory mode. Safe
    /// concurrent with mutations — the map snapshot may lag live state
    /// by at most one commit cycle.
    pub fn save_index(&self) -> Result<(), IndexError> {
        let Some(dir) = self.path.as_deref() else {
            return Ok(());
        };
        let (meta_res, engine_res) = std::thread::scope(|s| {
            let meta_task = s.spawn(|| meta::save(dir, &self.kvs));
            let engine_res = self.engine.save_index().map_err(IndexError::Engine);
            (join_subtask(meta_task), engine_res)
        });

        let mut acc = None;
        if let Err(e) = meta_res {
            acc = IndexError::chain(acc, e);
        }
        if let Err(e) = engine_res {
            acc = IndexError::chain(acc, e);
        }
        IndexError::into_result(acc)
    }

    /// Commit, then save. A failed commit (including "nothing staged")
    /// skips the save.
    pub fn create_and_save_index(&self, pool_size: u32) -> Result<(), IndexError> {
        self.create_index(pool_size)?;
        self.save_index()
    }

    /// Save whatever is durable, then shut the engine down.
    pub fn close(&self) -> Result<(), IndexError> {
        let res = if self.path.is_some() {
            self.save_index()
        } else {
            Ok(())
        };
        self.engine.close();
        res
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::SeqCst)
    }

    /// Number of committed bindings.
    pub fn len(&self) -> u64 {
        self.kvs.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every committed uuid.
    pub fn uuids(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.kvs.len());
        self.kvs.range(|uuid, _| {
            out.push(uuid.to_string());
            true
        });
        out
    }

    /// Every staged-but-uncommitted uuid.
    pub fn uncommitted_uuids(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.ic.load(Ordering::SeqCst).max(0) as usize);
        self.ivc.range(|uuid, _| {
            out.push(uuid.to_string());
            true
        });
        out
    }

    pub fn insert_vcache_len(&self) -> u64 {
        self.ivc.len() as u64
    }

    pub fn delete_vcache_len(&self) -> u64 {
        self.dvc.len() as u64
    }

    pub fn number_of_create_index_execution(&self) -> u64 {
        self.nocie.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineHit;
    use parking_lot::Mutex;
    use quiver_core::EngineError;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    /// Scripted engine for exercising the coordinator alone.
    #[derive(Clone, Default)]
    struct FakeEngine {
        vectors: Arc<Mutex<HashMap<u32, Vec<f32>>>>,
        removed: Arc<Mutex<Vec<u32>>>,
        next_oid: Arc<AtomicU32>,
        /// 0-based positions bulk_insert rejects.
        fail_positions: Arc<Mutex<Vec<usize>>>,
        builds: Arc<AtomicU32>,
    }

    impl FakeEngine {
        fn inserted_vectors(&self) -> Vec<Vec<f32>> {
            self.vectors.lock().values().cloned().collect()
        }
    }

    impl AnnEngine for FakeEngine {
        fn search(
            &self,
            _vec: &[f32],
            _k: usize,
            _epsilon: f32,
            _radius: f32,
        ) -> Result<Vec<EngineHit>, EngineError> {
            Ok(self
                .vectors
                .lock()
                .keys()
                .map(|&oid| EngineHit {
                    oid,
                    distance: 0.0,
                    err: None,
                })
                .collect())
        }

        fn get_vector(&self, oid: u32) -> Result<Vec<f32>, EngineError> {
            self.vectors
                .lock()
                .get(&oid)
                .cloned()
                .ok_or(EngineError::UnknownObjectId(oid))
        }

        fn bulk_insert(&self, vecs: &[Vec<f32>]) -> (Vec<u32>, Vec<EngineError>) {
            let fail = self.fail_positions.lock().clone();
            let mut oids = Vec::with_capacity(vecs.len());
            let mut errs = Vec::new();
            for (i, vec) in vecs.iter().enumerate() {
                if fail.contains(&i) {
                    oids.push(0);
                    errs.push(EngineError::InvalidValue);
                    continue;
                }
                let oid = self.next_oid.fetch_add(1, Ordering::SeqCst) + 1;
                self.vectors.lock().insert(oid, vec.clone());
                oids.push(oid);
            }
            (oids, errs)
        }

        fn bulk_remove(&self, oids: &[u32]) -> Result<(), EngineError> {
            let mut vectors = self.vectors.lock();
            self.removed.lock().extend_from_slice(oids);
            for oid in oids {
                vectors.remove(oid);
            }
            Ok(())
        }

        fn create_index(&self, _pool_size: u32) -> Result<(), EngineError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn save_index(&self) -> Result<(), EngineError> {
            Ok(())
        }

        fn load(&self) -> Result<(), EngineError> {
            Ok(())
        }

        fn close(&self) {}
    }

    fn mem_indexer(engine: FakeEngine) -> Indexer {
        Indexer::with_engine(
            IndexConfig::new(2).with_in_memory_mode(true),
            Box::new(engine),
        )
        .unwrap()
    }

    #[test]
    fn insert_then_exists_and_get_object() {
        let idx = mem_indexer(FakeEngine::default());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        assert_eq!(idx.exists("a"), (0, true));
        assert_eq!(idx.get_object("a").unwrap(), vec![1.0, 0.0]);
        assert_eq!(idx.insert_vcache_len(), 1);
    }

    #[test]
    fn duplicate_insert_rejected_staged_and_committed() {
        let idx = mem_indexer(FakeEngine::default());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        let err = idx.insert("a", vec![2.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::UuidAlreadyExists { oid: 0, .. }
        ));

        idx.create_index(1).unwrap();
        let err = idx.insert("a", vec![2.0, 0.0]).unwrap_err();
        match err {
            IndexError::UuidAlreadyExists { oid, .. } => assert_ne!(oid, 0),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(idx.get_object("a").unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn empty_uuid_is_rejected_everywhere() {
        let idx = mem_indexer(FakeEngine::default());
        assert!(matches!(
            idx.insert("", vec![1.0, 0.0]),
            Err(IndexError::UuidNotFound)
        ));
        assert!(matches!(idx.delete(""), Err(IndexError::UuidNotFound)));
    }

    #[test]
    fn delete_unknown_uuid_fails() {
        let idx = mem_indexer(FakeEngine::default());
        assert!(matches!(
            idx.delete("ghost"),
            Err(IndexError::ObjectIdNotFound { .. })
        ));
    }

    #[test]
    fn delete_cancels_pending_insert() {
        let engine = FakeEngine::default();
        let idx = mem_indexer(engine.clone());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.delete("a").unwrap();

        assert_eq!(idx.exists("a"), (0, false));
        // Nothing left to commit.
        assert!(matches!(
            idx.create_index(1),
            Err(IndexError::UncommittedIndexNotFound)
        ));
        assert!(engine.inserted_vectors().is_empty());
        assert!(matches!(
            idx.get_object("a"),
            Err(IndexError::ObjectIdNotFound { .. })
        ));
    }

    #[test]
    fn update_is_delete_then_insert() {
        let idx = mem_indexer(FakeEngine::default());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.update("a", vec![9.0, 9.0]).unwrap();
        idx.create_index(1).unwrap();
        assert_eq!(idx.get_object("a").unwrap(), vec![9.0, 9.0]);
    }

    #[test]
    fn update_unknown_uuid_fails_without_inserting() {
        let idx = mem_indexer(FakeEngine::default());
        assert!(matches!(
            idx.update("ghost", vec![1.0, 0.0]),
            Err(IndexError::ObjectIdNotFound { .. })
        ));
        assert_eq!(idx.insert_vcache_len(), 0);
    }

    #[test]
    fn equal_timestamps_insert_wins_on_read_path() {
        let idx = mem_indexer(FakeEngine::default());
        idx.ivc.store(
            "a".to_string(),
            VEntry {
                vector: vec![1.0, 0.0],
                ts: 5,
            },
        );
        idx.ic.store(1, Ordering::SeqCst);
        idx.dvc.store(
            "a".to_string(),
            VEntry {
                vector: Vec::new(),
                ts: 5,
            },
        );

        assert!(idx.insert_cache_visible("a").is_some());
        assert_eq!(idx.exists("a"), (0, true));
        assert_eq!(idx.insert_vcache_len(), 1);
    }

    #[test]
    fn equal_timestamps_commit_keeps_the_insert() {
        let engine = FakeEngine::default();
        let idx = mem_indexer(engine.clone());
        idx.ivc.store(
            "a".to_string(),
            VEntry {
                vector: vec![1.0, 0.0],
                ts: 5,
            },
        );
        idx.dvc.store(
            "a".to_string(),
            VEntry {
                vector: Vec::new(),
                ts: 5,
            },
        );
        idx.ic.store(1, Ordering::SeqCst);

        idx.create_index(1).unwrap();
        assert_eq!(engine.inserted_vectors(), vec![vec![1.0, 0.0]]);
        let (oid, ok) = idx.exists("a");
        assert!(ok);
        assert_ne!(oid, 0);
    }

    #[test]
    fn strictly_newer_delete_drops_insert_at_commit() {
        let engine = FakeEngine::default();
        let idx = mem_indexer(engine.clone());
        idx.ivc.store(
            "a".to_string(),
            VEntry {
                vector: vec![1.0, 0.0],
                ts: 4,
            },
        );
        idx.dvc.store(
            "a".to_string(),
            VEntry {
                vector: Vec::new(),
                ts: 5,
            },
        );
        idx.ic.store(1, Ordering::SeqCst);

        idx.create_index(1).unwrap();
        assert!(engine.inserted_vectors().is_empty());
        assert_eq!(idx.exists("a"), (0, false));
        assert_eq!(idx.insert_vcache_len(), 0);
        assert_eq!(idx.delete_vcache_len(), 0);
    }

    #[test]
    fn commit_reassigns_oid_after_delete_and_reinsert() {
        let idx = mem_indexer(FakeEngine::default());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.create_index(1).unwrap();
        let (old_oid, _) = idx.exists("a");

        idx.delete("a").unwrap();
        idx.insert("a", vec![7.0, 7.0]).unwrap();
        idx.create_index(1).unwrap();

        assert_eq!(idx.get_object("a").unwrap(), vec![7.0, 7.0]);
        let (new_oid, ok) = idx.exists("a");
        assert!(ok);
        assert_ne!(new_oid, 0);
        assert_ne!(new_oid, old_oid);
    }

    #[test]
    fn second_commit_without_mutations_is_the_sentinel() {
        let engine = FakeEngine::default();
        let idx = mem_indexer(engine.clone());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.create_index(1).unwrap();
        let len_before = idx.len();

        assert!(matches!(
            idx.create_index(1),
            Err(IndexError::UncommittedIndexNotFound)
        ));
        assert_eq!(idx.len(), len_before);
        assert_eq!(idx.number_of_create_index_execution(), 1);
    }

    #[test]
    fn partial_engine_failure_accumulates_and_drains() {
        let engine = FakeEngine::default();
        engine.fail_positions.lock().push(0);
        let idx = mem_indexer(engine.clone());
        let mut batch = HashMap::new();
        batch.insert("a".to_string(), vec![1.0, 0.0]);
        batch.insert("b".to_string(), vec![2.0, 0.0]);
        idx.insert_multiple(batch).unwrap();

        let err = idx.create_index(1).unwrap_err();
        assert!(matches!(err, IndexError::Engine(_) | IndexError::Compound(_)));
        // Both drained from staging; exactly one got bound.
        assert_eq!(idx.insert_vcache_len(), 0);
        assert_eq!(idx.len(), 1);
        // The machine still ran the build phase.
        assert_eq!(engine.builds.load(Ordering::SeqCst), 1);
        assert!(!idx.is_indexing());
    }

    #[test]
    fn search_is_empty_while_indexing() {
        let idx = mem_indexer(FakeEngine::default());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.create_index(1).unwrap();

        idx.indexing.store(true, Ordering::SeqCst);
        assert!(idx.search(&[1.0, 0.0], 10, 0.1, -1.0).unwrap().is_empty());
        assert!(idx.is_indexing());
        idx.indexing.store(false, Ordering::SeqCst);
        assert_eq!(idx.search(&[1.0, 0.0], 10, 0.1, -1.0).unwrap().len(), 1);
    }

    #[test]
    fn search_drops_unbound_and_errored_hits() {
        let engine = FakeEngine::default();
        let idx = mem_indexer(engine.clone());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.create_index(1).unwrap();
        // A second engine row nobody is bound to.
        engine.vectors.lock().insert(99, vec![0.0, 1.0]);

        let hits = idx.search(&[1.0, 0.0], 10, 0.1, -1.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].uuid, "a");
    }

    #[test]
    fn commit_retires_engine_objects_for_committed_deletes() {
        let engine = FakeEngine::default();
        let idx = mem_indexer(engine.clone());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.create_index(1).unwrap();
        let (oid, _) = idx.exists("a");

        idx.delete("a").unwrap();
        idx.insert("b", vec![0.0, 1.0]).unwrap();
        idx.create_index(1).unwrap();

        assert_eq!(*engine.removed.lock(), vec![oid]);
        assert_eq!(idx.exists("a"), (0, false));
    }

    #[test]
    fn update_multiple_rolls_back_on_delete_failure() {
        let idx = mem_indexer(FakeEngine::default());
        idx.insert("known", vec![1.0, 0.0]).unwrap();

        let mut batch = HashMap::new();
        batch.insert("known".to_string(), vec![2.0, 0.0]);
        batch.insert("ghost".to_string(), vec![3.0, 0.0]);
        let err = idx.update_multiple(batch).unwrap_err();
        assert!(matches!(err, IndexError::ObjectIdNotFound { .. }));

        // No delete record staged by this call survives.
        assert_eq!(idx.delete_vcache_len(), 0);
    }

    #[test]
    fn uncommitted_uuids_reports_staged_keys() {
        let idx = mem_indexer(FakeEngine::default());
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.insert("b", vec![0.0, 1.0]).unwrap();
        let mut staged = idx.uncommitted_uuids();
        staged.sort();
        assert_eq!(staged, vec!["a".to_string(), "b".to_string()]);
        assert!(idx.uuids().is_empty());

        idx.create_index(1).unwrap();
        assert!(idx.uncommitted_uuids().is_empty());
        assert_eq!(idx.uuids().len(), 2);
    }
}
