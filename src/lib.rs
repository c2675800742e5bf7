//! Quiver-DB: a write-buffered ANN vector index service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Indexer (coordinator)                    │
//! │    Search / Insert / Update / Delete / Exists / GetObject   │
//! └─────────────────────────────────────────────────────────────┘
//!        │                    │                     │
//!        ▼                    ▼                     ▼
//! ┌──────────────┐   ┌─────────────────┐   ┌─────────────────┐
//! │   BidiMap    │   │ Staging caches  │   │  Commit driver  │
//! │  uuid ↔ oid  │   │  insert/delete  │   │  (background)   │
//! └──────────────┘   └─────────────────┘   └─────────────────┘
//!        │                                          │
//!        ▼                                          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               ANN engine (behind AnnEngine)                 │
//! │     bulk mutations · deferred build · search · snapshot     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations are staged and become searchable by identifier immediately;
//! the expensive "rebuild searchable structure" step is deferred into
//! commits that a background driver schedules by threshold, deadline and
//! save period. The identifier map is persisted alongside the engine's
//! own on-disk state and both are restored together on startup.

pub mod config;
pub mod engine;
pub mod error;
pub mod kvs;
pub mod meta;
pub mod model;
pub mod service;
pub mod vcache;

mod clock;

pub use config::IndexConfig;
pub use engine::{AnnEngine, CoreEngine, EngineHit};
pub use error::IndexError;
pub use model::Distance;
pub use service::Indexer;

pub use quiver_core::{DistanceKind, EngineError, FlatIndex, FlatIndexOptions};
