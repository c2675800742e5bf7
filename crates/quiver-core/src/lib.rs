//! Quiver Core – reference ANN engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 FlatIndex (exact-scan engine)               │
//! │     slab of vector slots · pending pool · top-k scan        │
//! ├─────────────────────────────────────────────────────────────┤
//! │            Distance kernels (L2 / Cosine / Dot)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │          Bincode snapshots (<path>/quiver-flat.vidx)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Vectors handed to [`FlatIndex::bulk_insert`] are staged in a pending
//! pool and become searchable only after [`FlatIndex::create_index`]
//! rebuilds the scan snapshot. This mirrors how graph-based engines
//! defer expensive structure builds, so the coordinator layer above can
//! treat this engine and a real graph engine identically.

pub mod distance;
pub mod flat;

pub use distance::{dot_product, l2_distance, l2_norm, DistanceKind};
pub use flat::{EngineError, FlatIndex, FlatIndexOptions, Neighbor, ObjectKind};
