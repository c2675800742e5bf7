//! Distance kernels for the exact-scan engine.
//!
//! Scalar loops processed in chunks of 4 so LLVM auto-vectorizes them in
//! release builds. Lower is always more similar; inner product is negated
//! to keep that convention.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Distance metric used by an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceKind {
    /// Euclidean (L2) distance.
    L2,
    /// Cosine distance: 1 - cos(a, b).
    Cosine,
    /// Negated dot product, for maximum-inner-product search.
    InnerProduct,
}

impl DistanceKind {
    /// Compute the distance between two vectors of equal length.
    ///
    /// `a_norm` / `b_norm` are the precomputed L2 norms, used only by
    /// [`DistanceKind::Cosine`]; pass anything for the other kinds.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32], a_norm: f32, b_norm: f32) -> f32 {
        match self {
            Self::L2 => l2_distance(a, b),
            Self::Cosine => {
                let denom = a_norm * b_norm;
                if denom <= f32::EPSILON {
                    1.0
                } else {
                    1.0 - dot_product(a, b) / denom
                }
            }
            Self::InnerProduct => -dot_product(a, b),
        }
    }
}

impl FromStr for DistanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Self::L2),
            "cos" | "cosine" => Ok(Self::Cosine),
            "dot" | "innerproduct" | "inner_product" => Ok(Self::InnerProduct),
            other => Err(other.to_string()),
        }
    }
}

/// Dot product of two equal-length vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        sum += a[base] * b[base]
            + a[base + 1] * b[base + 1]
            + a[base + 2] * b[base + 2]
            + a[base + 3] * b[base + 3];
    }
    for i in (chunks * 4)..a.len() {
        sum += a[i] * b[i];
    }

    sum
}

/// Euclidean distance between two equal-length vectors.
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    l2_distance_squared(a, b).sqrt()
}

/// Squared Euclidean distance; avoids the sqrt when only ordering matters.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        let d0 = a[base] - b[base];
        let d1 = a[base + 1] - b[base + 1];
        let d2 = a[base + 2] - b[base + 2];
        let d3 = a[base + 3] - b[base + 3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
    }
    for i in (chunks * 4)..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }

    sum
}

/// L2 norm of a vector.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}
