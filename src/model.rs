//! Public result types.

use serde::{Deserialize, Serialize};

/// A search hit after identifier translation: the caller-supplied uuid
/// plus its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub uuid: String,
    pub distance: f32,
}
