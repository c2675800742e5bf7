//! Domain errors for the index coordinator.

use quiver_core::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// An operation that requires an identifier got an empty one.
    #[error("uuid not found")]
    UuidNotFound,

    /// Insert collided with a known binding or a pending insert.
    /// `oid` is 0 when the collision was with a staged (unbound) insert.
    #[error("uuid {uuid} already exists (oid {oid})")]
    UuidAlreadyExists { uuid: String, oid: u32 },

    /// Lookup or delete for an identifier nobody knows.
    #[error("object id not found for uuid {uuid}")]
    ObjectIdNotFound { uuid: String },

    /// The identifier is bound but the engine failed to return its vector.
    #[error("object not found for uuid {uuid}: {source}")]
    ObjectNotFound {
        uuid: String,
        #[source]
        source: EngineError,
    },

    /// Nothing staged; there is no commit to run. Swallowed by the
    /// background driver, surfaced to explicit `create_index` callers.
    #[error("uncommitted index not found")]
    UncommittedIndexNotFound,

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata codec error: {0}")]
    Meta(#[from] bincode::Error),

    /// Accumulated per-item failures from a batch operation or commit.
    #[error("{} errors: [{}]", .0.len(), fmt_compound(.0))]
    Compound(Vec<IndexError>),
}

fn fmt_compound(errs: &[IndexError]) -> String {
    errs.iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl IndexError {
    /// Fold a new failure into an accumulator without losing earlier
    /// ones. Batch operations and the commit machine attempt every item
    /// and report everything that went wrong at the end.
    pub fn chain(acc: Option<IndexError>, err: IndexError) -> Option<IndexError> {
        Some(match acc {
            None => err,
            Some(IndexError::Compound(mut errs)) => {
                errs.push(err);
                IndexError::Compound(errs)
            }
            Some(prev) => IndexError::Compound(vec![prev, err]),
        })
    }

    /// Collapse an accumulator into a `Result`.
    pub fn into_result(acc: Option<IndexError>) -> Result<(), IndexError> {
        match acc {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
