//! Error types for the diff crate.

use realm_types::{ObjectId, TypeError};
use realm_values::HeapError;

/// Errors that can occur while diffing or applying a diff.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The heap violates the ownership model.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The execution modified or took ownership of another namespace's object.
    #[error("object {0} belongs to another namespace")]
    ForeignObject(ObjectId),

    /// Id allocation or metadata update failed.
    #[error("metadata error: {0}")]
    Type(#[from] TypeError),

    /// Heap access failed.
    #[error("heap error: {0}")]
    Heap(#[from] HeapError),
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
