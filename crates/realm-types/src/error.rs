use thiserror::Error;

use crate::identity::NamespaceId;
use crate::object::ObjectId;

/// Errors produced by identity and metadata operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid object id {input:?}: {reason}")]
    InvalidObjectId { input: String, reason: String },

    #[error("object already has id {0}")]
    IdAlreadyAssigned(ObjectId),

    #[error("reference count underflow on object {0}")]
    RefCountUnderflow(ObjectId),

    #[error("sequence exhausted for namespace {0}")]
    SequenceExhausted(NamespaceId),

    #[error("cannot allocate ids in the zero namespace")]
    ZeroNamespace,
}

/// Result alias for identity operations.
pub type TypeResult<T> = Result<T, TypeError>;
