use realm_types::{NamespaceId, ObjectId};

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// The write set does not apply cleanly on the committed state.
    #[error("commit conflict in namespace {namespace}: {reason}")]
    CommitConflict {
        namespace: NamespaceId,
        reason: String,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The stored bytes cannot be decoded into a record.
    #[error("corrupt record {id}: {reason}")]
    CorruptRecord { id: ObjectId, reason: String },
}

impl StoreError {
    pub(crate) fn conflict(namespace: NamespaceId, reason: impl Into<String>) -> Self {
        Self::CommitConflict {
            namespace,
            reason: reason.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
