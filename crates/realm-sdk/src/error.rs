use realm_types::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealmError {
    #[error("stored graph is corrupt at {id}: {reason}")]
    CorruptGraph { id: ObjectId, reason: String },

    #[error("type error: {0}")]
    Type(#[from] realm_types::TypeError),

    #[error("heap error: {0}")]
    Heap(#[from] realm_values::HeapError),

    #[error("store error: {0}")]
    Store(#[from] realm_store::StoreError),

    #[error("diff error: {0}")]
    Diff(#[from] realm_diff::DiffError),

    #[error("export error: {0}")]
    Export(#[from] realm_export::ExportError),

    #[error("import error: {0}")]
    Import(#[from] realm_export::ImportError),
}

impl RealmError {
    /// Returns `true` if the store rejected a commit because another
    /// execution committed first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Store(realm_store::StoreError::CommitConflict { .. })
        )
    }
}

pub type RealmResult<T> = Result<T, RealmError>;
