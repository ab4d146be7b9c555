use realm_values::HeapError;

/// Errors from exporting a graph.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The graph holds a value with no portable form.
    #[error("unsupported value kind: {0}")]
    UnsupportedKind(String),

    /// The graph violates the ownership model.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Object definitions nest deeper than a document can hold.
    #[error("graph nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("heap error: {0}")]
    Heap(#[from] HeapError),
}

/// Result alias for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Errors from importing a document.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The document names an element or node kind this version does not know.
    #[error("unsupported value kind: {0}")]
    UnsupportedKind(String),

    /// The document is malformed or misses a required field.
    #[error("schema error: {0}")]
    Schema(String),

    /// A reference names an object that is defined nowhere.
    #[error("dangling reference to {0}")]
    DanglingReference(String),

    #[error("heap error: {0}")]
    Heap(#[from] HeapError),
}

/// Result alias for import operations.
pub type ImportResult<T> = Result<T, ImportError>;
