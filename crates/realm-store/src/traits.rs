use realm_types::{NamespaceId, ObjectId};

use crate::error::StoreResult;
use crate::record::{CommitReceipt, NamespaceState, ObjectRecord, WriteSet};

/// Backing store for committed object graphs.
///
/// All implementations must satisfy these invariants:
/// - `commit` is atomic: either every record of the write set is applied
///   or none is.
/// - `commit` rejects a write set whose `base_seq` differs from the
///   namespace's committed `last_seq`, so two executions computed against
///   the same state cannot both succeed.
/// - Concurrent reads are always safe.
/// - The store never interprets record payloads beyond validation.
pub trait ObjectStore: Send + Sync {
    /// Read a record by id.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<ObjectRecord>>;

    /// Committed state of a namespace. Unknown namespaces report the
    /// default state.
    fn namespace_state(&self, namespace: &NamespaceId) -> StoreResult<NamespaceState>;

    /// Apply a write set atomically.
    fn commit(&self, write_set: &WriteSet) -> StoreResult<CommitReceipt>;

    /// Check whether a record exists.
    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.read(id)?.is_some())
    }

    /// Read multiple records in a batch.
    ///
    /// Default implementation calls `read()` for each id.
    fn read_batch(&self, ids: &[ObjectId]) -> StoreResult<Vec<Option<ObjectRecord>>> {
        ids.iter().map(|id| self.read(id)).collect()
    }
}
