use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::{debug, info, warn};

use realm_types::{NamespaceId, ObjectId};

use crate::error::{StoreError, StoreResult};
use crate::record::{CommitReceipt, NamespaceState, ObjectRecord, WriteSet};
use crate::traits::ObjectStore;

#[derive(Default)]
struct Inner {
    records: HashMap<ObjectId, Vec<u8>>,
    namespaces: HashMap<NamespaceId, NamespaceState>,
}

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. Records are held bincode-encoded
/// behind a `RwLock`; a commit holds the write lock for validation and
/// application, so concurrent executions are serialized at that point.
pub struct InMemoryObjectStore {
    inner: RwLock<Inner>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").records.len()
    }

    /// Returns `true` if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("lock poisoned").records.is_empty()
    }

    /// Total encoded bytes across all records.
    pub fn total_bytes(&self) -> u64 {
        self.inner
            .read()
            .expect("lock poisoned")
            .records
            .values()
            .map(|b| b.len() as u64)
            .sum()
    }

    /// Return a sorted list of all stored object ids.
    pub fn all_ids(&self) -> Vec<ObjectId> {
        let inner = self.inner.read().expect("lock poisoned");
        let mut ids: Vec<ObjectId> = inner.records.keys().copied().collect();
        ids.sort();
        ids
    }

    fn validate(inner: &Inner, ws: &WriteSet) -> StoreResult<()> {
        let ns = ws.namespace;
        if ns.is_zero() {
            return Err(StoreError::conflict(ns, "write set has no namespace"));
        }
        let state = inner.namespaces.get(&ns).copied().unwrap_or_default();
        if ws.base_version != state.version {
            return Err(StoreError::conflict(
                ns,
                format!(
                    "write set is based on version {}, committed version is {}",
                    ws.base_version, state.version
                ),
            ));
        }
        if ws.base_seq != state.last_seq {
            return Err(StoreError::conflict(
                ns,
                format!(
                    "write set is based on seq {}, committed seq is {}",
                    ws.base_seq, state.last_seq
                ),
            ));
        }
        if ws.next_seq < ws.base_seq {
            return Err(StoreError::conflict(
                ns,
                format!("next seq {} is below base seq {}", ws.next_seq, ws.base_seq),
            ));
        }

        let mut seen = HashSet::new();
        let mut check = |id: ObjectId| -> StoreResult<()> {
            if id.namespace() != ns {
                return Err(StoreError::conflict(ns, format!("{id} belongs to another namespace")));
            }
            if !seen.insert(id) {
                return Err(StoreError::conflict(ns, format!("{id} appears twice")));
            }
            Ok(())
        };

        for record in &ws.created {
            let id = record.id();
            check(id)?;
            // Ids at or below the base come from imports and only have to
            // be absent.
            if id.seq() > ws.next_seq {
                return Err(StoreError::conflict(
                    ns,
                    format!("created {id} is beyond next seq {}", ws.next_seq),
                ));
            }
            if inner.records.contains_key(&id) {
                return Err(StoreError::conflict(ns, format!("{id} already exists")));
            }
        }
        for record in &ws.updated {
            let id = record.id();
            check(id)?;
            if !inner.records.contains_key(&id) {
                return Err(StoreError::conflict(ns, format!("updated {id} does not exist")));
            }
        }
        for id in &ws.deleted {
            check(*id)?;
            if !inner.records.contains_key(id) {
                return Err(StoreError::conflict(ns, format!("deleted {id} does not exist")));
            }
        }

        if let Some(root) = ws.root {
            if let Some(existing) = state.root {
                if existing != root {
                    return Err(StoreError::conflict(
                        ns,
                        format!("root is already {existing}"),
                    ));
                }
            }
            let created = ws.created.iter().any(|r| r.id() == root);
            if !created && !inner.records.contains_key(&root) {
                return Err(StoreError::conflict(ns, format!("root {root} is not stored")));
            }
            if ws.deleted.contains(&root) {
                return Err(StoreError::conflict(ns, format!("root {root} is deleted")));
            }
        }
        Ok(())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<ObjectRecord>> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .records
            .get(id)
            .map(|bytes| ObjectRecord::decode(*id, bytes))
            .transpose()
    }

    fn namespace_state(&self, namespace: &NamespaceId) -> StoreResult<NamespaceState> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner.namespaces.get(namespace).copied().unwrap_or_default())
    }

    fn commit(&self, ws: &WriteSet) -> StoreResult<CommitReceipt> {
        let mut inner = self.inner.write().expect("lock poisoned");

        if let Err(e) = Self::validate(&inner, ws) {
            warn!(
                namespace = %ws.namespace.short_hex(),
                base_seq = ws.base_seq,
                error = %e,
                "rejected commit"
            );
            return Err(e);
        }

        // Encode everything before touching the maps.
        let encoded = ws
            .created
            .iter()
            .chain(ws.updated.iter())
            .map(|r| Ok((r.id(), r.encode()?)))
            .collect::<StoreResult<Vec<_>>>()?;

        for (id, bytes) in encoded {
            debug!(id = %id, bytes = bytes.len(), "writing record");
            inner.records.insert(id, bytes);
        }
        for id in &ws.deleted {
            debug!(id = %id, "deleting record");
            inner.records.remove(id);
        }
        let state = inner.namespaces.entry(ws.namespace).or_default();
        state.last_seq = ws.next_seq;
        state.version += 1;
        if ws.root.is_some() {
            state.root = ws.root;
        }
        let version = state.version;

        let receipt = CommitReceipt {
            namespace: ws.namespace,
            last_seq: ws.next_seq,
            version,
            created: ws.created.len(),
            updated: ws.updated.len(),
            deleted: ws.deleted.len(),
        };
        info!(
            namespace = %ws.namespace.short_hex(),
            last_seq = receipt.last_seq,
            version = receipt.version,
            created = receipt.created,
            updated = receipt.updated,
            deleted = receipt.deleted,
            "committed write set"
        );
        Ok(receipt)
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect("lock poisoned");
        f.debug_struct("InMemoryObjectStore")
            .field("record_count", &inner.records.len())
            .field("namespace_count", &inner.namespaces.len())
            .finish()
    }
}
