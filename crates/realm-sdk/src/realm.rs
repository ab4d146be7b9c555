use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use realm_diff::{build_write_set, diff_ownership};
use realm_export::{Document, ExportOptions};
use realm_store::{
    NamespaceState, ObjectRecord, ObjectStore, StoreError, StoredPayload, StoredValue,
};
use realm_types::{IdAllocator, NamespaceId, ObjectId, ObjectInfo};
use realm_values::{Allocator, Field, Handle, Heap, MapEntry, Object, Value};

use crate::config::RealmConfig;
use crate::error::{RealmError, RealmResult};

/// Outcome of [`Realm::finalize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitSummary {
    /// `false` when there was nothing to write.
    pub committed: bool,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Namespace counter after the commit.
    pub last_seq: u64,
    /// Namespace commit version after the commit.
    pub version: u64,
}

/// One execution against one namespace.
///
/// The namespace's committed graph is loaded into a private [`Heap`] on
/// [`open`](Self::open). The evaluator mutates the heap through its hooks;
/// [`finalize`](Self::finalize) diffs it against the recorded metadata and
/// commits the result atomically. Executions on the same store may run in
/// parallel; the store admits only one commit per base state.
pub struct Realm<S: ObjectStore> {
    config: RealmConfig,
    store: Arc<S>,
    ids: IdAllocator,
    heap: Heap,
    root: Handle,
    base: NamespaceState,
}

impl<S: ObjectStore> Realm<S> {
    /// Open the namespace derived from `config.path`.
    ///
    /// A namespace with a committed root is loaded eagerly; a fresh one
    /// starts with an empty root record.
    pub fn open(store: Arc<S>, config: RealmConfig) -> RealmResult<Self> {
        let namespace = NamespaceId::from_path(&config.path);
        let base = store.namespace_state(&namespace)?;

        let allocator = match config.max_allocations {
            Some(limit) => Allocator::with_limit(limit),
            None => Allocator::unlimited(),
        };
        let mut heap = Heap::with_allocator(allocator);
        let root = match base.root {
            Some(root_id) => load(store.as_ref(), &mut heap, root_id)?,
            None => heap.alloc_record(Vec::new())?,
        };

        debug!(
            namespace = %namespace.short_hex(),
            path = %config.path,
            last_seq = base.last_seq,
            version = base.version,
            objects = heap.len(),
            "opened realm"
        );
        Ok(Self {
            ids: IdAllocator::new(namespace, base.last_seq),
            config,
            store,
            heap,
            root,
            base,
        })
    }

    // ---- Accessors ----

    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn root(&self) -> Handle {
        self.root
    }

    pub fn namespace(&self) -> NamespaceId {
        self.ids.namespace()
    }

    pub fn last_seq(&self) -> u64 {
        self.ids.last_seq()
    }

    /// The committed state this execution is based on.
    pub fn base(&self) -> &NamespaceState {
        &self.base
    }

    // ---- Commit ----

    /// Persist every change made since the last commit.
    ///
    /// On error the store and the heap's metadata are unchanged. A
    /// [`RealmError::is_conflict`] error means another execution committed
    /// first; this session is stale and must be reopened.
    pub fn finalize(&mut self) -> RealmResult<CommitSummary> {
        let diff = diff_ownership(&self.heap, &[self.root], &self.ids)?;
        let write_set = build_write_set(&self.heap, &diff, &self.base)?;
        if write_set.is_empty() {
            debug!(namespace = %self.namespace().short_hex(), "nothing to commit");
            return Ok(CommitSummary {
                committed: false,
                created: 0,
                updated: 0,
                deleted: 0,
                last_seq: self.base.last_seq,
                version: self.base.version,
            });
        }

        let receipt = self.store.commit(&write_set)?;
        diff.apply(&mut self.heap, &mut self.ids)?;
        self.base = NamespaceState {
            last_seq: receipt.last_seq,
            root: self.base.root.or(write_set.root),
            version: receipt.version,
        };

        info!(
            namespace = %self.namespace().short_hex(),
            allocated = diff.allocations(),
            reparented = diff.reparentings(),
            reclaimed = diff.reclamations(),
            version = receipt.version,
            "realm finalized"
        );
        Ok(CommitSummary {
            committed: true,
            created: receipt.created,
            updated: receipt.updated,
            deleted: receipt.deleted,
            last_seq: receipt.last_seq,
            version: receipt.version,
        })
    }

    // ---- Documents ----

    pub fn export(&self, handle: Handle, options: &ExportOptions) -> RealmResult<Document> {
        Ok(realm_export::export(&self.heap, handle, options)?)
    }

    /// Import a document into the heap. The returned handle is unowned
    /// until the caller stores it somewhere reachable from the root.
    pub fn import(
        &mut self,
        doc: &Document,
        replacement: Option<ObjectInfo>,
    ) -> RealmResult<Handle> {
        Ok(realm_export::import(&mut self.heap, doc, replacement)?)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load the graph reachable from `root_id` and return the root's handle.
///
/// Records are fetched breadth-first, every object is reserved, and only
/// then are contents filled in, so edges may point at any loaded record.
fn load<S: ObjectStore + ?Sized>(
    store: &S,
    heap: &mut Heap,
    root_id: ObjectId,
) -> RealmResult<Handle> {
    let mut records: Vec<ObjectRecord> = Vec::new();
    let mut seen: HashSet<ObjectId> = HashSet::from([root_id]);
    let mut frontier = vec![root_id];
    while !frontier.is_empty() {
        let batch = store.read_batch(&frontier)?;
        let mut next = Vec::new();
        for (id, record) in frontier.iter().zip(batch) {
            let record = record.ok_or(StoreError::NotFound(*id))?;
            for edge in record.children().into_iter().chain(record.references()) {
                if seen.insert(edge) {
                    next.push(edge);
                }
            }
            records.push(record);
        }
        frontier = next;
    }

    let mut handles: HashMap<ObjectId, Handle> = HashMap::with_capacity(records.len());
    for record in &records {
        handles.insert(record.id(), heap.reserve(record.kind(), record.info)?);
    }
    let loader = Loader { handles: &handles };
    for record in &records {
        let handle = loader.resolve(record.id())?;
        let object = loader.object(heap, &record.payload)?;
        heap.fill(handle, object)?;
    }

    debug!(root = %root_id, objects = records.len(), "loaded graph");
    loader.resolve(root_id)
}

struct Loader<'a> {
    handles: &'a HashMap<ObjectId, Handle>,
}

impl Loader<'_> {
    fn resolve(&self, id: ObjectId) -> RealmResult<Handle> {
        self.handles.get(&id).copied().ok_or_else(|| RealmError::CorruptGraph {
            id,
            reason: "record was not loaded".into(),
        })
    }

    fn object(&self, heap: &mut Heap, payload: &StoredPayload) -> RealmResult<Object> {
        Ok(match payload {
            StoredPayload::Record { fields } => Object::record(
                fields
                    .iter()
                    .map(|(name, v)| Ok(Field::new(name.clone(), self.value(heap, v)?)))
                    .collect::<RealmResult<_>>()?,
            ),
            StoredPayload::Sequence { elements } => Object::sequence(
                elements
                    .iter()
                    .map(|v| self.value(heap, v))
                    .collect::<RealmResult<_>>()?,
            ),
            StoredPayload::Map { entries } => Object::map(
                entries
                    .iter()
                    .map(|(k, v)| Ok(MapEntry::new(k.clone(), self.value(heap, v)?)))
                    .collect::<RealmResult<_>>()?,
            ),
            StoredPayload::Box { value } => Object::boxed(self.value(heap, value)?),
        })
    }

    fn value(&self, heap: &mut Heap, value: &StoredValue) -> RealmResult<Value> {
        Ok(match value {
            StoredValue::Primitive(p) => Value::Primitive(p.clone()),
            StoredValue::Object(id) => Value::Object(self.resolve(*id)?),
            StoredValue::Ref(id) => Value::Ref(self.resolve(*id)?),
            // A hoisted payload has no record of its own.
            StoredValue::Inline(payload) => {
                let object = self.object(heap, payload)?;
                let handle = heap.reserve(object.kind(), ObjectInfo::ephemeral())?;
                heap.fill(handle, object)?;
                Value::Object(handle)
            }
        })
    }
}
