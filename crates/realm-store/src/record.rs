use serde::{Deserialize, Serialize};

use realm_types::{NamespaceId, ObjectId, ObjectInfo};
use realm_values::{ObjectKind, Primitive};

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// StoredValue / StoredPayload
// ---------------------------------------------------------------------------

/// A value as it appears inside a persisted record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    Primitive(Primitive),
    /// Owned child, stored as its own record.
    Object(ObjectId),
    /// Non-owning alias.
    Ref(ObjectId),
    /// Composite payload hoisted into the enclosing box's record.
    Inline(Box<StoredPayload>),
}

impl StoredValue {
    pub fn nil() -> Self {
        Self::Primitive(Primitive::Nil)
    }
}

/// The contents of a record, by object kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StoredPayload {
    Record { fields: Vec<(String, StoredValue)> },
    Sequence { elements: Vec<StoredValue> },
    Map { entries: Vec<(Primitive, StoredValue)> },
    Box { value: StoredValue },
}

impl StoredPayload {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Record { .. } => ObjectKind::Record,
            Self::Sequence { .. } => ObjectKind::Sequence,
            Self::Map { .. } => ObjectKind::Map,
            Self::Box { .. } => ObjectKind::Box,
        }
    }

    /// Contained values in natural order.
    pub fn values(&self) -> Vec<&StoredValue> {
        match self {
            Self::Record { fields } => fields.iter().map(|(_, v)| v).collect(),
            Self::Sequence { elements } => elements.iter().collect(),
            Self::Map { entries } => entries.iter().map(|(_, v)| v).collect(),
            Self::Box { value } => vec![value],
        }
    }

    fn collect_ids(&self, owned: &mut Vec<ObjectId>, refs: &mut Vec<ObjectId>) {
        for value in self.values() {
            match value {
                StoredValue::Object(id) => owned.push(*id),
                StoredValue::Ref(id) => refs.push(*id),
                StoredValue::Inline(inner) => inner.collect_ids(owned, refs),
                StoredValue::Primitive(_) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectRecord
// ---------------------------------------------------------------------------

/// One persisted unit: an object's metadata and contents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub info: ObjectInfo,
    pub payload: StoredPayload,
}

impl ObjectRecord {
    pub fn new(info: ObjectInfo, payload: StoredPayload) -> Self {
        Self { info, payload }
    }

    pub fn id(&self) -> ObjectId {
        self.info.id()
    }

    pub fn kind(&self) -> ObjectKind {
        self.payload.kind()
    }

    /// Ids of owned children, including those of a hoisted payload.
    pub fn children(&self) -> Vec<ObjectId> {
        let mut owned = Vec::new();
        self.payload.collect_ids(&mut owned, &mut Vec::new());
        owned
    }

    /// Ids of alias targets, including those of a hoisted payload.
    pub fn references(&self) -> Vec<ObjectId> {
        let mut refs = Vec::new();
        self.payload.collect_ids(&mut Vec::new(), &mut refs);
        refs
    }

    /// Encode with bincode.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode bytes stored under `id`.
    pub fn decode(id: ObjectId, bytes: &[u8]) -> StoreResult<Self> {
        let record: Self = bincode::deserialize(bytes).map_err(|e| StoreError::CorruptRecord {
            id,
            reason: e.to_string(),
        })?;
        if record.id() != id {
            return Err(StoreError::CorruptRecord {
                id,
                reason: format!("record carries id {}", record.id()),
            });
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// WriteSet
// ---------------------------------------------------------------------------

/// Committed state of one namespace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceState {
    /// Highest sequence number allocated so far.
    pub last_seq: u64,
    /// The realm root, once committed.
    pub root: Option<ObjectId>,
    /// Number of commits applied to the namespace.
    pub version: u64,
}

/// All changes one execution makes to one namespace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteSet {
    pub namespace: NamespaceId,
    /// `version` of the state this write set was computed against.
    pub base_version: u64,
    /// `last_seq` of the state this write set was computed against.
    pub base_seq: u64,
    /// `last_seq` after the commit.
    pub next_seq: u64,
    /// The realm root, set when the namespace is committed the first time.
    pub root: Option<ObjectId>,
    pub created: Vec<ObjectRecord>,
    pub updated: Vec<ObjectRecord>,
    pub deleted: Vec<ObjectId>,
}

impl WriteSet {
    /// An empty write set on top of `base`.
    pub fn new(namespace: NamespaceId, base: &NamespaceState) -> Self {
        Self {
            namespace,
            base_version: base.version,
            base_seq: base.last_seq,
            next_seq: base.last_seq,
            root: None,
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Returns `true` if committing this would change nothing.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.root.is_none()
            && self.next_seq == self.base_seq
    }

    /// Number of records written or deleted.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// What a successful commit did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    pub namespace: NamespaceId,
    /// The namespace's `last_seq` after the commit.
    pub last_seq: u64,
    /// The namespace's `version` after the commit.
    pub version: u64,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}
