use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{TypeError, TypeResult};
use crate::identity::NamespaceId;
use crate::info::ObjectInfo;

/// Identifier of a persisted object: a namespace plus a sequence number.
///
/// The sequence number is strictly increasing per namespace and assigned the
/// first time an object is committed. The all-zero value means "no identity
/// yet" (ephemeral). Ordering is `(namespace, seq)`, so within a namespace it
/// follows creation order.
///
/// The textual form is `"<namespace-hex>:<seq>"`; serde uses the same form.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    namespace: NamespaceId,
    seq: u64,
}

impl ObjectId {
    /// Create an id from its parts.
    pub const fn new(namespace: NamespaceId, seq: u64) -> Self {
        Self { namespace, seq }
    }

    /// The ephemeral (all-zero) id.
    pub const fn zero() -> Self {
        Self {
            namespace: NamespaceId::zero(),
            seq: 0,
        }
    }

    /// Returns `true` if this id denotes an ephemeral object. Sequence 0 is
    /// never issued, so an id missing either part has no identity.
    pub fn is_zero(&self) -> bool {
        self.namespace.is_zero() || self.seq == 0
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "ObjectId(zero)");
        }
        write!(f, "ObjectId({}:{})", self.namespace.short_hex(), self.seq)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.seq)
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| TypeError::InvalidObjectId {
            input: s.to_string(),
            reason,
        };
        let (ns, seq) = s
            .split_once(':')
            .ok_or_else(|| invalid("missing ':' separator".into()))?;
        let namespace = NamespaceId::from_hex(ns).map_err(|e| invalid(e.to_string()))?;
        let seq: u64 = seq
            .parse()
            .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
        if namespace.is_zero() && seq != 0 {
            return Err(invalid("zero namespace with non-zero sequence".into()));
        }
        if !namespace.is_zero() && seq == 0 {
            return Err(invalid("sequence 0 is never assigned".into()));
        }
        Ok(Self { namespace, seq })
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-namespace sequence counter.
///
/// The allocator is explicit state owned by whoever drives an execution and
/// is passed by reference into every allocation; there is no process-wide
/// counter. Sequence numbers start at 1 and are never reused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdAllocator {
    namespace: NamespaceId,
    last_seq: u64,
}

impl IdAllocator {
    /// Resume allocation in `namespace` after `last_seq` (0 for a fresh one).
    pub fn new(namespace: NamespaceId, last_seq: u64) -> Self {
        Self {
            namespace,
            last_seq,
        }
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    /// The last sequence number handed out.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Allocate the next identifier.
    pub fn next_id(&mut self) -> TypeResult<ObjectId> {
        if self.namespace.is_zero() {
            return Err(TypeError::ZeroNamespace);
        }
        let seq = self
            .last_seq
            .checked_add(1)
            .ok_or(TypeError::SequenceExhausted(self.namespace))?;
        self.last_seq = seq;
        Ok(ObjectId::new(self.namespace, seq))
    }

    /// Give an ephemeral object its identifier.
    pub fn assign(&mut self, info: &mut ObjectInfo) -> TypeResult<ObjectId> {
        if info.is_real() {
            return Err(TypeError::IdAlreadyAssigned(info.id()));
        }
        let id = self.next_id()?;
        info.set_id(id)?;
        Ok(id)
    }

    /// Move the counter forward to `seq`. Never moves it backwards.
    pub fn advance_to(&mut self, seq: u64) {
        self.last_seq = self.last_seq.max(seq);
    }
}
