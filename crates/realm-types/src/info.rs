use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};
use crate::object::ObjectId;

/// Identity, ownership and aliasing metadata carried by every composite or
/// indirection value.
///
/// Invariants:
/// - an object has at most one owner, so owner edges form a forest;
/// - aliases only ever change `ref_count`, never `owner_id`;
/// - `ref_count` never goes below zero;
/// - a non-zero `id` never changes once assigned.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    id: ObjectId,
    owner_id: ObjectId,
    ref_count: u32,
}

impl ObjectInfo {
    pub fn new(id: ObjectId, owner_id: ObjectId, ref_count: u32) -> Self {
        Self {
            id,
            owner_id,
            ref_count,
        }
    }

    /// Metadata of a freshly created, unowned, unaliased object.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn owner_id(&self) -> ObjectId {
        self.owner_id
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Returns `true` once the object has a persisted identity.
    pub fn is_real(&self) -> bool {
        !self.id.is_zero()
    }

    pub fn is_owned(&self) -> bool {
        !self.owner_id.is_zero()
    }

    /// Unowned and unaliased: nothing keeps the object alive.
    pub fn is_reclaimable(&self) -> bool {
        !self.is_owned() && self.ref_count == 0
    }

    /// Set the identity. Fails if a different identity is already set.
    pub fn set_id(&mut self, id: ObjectId) -> TypeResult<()> {
        if self.is_real() && self.id != id {
            return Err(TypeError::IdAlreadyAssigned(self.id));
        }
        self.id = id;
        Ok(())
    }

    pub fn set_owner_id(&mut self, owner_id: ObjectId) {
        self.owner_id = owner_id;
    }

    pub fn set_ref_count(&mut self, ref_count: u32) {
        self.ref_count = ref_count;
    }

    pub fn inc_ref_count(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_add(1);
        self.ref_count
    }

    pub fn dec_ref_count(&mut self) -> TypeResult<u32> {
        self.ref_count = self
            .ref_count
            .checked_sub(1)
            .ok_or(TypeError::RefCountUnderflow(self.id))?;
        Ok(self.ref_count)
    }
}

impl fmt::Debug for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectInfo[{:?},owner={:?},refs={}]",
            self.id, self.owner_id, self.ref_count
        )
    }
}
