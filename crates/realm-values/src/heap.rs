//! The arena holding every object of one execution.
//!
//! [`Heap`] stores objects in slots addressed by [`Handle`] and keeps an
//! index from [`ObjectId`] to handle for objects that already have a
//! persisted identity. Ownership is a separate, exclusive parent relation
//! kept per slot; it is established and broken only by the mutation hooks
//! below, which also observe aliasing for allocation accounting and mark the
//! owning unit dirty.
//!
//! # Invariants
//!
//! - Every object has at most one structural owner, and owner edges never
//!   form a cycle.
//! - A container never owns the same child twice.
//! - Two live objects never share a non-zero [`ObjectId`].
//! - Handles are never reused; released slots stay tombstoned.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use realm_types::{ObjectId, ObjectInfo, TypeError};

use crate::alloc::{Allocation, Allocator};
use crate::error::{HeapError, HeapResult};
use crate::object::{Field, MapEntry, MapValue, Object, ObjectKind, RecordValue, SequenceValue};
use crate::value::{Handle, Primitive, Value};

#[derive(Clone, Debug)]
struct Slot {
    /// `None` once released.
    object: Option<Object>,
    /// Structural owner.
    owner: Option<Handle>,
    /// Content changed since the last commit.
    dirty: bool,
    /// Carries a real id that has no committed record yet.
    unsaved: bool,
}

/// Arena of composite values with ownership tracking.
#[derive(Clone, Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    index: HashMap<ObjectId, Handle>,
    allocator: Allocator,
}

impl Heap {
    /// Create an empty heap without an allocation quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty heap accounted by `allocator`.
    pub fn with_allocator(allocator: Allocator) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            allocator,
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.object.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live handles in allocation order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.object.is_some())
            .filter_map(|(i, _)| Handle::from_index(i))
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slot(handle).is_ok()
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    fn slot(&self, handle: Handle) -> HeapResult<&Slot> {
        let slot = self
            .slots
            .get(handle.index())
            .ok_or(HeapError::UnknownHandle(handle))?;
        if slot.object.is_none() {
            return Err(HeapError::Released(handle));
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, handle: Handle) -> HeapResult<&mut Slot> {
        let slot = self
            .slots
            .get_mut(handle.index())
            .ok_or(HeapError::UnknownHandle(handle))?;
        if slot.object.is_none() {
            return Err(HeapError::Released(handle));
        }
        Ok(slot)
    }

    pub fn get(&self, handle: Handle) -> HeapResult<&Object> {
        self.slot(handle)?
            .object
            .as_ref()
            .ok_or(HeapError::Released(handle))
    }

    fn object_mut(&mut self, handle: Handle) -> HeapResult<&mut Object> {
        self.slot_mut(handle)?
            .object
            .as_mut()
            .ok_or(HeapError::Released(handle))
    }

    pub fn info(&self, handle: Handle) -> HeapResult<ObjectInfo> {
        Ok(*self.get(handle)?.info())
    }

    pub fn kind(&self, handle: Handle) -> HeapResult<ObjectKind> {
        Ok(self.get(handle)?.kind())
    }

    /// The structural owner, if any.
    pub fn owner(&self, handle: Handle) -> HeapResult<Option<Handle>> {
        Ok(self.slot(handle)?.owner)
    }

    pub fn is_dirty(&self, handle: Handle) -> HeapResult<bool> {
        Ok(self.slot(handle)?.dirty)
    }

    /// Whether the object was given a real id outside of a commit, for
    /// example by an import, and still has to be written as a new record.
    pub fn is_unsaved(&self, handle: Handle) -> HeapResult<bool> {
        Ok(self.slot(handle)?.unsaved)
    }

    /// Find the live object with a persisted identity.
    pub fn lookup(&self, id: &ObjectId) -> Option<Handle> {
        self.index.get(id).copied()
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn allocation(&self, handle: Handle) -> HeapResult<&Allocation> {
        self.slot(handle)?;
        self.allocator
            .get(handle.index())
            .ok_or(HeapError::UnknownHandle(handle))
    }

    pub fn allocation_mut(&mut self, handle: Handle) -> HeapResult<&mut Allocation> {
        self.slot(handle)?;
        self.allocator
            .get_mut(handle.index())
            .ok_or(HeapError::UnknownHandle(handle))
    }

    fn expect_kind(&self, handle: Handle, expected: ObjectKind) -> HeapResult<&Object> {
        let object = self.get(handle)?;
        if object.kind() != expected {
            return Err(HeapError::KindMismatch {
                handle,
                expected,
                actual: object.kind(),
            });
        }
        Ok(object)
    }

    fn mismatch(&self, handle: Handle, expected: ObjectKind) -> HeapError {
        match self.kind(handle) {
            Ok(actual) => HeapError::KindMismatch {
                handle,
                expected,
                actual,
            },
            Err(e) => e,
        }
    }

    fn record_mut(&mut self, handle: Handle) -> HeapResult<&mut RecordValue> {
        let err = self.mismatch(handle, ObjectKind::Record);
        match self.object_mut(handle)? {
            Object::Record(r) => Ok(r),
            _ => Err(err),
        }
    }

    fn sequence_mut(&mut self, handle: Handle) -> HeapResult<&mut SequenceValue> {
        let err = self.mismatch(handle, ObjectKind::Sequence);
        match self.object_mut(handle)? {
            Object::Sequence(s) => Ok(s),
            _ => Err(err),
        }
    }

    fn map_mut(&mut self, handle: Handle) -> HeapResult<&mut MapValue> {
        let err = self.mismatch(handle, ObjectKind::Map);
        match self.object_mut(handle)? {
            Object::Map(m) => Ok(m),
            _ => Err(err),
        }
    }

    // ---------------------------------------------------------------
    // Persistence units
    // ---------------------------------------------------------------

    /// The composite payload hoisted by a box, if `handle` is such a box.
    ///
    /// A box whose value is another box does not hoist it: the inner box
    /// keeps its own identity.
    pub fn hoisted_payload(&self, handle: Handle) -> HeapResult<Option<Handle>> {
        let Object::Box(b) = self.get(handle)? else {
            return Ok(None);
        };
        match b.value {
            Value::Object(p) if self.kind(p)? != ObjectKind::Box => Ok(Some(p)),
            _ => Ok(None),
        }
    }

    /// The unit an object belongs to: its hoisting box, or itself.
    pub fn unit_of(&self, handle: Handle) -> HeapResult<Handle> {
        if let Some(owner) = self.slot(handle)?.owner {
            if self.hoisted_payload(owner)? == Some(handle) {
                return Ok(owner);
            }
        }
        Ok(handle)
    }

    /// Returns `true` if `handle` is the payload hoisted by a box.
    pub fn is_payload(&self, handle: Handle) -> HeapResult<bool> {
        Ok(self.unit_of(handle)? != handle)
    }

    /// The values a unit holds: for a hoisting box, its payload's values.
    pub fn unit_edges(&self, handle: Handle) -> HeapResult<Vec<&Value>> {
        match self.hoisted_payload(handle)? {
            Some(payload) => Ok(self.get(payload)?.values()),
            None => Ok(self.get(handle)?.values()),
        }
    }

    // ---------------------------------------------------------------
    // Ownership checks
    // ---------------------------------------------------------------

    fn check_owned_child(
        &self,
        parent: Handle,
        child: Handle,
        replacing: Option<Handle>,
    ) -> HeapResult<()> {
        let slot = self.slot(child)?;
        if child == parent {
            return Err(HeapError::OwnershipCycle { parent, child });
        }
        if let Some(owner) = slot.owner {
            if owner != parent || replacing != Some(child) {
                return Err(HeapError::AlreadyOwned { child, owner });
            }
        }
        let mut cursor = self.slots.get(parent.index()).and_then(|s| s.owner);
        while let Some(ancestor) = cursor {
            if ancestor == child {
                return Err(HeapError::OwnershipCycle { parent, child });
            }
            cursor = self.slots.get(ancestor.index()).and_then(|s| s.owner);
        }
        Ok(())
    }

    fn check_value(
        &self,
        parent: Handle,
        value: &Value,
        replacing: Option<&Value>,
    ) -> HeapResult<()> {
        match value {
            Value::Object(child) => {
                self.check_owned_child(parent, *child, replacing.and_then(Value::owned))
            }
            Value::Ref(target) => self.slot(*target).map(|_| ()),
            Value::Primitive(_) | Value::Extern(_) => Ok(()),
        }
    }

    fn check_children(&self, parent: Handle, values: &[&Value]) -> HeapResult<()> {
        let mut owned = HashSet::new();
        for value in values {
            self.check_value(parent, value, None)?;
            if let Value::Object(child) = value {
                if !owned.insert(*child) {
                    return Err(HeapError::AlreadyOwned {
                        child: *child,
                        owner: parent,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_new_id(&self, id: ObjectId) -> HeapResult<()> {
        if !id.is_zero() && self.index.contains_key(&id) {
            return Err(HeapError::DuplicateId(id));
        }
        Ok(())
    }

    fn attach(&mut self, parent: Handle, value: &Value) {
        match value {
            Value::Object(child) => {
                if let Some(slot) = self.slots.get_mut(child.index()) {
                    slot.owner = Some(parent);
                }
            }
            Value::Ref(target) => {
                if let Some(allocation) = self.allocator.get_mut(target.index()) {
                    allocation.inc_alias_count();
                }
            }
            Value::Primitive(_) | Value::Extern(_) => {}
        }
    }

    fn detach(&mut self, parent: Handle, value: &Value) {
        if let Value::Object(child) = value {
            if let Some(slot) = self.slots.get_mut(child.index()) {
                if slot.owner == Some(parent) {
                    slot.owner = None;
                }
            }
        }
    }

    fn relink(&mut self, parent: Handle, old: Option<&Value>, new: Option<&Value>) {
        if let Some(old) = old {
            self.detach(parent, old);
        }
        if let Some(new) = new {
            self.attach(parent, new);
        }
        self.mark_dirty(parent);
    }

    fn mark_dirty(&mut self, handle: Handle) {
        let unit = self.unit_of(handle).unwrap_or(handle);
        for h in [handle, unit] {
            if let Some(slot) = self.slots.get_mut(h.index()) {
                slot.dirty = true;
            }
        }
    }

    // ---------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------

    fn next_handle(&self) -> HeapResult<Handle> {
        Handle::from_index(self.slots.len()).ok_or(HeapError::HandlesExhausted)
    }

    /// Allocate an object. Owned children must exist and be unowned.
    pub fn alloc(&mut self, object: Object) -> HeapResult<Handle> {
        let id = object.info().id();
        self.check_new_id(id)?;
        let handle = self.next_handle()?;
        self.check_children(handle, &object.values())?;

        let index = self.allocator.allocate()?;
        if let Some(allocation) = self.allocator.get_mut(index) {
            allocation.set_is_value(true);
        }
        for value in object.values() {
            self.attach(handle, value);
        }
        if !id.is_zero() {
            self.index.insert(id, handle);
        }
        self.slots.push(Slot {
            object: Some(object),
            owner: None,
            dirty: false,
            unsaved: false,
        });
        Ok(handle)
    }

    pub fn alloc_record(&mut self, fields: Vec<Field>) -> HeapResult<Handle> {
        self.alloc(Object::record(fields))
    }

    pub fn alloc_sequence(&mut self, elements: Vec<Value>) -> HeapResult<Handle> {
        self.alloc(Object::sequence(elements))
    }

    pub fn alloc_map(&mut self, entries: Vec<MapEntry>) -> HeapResult<Handle> {
        self.alloc(Object::map(entries))
    }

    pub fn alloc_box(&mut self, value: impl Into<Value>) -> HeapResult<Handle> {
        self.alloc(Object::boxed(value))
    }

    /// Reserve a slot for an object whose contents are not known yet.
    ///
    /// Together with [`fill`](Self::fill) this lets loaders allocate every
    /// object of a graph before wiring references between them.
    pub fn reserve(&mut self, kind: ObjectKind, info: ObjectInfo) -> HeapResult<Handle> {
        self.check_new_id(info.id())?;
        let handle = self.next_handle()?;
        let index = self.allocator.allocate()?;
        if let Some(allocation) = self.allocator.get_mut(index) {
            allocation.set_is_value(true);
        }
        if info.is_real() {
            self.index.insert(info.id(), handle);
        }
        self.slots.push(Slot {
            object: Some(Object::empty(kind, info)),
            owner: None,
            dirty: false,
            unsaved: false,
        });
        Ok(handle)
    }

    /// Set the contents of a reserved slot. The reserved metadata is kept.
    pub fn fill(&mut self, handle: Handle, object: Object) -> HeapResult<()> {
        let current = self.expect_kind(handle, object.kind())?;
        let info = *current.info();
        let old: Vec<Value> = current
            .values()
            .into_iter()
            .filter(|v| v.handle().is_some())
            .cloned()
            .collect();
        for value in &old {
            self.detach(handle, value);
        }
        if let Err(e) = self.check_children(handle, &object.values()) {
            for value in &old {
                self.attach_owner_only(handle, value);
            }
            return Err(e);
        }

        let new: Vec<Value> = object
            .values()
            .into_iter()
            .filter(|v| v.handle().is_some())
            .cloned()
            .collect();
        *self.object_mut(handle)? = object.with_info(info);
        for value in &new {
            self.attach(handle, value);
        }
        Ok(())
    }

    fn attach_owner_only(&mut self, parent: Handle, value: &Value) {
        if let Value::Object(_) = value {
            self.attach(parent, value);
        }
    }

    // ---------------------------------------------------------------
    // Mutation hooks
    // ---------------------------------------------------------------

    /// Assign a record field, appending it if absent. Returns the old value.
    pub fn set_field(
        &mut self,
        handle: Handle,
        name: &str,
        value: Value,
    ) -> HeapResult<Option<Value>> {
        let Object::Record(record) = self.expect_kind(handle, ObjectKind::Record)? else {
            return Err(self.mismatch(handle, ObjectKind::Record));
        };
        let position = record.fields.iter().position(|f| f.name == name);
        let replacing = position.map(|i| record.fields[i].value.clone());
        self.check_value(handle, &value, replacing.as_ref())?;

        let record = self.record_mut(handle)?;
        let old = match position {
            Some(i) => Some(std::mem::replace(&mut record.fields[i].value, value.clone())),
            None => {
                record.fields.push(Field {
                    name: name.to_string(),
                    value: value.clone(),
                });
                None
            }
        };
        self.relink(handle, old.as_ref(), Some(&value));
        Ok(old)
    }

    /// Replace a sequence element. Returns the old value.
    pub fn set_element(&mut self, handle: Handle, index: usize, value: Value) -> HeapResult<Value> {
        let Object::Sequence(seq) = self.expect_kind(handle, ObjectKind::Sequence)? else {
            return Err(self.mismatch(handle, ObjectKind::Sequence));
        };
        let len = seq.elements.len();
        let replacing = seq
            .elements
            .get(index)
            .cloned()
            .ok_or(HeapError::IndexOutOfRange { handle, index, len })?;
        self.check_value(handle, &value, Some(&replacing))?;

        let seq = self.sequence_mut(handle)?;
        let old = std::mem::replace(&mut seq.elements[index], value.clone());
        self.relink(handle, Some(&old), Some(&value));
        Ok(old)
    }

    /// Append to a sequence.
    pub fn push(&mut self, handle: Handle, value: Value) -> HeapResult<()> {
        self.expect_kind(handle, ObjectKind::Sequence)?;
        self.check_value(handle, &value, None)?;
        self.sequence_mut(handle)?.elements.push(value.clone());
        self.relink(handle, None, Some(&value));
        Ok(())
    }

    /// Remove the last element of a sequence.
    pub fn pop(&mut self, handle: Handle) -> HeapResult<Option<Value>> {
        let old = self.sequence_mut(handle)?.elements.pop();
        if old.is_some() {
            self.relink(handle, old.as_ref(), None);
        }
        Ok(old)
    }

    /// Insert or replace a map entry, keeping insertion order.
    pub fn map_insert(
        &mut self,
        handle: Handle,
        key: Primitive,
        value: Value,
    ) -> HeapResult<Option<Value>> {
        let Object::Map(map) = self.expect_kind(handle, ObjectKind::Map)? else {
            return Err(self.mismatch(handle, ObjectKind::Map));
        };
        let position = map.entries.iter().position(|e| e.key == key);
        let replacing = position.map(|i| map.entries[i].value.clone());
        self.check_value(handle, &value, replacing.as_ref())?;

        let map = self.map_mut(handle)?;
        let old = match position {
            Some(i) => Some(std::mem::replace(&mut map.entries[i].value, value.clone())),
            None => {
                map.entries.push(MapEntry {
                    key,
                    value: value.clone(),
                });
                None
            }
        };
        self.relink(handle, old.as_ref(), Some(&value));
        Ok(old)
    }

    /// Remove a map entry. Later entries keep their relative order.
    pub fn map_remove(&mut self, handle: Handle, key: &Primitive) -> HeapResult<Option<Value>> {
        let map = self.map_mut(handle)?;
        let Some(position) = map.entries.iter().position(|e| &e.key == key) else {
            return Ok(None);
        };
        let old = map.entries.remove(position).value;
        self.relink(handle, Some(&old), None);
        Ok(Some(old))
    }

    /// Replace the value held by a box. Returns the old value.
    pub fn set_boxed(&mut self, handle: Handle, value: Value) -> HeapResult<Value> {
        let Object::Box(b) = self.expect_kind(handle, ObjectKind::Box)? else {
            return Err(self.mismatch(handle, ObjectKind::Box));
        };
        let replacing = b.value.clone();
        self.check_value(handle, &value, Some(&replacing))?;

        let err = self.mismatch(handle, ObjectKind::Box);
        let Object::Box(b) = self.object_mut(handle)? else {
            return Err(err);
        };
        let old = std::mem::replace(&mut b.value, value.clone());
        self.relink(handle, Some(&old), Some(&value));
        Ok(old)
    }

    // ---------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------

    /// Overwrite an object's metadata, keeping the id index consistent.
    ///
    /// Fails if this would change an already assigned id or give the object
    /// an id another live object holds.
    pub fn set_info(&mut self, handle: Handle, info: ObjectInfo) -> HeapResult<()> {
        let current = self.info(handle)?;
        if info.id() != current.id() {
            if current.is_real() {
                return Err(TypeError::IdAlreadyAssigned(current.id()).into());
            }
            self.check_new_id(info.id())?;
            self.index.insert(info.id(), handle);
        }
        *self.object_mut(handle)?.info_mut() = info;
        Ok(())
    }

    /// Forget that an object was modified or never saved, after a commit.
    pub fn mark_clean(&mut self, handle: Handle) -> HeapResult<()> {
        let slot = self.slot_mut(handle)?;
        slot.dirty = false;
        slot.unsaved = false;
        Ok(())
    }

    /// Record that the object's real id has no committed record. The next
    /// commit creates it instead of treating it as already persisted.
    pub fn mark_unsaved(&mut self, handle: Handle) -> HeapResult<()> {
        self.slot_mut(handle)?.unsaved = true;
        Ok(())
    }

    /// Tombstone a reclaimed object and return its last contents.
    ///
    /// Children it still owned become unowned.
    pub fn release(&mut self, handle: Handle) -> HeapResult<Object> {
        let slot = self.slot_mut(handle)?;
        let object = slot.object.take().ok_or(HeapError::Released(handle))?;
        slot.owner = None;
        slot.dirty = false;
        slot.unsaved = false;
        let id = object.info().id();
        if !id.is_zero() && self.index.get(&id) == Some(&handle) {
            self.index.remove(&id);
        }
        for value in object.values() {
            self.detach(handle, value);
        }
        debug!(handle = %handle, id = %id, "released object");
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Allocator;
    use crate::error::AllocError;
    use realm_types::NamespaceId;

    fn id(seq: u64) -> ObjectId {
        ObjectId::new(NamespaceId::from_path("gno.land/r/demo/heap"), seq)
    }

    #[test]
    fn alloc_sets_owner_of_children() {
        let mut heap = Heap::new();
        let child = heap.alloc_sequence(vec![1i64.into()]).unwrap();
        let parent = heap
            .alloc_record(vec![Field::new("Items", Value::Object(child))])
            .unwrap();
        assert_eq!(heap.owner(child).unwrap(), Some(parent));
        assert_eq!(heap.owner(parent).unwrap(), None);
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn child_cannot_have_two_owners() {
        let mut heap = Heap::new();
        let child = heap.alloc_sequence(vec![]).unwrap();
        let a = heap.alloc_box(Value::Object(child)).unwrap();
        let err = heap.alloc_box(Value::Object(child)).unwrap_err();
        assert_eq!(err, HeapError::AlreadyOwned { child, owner: a });
    }

    #[test]
    fn container_cannot_own_child_twice() {
        let mut heap = Heap::new();
        let child = heap.alloc_sequence(vec![]).unwrap();
        let err = heap
            .alloc_sequence(vec![Value::Object(child), Value::Object(child)])
            .unwrap_err();
        assert!(matches!(err, HeapError::AlreadyOwned { .. }));

        let seq = heap.alloc_sequence(vec![Value::Object(child), Value::nil()]).unwrap();
        let err = heap.set_element(seq, 1, Value::Object(child)).unwrap_err();
        assert_eq!(err, HeapError::AlreadyOwned { child, owner: seq });
    }

    #[test]
    fn ownership_cycles_are_rejected() {
        let mut heap = Heap::new();
        let inner = heap.alloc_record(vec![]).unwrap();
        let outer = heap
            .alloc_record(vec![Field::new("Inner", Value::Object(inner))])
            .unwrap();
        let err = heap.set_field(inner, "Outer", Value::Object(outer)).unwrap_err();
        assert_eq!(
            err,
            HeapError::OwnershipCycle {
                parent: inner,
                child: outer
            }
        );
        let err = heap.set_field(inner, "Me", Value::Object(inner)).unwrap_err();
        assert!(matches!(err, HeapError::OwnershipCycle { .. }));
    }

    #[test]
    fn reference_cycles_are_allowed_and_counted() {
        let mut heap = Heap::new();
        let a = heap.alloc_record(vec![]).unwrap();
        let b = heap.alloc_record(vec![Field::new("A", Value::Ref(a))]).unwrap();
        heap.set_field(a, "B", Value::Ref(b)).unwrap();
        heap.set_field(a, "Self", Value::Ref(a)).unwrap();
        assert_eq!(heap.allocation(a).unwrap().alias_count(), 2);
        assert_eq!(heap.allocation(b).unwrap().alias_count(), 1);
        assert_eq!(heap.owner(a).unwrap(), None);
    }

    #[test]
    fn replacing_a_field_detaches_the_old_child() {
        let mut heap = Heap::new();
        let first = heap.alloc_sequence(vec![]).unwrap();
        let second = heap.alloc_sequence(vec![]).unwrap();
        let rec = heap
            .alloc_record(vec![Field::new("Slot", Value::Object(first))])
            .unwrap();

        let old = heap.set_field(rec, "Slot", Value::Object(second)).unwrap();
        assert_eq!(old, Some(Value::Object(first)));
        assert_eq!(heap.owner(first).unwrap(), None);
        assert_eq!(heap.owner(second).unwrap(), Some(rec));
        assert!(heap.is_dirty(rec).unwrap());
    }

    #[test]
    fn reassigning_the_same_child_keeps_ownership() {
        let mut heap = Heap::new();
        let child = heap.alloc_sequence(vec![]).unwrap();
        let rec = heap
            .alloc_record(vec![Field::new("Slot", Value::Object(child))])
            .unwrap();
        heap.set_field(rec, "Slot", Value::Object(child)).unwrap();
        assert_eq!(heap.owner(child).unwrap(), Some(rec));
    }

    #[test]
    fn moving_a_child_requires_detaching_it_first() {
        let mut heap = Heap::new();
        let child = heap.alloc_sequence(vec![]).unwrap();
        let a = heap.alloc_sequence(vec![Value::Object(child)]).unwrap();
        let b = heap.alloc_sequence(vec![]).unwrap();

        assert!(heap.push(b, Value::Object(child)).is_err());
        heap.pop(a).unwrap();
        heap.push(b, Value::Object(child)).unwrap();
        assert_eq!(heap.owner(child).unwrap(), Some(b));
    }

    #[test]
    fn map_preserves_insertion_order() {
        let mut heap = Heap::new();
        let m = heap.alloc_map(vec![]).unwrap();
        for key in ["z", "a", "m"] {
            heap.map_insert(m, Primitive::String(key.into()), 1i64.into()).unwrap();
        }
        heap.map_insert(m, Primitive::String("a".into()), 2i64.into()).unwrap();
        heap.map_remove(m, &Primitive::String("z".into())).unwrap();

        let Object::Map(map) = heap.get(m).unwrap() else {
            panic!("expected map");
        };
        let keys: Vec<_> = map.entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(
            keys,
            vec![Primitive::String("a".into()), Primitive::String("m".into())]
        );
        assert_eq!(map.get(&Primitive::String("a".into())), Some(&Value::from(2i64)));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let mut heap = Heap::new();
        let seq = heap.alloc_sequence(vec![]).unwrap();
        let err = heap.set_field(seq, "A", 1i64.into()).unwrap_err();
        assert_eq!(
            err,
            HeapError::KindMismatch {
                handle: seq,
                expected: ObjectKind::Record,
                actual: ObjectKind::Sequence
            }
        );
    }

    #[test]
    fn index_out_of_range() {
        let mut heap = Heap::new();
        let seq = heap.alloc_sequence(vec![Value::nil()]).unwrap();
        let err = heap.set_element(seq, 3, Value::nil()).unwrap_err();
        assert_eq!(
            err,
            HeapError::IndexOutOfRange {
                handle: seq,
                index: 3,
                len: 1
            }
        );
    }

    #[test]
    fn box_hoists_composite_payload() {
        let mut heap = Heap::new();
        let payload = heap
            .alloc_record(vec![Field::new("X", 1i64)])
            .unwrap();
        let b = heap.alloc_box(Value::Object(payload)).unwrap();

        assert_eq!(heap.hoisted_payload(b).unwrap(), Some(payload));
        assert_eq!(heap.unit_of(payload).unwrap(), b);
        assert!(heap.is_payload(payload).unwrap());
        assert_eq!(heap.unit_edges(b).unwrap(), vec![&Value::from(1i64)]);

        heap.set_field(payload, "X", 2i64.into()).unwrap();
        assert!(heap.is_dirty(b).unwrap());
    }

    #[test]
    fn box_of_box_does_not_hoist() {
        let mut heap = Heap::new();
        let inner = heap.alloc_box(1i64).unwrap();
        let outer = heap.alloc_box(Value::Object(inner)).unwrap();
        assert_eq!(heap.hoisted_payload(outer).unwrap(), None);
        assert_eq!(heap.unit_of(inner).unwrap(), inner);
    }

    #[test]
    fn reserve_then_fill_allows_forward_references() {
        let mut heap = Heap::new();
        let rec = heap.reserve(ObjectKind::Record, ObjectInfo::ephemeral()).unwrap();
        let seq = heap
            .reserve(ObjectKind::Sequence, ObjectInfo::new(id(2), ObjectId::zero(), 1))
            .unwrap();

        heap.fill(rec, Object::record(vec![Field::new("Alias", Value::Ref(seq))]))
            .unwrap();
        heap.fill(seq, Object::sequence(vec![1i64.into()])).unwrap();

        assert_eq!(heap.lookup(&id(2)), Some(seq));
        assert_eq!(heap.info(seq).unwrap().ref_count(), 1);
        assert_eq!(heap.allocation(seq).unwrap().alias_count(), 1);
    }

    #[test]
    fn fill_rejects_kind_change() {
        let mut heap = Heap::new();
        let h = heap.reserve(ObjectKind::Map, ObjectInfo::ephemeral()).unwrap();
        assert!(matches!(
            heap.fill(h, Object::sequence(vec![])),
            Err(HeapError::KindMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut heap = Heap::new();
        let info = ObjectInfo::new(id(1), ObjectId::zero(), 0);
        heap.reserve(ObjectKind::Record, info).unwrap();
        assert_eq!(
            heap.reserve(ObjectKind::Record, info).unwrap_err(),
            HeapError::DuplicateId(id(1))
        );
    }

    #[test]
    fn unsaved_flag_lasts_until_commit() {
        let mut heap = Heap::new();
        let h = heap
            .reserve(ObjectKind::Record, ObjectInfo::new(id(3), ObjectId::zero(), 0))
            .unwrap();
        assert!(!heap.is_unsaved(h).unwrap());
        heap.mark_unsaved(h).unwrap();
        heap.fill(h, Object::record(vec![])).unwrap();
        assert!(heap.is_unsaved(h).unwrap());
        heap.mark_clean(h).unwrap();
        assert!(!heap.is_unsaved(h).unwrap());
    }

    #[test]
    fn set_info_indexes_new_ids_once() {
        let mut heap = Heap::new();
        let h = heap.alloc_record(vec![]).unwrap();
        heap.set_info(h, ObjectInfo::new(id(5), ObjectId::zero(), 0)).unwrap();
        assert_eq!(heap.lookup(&id(5)), Some(h));

        let err = heap
            .set_info(h, ObjectInfo::new(id(6), ObjectId::zero(), 0))
            .unwrap_err();
        assert_eq!(err, HeapError::Type(TypeError::IdAlreadyAssigned(id(5))));
        // errors are kept by value in diff and commit reports
        let kept = err.clone();
        assert_eq!(kept, err);
    }

    #[test]
    fn release_tombstones_the_slot() {
        let mut heap = Heap::new();
        let child = heap.alloc_sequence(vec![]).unwrap();
        let h = heap
            .alloc_record(vec![Field::new("C", Value::Object(child))])
            .unwrap();
        heap.set_info(h, ObjectInfo::new(id(9), ObjectId::zero(), 0)).unwrap();

        heap.release(h).unwrap();
        assert_eq!(heap.get(h).unwrap_err(), HeapError::Released(h));
        assert_eq!(heap.lookup(&id(9)), None);
        assert_eq!(heap.owner(child).unwrap(), None);
        assert_eq!(heap.handles().collect::<Vec<_>>(), vec![child]);
    }

    #[test]
    fn quota_limits_allocations() {
        let mut heap = Heap::with_allocator(Allocator::with_limit(1));
        heap.alloc_record(vec![]).unwrap();
        assert_eq!(
            heap.alloc_record(vec![]).unwrap_err(),
            HeapError::Alloc(AllocError::LimitExceeded { limit: 1 })
        );
        assert_eq!(heap.allocator().stats().values, 1);
    }
}
