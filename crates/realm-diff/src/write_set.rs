//! Turn an [`OwnershipDiff`] into the [`WriteSet`] a store commits.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use realm_store::{NamespaceState, ObjectRecord, StoredPayload, StoredValue, WriteSet};
use realm_types::ObjectId;
use realm_values::{Handle, Heap, Object, ObjectKind, Value};

use crate::error::{DiffError, DiffResult};
use crate::ownership::{OwnershipChange, OwnershipDiff, UnitPlan};

/// Build the write set for `diff`, computed against the committed `base`.
///
/// - New units become created records.
/// - Persistent units are updated when their content or metadata changed,
///   when they are the old or new owner of a re-parented unit, or when they
///   own a newly allocated unit.
/// - Reclaimed units are deleted.
///
/// Records carry the planned metadata and reference children by id; a
/// box's composite payload is written inline in the box's record.
pub fn build_write_set(
    heap: &Heap,
    diff: &OwnershipDiff,
    base: &NamespaceState,
) -> DiffResult<WriteSet> {
    if base.last_seq != diff.base_seq {
        return Err(DiffError::InvariantViolation(format!(
            "diff is based on seq {}, namespace is at {}",
            diff.base_seq, base.last_seq
        )));
    }

    let ids: HashMap<Handle, ObjectId> = diff
        .units
        .iter()
        .map(|u| (u.handle, u.new.id()))
        .collect();
    let by_id: HashMap<ObjectId, Handle> = ids.iter().map(|(h, id)| (*id, *h)).collect();

    let mut touched: HashSet<Handle> = diff
        .units
        .iter()
        .filter(|u| !u.is_new() && u.is_changed())
        .map(|u| u.handle)
        .collect();
    for change in &diff.changes {
        match change {
            OwnershipChange::Reparented { from, to, .. } => {
                for owner in [from, to] {
                    if let Some(handle) = by_id.get(owner) {
                        touched.insert(*handle);
                    }
                }
            }
            OwnershipChange::Allocated { handle, .. } => {
                let owner = diff.plan(*handle).map(|p| p.new.owner_id());
                if let Some(handle) = owner.and_then(|o| by_id.get(&o)) {
                    touched.insert(*handle);
                }
            }
            _ => {}
        }
    }

    let mut ws = WriteSet::new(diff.namespace, base);
    ws.next_seq = diff.next_seq;
    ws.root = diff.new_root;
    for unit in &diff.units {
        if unit.is_new() {
            ws.created.push(record(heap, unit, &ids)?);
        } else if touched.contains(&unit.handle) {
            ws.updated.push(record(heap, unit, &ids)?);
        }
    }
    ws.deleted = diff.reclaimed().map(|(_, id)| id).collect();

    debug!(
        namespace = %diff.namespace.short_hex(),
        created = ws.created.len(),
        updated = ws.updated.len(),
        deleted = ws.deleted.len(),
        "built write set"
    );
    Ok(ws)
}

fn record(
    heap: &Heap,
    unit: &UnitPlan,
    ids: &HashMap<Handle, ObjectId>,
) -> DiffResult<ObjectRecord> {
    let payload = payload_of(heap, heap.get(unit.handle)?, ids)?;
    Ok(ObjectRecord::new(unit.new, payload))
}

fn resolve(heap: &Heap, handle: Handle, ids: &HashMap<Handle, ObjectId>) -> DiffResult<ObjectId> {
    if let Some(id) = ids.get(&handle) {
        return Ok(*id);
    }
    let info = heap.info(handle)?;
    if info.is_real() {
        Ok(info.id())
    } else {
        Err(DiffError::InvariantViolation(format!(
            "{handle} is referenced but was not reached"
        )))
    }
}

fn stored_value(
    heap: &Heap,
    value: &Value,
    ids: &HashMap<Handle, ObjectId>,
) -> DiffResult<StoredValue> {
    match value {
        Value::Primitive(p) => Ok(StoredValue::Primitive(p.clone())),
        Value::Object(child) => Ok(StoredValue::Object(resolve(heap, *child, ids)?)),
        Value::Ref(target) => Ok(StoredValue::Ref(resolve(heap, *target, ids)?)),
        Value::Extern(e) => Err(DiffError::InvariantViolation(format!(
            "extern value of type {} cannot be persisted",
            e.type_name
        ))),
    }
}

fn payload_of(
    heap: &Heap,
    object: &Object,
    ids: &HashMap<Handle, ObjectId>,
) -> DiffResult<StoredPayload> {
    let payload = match object {
        Object::Record(r) => StoredPayload::Record {
            fields: r
                .fields
                .iter()
                .map(|f| Ok((f.name.clone(), stored_value(heap, &f.value, ids)?)))
                .collect::<DiffResult<_>>()?,
        },
        Object::Sequence(s) => StoredPayload::Sequence {
            elements: s
                .elements
                .iter()
                .map(|v| stored_value(heap, v, ids))
                .collect::<DiffResult<_>>()?,
        },
        Object::Map(m) => StoredPayload::Map {
            entries: m
                .entries
                .iter()
                .map(|e| Ok((e.key.clone(), stored_value(heap, &e.value, ids)?)))
                .collect::<DiffResult<_>>()?,
        },
        Object::Box(b) => {
            let value = match b.value {
                Value::Object(p) if heap.kind(p)? != ObjectKind::Box => {
                    StoredValue::Inline(Box::new(payload_of(heap, heap.get(p)?, ids)?))
                }
                _ => stored_value(heap, &b.value, ids)?,
            };
            StoredPayload::Box { value }
        }
    };
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::diff_ownership;
    use realm_types::{IdAllocator, NamespaceId};
    use realm_values::{ExternValue, Field, Primitive};

    fn ns() -> NamespaceId {
        NamespaceId::from_path("gno.land/r/demo/writeset")
    }

    fn id(seq: u64) -> ObjectId {
        ObjectId::new(ns(), seq)
    }

    /// Diff, build, and pretend the commit succeeded.
    fn commit(
        heap: &mut Heap,
        root: Handle,
        ids: &mut IdAllocator,
        base: &mut NamespaceState,
    ) -> WriteSet {
        let diff = diff_ownership(heap, &[root], ids).unwrap();
        let ws = build_write_set(heap, &diff, base).unwrap();
        diff.apply(heap, ids).unwrap();
        base.last_seq = ws.next_seq;
        base.version += 1;
        if ws.root.is_some() {
            base.root = ws.root;
        }
        ws
    }

    #[test]
    fn first_commit_creates_everything() {
        let mut heap = Heap::new();
        let seq = heap.alloc_sequence(vec![1i64.into(), 2i64.into()]).unwrap();
        let root = heap
            .alloc_record(vec![Field::new("S", Value::Object(seq))])
            .unwrap();
        let mut ids = IdAllocator::new(ns(), 0);
        let mut base = NamespaceState::default();

        let ws = commit(&mut heap, root, &mut ids, &mut base);
        assert_eq!(ws.root, Some(id(1)));
        assert_eq!(ws.base_seq, 0);
        assert_eq!(ws.next_seq, 2);
        assert_eq!(ws.created.len(), 2);
        assert!(ws.updated.is_empty());
        assert_eq!(
            ws.created[0].payload,
            StoredPayload::Record {
                fields: vec![("S".into(), StoredValue::Object(id(2)))]
            }
        );
        assert_eq!(ws.created[1].info.owner_id(), id(1));
    }

    #[test]
    fn unchanged_heap_builds_empty_write_set() {
        let mut heap = Heap::new();
        let root = heap.alloc_record(vec![Field::new("A", 1i64)]).unwrap();
        let mut ids = IdAllocator::new(ns(), 0);
        let mut base = NamespaceState::default();
        commit(&mut heap, root, &mut ids, &mut base);

        let ws = commit(&mut heap, root, &mut ids, &mut base);
        assert!(ws.is_empty());
    }

    #[test]
    fn moving_a_payload_rewrites_both_boxes() {
        let mut heap = Heap::new();
        let child = heap.alloc_record(vec![]).unwrap();
        let a = heap.alloc_box(Value::Object(child)).unwrap();
        let b = heap.alloc_box(Value::nil()).unwrap();
        let root = heap
            .alloc_sequence(vec![Value::Object(a), Value::Object(b)])
            .unwrap();
        let mut ids = IdAllocator::new(ns(), 0);
        let mut base = NamespaceState::default();
        commit(&mut heap, root, &mut ids, &mut base);

        // A hoisted payload has no id of its own and moves with its box.
        heap.set_boxed(a, Value::nil()).unwrap();
        heap.set_boxed(b, Value::Object(child)).unwrap();
        let ws = commit(&mut heap, root, &mut ids, &mut base);
        let updated: Vec<_> = ws.updated.iter().map(|r| r.id()).collect();
        assert!(updated.contains(&heap.info(a).unwrap().id()));
        assert!(updated.contains(&heap.info(b).unwrap().id()));
        assert!(ws.created.is_empty());
        assert!(!heap.info(child).unwrap().is_real());
    }

    #[test]
    fn moving_a_persistent_child_updates_old_and_new_owner() {
        let mut heap = Heap::new();
        let child = heap.alloc_map(vec![]).unwrap();
        let a = heap.alloc_sequence(vec![Value::Object(child)]).unwrap();
        let b = heap.alloc_sequence(vec![]).unwrap();
        let root = heap
            .alloc_sequence(vec![Value::Object(a), Value::Object(b)])
            .unwrap();
        let mut ids = IdAllocator::new(ns(), 0);
        let mut base = NamespaceState::default();
        commit(&mut heap, root, &mut ids, &mut base);

        heap.pop(a).unwrap();
        heap.push(b, Value::Object(child)).unwrap();
        let ws = commit(&mut heap, root, &mut ids, &mut base);
        let updated: Vec<_> = ws.updated.iter().map(|r| r.id()).collect();
        let a_id = heap.info(a).unwrap().id();
        let b_id = heap.info(b).unwrap().id();
        let child_id = heap.info(child).unwrap().id();
        assert_eq!(updated, vec![a_id, b_id, child_id]);
        let moved = ws.updated.iter().find(|r| r.id() == child_id).unwrap();
        assert_eq!(moved.info.owner_id(), b_id);
    }

    #[test]
    fn new_child_updates_its_owner() {
        let mut heap = Heap::new();
        let root = heap.alloc_sequence(vec![]).unwrap();
        let mut ids = IdAllocator::new(ns(), 0);
        let mut base = NamespaceState::default();
        commit(&mut heap, root, &mut ids, &mut base);

        let child = heap.alloc_record(vec![]).unwrap();
        heap.push(root, Value::Object(child)).unwrap();
        let ws = commit(&mut heap, root, &mut ids, &mut base);
        assert_eq!(ws.created.len(), 1);
        assert_eq!(ws.created[0].id(), id(2));
        assert_eq!(ws.updated.len(), 1);
        assert_eq!(ws.updated[0].id(), id(1));
        assert_eq!(
            ws.updated[0].payload,
            StoredPayload::Sequence {
                elements: vec![StoredValue::Object(id(2))]
            }
        );
    }

    #[test]
    fn box_payload_is_inlined() {
        let mut heap = Heap::new();
        let payload = heap
            .alloc_map(vec![realm_values::MapEntry::new(Primitive::Int(1), "one")])
            .unwrap();
        let b = heap.alloc_box(Value::Object(payload)).unwrap();
        let root = heap
            .alloc_record(vec![Field::new("B", Value::Object(b))])
            .unwrap();
        let mut ids = IdAllocator::new(ns(), 0);
        let mut base = NamespaceState::default();
        let ws = commit(&mut heap, root, &mut ids, &mut base);

        assert_eq!(ws.created.len(), 2);
        assert_eq!(
            ws.created[1].payload,
            StoredPayload::Box {
                value: StoredValue::Inline(Box::new(StoredPayload::Map {
                    entries: vec![(
                        Primitive::Int(1),
                        StoredValue::Primitive(Primitive::String("one".into()))
                    )]
                }))
            }
        );
    }

    #[test]
    fn reclaimed_units_are_deleted() {
        let mut heap = Heap::new();
        let gone = heap.alloc_record(vec![]).unwrap();
        let root = heap
            .alloc_record(vec![Field::new("G", Value::Object(gone))])
            .unwrap();
        let mut ids = IdAllocator::new(ns(), 0);
        let mut base = NamespaceState::default();
        commit(&mut heap, root, &mut ids, &mut base);

        heap.set_field(root, "G", Value::nil()).unwrap();
        let ws = commit(&mut heap, root, &mut ids, &mut base);
        assert_eq!(ws.deleted, vec![id(2)]);
        assert_eq!(ws.updated.len(), 1);
    }

    #[test]
    fn extern_values_cannot_be_persisted() {
        let mut heap = Heap::new();
        let root = heap
            .alloc_record(vec![Field::new("F", Value::Extern(ExternValue::new("func()")))])
            .unwrap();
        let ids = IdAllocator::new(ns(), 0);
        let diff = diff_ownership(&heap, &[root], &ids).unwrap();
        assert!(matches!(
            build_write_set(&heap, &diff, &NamespaceState::default()),
            Err(DiffError::InvariantViolation(_))
        ));
    }

    #[test]
    fn stale_base_is_rejected() {
        let mut heap = Heap::new();
        let root = heap.alloc_record(vec![]).unwrap();
        let diff = diff_ownership(&heap, &[root], &IdAllocator::new(ns(), 0)).unwrap();
        let base = NamespaceState {
            last_seq: 5,
            ..Default::default()
        };
        assert!(build_write_set(&heap, &diff, &base).is_err());
    }
}
