//! Ownership diff: walk the reachable graph and plan metadata.
//!
//! The walk is depth-first from the roots, visiting children in natural
//! order, and only hash maps keyed by handle are used for lookups, so two
//! identical heaps always produce identical diffs.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use realm_types::{IdAllocator, NamespaceId, ObjectId, ObjectInfo};
use realm_values::{Handle, Heap, Value};

use crate::error::{DiffError, DiffResult};

/// Recorded and planned metadata of one reachable unit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnitPlan {
    pub handle: Handle,
    /// Metadata as recorded at the last commit (ephemeral for new units).
    pub old: ObjectInfo,
    /// Metadata the unit has after this commit.
    pub new: ObjectInfo,
    /// Content changed during the execution.
    pub dirty: bool,
    /// Has a real id but no committed record, as after an import.
    pub unsaved: bool,
}

impl UnitPlan {
    /// Returns `true` if the unit has no committed record yet.
    pub fn is_new(&self) -> bool {
        !self.old.is_real() || self.unsaved
    }

    /// Returns `true` if the unit needs to be written.
    pub fn is_changed(&self) -> bool {
        self.is_new() || self.dirty || self.old != self.new
    }
}

/// A single metadata change produced by the walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnershipChange {
    /// A unit is written for the first time: an ephemeral unit got an id,
    /// or an unsaved one keeps its id.
    Allocated { handle: Handle, id: ObjectId },
    /// A persistent unit moved to a different owner.
    Reparented {
        id: ObjectId,
        from: ObjectId,
        to: ObjectId,
    },
    /// A persistent unit's reference count changed.
    Rereferenced { id: ObjectId, from: u32, to: u32 },
    /// A persistent unit's content changed.
    Modified { id: ObjectId },
    /// A persistent unit is no longer reachable.
    Reclaimed { handle: Handle, id: ObjectId },
}

/// The result of diffing a heap against its recorded metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnershipDiff {
    pub namespace: NamespaceId,
    /// Last allocated sequence number before the commit.
    pub base_seq: u64,
    /// Last allocated sequence number after the commit.
    pub next_seq: u64,
    /// Id of the first root, if it is persisted for the first time.
    pub new_root: Option<ObjectId>,
    /// Reachable units in first-visit order.
    pub units: Vec<UnitPlan>,
    /// Changes in first-visit order, followed by reclamations by sequence.
    pub changes: Vec<OwnershipChange>,
}

impl OwnershipDiff {
    /// Returns `true` if there are no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Number of newly persisted units.
    pub fn allocations(&self) -> usize {
        self.count(|c| matches!(c, OwnershipChange::Allocated { .. }))
    }

    /// Number of re-parented units.
    pub fn reparentings(&self) -> usize {
        self.count(|c| matches!(c, OwnershipChange::Reparented { .. }))
    }

    /// Number of units whose reference count changed.
    pub fn rereferences(&self) -> usize {
        self.count(|c| matches!(c, OwnershipChange::Rereferenced { .. }))
    }

    /// Number of modified units.
    pub fn modifications(&self) -> usize {
        self.count(|c| matches!(c, OwnershipChange::Modified { .. }))
    }

    /// Number of reclaimed units.
    pub fn reclamations(&self) -> usize {
        self.count(|c| matches!(c, OwnershipChange::Reclaimed { .. }))
    }

    fn count(&self, pred: impl Fn(&OwnershipChange) -> bool) -> usize {
        self.changes.iter().filter(|c| pred(c)).count()
    }

    /// The plan for a reachable unit.
    pub fn plan(&self, handle: Handle) -> Option<&UnitPlan> {
        self.units.iter().find(|u| u.handle == handle)
    }

    /// Ids of reclaimed units, in sequence order.
    pub fn reclaimed(&self) -> impl Iterator<Item = (Handle, ObjectId)> + '_ {
        self.changes.iter().filter_map(|c| match c {
            OwnershipChange::Reclaimed { handle, id } => Some((*handle, *id)),
            _ => None,
        })
    }

    /// Write the planned metadata back into `heap` after a successful commit.
    ///
    /// Assigns ids, owners and reference counts, advances `ids` past every
    /// planned id, clears dirty flags of the reachable units and releases
    /// reclaimed ones.
    pub fn apply(&self, heap: &mut Heap, ids: &mut IdAllocator) -> DiffResult<()> {
        if ids.namespace() != self.namespace {
            return Err(DiffError::InvariantViolation(format!(
                "diff for namespace {} applied with allocator for {}",
                self.namespace,
                ids.namespace()
            )));
        }
        for unit in &self.units {
            heap.set_info(unit.handle, unit.new)?;
            heap.mark_clean(unit.handle)?;
            if let Some(payload) = heap.hoisted_payload(unit.handle)? {
                heap.mark_clean(payload)?;
            }
        }
        ids.advance_to(self.next_seq);

        let reclaimed: Vec<_> = self.reclaimed().collect();
        for (handle, _) in reclaimed {
            if let Some(payload) = heap.hoisted_payload(handle)? {
                heap.release(payload)?;
            }
            heap.release(handle)?;
        }
        debug!(
            namespace = %self.namespace.short_hex(),
            units = self.units.len(),
            last_seq = self.next_seq,
            "applied ownership diff"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Walk {
    order: Vec<Handle>,
    owners: HashMap<Handle, Handle>,
    aliases: HashMap<Handle, u32>,
}

fn violation(msg: String) -> DiffError {
    DiffError::InvariantViolation(msg)
}

fn is_foreign(info: &ObjectInfo, namespace: NamespaceId) -> bool {
    info.is_real() && info.id().namespace() != namespace
}

fn walk(heap: &Heap, roots: &[Handle], namespace: NamespaceId) -> DiffResult<Walk> {
    let mut walk = Walk::default();
    let root_set: HashSet<Handle> = roots.iter().copied().collect();

    for &root in roots {
        if heap.owner(root)?.is_some() {
            return Err(violation(format!("root {root} has an owner")));
        }
    }

    let mut seen = HashSet::new();
    let mut stack: Vec<Handle> = roots.iter().rev().copied().collect();
    while let Some(handle) = stack.pop() {
        if !seen.insert(handle) {
            continue;
        }
        let info = heap.info(handle)?;
        if is_foreign(&info, namespace) {
            if heap.is_dirty(handle)? || heap.is_unsaved(handle)? {
                return Err(DiffError::ForeignObject(info.id()));
            }
            continue;
        }
        walk.order.push(handle);

        let mut next = Vec::new();
        for value in heap.unit_edges(handle)? {
            match value {
                Value::Object(child) => {
                    let child = *child;
                    let child_info = heap.info(child)?;
                    if is_foreign(&child_info, namespace) {
                        return Err(DiffError::ForeignObject(child_info.id()));
                    }
                    if root_set.contains(&child) {
                        return Err(violation(format!("root {child} is owned by {handle}")));
                    }
                    if let Some(previous) = walk.owners.insert(child, handle) {
                        return Err(violation(format!(
                            "{child} is owned by both {previous} and {handle}"
                        )));
                    }
                    next.push(child);
                }
                Value::Ref(target) => {
                    if heap.is_payload(*target)? {
                        return Err(violation(format!(
                            "{handle} references boxed payload {target}"
                        )));
                    }
                    *walk.aliases.entry(*target).or_default() += 1;
                    next.push(*target);
                }
                Value::Primitive(_) | Value::Extern(_) => {}
            }
        }
        stack.extend(next.into_iter().rev());
    }
    Ok(walk)
}

/// Diff the graph reachable from `roots` against its recorded metadata.
///
/// `ids` is the namespace's allocator; it is not modified, new ids are
/// planned on a copy. Unsaved units keep their ids, and fresh ids are
/// planned past the highest of them.
pub fn diff_ownership(
    heap: &Heap,
    roots: &[Handle],
    ids: &IdAllocator,
) -> DiffResult<OwnershipDiff> {
    let namespace = ids.namespace();
    let walk = walk(heap, roots, namespace)?;

    let mut planner = ids.clone();
    for &handle in &walk.order {
        if heap.is_unsaved(handle)? {
            planner.advance_to(heap.info(handle)?.id().seq());
        }
    }
    let mut planned: HashMap<Handle, ObjectId> = HashMap::with_capacity(walk.order.len());
    for &handle in &walk.order {
        let info = heap.info(handle)?;
        let id = if info.is_real() {
            info.id()
        } else {
            planner.next_id()?
        };
        planned.insert(handle, id);
    }

    let mut units = Vec::with_capacity(walk.order.len());
    let mut changes = Vec::new();
    let mut reached = HashSet::with_capacity(walk.order.len());
    for &handle in &walk.order {
        let old = heap.info(handle)?;
        let id = planned
            .get(&handle)
            .copied()
            .ok_or_else(|| violation(format!("{handle} has no planned id")))?;
        let owner_id = walk
            .owners
            .get(&handle)
            .and_then(|o| planned.get(o))
            .copied()
            .unwrap_or_else(ObjectId::zero);
        let ref_count = walk.aliases.get(&handle).copied().unwrap_or(0);
        let new = ObjectInfo::new(id, owner_id, ref_count);
        let dirty = heap.is_dirty(handle)?;
        let unsaved = heap.is_unsaved(handle)?;

        if old.is_real() && !unsaved {
            if old.owner_id() != owner_id {
                changes.push(OwnershipChange::Reparented {
                    id,
                    from: old.owner_id(),
                    to: owner_id,
                });
            }
            if old.ref_count() != ref_count {
                changes.push(OwnershipChange::Rereferenced {
                    id,
                    from: old.ref_count(),
                    to: ref_count,
                });
            }
            if dirty {
                changes.push(OwnershipChange::Modified { id });
            }
        } else {
            changes.push(OwnershipChange::Allocated { handle, id });
        }
        reached.insert(handle);
        units.push(UnitPlan {
            handle,
            old,
            new,
            dirty,
            unsaved,
        });
    }

    let mut reclaimed = Vec::new();
    for handle in heap.handles() {
        // Unsaved objects have nothing in the store to delete.
        if reached.contains(&handle) || heap.is_payload(handle)? || heap.is_unsaved(handle)? {
            continue;
        }
        let info = heap.info(handle)?;
        if info.is_real() && info.id().namespace() == namespace {
            reclaimed.push((info.id(), handle));
        }
    }
    reclaimed.sort();
    changes.extend(
        reclaimed
            .into_iter()
            .map(|(id, handle)| OwnershipChange::Reclaimed { handle, id }),
    );

    let new_root = roots
        .first()
        .filter(|r| units.iter().any(|u| u.handle == **r && u.is_new()))
        .and_then(|r| planned.get(r))
        .copied();

    let diff = OwnershipDiff {
        namespace,
        base_seq: ids.last_seq(),
        next_seq: planner.last_seq(),
        new_root,
        units,
        changes,
    };
    debug!(
        namespace = %namespace.short_hex(),
        reachable = diff.units.len(),
        allocated = diff.allocations(),
        reclaimed = diff.reclamations(),
        "computed ownership diff"
    );
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_values::{Field, Object, ObjectKind};

    fn ns() -> NamespaceId {
        NamespaceId::from_path("gno.land/r/demo/diff")
    }

    fn fresh() -> IdAllocator {
        IdAllocator::new(ns(), 0)
    }

    /// Commit-free helper: diff then apply.
    fn settle(heap: &mut Heap, root: Handle, ids: &mut IdAllocator) -> OwnershipDiff {
        let diff = diff_ownership(heap, &[root], ids).unwrap();
        diff.apply(heap, ids).unwrap();
        diff
    }

    #[test]
    fn first_commit_allocates_in_visit_order() {
        let mut heap = Heap::new();
        let leaf = heap.alloc_sequence(vec![1i64.into()]).unwrap();
        let other = heap.alloc_record(vec![]).unwrap();
        let root = heap
            .alloc_record(vec![
                Field::new("Leaf", Value::Object(leaf)),
                Field::new("Other", Value::Ref(other)),
            ])
            .unwrap();

        let diff = diff_ownership(&heap, &[root], &fresh()).unwrap();
        assert_eq!(diff.allocations(), 3);
        assert_eq!(diff.base_seq, 0);
        assert_eq!(diff.next_seq, 3);
        assert_eq!(diff.new_root, Some(ObjectId::new(ns(), 1)));

        let ids: Vec<_> = diff.units.iter().map(|u| u.new.id().seq()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(diff.plan(leaf).unwrap().new.owner_id(), ObjectId::new(ns(), 1));
        assert_eq!(diff.plan(other).unwrap().new.owner_id(), ObjectId::zero());
        assert_eq!(diff.plan(other).unwrap().new.ref_count(), 1);
    }

    #[test]
    fn diff_does_not_touch_heap_or_allocator() {
        let mut heap = Heap::new();
        let root = heap.alloc_record(vec![]).unwrap();
        let ids = fresh();
        diff_ownership(&heap, &[root], &ids).unwrap();
        assert_eq!(ids.last_seq(), 0);
        assert!(!heap.info(root).unwrap().is_real());
    }

    #[test]
    fn second_diff_without_mutation_is_empty() {
        let mut heap = Heap::new();
        let child = heap.alloc_map(vec![]).unwrap();
        let root = heap
            .alloc_record(vec![Field::new("M", Value::Object(child))])
            .unwrap();
        let mut ids = fresh();
        settle(&mut heap, root, &mut ids);
        assert_eq!(ids.last_seq(), 2);

        let diff = diff_ownership(&heap, &[root], &ids).unwrap();
        assert!(diff.is_empty());
        assert_eq!(diff.next_seq, diff.base_seq);
        assert_eq!(diff.new_root, None);
    }

    #[test]
    fn moving_a_child_reparents_it() {
        let mut heap = Heap::new();
        let child = heap.alloc_sequence(vec![]).unwrap();
        let a = heap.alloc_sequence(vec![Value::Object(child)]).unwrap();
        let b = heap.alloc_sequence(vec![]).unwrap();
        let root = heap
            .alloc_record(vec![
                Field::new("A", Value::Object(a)),
                Field::new("B", Value::Object(b)),
            ])
            .unwrap();
        let mut ids = fresh();
        settle(&mut heap, root, &mut ids);
        let a_id = heap.info(a).unwrap().id();
        let b_id = heap.info(b).unwrap().id();
        let child_id = heap.info(child).unwrap().id();

        heap.pop(a).unwrap();
        heap.push(b, Value::Object(child)).unwrap();
        let diff = diff_ownership(&heap, &[root], &ids).unwrap();
        assert!(diff.changes.contains(&OwnershipChange::Reparented {
            id: child_id,
            from: a_id,
            to: b_id
        }));
        assert_eq!(diff.modifications(), 2);
        assert_eq!(diff.allocations(), 0);
    }

    #[test]
    fn unreachable_real_units_are_reclaimed_by_seq() {
        let mut heap = Heap::new();
        let x = heap.alloc_record(vec![]).unwrap();
        let y = heap.alloc_record(vec![]).unwrap();
        let root = heap
            .alloc_record(vec![
                Field::new("X", Value::Object(x)),
                Field::new("Y", Value::Ref(y)),
            ])
            .unwrap();
        let mut ids = fresh();
        settle(&mut heap, root, &mut ids);
        let x_id = heap.info(x).unwrap().id();
        let y_id = heap.info(y).unwrap().id();

        heap.set_field(root, "Y", Value::nil()).unwrap();
        heap.set_field(root, "X", Value::nil()).unwrap();
        let diff = diff_ownership(&heap, &[root], &ids).unwrap();
        let reclaimed: Vec<_> = diff.reclaimed().map(|(_, id)| id).collect();
        assert_eq!(reclaimed, vec![x_id, y_id]);

        diff.apply(&mut heap, &mut ids).unwrap();
        assert!(!heap.contains(x));
        assert_eq!(heap.lookup(&y_id), None);
    }

    #[test]
    fn alias_to_unowned_object_keeps_it_alive() {
        let mut heap = Heap::new();
        let target = heap.alloc_record(vec![]).unwrap();
        let root = heap
            .alloc_record(vec![Field::new("T", Value::Ref(target))])
            .unwrap();
        let mut ids = fresh();
        settle(&mut heap, root, &mut ids);

        heap.set_field(root, "U", Value::Ref(target)).unwrap();
        let diff = diff_ownership(&heap, &[root], &ids).unwrap();
        let target_id = heap.info(target).unwrap().id();
        assert!(diff.changes.contains(&OwnershipChange::Rereferenced {
            id: target_id,
            from: 1,
            to: 2
        }));
        assert_eq!(diff.reclamations(), 0);
    }

    #[test]
    fn box_and_payload_are_one_unit() {
        let mut heap = Heap::new();
        let payload = heap.alloc_record(vec![Field::new("V", 1i64)]).unwrap();
        let b = heap.alloc_box(Value::Object(payload)).unwrap();
        let root = heap
            .alloc_record(vec![
                Field::new("B", Value::Object(b)),
                Field::new("R", Value::Ref(b)),
            ])
            .unwrap();

        let diff = diff_ownership(&heap, &[root], &fresh()).unwrap();
        assert_eq!(diff.units.len(), 2);
        assert!(diff.plan(payload).is_none());
        let plan = diff.plan(b).unwrap();
        assert_eq!(plan.new.ref_count(), 1);
        assert_eq!(plan.new.owner_id(), ObjectId::new(ns(), 1));
    }

    #[test]
    fn reference_into_payload_is_a_violation() {
        let mut heap = Heap::new();
        let payload = heap.alloc_record(vec![]).unwrap();
        let b = heap.alloc_box(Value::Object(payload)).unwrap();
        let root = heap
            .alloc_record(vec![
                Field::new("B", Value::Object(b)),
                Field::new("P", Value::Ref(payload)),
            ])
            .unwrap();
        assert!(matches!(
            diff_ownership(&heap, &[root], &fresh()),
            Err(DiffError::InvariantViolation(_))
        ));
    }

    #[test]
    fn owned_root_is_a_violation() {
        let mut heap = Heap::new();
        let root = heap.alloc_record(vec![]).unwrap();
        heap.alloc_box(Value::Object(root)).unwrap();
        assert!(matches!(
            diff_ownership(&heap, &[root], &fresh()),
            Err(DiffError::InvariantViolation(_))
        ));
    }

    #[test]
    fn modifying_foreign_object_is_rejected() {
        let mut heap = Heap::new();
        let other = ObjectId::new(NamespaceId::from_path("gno.land/r/other"), 4);
        let foreign = heap
            .reserve(ObjectKind::Record, ObjectInfo::new(other, ObjectId::zero(), 1))
            .unwrap();
        heap.fill(foreign, Object::record(vec![])).unwrap();
        let root = heap
            .alloc_record(vec![Field::new("F", Value::Ref(foreign))])
            .unwrap();

        // Aliasing is fine, mutation is not.
        assert!(diff_ownership(&heap, &[root], &fresh()).is_ok());
        heap.set_field(foreign, "X", 1i64.into()).unwrap();
        assert!(matches!(
            diff_ownership(&heap, &[root], &fresh()),
            Err(DiffError::ForeignObject(id)) if id == other
        ));
    }

    #[test]
    fn unsaved_units_are_created_under_their_own_id() {
        let mut heap = Heap::new();
        let mut ids = fresh();
        let root = heap.alloc_record(vec![]).unwrap();
        settle(&mut heap, root, &mut ids);

        let kept = ObjectId::new(ns(), 7);
        let restored = heap
            .reserve(ObjectKind::Record, ObjectInfo::new(kept, ObjectId::zero(), 0))
            .unwrap();
        heap.fill(restored, Object::record(vec![])).unwrap();
        heap.mark_unsaved(restored).unwrap();
        let stray_info = ObjectInfo::new(ObjectId::new(ns(), 9), ObjectId::zero(), 0);
        let stray = heap.reserve(ObjectKind::Record, stray_info).unwrap();
        heap.mark_unsaved(stray).unwrap();
        let fresh_child = heap.alloc_record(vec![]).unwrap();
        heap.set_field(root, "R", Value::Object(restored)).unwrap();
        heap.set_field(root, "N", Value::Object(fresh_child)).unwrap();

        let diff = diff_ownership(&heap, &[root], &ids).unwrap();
        let plan = diff.plan(restored).unwrap();
        assert!(plan.is_new());
        assert_eq!(plan.new.id(), kept);
        assert_eq!(plan.new.owner_id(), ObjectId::new(ns(), 1));
        // fresh ids come after the kept one
        assert_eq!(diff.plan(fresh_child).unwrap().new.id().seq(), 8);
        assert_eq!(diff.next_seq, 8);
        assert_eq!(diff.allocations(), 2);
        // an unreachable unsaved object is not reclaimed
        assert_eq!(diff.reclamations(), 0);

        diff.apply(&mut heap, &mut ids).unwrap();
        assert!(!heap.is_unsaved(restored).unwrap());
        assert!(heap.is_unsaved(stray).unwrap());
    }

    #[test]
    fn unsaved_foreign_object_is_rejected() {
        let mut heap = Heap::new();
        let other = ObjectId::new(NamespaceId::from_path("gno.land/r/other"), 2);
        let foreign = heap
            .reserve(ObjectKind::Record, ObjectInfo::new(other, ObjectId::zero(), 0))
            .unwrap();
        heap.fill(foreign, Object::record(vec![])).unwrap();
        heap.mark_unsaved(foreign).unwrap();
        let root = heap
            .alloc_record(vec![Field::new("F", Value::Ref(foreign))])
            .unwrap();
        assert!(matches!(
            diff_ownership(&heap, &[root], &fresh()),
            Err(DiffError::ForeignObject(id)) if id == other
        ));
    }

    #[test]
    fn sequence_exhaustion_surfaces() {
        let mut heap = Heap::new();
        let root = heap.alloc_record(vec![]).unwrap();
        let ids = IdAllocator::new(ns(), u64::MAX);
        assert!(matches!(
            diff_ownership(&heap, &[root], &ids),
            Err(DiffError::Type(_))
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        /// Build a heap from a list of (parent index, owning?) edges.
        fn build(edges: &[(usize, bool)]) -> (Heap, Handle) {
            let mut heap = Heap::new();
            let root = heap.alloc_sequence(vec![]).unwrap();
            let mut nodes = vec![root];
            for &(parent, owning) in edges {
                let parent = nodes[parent % nodes.len()];
                let node = heap.alloc_sequence(vec![]).unwrap();
                let value = if owning { Value::Object(node) } else { Value::Ref(node) };
                heap.push(parent, value).unwrap();
                nodes.push(node);
            }
            (heap, root)
        }

        proptest! {
            #[test]
            fn diff_is_deterministic(
                edges in proptest::collection::vec((0usize..16, any::<bool>()), 0..24),
            ) {
                let (a, ra) = build(&edges);
                let (b, rb) = build(&edges);
                let da = diff_ownership(&a, &[ra], &fresh()).unwrap();
                let db = diff_ownership(&b, &[rb], &fresh()).unwrap();
                prop_assert_eq!(da, db);
            }

            #[test]
            fn planned_ids_are_dense_and_increasing(
                edges in proptest::collection::vec((0usize..16, any::<bool>()), 0..24),
            ) {
                let (heap, root) = build(&edges);
                let diff = diff_ownership(&heap, &[root], &fresh()).unwrap();
                let seqs: Vec<u64> = diff.units.iter().map(|u| u.new.id().seq()).collect();
                let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
                prop_assert_eq!(seqs, expected);
            }
        }
    }
}
