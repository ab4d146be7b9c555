use std::collections::HashMap;

use tracing::debug;

use realm_types::{ObjectId, ObjectInfo};
use realm_values::{
    AllocError, Field, Handle, Heap, HeapError, MapEntry, Object, ObjectKind, Primitive, Value,
};

use crate::document::{DisplayId, Document, Element, Float, Node, MAX_NESTING};
use crate::error::{ImportError, ImportResult};

/// Rebuild the graph described by `doc` inside `heap` and return the root.
///
/// When `replacement` is given it becomes the root's metadata instead of
/// the metadata recorded in the document. Local ids import as ephemeral
/// objects; real ids keep their identity and are marked unsaved, so the
/// next commit creates them under that id.
///
/// The whole document is validated before the heap is touched, so a
/// failed import leaves the heap unchanged.
pub fn import(
    heap: &mut Heap,
    doc: &Document,
    replacement: Option<ObjectInfo>,
) -> ImportResult<Handle> {
    let plan = Plan::build(heap, doc, replacement)?;
    let root = plan.apply(heap)?;
    debug!(root = %root, objects = plan.defs.len(), "imported document");
    Ok(root)
}

/// Where a value points.
#[derive(Clone, Copy, Debug)]
enum Target {
    Def(usize),
    Existing(Handle),
}

#[derive(Clone, Debug)]
enum Planned {
    Primitive(Primitive),
    Owned(usize),
    Alias(Target),
}

#[derive(Clone, Debug)]
enum Contents {
    Record(Vec<(String, Planned)>),
    Sequence(Vec<Planned>),
    Map(Vec<(Primitive, Planned)>),
    Box(Planned),
}

impl Contents {
    fn kind(&self) -> ObjectKind {
        match self {
            Self::Record(_) => ObjectKind::Record,
            Self::Sequence(_) => ObjectKind::Sequence,
            Self::Map(_) => ObjectKind::Map,
            Self::Box(_) => ObjectKind::Box,
        }
    }
}

#[derive(Clone, Debug)]
struct Def {
    info: ObjectInfo,
    /// Set for a box whose composite payload is inlined in its node.
    boxed: bool,
    contents: Contents,
}

struct Plan {
    defs: Vec<Def>,
}

fn schema(msg: impl Into<String>) -> ImportError {
    ImportError::Schema(msg.into())
}

impl Plan {
    fn build(heap: &Heap, doc: &Document, replacement: Option<ObjectInfo>) -> ImportResult<Self> {
        // Pre-pass: index every definition in document order.
        let nodes = collect(&doc.root)?;
        let mut index: HashMap<DisplayId, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.info.id, i).is_some() {
                return Err(schema(format!("{} is defined more than once", node.info.id)));
            }
        }

        let planner = Planner {
            heap,
            index: &index,
        };
        let mut defs = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            let mut info = node.info.to_info();
            if i == 0 {
                if let Some(replacement) = replacement {
                    info = replacement;
                }
            }
            if info.is_real() && heap.lookup(&info.id()).is_some() {
                return Err(HeapError::DuplicateId(info.id()).into());
            }
            let contents = planner.contents(node)?;
            defs.push(Def {
                info,
                boxed: node.boxed,
                contents,
            });
        }

        let mut seen_ids: HashMap<ObjectId, usize> = HashMap::new();
        for (i, def) in defs.iter().enumerate() {
            if def.info.is_real() && seen_ids.insert(def.info.id(), i).is_some() {
                return Err(schema(format!("{} is defined more than once", def.info.id())));
            }
        }

        let needed: usize = defs.iter().map(|d| if d.boxed { 2 } else { 1 }).sum();
        if let (Some(remaining), Some(limit)) =
            (heap.allocator().remaining(), heap.allocator().limit())
        {
            if needed > remaining {
                return Err(HeapError::Alloc(AllocError::LimitExceeded { limit }).into());
            }
        }
        Ok(Self { defs })
    }

    fn apply(&self, heap: &mut Heap) -> ImportResult<Handle> {
        // Reserve every object first so references can point forward.
        let mut handles = Vec::with_capacity(self.defs.len());
        let mut payloads = Vec::with_capacity(self.defs.len());
        for def in &self.defs {
            if def.boxed {
                let handle = heap.reserve(ObjectKind::Box, def.info)?;
                let payload = heap.reserve(def.contents.kind(), ObjectInfo::ephemeral())?;
                handles.push(handle);
                payloads.push(Some(payload));
            } else {
                handles.push(heap.reserve(def.contents.kind(), def.info)?);
                payloads.push(None);
            }
        }

        let value = |planned: &Planned| -> Value {
            match planned {
                Planned::Primitive(p) => Value::Primitive(p.clone()),
                Planned::Owned(i) => Value::Object(handles[*i]),
                Planned::Alias(Target::Def(i)) => Value::Ref(handles[*i]),
                Planned::Alias(Target::Existing(h)) => Value::Ref(*h),
            }
        };

        let mut fills = Vec::with_capacity(self.defs.len() * 2);
        for (i, def) in self.defs.iter().enumerate() {
            let object = match &def.contents {
                Contents::Record(fields) => Object::record(
                    fields
                        .iter()
                        .map(|(name, v)| Field::new(name.clone(), value(v)))
                        .collect(),
                ),
                Contents::Sequence(elements) => {
                    Object::sequence(elements.iter().map(&value).collect())
                }
                Contents::Map(entries) => Object::map(
                    entries
                        .iter()
                        .map(|(k, v)| MapEntry::new(k.clone(), value(v)))
                        .collect(),
                ),
                Contents::Box(v) => Object::boxed(value(v)),
            };
            match payloads[i] {
                Some(payload) => {
                    fills.push((payload, object));
                    fills.push((handles[i], Object::boxed(Value::Object(payload))));
                }
                None => fills.push((handles[i], object)),
            }
        }
        for (handle, object) in fills {
            heap.fill(handle, object)?;
        }
        for (def, handle) in self.defs.iter().zip(&handles) {
            if def.info.is_real() {
                heap.mark_unsaved(*handle)?;
            }
        }
        Ok(handles[0])
    }
}

/// Collect node definitions in document order, parents before children.
fn collect(root: &Node) -> ImportResult<Vec<&Node>> {
    let mut out = Vec::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        if depth >= MAX_NESTING {
            return Err(schema(format!(
                "{} nests deeper than {MAX_NESTING} levels",
                node.info.id
            )));
        }
        out.push(node);
        let values = node
            .fields
            .iter()
            .flatten()
            .map(|s| &s.value)
            .chain(node.elements.iter().flatten().map(|s| &s.value))
            .chain(node.entries.iter().flatten().map(|s| &s.value))
            .chain(node.value.as_ref());
        let children: Vec<&Node> = values
            .filter_map(|element| match element {
                Element::Object { object }
                | Element::Ref {
                    object: Some(object),
                    ..
                } => Some(object.as_ref()),
                _ => None,
            })
            .collect();
        stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
    }
    Ok(out)
}

struct Planner<'a> {
    heap: &'a Heap,
    index: &'a HashMap<DisplayId, usize>,
}

impl Planner<'_> {
    fn contents(&self, node: &Node) -> ImportResult<Contents> {
        let Some(kind) = node.kind.object_kind() else {
            return Err(ImportError::UnsupportedKind(node.kind.clone().into()));
        };
        let id = node.info.id;
        match kind {
            ObjectKind::Record => {
                let slots = node
                    .fields
                    .as_ref()
                    .ok_or_else(|| schema(format!("record {id} has no fields")))?;
                let fields = slots
                    .iter()
                    .map(|s| Ok((s.name.clone(), self.value(&s.value)?)))
                    .collect::<ImportResult<_>>()?;
                Ok(Contents::Record(fields))
            }
            ObjectKind::Sequence => {
                let slots = node
                    .elements
                    .as_ref()
                    .ok_or_else(|| schema(format!("sequence {id} has no elements")))?;
                let mut elements = Vec::with_capacity(slots.len());
                for (i, slot) in slots.iter().enumerate() {
                    if slot.index != i {
                        return Err(schema(format!(
                            "sequence {id} has index {} at position {i}",
                            slot.index
                        )));
                    }
                    elements.push(self.value(&slot.value)?);
                }
                Ok(Contents::Sequence(elements))
            }
            ObjectKind::Map => {
                let slots = node
                    .entries
                    .as_ref()
                    .ok_or_else(|| schema(format!("map {id} has no entries")))?;
                let entries = slots
                    .iter()
                    .map(|s| Ok((key(&s.key)?, self.value(&s.value)?)))
                    .collect::<ImportResult<_>>()?;
                Ok(Contents::Map(entries))
            }
            ObjectKind::Box => {
                if node.boxed {
                    return Err(schema(format!("boxed node {id} cannot hoist a box")));
                }
                let value = node
                    .value
                    .as_ref()
                    .ok_or_else(|| schema(format!("box {id} has no value")))?;
                Ok(Contents::Box(self.value(value)?))
            }
        }
    }

    fn value(&self, element: &Element) -> ImportResult<Planned> {
        match element {
            Element::Object { object } => self
                .index
                .get(&object.info.id)
                .map(|i| Planned::Owned(*i))
                .ok_or_else(|| schema(format!("{} is not indexed", object.info.id))),
            Element::Ref {
                id,
                object: Some(object),
            } if object.info.id != *id => Err(schema(format!(
                "ref to {id} carries the definition of {}",
                object.info.id
            ))),
            Element::Ref { id, .. } => self.target(id).map(Planned::Alias),
            Element::Unknown => Err(ImportError::UnsupportedKind("unknown element".into())),
            other => primitive(other).map(Planned::Primitive),
        }
    }

    fn target(&self, id: &DisplayId) -> ImportResult<Target> {
        if let Some(i) = self.index.get(id) {
            return Ok(Target::Def(*i));
        }
        match id {
            DisplayId::Real(real) => self
                .heap
                .lookup(real)
                .map(Target::Existing)
                .ok_or_else(|| ImportError::DanglingReference(id.to_string())),
            DisplayId::Local(_) => Err(ImportError::DanglingReference(id.to_string())),
        }
    }
}

fn key(element: &Element) -> ImportResult<Primitive> {
    match element {
        Element::Object { .. } | Element::Ref { .. } => {
            Err(schema("map keys must be primitive values"))
        }
        Element::Unknown => Err(ImportError::UnsupportedKind("unknown element".into())),
        other => primitive(other),
    }
}

fn primitive(element: &Element) -> ImportResult<Primitive> {
    Ok(match element {
        Element::Nil => Primitive::Nil,
        Element::Bool { value } => Primitive::Bool(*value),
        Element::Int { value } => Primitive::Int(*value),
        Element::Uint { value } => Primitive::Uint(*value),
        Element::Float { value: Float(value) } => Primitive::Float(*value),
        Element::String { value } => Primitive::String(value.clone()),
        Element::Bytes { value } => Primitive::Bytes(
            hex::decode(value).map_err(|e| schema(format!("invalid bytes {value:?}: {e}")))?,
        ),
        Element::Object { .. } | Element::Ref { .. } | Element::Unknown => {
            return Err(schema("expected a primitive element"));
        }
    })
}
