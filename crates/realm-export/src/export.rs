use std::collections::{HashMap, HashSet};

use tracing::debug;

use realm_values::{Field, Handle, Heap, Object, Primitive, Value};

use crate::document::{
    DisplayId, Document, Element, EntrySlot, ExportedInfo, FieldSlot, Float, IndexedSlot, Node,
    NodeKind, MAX_NESTING,
};
use crate::error::{ExportError, ExportResult};
use crate::options::ExportOptions;

/// Export everything reachable from `root`.
///
/// Runs in two passes. The first walks the graph depth-first in natural
/// order, numbering every visited object and noting which objects are owned
/// by another object of the export. The second emits nodes: an owned object
/// is defined at its owning edge, any other object at its first visit, and
/// every other occurrence becomes a `ref` element.
///
/// With [`ExportOptions::max_depth`] set, objects nested deeper than the
/// limit are written as `ref` elements without a definition. Such a
/// document describes the graph but cannot be imported on its own. A graph
/// whose definitions nest deeper than [`MAX_NESTING`] fails with
/// [`ExportError::TooDeep`].
pub fn export(heap: &Heap, root: Handle, options: &ExportOptions) -> ExportResult<Document> {
    let mut exporter = Exporter {
        heap,
        options,
        ordinals: HashMap::new(),
        owned: HashSet::new(),
        defined: HashSet::new(),
    };
    exporter.scan(root)?;
    let node = exporter.emit(root, 0)?;
    debug!(root = %root, objects = exporter.ordinals.len(), "exported graph");
    Ok(Document { root: node })
}

struct Exporter<'a> {
    heap: &'a Heap,
    options: &'a ExportOptions,
    /// First-visit ordinal of every object, starting at 1.
    ordinals: HashMap<Handle, u64>,
    /// Objects whose owning edge is part of the export.
    owned: HashSet<Handle>,
    /// Objects whose node was already emitted.
    defined: HashSet<Handle>,
}

fn violation(msg: String) -> ExportError {
    ExportError::InvariantViolation(msg)
}

impl<'a> Exporter<'a> {
    /// The object whose contents are written for `handle`: the payload of
    /// a hoisting box, otherwise the object itself.
    fn contents(&self, handle: Handle) -> ExportResult<(&'a Object, bool)> {
        match self.heap.hoisted_payload(handle)? {
            Some(payload) => Ok((self.heap.get(payload)?, true)),
            None => Ok((self.heap.get(handle)?, false)),
        }
    }

    fn visible<'f>(&self, fields: &'f [Field]) -> impl Iterator<Item = &'f Field> + 'f {
        let all = self.options.include_unexported;
        fields.iter().filter(move |f| all || f.is_exported())
    }

    fn edges(&self, handle: Handle) -> ExportResult<Vec<&'a Value>> {
        let (object, _) = self.contents(handle)?;
        Ok(match object {
            Object::Record(r) => self.visible(&r.fields).map(|f| &f.value).collect(),
            other => other.values(),
        })
    }

    fn scan(&mut self, root: Handle) -> ExportResult<()> {
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            if self.ordinals.contains_key(&handle) {
                continue;
            }
            let ordinal = self.ordinals.len() as u64 + 1;
            self.ordinals.insert(handle, ordinal);

            let mut next = Vec::new();
            for value in self.edges(handle)? {
                match value {
                    Value::Object(child) => {
                        if *child == root || !self.owned.insert(*child) {
                            return Err(violation(format!("{child} is owned twice")));
                        }
                        next.push(*child);
                    }
                    Value::Ref(target) => {
                        if self.heap.is_payload(*target)? {
                            return Err(violation(format!(
                                "{handle} references boxed payload {target}"
                            )));
                        }
                        next.push(*target);
                    }
                    Value::Extern(e) => {
                        return Err(ExportError::UnsupportedKind(e.type_name.clone()));
                    }
                    Value::Primitive(_) => {}
                }
            }
            stack.extend(next.into_iter().rev());
        }
        Ok(())
    }

    fn display_id(&self, handle: Handle) -> ExportResult<DisplayId> {
        let info = self.heap.info(handle)?;
        if info.is_real() {
            return Ok(DisplayId::Real(info.id()));
        }
        self.ordinals
            .get(&handle)
            .map(|n| DisplayId::Local(*n))
            .ok_or_else(|| violation(format!("{handle} was not visited")))
    }

    /// Whether a node at `depth` is cut off by the depth limit.
    fn truncated(&self, depth: usize) -> bool {
        matches!(self.options.max_depth, Some(max) if depth > max)
    }

    fn emit(&mut self, handle: Handle, depth: usize) -> ExportResult<Node> {
        if depth >= MAX_NESTING {
            return Err(ExportError::TooDeep { limit: MAX_NESTING });
        }
        if !self.defined.insert(handle) {
            return Err(violation(format!("{handle} would be defined twice")));
        }
        let ordinal = self
            .ordinals
            .get(&handle)
            .copied()
            .ok_or_else(|| violation(format!("{handle} was not visited")))?;
        let info = ExportedInfo::from_info(&self.heap.info(handle)?, ordinal);
        let (object, boxed) = self.contents(handle)?;

        let mut node = Node::new(info, NodeKind::from(object.kind()));
        node.boxed = boxed;
        match object {
            Object::Record(r) => {
                let mut slots = Vec::new();
                for field in self.visible(&r.fields) {
                    slots.push(FieldSlot {
                        name: field.name.clone(),
                        value: self.element(&field.value, depth)?,
                    });
                }
                node.fields = Some(slots);
            }
            Object::Sequence(s) => {
                let mut slots = Vec::with_capacity(s.elements.len());
                for (index, value) in s.elements.iter().enumerate() {
                    slots.push(IndexedSlot {
                        index,
                        value: self.element(value, depth)?,
                    });
                }
                node.elements = Some(slots);
            }
            Object::Map(m) => {
                let mut slots = Vec::with_capacity(m.entries.len());
                for entry in &m.entries {
                    slots.push(EntrySlot {
                        key: primitive(&entry.key),
                        value: self.element(&entry.value, depth)?,
                    });
                }
                node.entries = Some(slots);
            }
            Object::Box(b) => {
                node.value = Some(self.element(&b.value, depth)?);
            }
        }
        Ok(node)
    }

    /// Render a value held by a node at `depth`.
    fn element(&mut self, value: &Value, depth: usize) -> ExportResult<Element> {
        match value {
            Value::Primitive(p) => Ok(primitive(p)),
            Value::Object(child) if self.truncated(depth + 1) => Ok(Element::Ref {
                id: self.display_id(*child)?,
                object: None,
            }),
            Value::Object(child) => Ok(Element::Object {
                object: Box::new(self.emit(*child, depth + 1)?),
            }),
            Value::Ref(target) => {
                let id = self.display_id(*target)?;
                let object = if self.defined.contains(target)
                    || self.owned.contains(target)
                    || self.truncated(depth + 1)
                {
                    None
                } else {
                    Some(Box::new(self.emit(*target, depth + 1)?))
                };
                Ok(Element::Ref { id, object })
            }
            Value::Extern(e) => Err(ExportError::UnsupportedKind(e.type_name.clone())),
        }
    }
}

pub(crate) fn primitive(p: &Primitive) -> Element {
    match p {
        Primitive::Nil => Element::Nil,
        Primitive::Bool(value) => Element::Bool { value: *value },
        Primitive::Int(value) => Element::Int { value: *value },
        Primitive::Uint(value) => Element::Uint { value: *value },
        Primitive::Float(value) => Element::Float {
            value: Float(*value),
        },
        Primitive::String(value) => Element::String {
            value: value.clone(),
        },
        Primitive::Bytes(value) => Element::Bytes {
            value: hex::encode(value),
        },
    }
}
