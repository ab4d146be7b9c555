use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of an object slot in a [`Heap`](crate::Heap).
///
/// Handles are stable for the lifetime of the heap; a released slot is never
/// reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    /// `None` once the index no longer fits a handle.
    pub(crate) fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().map(Self)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Leaf values. These have no identity and are always copied inline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Primitive {
    /// Short kind name, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// A value held by the evaluator or stored inside a composite object.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Primitive(Primitive),
    /// Owning edge: the containing object is the child's structural owner.
    Object(Handle),
    /// Non-owning alias. Counts towards the target's reference count.
    Ref(Handle),
    /// A host-owned value with no portable form.
    Extern(ExternValue),
}

/// Opaque value owned by a host collaborator (closures, native handles).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternValue {
    pub type_name: String,
}

impl ExternValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl Value {
    pub fn nil() -> Self {
        Self::Primitive(Primitive::Nil)
    }

    /// The owned child, if this is an owning edge.
    pub fn owned(&self) -> Option<Handle> {
        match self {
            Self::Object(h) => Some(*h),
            _ => None,
        }
    }

    /// The alias target, if this is a reference.
    pub fn ref_target(&self) -> Option<Handle> {
        match self {
            Self::Ref(h) => Some(*h),
            _ => None,
        }
    }

    /// Any object this value points at, owning or not.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Self::Object(h) | Self::Ref(h) => Some(*h),
            _ => None,
        }
    }
}

impl From<Primitive> for Value {
    fn from(p: Primitive) -> Self {
        Self::Primitive(p)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Primitive(Primitive::Bool(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Primitive(Primitive::Int(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Primitive(Primitive::Uint(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Primitive(Primitive::Float(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Primitive(Primitive::String(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Primitive(Primitive::String(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Primitive(Primitive::Bytes(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_accessors() {
        let h = Handle::from_index(3).unwrap();
        assert_eq!(Value::Object(h).owned(), Some(h));
        assert_eq!(Value::Object(h).ref_target(), None);
        assert_eq!(Value::Ref(h).ref_target(), Some(h));
        assert_eq!(Value::Ref(h).handle(), Some(h));
        assert_eq!(Value::from(1i64).handle(), None);
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from("a"), Value::Primitive(Primitive::String("a".into())));
        assert_eq!(Value::from(true), Value::Primitive(Primitive::Bool(true)));
        assert_eq!(Value::nil(), Value::Primitive(Primitive::Nil));
    }

    #[test]
    fn primitive_serde_roundtrip() {
        let p = Primitive::Bytes(vec![1, 2, 3]);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(serde_json::from_str::<Primitive>(&json).unwrap(), p);
    }

    #[test]
    fn handle_display() {
        assert_eq!(Handle::from_index(7).unwrap().to_string(), "#7");
    }

    #[test]
    fn handle_space_is_bounded() {
        let last = u32::MAX as usize;
        assert_eq!(Handle::from_index(last).map(|h| h.index()), Some(last));
        assert_eq!(Handle::from_index(last + 1), None);
    }
}
