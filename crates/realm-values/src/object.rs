use serde::{Deserialize, Serialize};

use realm_types::ObjectInfo;

use crate::value::{Primitive, Value};

/// The kind of a composite object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Structured record with named fields.
    Record,
    /// Ordered, indexed elements.
    Sequence,
    /// Key/value entries in insertion order.
    Map,
    /// Indirection box: independent identity for a boxed value.
    Box,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record => write!(f, "record"),
            Self::Sequence => write!(f, "sequence"),
            Self::Map => write!(f, "map"),
            Self::Box => write!(f, "box"),
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A named field of a record.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Exported fields start with an uppercase letter.
    pub fn is_exported(&self) -> bool {
        self.name.chars().next().is_some_and(char::is_uppercase)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordValue {
    pub info: ObjectInfo,
    pub fields: Vec<Field>,
}

impl RecordValue {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SequenceValue {
    pub info: ObjectInfo,
    pub elements: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// One map entry. Keys are primitives compared by equality.
#[derive(Clone, Debug, PartialEq)]
pub struct MapEntry {
    pub key: Primitive,
    pub value: Value,
}

impl MapEntry {
    pub fn new(key: Primitive, value: impl Into<Value>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapValue {
    pub info: ObjectInfo,
    pub entries: Vec<MapEntry>,
}

impl MapValue {
    pub fn get(&self, key: &Primitive) -> Option<&Value> {
        self.entries.iter().find(|e| &e.key == key).map(|e| &e.value)
    }
}

// ---------------------------------------------------------------------------
// Box
// ---------------------------------------------------------------------------

/// Indirection box.
///
/// The box carries its own metadata, distinct from the value it boxes. When
/// the boxed value is a composite (non-box) object, the box and its payload
/// form one persistence unit: ownership and reference counting apply to the
/// box, and the payload is written inline in the box's serialized form.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxValue {
    pub info: ObjectInfo,
    pub value: Value,
}

impl Default for BoxValue {
    fn default() -> Self {
        Self {
            info: ObjectInfo::ephemeral(),
            value: Value::nil(),
        }
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

/// A composite value carrying object metadata.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    Record(RecordValue),
    Sequence(SequenceValue),
    Map(MapValue),
    Box(BoxValue),
}

impl Object {
    pub fn record(fields: Vec<Field>) -> Self {
        Self::Record(RecordValue {
            info: ObjectInfo::ephemeral(),
            fields,
        })
    }

    pub fn sequence(elements: Vec<Value>) -> Self {
        Self::Sequence(SequenceValue {
            info: ObjectInfo::ephemeral(),
            elements,
        })
    }

    pub fn map(entries: Vec<MapEntry>) -> Self {
        Self::Map(MapValue {
            info: ObjectInfo::ephemeral(),
            entries,
        })
    }

    pub fn boxed(value: impl Into<Value>) -> Self {
        Self::Box(BoxValue {
            info: ObjectInfo::ephemeral(),
            value: value.into(),
        })
    }

    /// An empty object of `kind`, used as a placeholder before its contents
    /// are known.
    pub fn empty(kind: ObjectKind, info: ObjectInfo) -> Self {
        match kind {
            ObjectKind::Record => Self::Record(RecordValue {
                info,
                ..Default::default()
            }),
            ObjectKind::Sequence => Self::Sequence(SequenceValue {
                info,
                ..Default::default()
            }),
            ObjectKind::Map => Self::Map(MapValue {
                info,
                ..Default::default()
            }),
            ObjectKind::Box => Self::Box(BoxValue {
                info,
                ..Default::default()
            }),
        }
    }

    /// Replace the metadata, builder style.
    pub fn with_info(mut self, info: ObjectInfo) -> Self {
        *self.info_mut() = info;
        self
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Record(_) => ObjectKind::Record,
            Self::Sequence(_) => ObjectKind::Sequence,
            Self::Map(_) => ObjectKind::Map,
            Self::Box(_) => ObjectKind::Box,
        }
    }

    pub fn info(&self) -> &ObjectInfo {
        match self {
            Self::Record(v) => &v.info,
            Self::Sequence(v) => &v.info,
            Self::Map(v) => &v.info,
            Self::Box(v) => &v.info,
        }
    }

    pub fn info_mut(&mut self) -> &mut ObjectInfo {
        match self {
            Self::Record(v) => &mut v.info,
            Self::Sequence(v) => &mut v.info,
            Self::Map(v) => &mut v.info,
            Self::Box(v) => &mut v.info,
        }
    }

    /// Contained values in natural order: fields in declaration order,
    /// elements by index, map values in insertion order, the boxed value.
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Self::Record(v) => v.fields.iter().map(|f| &f.value).collect(),
            Self::Sequence(v) => v.elements.iter().collect(),
            Self::Map(v) => v.entries.iter().map(|e| &e.value).collect(),
            Self::Box(v) => vec![&v.value],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_field_names() {
        assert!(Field::new("Name", 1i64).is_exported());
        assert!(!Field::new("name", 1i64).is_exported());
        assert!(!Field::new("_x", 1i64).is_exported());
        assert!(!Field::new("", 1i64).is_exported());
    }

    #[test]
    fn values_keep_natural_order() {
        let obj = Object::record(vec![
            Field::new("Z", 1i64),
            Field::new("A", 2i64),
            Field::new("m", 3i64),
        ]);
        let values: Vec<_> = obj.values().into_iter().cloned().collect();
        assert_eq!(values, vec![Value::from(1i64), Value::from(2i64), Value::from(3i64)]);
    }

    #[test]
    fn map_lookup_by_key() {
        let Object::Map(map) = Object::map(vec![
            MapEntry::new(Primitive::String("b".into()), 2i64),
            MapEntry::new(Primitive::Int(1), 1i64),
        ]) else {
            unreachable!()
        };
        assert_eq!(map.get(&Primitive::Int(1)), Some(&Value::from(1i64)));
        assert_eq!(map.get(&Primitive::Nil), None);
    }

    #[test]
    fn empty_has_requested_kind_and_info() {
        for kind in [
            ObjectKind::Record,
            ObjectKind::Sequence,
            ObjectKind::Map,
            ObjectKind::Box,
        ] {
            let obj = Object::empty(kind, ObjectInfo::ephemeral());
            assert_eq!(obj.kind(), kind);
        }
    }

    #[test]
    fn kind_display() {
        assert_eq!(ObjectKind::Sequence.to_string(), "sequence");
        assert_eq!(ObjectKind::Box.to_string(), "box");
    }
}
