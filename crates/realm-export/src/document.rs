//! The document schema.
//!
//! ```json
//! {
//!   "root": {
//!     "info": { "id": ":1", "reference_count": 0 },
//!     "kind": "record",
//!     "fields": [
//!       { "name": "Items", "value": { "@type": "ref", "id": ":2" } },
//!       { "name": "Owned", "value": { "@type": "object", "object": { ... } } }
//!     ]
//!   }
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use realm_types::{ObjectId, ObjectInfo, TypeError};
use realm_values::ObjectKind;

use crate::error::{ExportError, ExportResult, ImportError, ImportResult};

/// Deepest nesting of node definitions a document may hold. The root is at
/// depth 0.
pub const MAX_NESTING: usize = 256;

/// JSON containers a parser accepts: a node level opens at most four.
const MAX_JSON_DEPTH: usize = 4 * MAX_NESTING + 2;

// ---------------------------------------------------------------------------
// DisplayId
// ---------------------------------------------------------------------------

/// How an object is named inside a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayId {
    /// A persisted object, rendered `"<namespace-hex>:<seq>"`.
    Real(ObjectId),
    /// An ephemeral object, rendered `":N"`.
    Local(u64),
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(id) => write!(f, "{id}"),
            Self::Local(n) => write!(f, ":{n}"),
        }
    }
}

impl FromStr for DisplayId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(':') {
            Some(digits) => {
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(TypeError::InvalidObjectId {
                        input: s.to_string(),
                        reason: "local id must be ':' followed by digits".into(),
                    });
                }
                digits
                    .parse()
                    .map(Self::Local)
                    .map_err(|e: std::num::ParseIntError| TypeError::InvalidObjectId {
                        input: s.to_string(),
                        reason: e.to_string(),
                    })
            }
            None => s.parse().map(Self::Real),
        }
    }
}

impl Serialize for DisplayId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DisplayId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ExportedInfo
// ---------------------------------------------------------------------------

/// Object metadata as it appears in a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedInfo {
    pub id: DisplayId,
    /// Omitted for unowned objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<ObjectId>,
    pub reference_count: u32,
}

impl ExportedInfo {
    /// Render `info`, naming an ephemeral object by its `local` ordinal.
    pub fn from_info(info: &ObjectInfo, local: u64) -> Self {
        let id = if info.is_real() {
            DisplayId::Real(info.id())
        } else {
            DisplayId::Local(local)
        };
        let owner_id = (!info.owner_id().is_zero()).then(|| info.owner_id());
        Self {
            id,
            owner_id,
            reference_count: info.ref_count(),
        }
    }

    /// The metadata to give an imported object. Local ids become ephemeral.
    pub fn to_info(&self) -> ObjectInfo {
        let id = match self.id {
            DisplayId::Real(id) => id,
            DisplayId::Local(_) => ObjectId::zero(),
        };
        ObjectInfo::new(
            id,
            self.owner_id.unwrap_or_else(ObjectId::zero),
            self.reference_count,
        )
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// The kind tag of a node. Unknown tags are kept so the importer can
/// report them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Record,
    Sequence,
    Map,
    Box,
    Unknown(String),
}

impl From<ObjectKind> for NodeKind {
    fn from(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Record => Self::Record,
            ObjectKind::Sequence => Self::Sequence,
            ObjectKind::Map => Self::Map,
            ObjectKind::Box => Self::Box,
        }
    }
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "record" => Self::Record,
            "sequence" => Self::Sequence,
            "map" => Self::Map,
            "box" => Self::Box,
            _ => Self::Unknown(s),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Record => "record".into(),
            NodeKind::Sequence => "sequence".into(),
            NodeKind::Map => "map".into(),
            NodeKind::Box => "box".into(),
            NodeKind::Unknown(s) => s,
        }
    }
}

impl NodeKind {
    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self {
            Self::Record => Some(ObjectKind::Record),
            Self::Sequence => Some(ObjectKind::Sequence),
            Self::Map => Some(ObjectKind::Map),
            Self::Box => Some(ObjectKind::Box),
            Self::Unknown(_) => None,
        }
    }
}

/// The definition of one object.
///
/// A box that hoists a composite payload is written as a single node with
/// the box's metadata, `"boxed": true`, and the payload's kind and
/// children. A box holding anything else has kind `box` and a `value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub info: ExportedInfo,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub boxed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSlot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<IndexedSlot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<EntrySlot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Element>,
}

impl Node {
    pub fn new(info: ExportedInfo, kind: NodeKind) -> Self {
        Self {
            info,
            kind,
            boxed: false,
            fields: None,
            elements: None,
            entries: None,
            value: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSlot {
    pub name: String,
    pub value: Element,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexedSlot {
    pub index: usize,
    pub value: Element,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntrySlot {
    pub key: Element,
    pub value: Element,
}

// ---------------------------------------------------------------------------
// Float
// ---------------------------------------------------------------------------

/// A float that survives the document round trip bit for bit.
///
/// Finite values are JSON numbers. NaN and the infinities have no JSON
/// number form and are written as their IEEE-754 bits, `"0x7ff8000000000000"`.
/// Equality is bitwise, so `NaN == NaN` and `0.0 != -0.0`.
#[derive(Clone, Copy, Debug)]
pub struct Float(pub f64);

impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Float {}

impl From<f64> for Float {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl Serialize for Float {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_finite() {
            serializer.serialize_f64(self.0)
        } else {
            serializer.collect_str(&format_args!("{:#018x}", self.0.to_bits()))
        }
    }
}

impl<'de> Deserialize<'de> for Float {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FloatVisitor;

        impl serde::de::Visitor<'_> for FloatVisitor {
            type Value = Float;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or a \"0x\"-prefixed bit pattern")
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Float, E> {
                Ok(Float(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Float, E> {
                Ok(Float(v as f64))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Float, E> {
                Ok(Float(v as f64))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Float, E> {
                let digits = v
                    .strip_prefix("0x")
                    .ok_or_else(|| E::custom(format!("invalid float {v:?}")))?;
                u64::from_str_radix(digits, 16)
                    .map(|bits| Float(f64::from_bits(bits)))
                    .map_err(|e| E::custom(format!("invalid float {v:?}: {e}")))
            }
        }

        deserializer.deserialize_any(FloatVisitor)
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

/// A value inside a node, tagged by `@type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "snake_case")]
pub enum Element {
    Nil,
    Bool {
        value: bool,
    },
    Int {
        value: i64,
    },
    Uint {
        value: u64,
    },
    Float {
        value: Float,
    },
    String {
        value: String,
    },
    /// Hex-encoded.
    Bytes {
        value: String,
    },
    /// Owning edge with the child's definition inline.
    Object {
        object: Box<Node>,
    },
    /// Alias edge. Carries the target's definition when this is the first
    /// visit of an object owned outside the document.
    Ref {
        id: DisplayId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object: Option<Box<Node>>,
    },
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// An exported object graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub root: Node,
}

impl Document {
    pub fn to_json(&self) -> ExportResult<String> {
        serde_json::to_string(self).map_err(|e| ExportError::Serialization(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> ExportResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ExportError::Serialization(e.to_string()))
    }

    /// Parse a document. Malformed input, or input nested deeper than a
    /// document can be, is a schema error.
    pub fn from_json(json: &str) -> ImportResult<Self> {
        let depth = json_depth(json);
        if depth > MAX_JSON_DEPTH {
            return Err(ImportError::Schema(format!(
                "input nests {depth} levels, at most {MAX_JSON_DEPTH} allowed"
            )));
        }
        let schema = |e: serde_json::Error| ImportError::Schema(e.to_string());
        let mut de = serde_json::Deserializer::from_str(json);
        de.disable_recursion_limit();
        let doc = Self::deserialize(serde_stacker::Deserializer::new(&mut de)).map_err(schema)?;
        de.end().map_err(schema)?;
        Ok(doc)
    }
}

/// Deepest bracket nesting in `json`, ignoring brackets inside strings.
fn json_depth(json: &str) -> usize {
    let (mut depth, mut max) = (0usize, 0usize);
    let (mut in_string, mut escaped) = (false, false);
    for b in json.bytes() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                max = max.max(depth);
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}
