//! Portable documents for realm object graphs.
//!
//! [`export`] serializes everything reachable from a root handle into a
//! tree-shaped [`Document`], defining each object exactly once and naming
//! every other occurrence by its display id, so shared aliases and cycles
//! survive. [`import`] reverses it, resolving forward references through a
//! pre-pass over all definitions.
//!
//! # Display ids
//!
//! Persisted objects are named `"<namespace-hex>:<seq>"`; ephemeral objects
//! are named `":N"`, where `N` is the object's first-visit ordinal within
//! the export. The two forms never collide.

pub mod document;
pub mod error;
pub mod export;
pub mod import;
pub mod options;

pub use document::{
    DisplayId, Document, Element, EntrySlot, ExportedInfo, FieldSlot, Float, IndexedSlot, Node,
    NodeKind, MAX_NESTING,
};
pub use error::{ExportError, ExportResult, ImportError, ImportResult};
pub use export::export;
pub use import::import;
pub use options::ExportOptions;
