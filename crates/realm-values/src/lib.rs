//! Value graph for the realm object substrate.
//!
//! Values produced by the evaluator live in a [`Heap`]: an arena addressed by
//! [`Handle`]. Composite values ([`Object`]) carry [`ObjectInfo`] metadata;
//! ownership is an explicit, exclusive parent relation kept by the heap, and
//! aliasing is expressed by [`Value::Ref`] values, never by shared pointers.
//!
//! # Modules
//!
//! - [`value`]: [`Value`], [`Primitive`], [`Handle`]
//! - [`object`]: Composite kinds: record, sequence, map, box
//! - [`heap`]: The arena and its ownership hooks
//! - [`alloc`]: Per-execution allocation accounting
//!
//! [`ObjectInfo`]: realm_types::ObjectInfo

pub mod alloc;
pub mod error;
pub mod heap;
pub mod object;
pub mod value;

pub use alloc::{AllocStats, Allocation, Allocator};
pub use error::{AllocError, HeapError, HeapResult};
pub use heap::Heap;
pub use object::{
    BoxValue, Field, MapEntry, MapValue, Object, ObjectKind, RecordValue, SequenceValue,
};
pub use value::{ExternValue, Handle, Primitive, Value};
