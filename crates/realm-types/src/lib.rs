//! Identity layer for the realm object substrate.
//!
//! This crate provides the identity and metadata types every other realm
//! crate builds on. It has no notion of values or storage; it only answers
//! "who is this object, who owns it, and how many aliases point at it".
//!
//! # Key Types
//!
//! - [`NamespaceId`]: Package/realm scope, derived from a package path
//! - [`ObjectId`]: `(namespace, seq)` pair; all-zero means ephemeral
//! - [`IdAllocator`]: Explicit per-namespace sequence counter
//! - [`ObjectInfo`]: Identity, owner and reference count of one object

pub mod error;
pub mod identity;
pub mod info;
pub mod object;

pub use error::{TypeError, TypeResult};
pub use identity::NamespaceId;
pub use info::ObjectInfo;
pub use object::{IdAllocator, ObjectId};
