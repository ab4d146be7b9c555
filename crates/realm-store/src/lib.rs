//! Persistence boundary for realm object graphs.
//!
//! Committed objects are stored as [`ObjectRecord`]s keyed by [`ObjectId`].
//! A record references its children by id, never by handle, and a box
//! writes the composite payload it hoists inline. One execution's changes
//! travel to the store as a single [`WriteSet`].
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. A write set is committed atomically: all records or none.
//! 2. Everything is validated before anything is applied.
//! 3. A write set must be based on the namespace's committed sequence
//!    counter; a stale base is a [`StoreError::CommitConflict`].
//! 4. Concurrent reads are always safe.
//!
//! [`ObjectId`]: realm_types::ObjectId

pub mod error;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryObjectStore;
pub use record::{
    CommitReceipt, NamespaceState, ObjectRecord, StoredPayload, StoredValue, WriteSet,
};
pub use traits::ObjectStore;
