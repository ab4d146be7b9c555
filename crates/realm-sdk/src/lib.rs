//! High-level API for the realm object substrate.
//!
//! A [`Realm`] is one execution against one namespace: it loads the
//! namespace's committed graph into a [`Heap`], lets the evaluator mutate
//! it, and on [`Realm::finalize`] turns the ownership diff into a write set
//! committed atomically to the backing [`ObjectStore`].

pub mod config;
pub mod error;
pub mod realm;

pub use config::RealmConfig;
pub use error::{RealmError, RealmResult};
pub use realm::{CommitSummary, Realm};

// Re-export key types
pub use realm_export::{Document, ExportOptions};
pub use realm_store::{InMemoryObjectStore, NamespaceState, ObjectStore};
pub use realm_types::{NamespaceId, ObjectId, ObjectInfo};
pub use realm_values::{Field, Handle, Heap, MapEntry, Object, ObjectKind, Primitive, Value};
