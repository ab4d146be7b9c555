//! Commit-time ownership and reference-count diff.
//!
//! At the end of an execution the graph reachable from the realm root is
//! walked and compared with the metadata each object recorded at its last
//! commit. The result is an [`OwnershipDiff`]: which units get new ids,
//! which changed owner or reference count, which were modified, and which
//! became unreachable. [`build_write_set`] turns the diff into the
//! [`WriteSet`] a store commits, and [`OwnershipDiff::apply`] writes the
//! planned metadata back into the heap once the commit succeeded.
//!
//! # Key Types
//!
//! - [`OwnershipDiff`] / [`OwnershipChange`] -- planned metadata per unit
//! - [`UnitPlan`] -- recorded vs. planned metadata of one reachable unit
//!
//! [`WriteSet`]: realm_store::WriteSet

pub mod error;
pub mod ownership;
pub mod write_set;

pub use error::{DiffError, DiffResult};
pub use ownership::{diff_ownership, OwnershipChange, OwnershipDiff, UnitPlan};
pub use write_set::build_write_set;
