use realm_types::{ObjectId, TypeError};

use crate::object::ObjectKind;
use crate::value::Handle;

/// Errors from allocation accounting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The execution tried to allocate past its quota.
    #[error("allocation limit of {limit} exceeded")]
    LimitExceeded { limit: usize },
}

/// Errors from heap operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HeapError {
    /// The handle does not belong to this heap.
    #[error("unknown handle {0}")]
    UnknownHandle(Handle),

    /// The object behind the handle was reclaimed.
    #[error("object {0} was released")]
    Released(Handle),

    /// An operation was applied to the wrong kind of object.
    #[error("object {handle} is a {actual}, expected a {expected}")]
    KindMismatch {
        handle: Handle,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    /// The child already has a different structural owner.
    #[error("object {child} is already owned by {owner}")]
    AlreadyOwned { child: Handle, owner: Handle },

    /// Attaching the child would make an object its own ancestor.
    #[error("attaching {child} under {parent} would create an ownership cycle")]
    OwnershipCycle { parent: Handle, child: Handle },

    /// Another object in the heap already has this identity.
    #[error("duplicate object id {0}")]
    DuplicateId(ObjectId),

    #[error("index {index} out of range for {handle} of length {len}")]
    IndexOutOfRange {
        handle: Handle,
        index: usize,
        len: usize,
    },

    /// The heap has used every representable handle.
    #[error("no handles left in this heap")]
    HandlesExhausted,

    #[error("allocation error: {0}")]
    Alloc(#[from] AllocError),

    #[error("metadata error: {0}")]
    Type(#[from] TypeError),
}

/// Result alias for heap operations.
pub type HeapResult<T> = Result<T, HeapError>;
