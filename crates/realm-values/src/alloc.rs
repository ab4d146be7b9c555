//! Per-execution allocation accounting.
//!
//! Every heap slot gets an [`Allocation`] record describing what was
//! allocated and how many aliases were observed pointing at it. The records
//! are transient: they are scoped to one execution and never persisted.
//! Alias counts only ever increase during an execution.

use crate::error::AllocError;

/// Bookkeeping for a single allocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Allocation {
    is_type: bool,
    is_value: bool,
    alias_count: u32,
}

impl Allocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_is_type(&mut self, is_type: bool) {
        self.is_type = is_type;
    }

    pub fn set_is_value(&mut self, is_value: bool) {
        self.is_value = is_value;
    }

    pub fn is_type(&self) -> bool {
        self.is_type
    }

    pub fn is_value(&self) -> bool {
        self.is_value
    }

    /// Record one more alias. Returns the new count.
    pub fn inc_alias_count(&mut self) -> u32 {
        self.alias_count = self.alias_count.saturating_add(1);
        self.alias_count
    }

    pub fn alias_count(&self) -> u32 {
        self.alias_count
    }
}

/// Aggregate view of an allocator, for quota reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub allocations: usize,
    pub types: usize,
    pub values: usize,
    pub aliases: u64,
}

/// Owns the allocation records of one execution and enforces its quota.
#[derive(Clone, Debug, Default)]
pub struct Allocator {
    limit: Option<usize>,
    records: Vec<Allocation>,
}

impl Allocator {
    /// An allocator without a quota.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// An allocator that refuses more than `limit` allocations.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            records: Vec::new(),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Number of allocations still permitted, if there is a quota.
    pub fn remaining(&self) -> Option<usize> {
        self.limit.map(|l| l.saturating_sub(self.records.len()))
    }

    /// Create a new record. Returns its index.
    pub fn allocate(&mut self) -> Result<usize, AllocError> {
        if let Some(limit) = self.limit {
            if self.records.len() >= limit {
                return Err(AllocError::LimitExceeded { limit });
            }
        }
        self.records.push(Allocation::new());
        Ok(self.records.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&Allocation> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Allocation> {
        self.records.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> AllocStats {
        self.records.iter().fold(
            AllocStats {
                allocations: self.records.len(),
                ..Default::default()
            },
            |mut acc, a| {
                acc.types += usize::from(a.is_type);
                acc.values += usize::from(a.is_value);
                acc.aliases += u64::from(a.alias_count);
                acc
            },
        )
    }
}
