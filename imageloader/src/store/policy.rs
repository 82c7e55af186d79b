//! Capacity policies for the byte store.
//!
//! A policy only answers "is the store over budget?". The store owns the
//! eviction loop and asks the policy before every insert, so both bounds
//! share one LRU algorithm.

use std::fmt;

/// Over-budget predicate consulted by the eviction pass.
pub trait CapacityPolicy: Send + Sync + fmt::Debug {
    /// Returns true if a store holding `size_bytes` across `entry_count`
    /// entries must evict before accepting another entry.
    ///
    /// `entry_count` already includes the entry about to be written.
    fn is_over_budget(&self, size_bytes: u64, entry_count: u64) -> bool;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Bounds the aggregate size of all entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimit {
    max_bytes: u64,
}

impl SizeLimit {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

impl CapacityPolicy for SizeLimit {
    fn is_over_budget(&self, size_bytes: u64, _entry_count: u64) -> bool {
        size_bytes > self.max_bytes
    }

    fn describe(&self) -> String {
        format!("size <= {} bytes", self.max_bytes)
    }
}

/// Bounds the number of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountLimit {
    max_entries: u64,
}

impl CountLimit {
    pub fn new(max_entries: u64) -> Self {
        Self { max_entries }
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }
}

impl CapacityPolicy for CountLimit {
    fn is_over_budget(&self, _size_bytes: u64, entry_count: u64) -> bool {
        entry_count > self.max_entries
    }

    fn describe(&self) -> String {
        format!("count <= {} entries", self.max_entries)
    }
}

/// Configured capacity bound, convertible into a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Aggregate size bound in bytes.
    Bytes(u64),
    /// Entry count bound.
    Entries(u64),
}

impl Capacity {
    /// Builds the policy for this bound.
    pub fn into_policy(self) -> Box<dyn CapacityPolicy> {
        match self {
            Capacity::Bytes(max) => Box::new(SizeLimit::new(max)),
            Capacity::Entries(max) => Box::new(CountLimit::new(max)),
        }
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Bytes(max) => write!(f, "{} bytes", max),
            Capacity::Entries(max) => write!(f, "{} entries", max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_limit() {
        let policy = SizeLimit::new(100);
        assert!(!policy.is_over_budget(100, 1_000));
        assert!(policy.is_over_budget(101, 1));
    }

    #[test]
    fn test_count_limit() {
        let policy = CountLimit::new(3);
        assert!(!policy.is_over_budget(u64::MAX, 3));
        assert!(policy.is_over_budget(0, 4));
    }

    #[test]
    fn test_capacity_into_policy() {
        let policy = Capacity::Entries(2).into_policy();
        assert!(policy.is_over_budget(0, 3));
        assert!(policy.describe().contains("2 entries"));

        let policy = Capacity::Bytes(10).into_policy();
        assert!(policy.is_over_budget(11, 0));
    }
}
