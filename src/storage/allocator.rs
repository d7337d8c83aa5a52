use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use uuid::Uuid;

/// Width of the numeric part of sequential IDs
const SEQUENCE_WIDTH: usize = 6;

/// Source of fresh persistent IDs. IDs are never handed out twice, also
/// across threads sharing one allocator.
pub trait PersistentIdAllocator: Send + Sync {
    /// `count` new IDs, in order
    fn allocate(&self, count: usize) -> Result<Vec<String>>;
}

/// Prefixed, zero-padded counter
#[derive(Debug)]
pub struct SequentialIdAllocator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdAllocator {
    pub fn new(prefix: impl Into<String>, first: u64) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(first),
        }
    }

    /// Allocator that continues after the highest ID already in use
    pub fn continuing<'a>(prefix: impl Into<String>, existing: impl IntoIterator<Item = &'a str>) -> Self {
        let prefix = prefix.into();
        let highest = existing
            .into_iter()
            .filter_map(|id| id.strip_prefix(prefix.as_str()))
            .filter_map(|n| n.parse::<u64>().ok())
            .max();
        let first = highest.map_or(1, |n| n + 1);
        Self::new(prefix, first)
    }
}

impl PersistentIdAllocator for SequentialIdAllocator {
    fn allocate(&self, count: usize) -> Result<Vec<String>> {
        let count = count as u64;
        let first = self.next.fetch_add(count, Ordering::SeqCst);
        if first.checked_add(count).is_none() {
            anyhow::bail!("Persistent ID sequence '{}' is exhausted", self.prefix);
        }
        Ok((first..first + count)
            .map(|n| format!("{}{:0width$}", self.prefix, n, width = SEQUENCE_WIDTH))
            .collect())
    }
}

/// Random v4 UUIDs behind a prefix
#[derive(Debug, Clone, Default)]
pub struct UuidIdAllocator {
    prefix: String,
}

impl UuidIdAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl PersistentIdAllocator for UuidIdAllocator {
    fn allocate(&self, count: usize) -> Result<Vec<String>> {
        Ok((0..count)
            .map(|_| format!("{}{}", self.prefix, Uuid::new_v4().simple()))
            .collect())
    }
}
