//! RecordCache - bounded most-recent-first record store

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::domain::{Record, sort_most_recent_first};

/// Default number of records kept
pub const DEFAULT_CAPACITY: usize = 200;

/// Bounded, lock-protected record store
///
/// The lock guards a shared reference to an immutable list. Writers build the
/// new list outside the lock and swap it in; readers clone the reference and
/// walk it after releasing the lock.
#[derive(Debug)]
pub struct RecordCache {
    capacity: usize,
    records: Mutex<Arc<Vec<Record>>>,
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RecordCache {
    /// Create an empty cache holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(Arc::new(Vec::new())),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Arc<Vec<Record>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of records kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replace the whole contents
    ///
    /// Sorts newest first, truncates to capacity, then swaps. Returns the list
    /// now held by the cache.
    pub fn replace(&self, mut records: Vec<Record>) -> Arc<Vec<Record>> {
        debug!(incoming = records.len(), capacity = self.capacity, "RecordCache::replace: called");
        sort_most_recent_first(&mut records);
        records.truncate(self.capacity);

        let records = Arc::new(records);
        *self.guard() = records.clone();
        records
    }

    /// Shared reference to the current contents, in cache order
    pub fn snapshot(&self) -> Arc<Vec<Record>> {
        self.guard().clone()
    }

    /// Number of cached records
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether the cache holds no records
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}
