//! The pending set shared between the radio and the aggregation cycle.
//!
//! Records are deduplicated on the full `(name, address, rssi)` triple and
//! kept in first-seen order. All access goes through a single mutex;
//! [`PendingSet::drain`] empties the set in the same critical section that
//! reads it, so no insert can slip between the read and the clear.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use beacon_types::DiscoveryRecord;

#[derive(Debug, Default)]
struct Inner {
    seen: HashSet<DiscoveryRecord>,
    order: Vec<DiscoveryRecord>,
}

/// Deduplicating, lock-guarded collection of discovery records.
#[derive(Debug, Default)]
pub struct PendingSet {
    inner: Mutex<Inner>,
}

impl PendingSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    // Never held across an await; a panic while holding it cannot leave
    // `seen` and `order` out of step, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record. Returns `false` if the identical triple is already pending.
    pub fn insert(&self, record: DiscoveryRecord) -> bool {
        let mut inner = self.lock();
        if inner.seen.contains(&record) {
            return false;
        }
        inner.seen.insert(record.clone());
        inner.order.push(record);
        true
    }

    /// Insert a batch under one lock acquisition. Returns how many were new.
    pub fn extend<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = DiscoveryRecord>,
    {
        let mut inner = self.lock();
        let mut added = 0;
        for record in records {
            if inner.seen.insert(record.clone()) {
                inner.order.push(record);
                added += 1;
            }
        }
        added
    }

    /// Take every pending record, leaving the set empty.
    pub fn drain(&self) -> Vec<DiscoveryRecord> {
        let mut inner = self.lock();
        inner.seen.clear();
        std::mem::take(&mut inner.order)
    }

    /// Discard every pending record.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.seen.clear();
        inner.order.clear();
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().order.is_empty()
    }
}
