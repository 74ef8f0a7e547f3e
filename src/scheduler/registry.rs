//! Batch registry - the authoritative set of outstanding batches
//!
//! Capacity covers both registered batches and slots reserved by the
//! dispatcher for submissions still in flight, so concurrent dispatch can
//! never overshoot `max_concurrent_batches`.

use std::collections::BTreeMap;

use crate::domain::{BatchHandle, RowIdentity, RunningBatch};

#[derive(Debug)]
pub struct BatchRegistry {
    batches: BTreeMap<BatchHandle, RunningBatch>,
    reserved: usize,
    capacity: usize,
}

impl BatchRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            batches: BTreeMap::new(),
            reserved: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots neither registered nor reserved
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.batches.len() + self.reserved)
    }

    /// Reserve up to `wanted` slots, returning how many were granted.
    pub fn reserve(&mut self, wanted: usize) -> usize {
        let granted = wanted.min(self.free_slots());
        self.reserved += granted;
        granted
    }

    pub fn unreserve(&mut self, count: usize) {
        self.reserved = self.reserved.saturating_sub(count);
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Register a submitted batch against a slot reserved for it.
    pub fn insert_reserved(&mut self, batch: RunningBatch) {
        self.unreserve(1);
        self.insert(batch);
    }

    /// Register a batch without consuming a reservation (used by recovery).
    pub fn insert(&mut self, batch: RunningBatch) {
        if let Some(existing) = self.batches.values().find(|b| batch.identities().any(|id| b.identities().any(|o| o == id))) {
            log::error!(
                "Invariant violation: batch {} overlaps items of batch {}",
                batch.handle,
                existing.handle
            );
        }
        self.batches.insert(batch.handle.clone(), batch);
        if self.batches.len() > self.capacity {
            log::warn!(
                "Registry holds {} batches, above capacity {}",
                self.batches.len(),
                self.capacity
            );
        }
    }

    pub fn remove(&mut self, handle: &BatchHandle) -> Option<RunningBatch> {
        self.batches.remove(handle)
    }

    pub fn get(&self, handle: &BatchHandle) -> Option<&RunningBatch> {
        self.batches.get(handle)
    }

    pub fn contains(&self, handle: &BatchHandle) -> bool {
        self.batches.contains_key(handle)
    }

    pub fn contains_identity(&self, identity: &RowIdentity) -> bool {
        self.batches.values().any(|b| b.identities().any(|id| id == identity))
    }

    /// Copy of every registered batch, ordered by handle
    pub fn snapshot(&self) -> Vec<RunningBatch> {
        self.batches.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
