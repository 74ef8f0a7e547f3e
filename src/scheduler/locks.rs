//! Row lock set - at-most-one-owner tracking per row identity
//!
//! An identity is locked from the moment the dispatcher claims it until the
//! batch owning it is removed from the registry, or until its programmatic
//! resolution finishes.

use std::collections::HashSet;

use crate::domain::RowIdentity;

/// Identities currently claimed by the scheduler
#[derive(Debug, Default)]
pub struct RowLockSet {
    held: HashSet<RowIdentity>,
}

impl RowLockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity`; false if it is already held.
    pub fn try_acquire(&mut self, identity: &RowIdentity) -> bool {
        self.held.insert(identity.clone())
    }

    /// Release `identity`; false if it was not held.
    pub fn release(&mut self, identity: &RowIdentity) -> bool {
        self.held.remove(identity)
    }

    /// Release every identity in `identities`, returning how many were held.
    pub fn release_all<'a>(&mut self, identities: impl IntoIterator<Item = &'a RowIdentity>) -> usize {
        identities.into_iter().filter(|id| self.held.remove(*id)).count()
    }

    pub fn is_held(&self, identity: &RowIdentity) -> bool {
        self.held.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }
}
