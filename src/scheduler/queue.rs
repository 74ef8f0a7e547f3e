//! Work queue - PendingWork waiting for a registry slot
//!
//! At most one entry per source is queued; the scanner skips sources that
//! already have queued work. Entries pop in priority order (lowest first),
//! FIFO within a priority.

use std::collections::VecDeque;

use crate::domain::PendingWork;

#[derive(Debug, Default)]
pub struct WorkQueue {
    entries: VecDeque<PendingWork>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `work` at the back; false (and dropped) if its source is already queued.
    pub fn push(&mut self, work: PendingWork) -> bool {
        if work.is_empty() || self.has_source(&work.source_id) {
            return false;
        }
        self.entries.push_back(work);
        true
    }

    /// Put leftover work back at the front, merging with any entry for the same source.
    pub fn requeue_front(&mut self, work: PendingWork) {
        if work.is_empty() {
            return;
        }
        if let Some(pos) = self.entries.iter().position(|w| w.source_id == work.source_id) {
            let existing = &mut self.entries[pos];
            let mut items = work.items;
            for item in existing.items.drain(..) {
                if !items.iter().any(|i| i.identity == item.identity) {
                    items.push(item);
                }
            }
            existing.items = items;
            existing.priority = existing.priority.min(work.priority);
            if let Some(entry) = self.entries.remove(pos) {
                self.entries.push_front(entry);
            }
        } else {
            self.entries.push_front(work);
        }
    }

    /// Take the highest-priority entry.
    pub fn pop(&mut self) -> Option<PendingWork> {
        let best = self.entries.iter().map(|w| w.priority).min()?;
        let pos = self.entries.iter().position(|w| w.priority == best)?;
        self.entries.remove(pos)
    }

    pub fn has_source(&self, source_id: &str) -> bool {
        self.entries.iter().any(|w| w.source_id == source_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total queued items across all entries
    pub fn item_count(&self) -> usize {
        self.entries.iter().map(PendingWork::len).sum()
    }
}
