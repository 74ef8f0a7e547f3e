//! PendingWork - one source's filtered items from one scan cycle

use serde::{Deserialize, Serialize};

use super::item::{ProcessingMode, WorkItem};

/// Items discovered for a single source, queued for dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWork {
    pub source_id: String,
    /// Items in scan order
    pub items: Vec<WorkItem>,
    /// Lower numbers dispatch first
    pub priority: i32,
}

impl PendingWork {
    pub fn new(source_id: impl Into<String>, items: Vec<WorkItem>, priority: i32) -> Self {
        Self {
            source_id: source_id.into(),
            items,
            priority,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Split items into (programmatic, ai_required), preserving order.
    pub fn partition(self) -> (Vec<WorkItem>, Vec<WorkItem>) {
        self.items
            .into_iter()
            .partition(|item| item.mode == ProcessingMode::Programmatic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_work_len() {
        let work = PendingWork::new("a", vec![WorkItem::new("a", "1"), WorkItem::new("a", "2")], 0);
        assert_eq!(work.len(), 2);
        assert!(!work.is_empty());
        assert!(PendingWork::new("a", Vec::new(), 0).is_empty());
    }

    #[test]
    fn test_partition_preserves_order() {
        let items = vec![
            WorkItem::new("a", "1"),
            WorkItem::new("a", "2").with_mode(ProcessingMode::Programmatic),
            WorkItem::new("a", "3"),
            WorkItem::new("a", "4").with_mode(ProcessingMode::Programmatic),
        ];
        let (programmatic, ai) = PendingWork::new("a", items, 0).partition();

        let prog_rows: Vec<&str> = programmatic.iter().map(|i| i.identity.row_id.as_str()).collect();
        let ai_rows: Vec<&str> = ai.iter().map(|i| i.identity.row_id.as_str()).collect();
        assert_eq!(prog_rows, vec!["2", "4"]);
        assert_eq!(ai_rows, vec!["1", "3"]);
    }
}
