//! In-memory work source for tests and local experiments
//!
//! Rows live in a map per source. Sources can be denied (every call fails
//! with a permission error) and writes can be made to fail, which lets
//! tests drive the scheduler's backoff and lock-release paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::WorkSource;
use crate::domain::{WorkItem, WriteBack};
use crate::error::{BatchrError, Result};

#[derive(Debug, Default)]
struct Inner {
    /// source id -> rows in insertion order
    rows: BTreeMap<String, Vec<WorkItem>>,
    /// Rows that have received a write-back
    written: HashSet<(String, String)>,
    write_log: Vec<WriteBack>,
    denied: HashSet<String>,
    fail_writes: bool,
    list_calls: HashMap<String, usize>,
    context: HashMap<String, serde_json::Value>,
    context_calls: usize,
}

/// Work source held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryWorkSource {
    inner: Mutex<Inner>,
}

impl MemoryWorkSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append pending items to their sources.
    pub fn add_items(&self, items: impl IntoIterator<Item = WorkItem>) {
        let mut inner = self.lock();
        for item in items {
            inner.rows.entry(item.source_id().to_string()).or_default().push(item);
        }
    }

    /// Make every call for `source_id` fail with a permission error.
    pub fn deny(&self, source_id: &str) {
        self.lock().denied.insert(source_id.to_string());
    }

    pub fn allow(&self, source_id: &str) {
        self.lock().denied.remove(source_id);
    }

    /// Make write-backs fail with a transient error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Register context data for `key`.
    pub fn set_context(&self, key: impl Into<String>, value: serde_json::Value) {
        self.lock().context.insert(key.into(), value);
    }

    /// Every successful write-back, in order
    pub fn writes(&self) -> Vec<WriteBack> {
        self.lock().write_log.clone()
    }

    /// How many times `list_pending` was called for `source_id`
    pub fn list_calls(&self, source_id: &str) -> usize {
        self.lock().list_calls.get(source_id).copied().unwrap_or(0)
    }

    pub fn context_calls(&self) -> usize {
        self.lock().context_calls
    }

    /// Rows of `source_id` still waiting for a result
    pub fn pending_count(&self, source_id: &str) -> usize {
        let inner = self.lock();
        inner
            .rows
            .get(source_id)
            .map(|rows| {
                rows.iter()
                    .filter(|item| !inner.written.contains(&key(item)))
                    .count()
            })
            .unwrap_or(0)
    }
}

fn key(item: &WorkItem) -> (String, String) {
    (item.identity.source_id.clone(), item.identity.row_id.clone())
}

fn check_denied(inner: &Inner, source_id: &str) -> Result<()> {
    if inner.denied.contains(source_id) {
        return Err(BatchrError::Permission(format!("source {} is not shared with this account", source_id)));
    }
    Ok(())
}

#[async_trait]
impl WorkSource for MemoryWorkSource {
    async fn list_pending(&self, source_id: &str) -> Result<Vec<WorkItem>> {
        let mut inner = self.lock();
        *inner.list_calls.entry(source_id.to_string()).or_default() += 1;
        check_denied(&inner, source_id)?;

        let pending = inner
            .rows
            .get(source_id)
            .map(|rows| {
                rows.iter()
                    .filter(|item| !inner.written.contains(&key(item)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(pending)
    }

    async fn write_back(&self, source_id: &str, writes: &[WriteBack]) -> Result<()> {
        let mut inner = self.lock();
        check_denied(&inner, source_id)?;
        if inner.fail_writes {
            return Err(BatchrError::Transient(format!("write to {} failed", source_id)));
        }
        for write in writes {
            inner
                .written
                .insert((write.identity.source_id.clone(), write.identity.row_id.clone()));
            inner.write_log.push(write.clone());
        }
        Ok(())
    }

    async fn fetch_context(&self, source_id: &str, key: &str) -> Result<serde_json::Value> {
        let mut inner = self.lock();
        check_denied(&inner, source_id)?;
        inner.context_calls += 1;
        Ok(inner.context.get(key).cloned().unwrap_or(serde_json::Value::Null))
    }
}
