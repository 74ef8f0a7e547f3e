//! Context cache - auxiliary reference data items need before submission
//!
//! The scanner calls `ensure_cached` once per distinct context key before
//! any item of that key is dispatched. A permission failure from the
//! underlying source propagates so the source is backed off.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use log::debug;

use crate::error::Result;
use crate::source::WorkSource;

/// Makes context data for `(source, key)` available locally
#[async_trait]
pub trait ContextCache: Send + Sync {
    async fn ensure_cached(&self, source: &dyn WorkSource, source_id: &str, key: &str) -> Result<()>;
}

/// Read-through cache persisted as `cache_dir/<source>/<key>.json`
#[derive(Debug)]
pub struct FsContextCache {
    dir: PathBuf,
    known: Mutex<HashSet<(String, String)>>,
}

impl FsContextCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            known: Mutex::new(HashSet::new()),
        }
    }

    /// Path of the cached entry for `(source_id, key)`
    pub fn entry_path(&self, source_id: &str, key: &str) -> PathBuf {
        self.dir
            .join(sanitize(source_id))
            .join(format!("{}.json", sanitize(key)))
    }

    /// Read a cached entry
    pub async fn get(&self, source_id: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.entry_path(source_id, key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn is_known(&self, source_id: &str, key: &str) -> bool {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(source_id.to_string(), key.to_string()))
    }

    fn mark_known(&self, source_id: &str, key: &str) {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((source_id.to_string(), key.to_string()));
    }

    async fn write_entry(path: &Path, value: &serde_json::Value) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Keep keys usable as single path components
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl ContextCache for FsContextCache {
    async fn ensure_cached(&self, source: &dyn WorkSource, source_id: &str, key: &str) -> Result<()> {
        if self.is_known(source_id, key) {
            return Ok(());
        }

        let path = self.entry_path(source_id, key);
        if tokio::fs::try_exists(&path).await? {
            self.mark_known(source_id, key);
            return Ok(());
        }

        let value = source.fetch_context(source_id, key).await?;
        Self::write_entry(&path, &value).await?;
        self.mark_known(source_id, key);
        debug!("Cached context {} for {}", key, source_id);
        Ok(())
    }
}

/// Cache that never fetches anything
#[derive(Debug, Default)]
pub struct NoopContextCache;

#[async_trait]
impl ContextCache for NoopContextCache {
    async fn ensure_cached(&self, _source: &dyn WorkSource, _source_id: &str, _key: &str) -> Result<()> {
        Ok(())
    }
}
