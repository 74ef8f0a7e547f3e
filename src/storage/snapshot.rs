//! Registry snapshot persistence.
//!
//! One JSON document per process instance maps batch handle to its
//! RunningBatch. Every save rewrites the whole document through a temp
//! file + rename so a crash leaves either the old or the new snapshot.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::RunningBatch;
use crate::error::{BatchrError, Result};

/// Current snapshot layout version.
pub const SCHEMA_VERSION: u32 = 1;

/// The persisted registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub schema_version: u32,
    pub instance: String,
    pub saved_at: DateTime<Utc>,
    /// batch handle -> batch
    pub batches: BTreeMap<String, RunningBatch>,
}

impl BatchSnapshot {
    /// Build a snapshot of `batches` stamped now.
    pub fn new(instance: impl Into<String>, batches: impl IntoIterator<Item = RunningBatch>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            instance: instance.into(),
            saved_at: Utc::now(),
            batches: batches.into_iter().map(|b| (b.handle.to_string(), b)).collect(),
        }
    }

    /// An empty snapshot for `instance`.
    pub fn empty(instance: impl Into<String>) -> Self {
        Self::new(instance, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// File-backed store for the registry snapshot.
#[derive(Debug, Clone)]
pub struct BatchStore {
    path: PathBuf,
    instance: String,
}

impl BatchStore {
    /// Store for `instance` under `state_dir`.
    pub fn new(state_dir: impl AsRef<Path>, instance: impl Into<String>) -> Self {
        let instance = instance.into();
        let path = state_dir.as_ref().join(format!("batches-{}.json", instance));
        Self { path, instance }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Atomically replace the persisted snapshot.
    pub fn save(&self, snapshot: &BatchSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(snapshot)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        log::debug!("Saved snapshot with {} batches to {}", snapshot.len(), self.path.display());
        Ok(())
    }

    /// Load the persisted snapshot; a missing file is an empty snapshot.
    pub fn load(&self) -> Result<BatchSnapshot> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BatchSnapshot::empty(&self.instance)),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(BatchSnapshot::empty(&self.instance));
        }

        let value: serde_json::Value = serde_json::from_str(&content)?;
        let snapshot = match value.get("schema_version").and_then(|v| v.as_u64()) {
            Some(version) if version > SCHEMA_VERSION as u64 => {
                return Err(BatchrError::Storage(format!(
                    "Snapshot {} has schema version {}, newer than supported {}",
                    self.path.display(),
                    version,
                    SCHEMA_VERSION
                )));
            }
            Some(_) => serde_json::from_value::<BatchSnapshot>(value)?,
            None => self.migrate_legacy(value)?,
        };

        if snapshot.instance != self.instance {
            log::warn!(
                "Snapshot {} belongs to instance {}, loading as {}",
                self.path.display(),
                snapshot.instance,
                self.instance
            );
        }
        Ok(snapshot)
    }

    /// Unversioned snapshots were a bare `handle -> batch` map.
    fn migrate_legacy(&self, value: serde_json::Value) -> Result<BatchSnapshot> {
        let batches: BTreeMap<String, RunningBatch> = serde_json::from_value(value)?;
        log::info!(
            "Migrating unversioned snapshot {} ({} batches)",
            self.path.display(),
            batches.len()
        );
        Ok(BatchSnapshot {
            schema_version: SCHEMA_VERSION,
            instance: self.instance.clone(),
            saved_at: Utc::now(),
            batches,
        })
    }

    /// Remove the persisted snapshot, if any.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
