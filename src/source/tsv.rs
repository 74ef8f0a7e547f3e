//! TSV-file work source
//!
//! Each configured source is a tab-separated file with a header row. The
//! `row` column (or the 1-based line number when absent) identifies a row,
//! `book` supplies the context key, and rows whose `status` column is empty
//! are pending. Write-backs rewrite the file through a temp file + rename.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::WorkSource;
use crate::domain::{STATUS_FIELD, WorkItem, WriteBack};
use crate::error::{BatchrError, Result};

/// Column holding the row id
pub const ROW_COLUMN: &str = "row";

/// Column holding the context key
pub const CONTEXT_COLUMN: &str = "book";

/// A parsed TSV file
#[derive(Debug, Clone, Default)]
struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn parse(content: &str) -> Self {
        let mut lines = content.lines();
        let mut header: Vec<String> = match lines.next() {
            Some(line) => line.split('\t').map(|c| c.trim().to_string()).collect(),
            None => return Self::default(),
        };
        let mut rows: Vec<Vec<String>> = lines
            .map(|line| line.split('\t').map(str::to_string).collect())
            .collect();

        // Cells past the header get unnamed columns so appended columns land after them
        let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(header.len());
        header.resize(width, String::new());
        for row in &mut rows {
            row.resize(width, String::new());
        }
        Self { header, rows }
    }

    fn render(&self) -> String {
        let mut out = self.header.join("\t");
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        out
    }

    fn column(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.header.iter().position(|h| h.eq_ignore_ascii_case(name))
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column(name) {
            return idx;
        }
        self.header.push(name.to_string());
        for row in &mut self.rows {
            row.resize(self.header.len(), String::new());
        }
        self.header.len() - 1
    }

    /// Row id per row: the `row` cell when that column exists, otherwise the
    /// file line number. Rows with a blank or repeated id get `None` and are
    /// neither listed nor written.
    fn row_ids(&self, path: &Path) -> Vec<Option<String>> {
        let Some(col) = self.column(ROW_COLUMN) else {
            return (0..self.rows.len()).map(|index| Some((index + 2).to_string())).collect();
        };

        let mut seen = HashSet::new();
        self.rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                if self.is_blank(index) {
                    return None;
                }
                let id = row[col].trim();
                if id.is_empty() {
                    warn!("{} line {}: blank row id, skipping", path.display(), index + 2);
                    return None;
                }
                if !seen.insert(id.to_string()) {
                    warn!("{} line {}: duplicate row id {}, skipping", path.display(), index + 2, id);
                    return None;
                }
                Some(id.to_string())
            })
            .collect()
    }

    fn is_blank(&self, index: usize) -> bool {
        self.rows[index].iter().all(|c| c.trim().is_empty())
    }
}

/// Work source backed by one TSV file per source id
#[derive(Debug)]
pub struct TsvWorkSource {
    paths: BTreeMap<String, PathBuf>,
    context_dir: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl TsvWorkSource {
    /// Create a source over `paths` (source id -> TSV file).
    pub fn new(paths: BTreeMap<String, PathBuf>) -> Self {
        Self {
            paths,
            context_dir: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Builder: directory holding `<key>.txt` context files.
    pub fn with_context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = Some(dir.into());
        self
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    fn path_for(&self, source_id: &str) -> Result<&Path> {
        self.paths
            .get(source_id)
            .map(PathBuf::as_path)
            .ok_or_else(|| BatchrError::Config(format!("Unknown source: {}", source_id)))
    }

    async fn read_table(path: &Path) -> Result<Table> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| map_io(path, e))?;
        Ok(Table::parse(&content))
    }

    async fn write_table(path: &Path, table: &Table) -> Result<()> {
        let tmp = path.with_extension("tsv.tmp");
        tokio::fs::write(&tmp, table.render()).await.map_err(|e| map_io(&tmp, e))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| map_io(path, e))?;
        Ok(())
    }
}

fn map_io(path: &Path, err: std::io::Error) -> BatchrError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => BatchrError::Permission(format!("{}: {}", path.display(), err)),
        _ => BatchrError::Transient(format!("{}: {}", path.display(), err)),
    }
}

fn sanitize_cell(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

#[async_trait]
impl WorkSource for TsvWorkSource {
    async fn list_pending(&self, source_id: &str) -> Result<Vec<WorkItem>> {
        let path = self.path_for(source_id)?;
        let table = Self::read_table(path).await?;
        let status_col = table.column(STATUS_FIELD);
        let context_col = table.column(CONTEXT_COLUMN);

        let mut items = Vec::new();
        for (index, id) in table.row_ids(path).into_iter().enumerate() {
            let Some(id) = id.filter(|_| !table.is_blank(index)) else {
                continue;
            };
            let row = &table.rows[index];
            let done = status_col
                .and_then(|col| row.get(col))
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if done {
                continue;
            }

            let mut item = WorkItem::new(source_id, id);
            for (col, name) in table.header.iter().enumerate() {
                if name.is_empty() {
                    continue;
                }
                if let Some(value) = row.get(col) {
                    item.fields.insert(name.clone(), value.clone());
                }
            }
            item.context_key = context_col
                .and_then(|col| row.get(col))
                .map(|v| v.trim().to_uppercase())
                .filter(|v| !v.is_empty());
            items.push(item);
        }

        debug!("Read {} pending rows from {}", items.len(), path.display());
        Ok(items)
    }

    async fn write_back(&self, source_id: &str, writes: &[WriteBack]) -> Result<()> {
        let path = self.path_for(source_id)?;
        let _guard = self.write_lock.lock().await;

        let mut table = Self::read_table(path).await?;
        let index_by_id: BTreeMap<String, usize> = table
            .row_ids(path)
            .into_iter()
            .enumerate()
            .filter_map(|(index, id)| id.map(|id| (id, index)))
            .collect();

        let mut applied = 0;
        for write in writes {
            let Some(&index) = index_by_id.get(&write.identity.row_id) else {
                debug!("Row {} no longer present in {}", write.identity, path.display());
                continue;
            };
            for (name, value) in &write.fields {
                let col = table.ensure_column(name);
                table.rows[index][col] = sanitize_cell(value);
            }
            applied += 1;
        }

        Self::write_table(path, &table).await?;
        info!("Wrote {}/{} rows to {}", applied, writes.len(), path.display());
        Ok(())
    }

    async fn fetch_context(&self, _source_id: &str, key: &str) -> Result<serde_json::Value> {
        let Some(dir) = &self.context_dir else {
            return Ok(serde_json::Value::Null);
        };
        let path = dir.join(format!("{}.txt", key));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(serde_json::Value::String(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Value::Null),
            Err(e) => Err(map_io(&path, e)),
        }
    }
}
