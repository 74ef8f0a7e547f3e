use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BatchrError;
use crate::scheduler::{BatchManagerConfig, SourceSpec};

/// Longest accepted duration setting (one year)
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    /// Names the persisted snapshot; separate instances never share state
    pub instance: String,
    pub scheduler: SchedulerConfig,
    pub sources: BTreeMap<String, SourceConfig>,
    pub context: ContextConfig,
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_batches: usize,
    pub batch_size: usize,
    pub batch_timeout_secs: u64,
    pub scan_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub permission_block_secs: u64,
    pub graceful_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 5,
            batch_size: 2,
            batch_timeout_secs: 3600,
            scan_interval_secs: 10,
            poll_interval_secs: 30,
            permission_block_secs: 3600,
            graceful_timeout_secs: 30,
            request_timeout_secs: 120,
        }
    }
}

/// A source is either a bare TSV path or a path with a priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceConfig {
    Path(PathBuf),
    Detailed {
        path: PathBuf,
        #[serde(default)]
        priority: i32,
    },
}

impl SourceConfig {
    pub fn path(&self) -> &Path {
        match self {
            SourceConfig::Path(path) => path,
            SourceConfig::Detailed { path, .. } => path,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            SourceConfig::Path(_) => 0,
            SourceConfig::Detailed { priority, .. } => *priority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub cache_dir: PathBuf,
    /// Directory of `<key>.txt` reference files; none disables context fetches
    pub context_dir: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("batchr")
                .join("context"),
            context_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            api_key_env: "BATCHR_API_KEY".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("batchr"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Log write-backs instead of performing them
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            instance: "default".to_string(),
            scheduler: SchedulerConfig::default(),
            sources: BTreeMap::new(),
            context: ContextConfig::default(),
            service: ServiceConfig::default(),
            storage: StorageConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let s = &self.scheduler;
        let checks = [
            ("max_concurrent_batches", s.max_concurrent_batches as u64),
            ("batch_size", s.batch_size as u64),
            ("batch_timeout_secs", s.batch_timeout_secs),
            ("scan_interval_secs", s.scan_interval_secs),
            ("poll_interval_secs", s.poll_interval_secs),
            ("request_timeout_secs", s.request_timeout_secs),
            ("permission_block_secs", s.permission_block_secs),
            ("graceful_timeout_secs", s.graceful_timeout_secs),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(BatchrError::Config(format!("scheduler.{} must be greater than zero", name)));
            }
            if name.ends_with("_secs") && value > MAX_DURATION_SECS {
                return Err(BatchrError::Config(format!(
                    "scheduler.{} must be at most {} seconds",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        if self.instance.trim().is_empty() {
            return Err(BatchrError::Config("instance must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn manager_config(&self) -> BatchManagerConfig {
        let s = &self.scheduler;
        BatchManagerConfig::default()
            .with_instance(self.instance.clone())
            .with_max_concurrent_batches(s.max_concurrent_batches)
            .with_batch_size(s.batch_size)
            .with_batch_timeout(Duration::from_secs(s.batch_timeout_secs))
            .with_scan_interval(Duration::from_secs(s.scan_interval_secs))
            .with_poll_interval(Duration::from_secs(s.poll_interval_secs))
            .with_permission_block(Duration::from_secs(s.permission_block_secs))
            .with_graceful_timeout(Duration::from_secs(s.graceful_timeout_secs))
            .with_request_timeout(Duration::from_secs(s.request_timeout_secs))
            .with_dry_run(self.debug.dry_run)
    }

    pub fn source_specs(&self) -> Vec<SourceSpec> {
        self.sources
            .iter()
            .map(|(id, source)| SourceSpec::new(id.clone()).with_priority(source.priority()))
            .collect()
    }

    pub fn source_paths(&self) -> BTreeMap<String, PathBuf> {
        self.sources
            .iter()
            .map(|(id, source)| (id.clone(), source.path().to_path_buf()))
            .collect()
    }
}
