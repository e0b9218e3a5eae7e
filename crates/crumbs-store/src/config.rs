//! Attach configuration.
//!
//! A [`Config`] can be built in code or parsed from TOML:
//!
//! ```toml
//! backend = "sqlite"
//! data_dir = "/home/me/.local/share/crumbs"
//!
//! [sync]
//! strategy = "batch"
//! batch_size = 50
//! batch_interval_ms = 2000
//! ```
//!
//! [`Config::validate`] resolves the sync section into a [`SyncStrategy`];
//! it is the first thing `attach` does, so a bad configuration never
//! touches the data directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The only backend this crate implements.
pub const SQLITE_BACKEND: &str = "sqlite";

/// File name of the relational cache inside the data directory.
pub const CACHE_FILE: &str = "cupboard.db";

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(5);

fn default_backend() -> String {
    SQLITE_BACKEND.to_string()
}

/// Everything `attach` needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Storage backend name. Only `"sqlite"` is recognized.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Resolved directory holding the log files and the cache.
    pub data_dir: PathBuf,
    /// Keep the cache in memory instead of `<data_dir>/cupboard.db`.
    #[serde(default)]
    pub cache_in_memory: bool,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Raw sync settings as written by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// `immediate` (also when empty), `on_close` or `batch`.
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub batch_interval_ms: Option<i64>,
}

/// When cache writes reach the log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Rewrite the affected log files after every write.
    Immediate,
    /// Rewrite every log file once, at detach.
    OnClose,
    /// Flush modified files after `size` writes or every `interval`.
    Batch { size: usize, interval: Duration },
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::OnClose => "on_close",
            Self::Batch { .. } => "batch",
        }
    }
}

impl Config {
    /// SQLite backend, immediate sync, on-disk cache.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: default_backend(),
            data_dir: data_dir.into(),
            cache_in_memory: false,
            sync: SyncConfig::default(),
        }
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_cache_in_memory(mut self, in_memory: bool) -> Self {
        self.cache_in_memory = in_memory;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check the configuration and resolve the sync strategy.
    pub fn validate(&self) -> StoreResult<SyncStrategy> {
        if self.backend.is_empty() {
            return Err(StoreError::Config("backend must not be empty".into()));
        }
        if self.backend != SQLITE_BACKEND {
            return Err(StoreError::Config(format!("unknown backend: {}", self.backend)));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(StoreError::Config("data_dir must not be empty".into()));
        }
        self.sync.resolve()
    }

    /// Location of the on-disk cache, or `None` for an in-memory cache.
    pub fn cache_path(&self) -> Option<PathBuf> {
        (!self.cache_in_memory).then(|| self.data_dir.join(CACHE_FILE))
    }
}

impl SyncConfig {
    pub fn immediate() -> Self {
        Self {
            strategy: "immediate".into(),
            ..Self::default()
        }
    }

    pub fn on_close() -> Self {
        Self {
            strategy: "on_close".into(),
            ..Self::default()
        }
    }

    pub fn batch(size: i64, interval_ms: i64) -> Self {
        Self {
            strategy: "batch".into(),
            batch_size: Some(size),
            batch_interval_ms: Some(interval_ms),
        }
    }

    /// Apply defaults and reject impossible values.
    pub fn resolve(&self) -> StoreResult<SyncStrategy> {
        match self.strategy.as_str() {
            "" | "immediate" => Ok(SyncStrategy::Immediate),
            "on_close" => Ok(SyncStrategy::OnClose),
            "batch" => {
                let size = match self.batch_size {
                    None => DEFAULT_BATCH_SIZE,
                    Some(n) if n > 0 => n as usize,
                    Some(n) => {
                        return Err(StoreError::Config(format!(
                            "batch_size must be positive, got {n}"
                        )));
                    }
                };
                let interval = match self.batch_interval_ms {
                    None => DEFAULT_BATCH_INTERVAL,
                    Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
                    Some(ms) => {
                        return Err(StoreError::Config(format!(
                            "batch_interval_ms must be positive, got {ms}"
                        )));
                    }
                };
                Ok(SyncStrategy::Batch { size, interval })
            }
            other => Err(StoreError::Config(format!("unknown sync strategy: {other}"))),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
