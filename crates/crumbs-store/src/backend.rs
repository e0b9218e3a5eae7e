//! Attach/detach lifecycle.
//!
//! A [`SqliteBackend`] starts detached. [`Backend::attach`] provisions the
//! data directory, throws away any previous cache, rebuilds it from the log
//! files and seeds built-in properties on first use. [`Backend::detach`]
//! flushes whatever the sync strategy deferred and releases the cache.
//!
//! All state of one attachment lives in [`Attached`] behind a single
//! `RwLock`: reads share it, writes (including the batch flusher) take it
//! exclusively.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crumbs_core::{Category, StashHistoryEntry, TableName};
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, SyncStrategy};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::loader::{self, LoadWarning};
use crate::log::{LogFile, LogStore};
use crate::schema;
use crate::seed;
use crate::sync::{Changes, Flusher, SyncEngine};
use crate::table::Table;
use crate::tables::{properties, stashes};

/// The storage contract consumed by front ends.
pub trait Backend: Send + Sync {
    /// Open the store described by `config`.
    fn attach(&self, config: &Config) -> StoreResult<()>;

    /// Flush and close. Succeeds when already detached.
    fn detach(&self) -> StoreResult<()>;

    /// Accessor for one of the standard tables.
    fn get_table(&self, name: &str) -> StoreResult<Arc<Table>>;
}

// ═══════════════════════════════════════════════════════════════════════
//  Shared state
// ═══════════════════════════════════════════════════════════════════════

/// Everything owned by one attachment.
#[derive(Debug)]
pub(crate) struct Attached {
    pub generation: u64,
    pub db: Database,
    pub logs: LogStore,
    pub sync: SyncEngine,
    pub tables: HashMap<TableName, Arc<Table>>,
    pub warnings: Vec<LoadWarning>,
    pub flusher: Option<Flusher>,
}

/// State shared between a backend, its tables and its flusher thread.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub state: RwLock<Option<Attached>>,
    generation: AtomicU64,
}

impl Shared {
    /// Batch flusher tick: flush if `generation` is still attached.
    pub fn flush_due(&self, generation: u64) -> StoreResult<()> {
        let mut guard = self.state.write()?;
        match guard.as_mut() {
            Some(attached) if attached.generation == generation => {
                attached.sync.flush_due(&attached.db, &attached.logs)
            }
            _ => Err(StoreError::Detached),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  SqliteBackend
// ═══════════════════════════════════════════════════════════════════════

/// The SQLite-cached, JSONL-backed store.
///
/// Owned by the caller; there is no process-wide instance. Dropping it
/// detaches.
#[derive(Debug, Default)]
pub struct SqliteBackend {
    shared: Arc<Shared>,
}

impl SqliteBackend {
    /// A detached backend.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.shared
            .state
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// The resolved sync strategy of the current attachment.
    pub fn sync_strategy(&self) -> StoreResult<SyncStrategy> {
        self.read(|attached| Ok(attached.sync.strategy()))
    }

    /// Warnings collected while loading the logs at the last attach.
    pub fn load_warnings(&self) -> StoreResult<Vec<LoadWarning>> {
        self.read(|attached| Ok(attached.warnings.clone()))
    }

    /// Add a category to a categorical property.
    #[instrument(skip(self))]
    pub fn define_category(&self, property_id: &str, name: &str, ordinal: i64) -> StoreResult<Category> {
        self.write(|attached| {
            let category = attached
                .db
                .execute(|conn| properties::define_category(conn, property_id, name, ordinal))?;
            attached.sync.persist(
                &attached.db,
                &attached.logs,
                Changes::files([LogFile::Categories]),
            )?;
            Ok(category)
        })
    }

    /// Categories of a property by ascending ordinal, then name. Empty for
    /// an unknown property.
    pub fn get_categories(&self, property_id: &str) -> StoreResult<Vec<Category>> {
        self.read(|attached| {
            attached
                .db
                .execute(|conn| properties::categories(conn, property_id))
        })
    }

    /// Every recorded version of a stash, oldest first.
    pub fn stash_history(&self, stash_id: &str) -> StoreResult<Vec<StashHistoryEntry>> {
        if stash_id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        self.read(|attached| attached.db.execute(|conn| stashes::history(conn, stash_id)))
    }

    /// Write every deferred log change now.
    pub fn flush(&self) -> StoreResult<()> {
        self.write(|attached| attached.sync.flush(&attached.db, &attached.logs))
    }

    fn read<T>(&self, f: impl FnOnce(&Attached) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.shared.state.read()?;
        guard.as_ref().map_or(Err(StoreError::Detached), f)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Attached) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.shared.state.write()?;
        guard.as_mut().map_or(Err(StoreError::Detached), f)
    }

    /// Build a complete attachment. Nothing is published until this
    /// returns, so a failure leaves the backend detached.
    fn open(&self, config: &Config, strategy: SyncStrategy, generation: u64) -> StoreResult<Attached> {
        fs::create_dir_all(&config.data_dir)?;
        let logs = LogStore::new(&config.data_dir);
        logs.ensure_files()?;

        let db = match config.cache_path() {
            Some(path) => {
                discard_cache(&path)?;
                Database::open(&path)?
            }
            None => Database::open_in_memory()?,
        };
        db.execute(|conn| schema::apply(conn))?;

        let report = loader::load_all(&db, &logs)?;
        let mut sync = SyncEngine::new(strategy);
        sync.mark(report.repaired.iter().copied());

        if report.lines(LogFile::Properties) == 0 {
            seed::seed(&db, &logs)?;
        }

        let tables = TableName::ALL
            .into_iter()
            .map(|name| {
                let table = Table::new(name, generation, Arc::downgrade(&self.shared));
                (name, Arc::new(table))
            })
            .collect();

        let flusher = match strategy {
            SyncStrategy::Batch { interval, .. } => Some(Flusher::spawn(
                Arc::downgrade(&self.shared),
                generation,
                interval,
            )?),
            SyncStrategy::Immediate | SyncStrategy::OnClose => None,
        };

        Ok(Attached {
            generation,
            db,
            logs,
            sync,
            tables,
            warnings: report.warnings,
            flusher,
        })
    }
}

impl Backend for SqliteBackend {
    #[instrument(skip(self, config), fields(data_dir = %config.data_dir.display()))]
    fn attach(&self, config: &Config) -> StoreResult<()> {
        let mut guard = self.shared.state.write()?;
        if guard.is_some() {
            return Err(StoreError::AlreadyAttached);
        }

        let strategy = config.validate()?;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let attached = self.open(config, strategy, generation)?;

        info!(
            strategy = strategy.as_str(),
            generation,
            warnings = attached.warnings.len(),
            "backend attached"
        );
        *guard = Some(attached);
        Ok(())
    }

    #[instrument(skip(self))]
    fn detach(&self) -> StoreResult<()> {
        let flusher = {
            let mut guard = self.shared.state.write()?;
            let Some(attached) = guard.as_mut() else {
                return Ok(());
            };
            attached.sync.flush_for_detach(&attached.db, &attached.logs)?;

            let flusher = attached.flusher.take();
            *guard = None;
            flusher
        };

        // The flusher may be waiting on the lock; stop it only after
        // releasing it.
        if let Some(flusher) = flusher {
            flusher.stop();
        }
        info!("backend detached");
        Ok(())
    }

    fn get_table(&self, name: &str) -> StoreResult<Arc<Table>> {
        self.read(|attached| {
            let table: TableName = name
                .parse()
                .map_err(|_| StoreError::TableNotFound(name.to_string()))?;
            attached
                .tables
                .get(&table)
                .cloned()
                .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
        })
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!(error = %e, "detach on drop failed");
        }
    }
}

/// Remove a previous cache database and its WAL companions.
fn discard_cache(path: &Path) -> StoreResult<()> {
    let mut paths = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut sibling = path.as_os_str().to_owned();
        sibling.push(suffix);
        paths.push(PathBuf::from(sibling));
    }

    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "discarded stale cache file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
