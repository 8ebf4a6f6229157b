use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::HashMap;
use parking_lot::RwLock;

use erg_types::{BlockFactory, BlockSchema};

use crate::migrations::MigrationManager;
use crate::{GenericStorage, SearchService, StorageError, StorageStats};

struct ConfiguredDatasource {
    kind: String,
    schema: BlockSchema,
    prototype: Option<Arc<dyn BlockFactory>>,
}

/// Owns one [`GenericStorage`] per configured datasource instance.
///
/// Stores open lazily and stay cached until [`StorageManager::close`]. Files
/// in the storage directory that match no configured instance are never
/// opened — they are logged and left alone, which makes removing a datasource
/// from the configuration safe for its data.
pub struct StorageManager {
    storage_dir: PathBuf,
    configured: RwLock<HashMap<String, ConfiguredDatasource>>,
    stores: RwLock<HashMap<String, Arc<GenericStorage>>>,
}

impl StorageManager {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let storage_dir = storage_dir.into();
        std::fs::create_dir_all(&storage_dir)?;
        Ok(Self {
            storage_dir,
            configured: RwLock::new(HashMap::default()),
            stores: RwLock::new(HashMap::default()),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Declare a datasource instance this manager is allowed to open a store
    /// for. Blocks routed to names that were never configured are dropped by
    /// the warehouse, not stored.
    pub fn configure_datasource(
        &self,
        name: impl Into<String>,
        kind: impl Into<String>,
        schema: BlockSchema,
        prototype: Option<Arc<dyn BlockFactory>>,
    ) {
        let name = name.into();
        self.configured.write().insert(
            name,
            ConfiguredDatasource {
                kind: kind.into(),
                schema,
                prototype,
            },
        );
    }

    /// Forget a configured instance and drop its cached store handle.
    ///
    /// The store file is left on disk untouched.
    pub fn deconfigure_datasource(&self, name: &str) {
        self.configured.write().remove(name);
        self.stores.write().remove(name);
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.configured.read().contains_key(name)
    }

    /// Configured instance names, sorted.
    pub fn configured_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.configured.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The declared datasource type of a configured instance.
    pub fn configured_kind(&self, name: &str) -> Option<String> {
        self.configured.read().get(name).map(|c| c.kind.clone())
    }

    pub fn store_path(&self, name: &str) -> PathBuf {
        self.storage_dir.join(format!("{name}.db"))
    }

    /// Startup pass: warn about stray store files, then gate on pending
    /// migrations for every configured store that already exists on disk.
    ///
    /// Returns [`StorageError::PendingMigrations`] naming the first offending
    /// datasource; the caller is expected to run the migration tooling and
    /// retry.
    pub fn init(&self) -> Result<(), StorageError> {
        self.warn_stray_stores()?;

        let manager = MigrationManager::new();
        for name in self.configured_names() {
            let path = self.store_path(&name);
            if !path.exists() {
                continue;
            }
            let conn = rusqlite::Connection::open(&path)?;
            let status = manager.status(&conn)?;
            if !status.is_bootstrap() && status.pending_count() > 0 {
                return Err(StorageError::PendingMigrations {
                    datasource: name,
                    count: status.pending_count(),
                });
            }
        }
        Ok(())
    }

    fn warn_stray_stores(&self) -> Result<(), StorageError> {
        let configured = self.configured.read();
        for entry in std::fs::read_dir(&self.storage_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !configured.contains_key(stem) {
                erg_log::warn!(
                    store = %path.display(),
                    "ignoring store file with no configured datasource"
                );
            }
        }
        Ok(())
    }

    /// The cached store for `name`, opening it on first use.
    ///
    /// Fails with [`StorageError::UnknownDatasource`] for unconfigured names
    /// and with [`StorageError::PendingMigrations`] for stores that need the
    /// migration tooling first.
    pub fn get_store(&self, name: &str) -> Result<Arc<GenericStorage>, StorageError> {
        if let Some(store) = self.stores.read().get(name) {
            return Ok(store.clone());
        }

        let (schema, prototype) = {
            let configured = self.configured.read();
            let Some(cfg) = configured.get(name) else {
                return Err(StorageError::UnknownDatasource {
                    name: name.to_owned(),
                });
            };
            (cfg.schema.clone(), cfg.prototype.clone())
        };

        let mut stores = self.stores.write();
        // Lost the race? Reuse whoever opened it first.
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }

        let store = Arc::new(GenericStorage::open(self.store_path(name), name, schema)?);
        if let Some(prototype) = prototype {
            store.register_block_prototype(prototype);
        }
        stores.insert(name.to_owned(), store.clone());
        Ok(store)
    }

    /// Migration-tooling entry point: open `name` applying pending
    /// migrations, bypassing the [`StorageError::PendingMigrations`] gate.
    ///
    /// Not cached; normal callers go through [`StorageManager::get_store`].
    pub fn open_store_unchecked(&self, name: &str) -> Result<GenericStorage, StorageError> {
        let schema = self
            .configured
            .read()
            .get(name)
            .map(|c| c.schema.clone())
            .unwrap_or_default();
        GenericStorage::open_and_migrate(self.store_path(name), name, schema)
    }

    /// The store for `name` if it is already open.
    pub fn cached_store(&self, name: &str) -> Option<Arc<GenericStorage>> {
        self.stores.read().get(name).cloned()
    }

    pub fn search_service(self: &Arc<Self>) -> SearchService {
        SearchService::new(self.clone())
    }

    /// Per-store stats for every configured datasource, sorted by name.
    ///
    /// Stores that fail to open contribute nothing (with a warning) — one
    /// broken store must not take down the overview.
    pub fn stats(&self) -> Vec<(String, StorageStats)> {
        let mut all = Vec::new();
        for name in self.configured_names() {
            match self.get_store(&name).and_then(|store| store.stats()) {
                Ok(stats) => all.push((name, stats)),
                Err(err) => {
                    erg_log::warn!(datasource = %name, %err, "skipping store in stats");
                }
            }
        }
        all
    }

    /// Run FTS + query-planner maintenance on every open store.
    pub fn optimize_all(&self) {
        for (name, store) in self.open_stores() {
            if let Err(err) = store.optimize() {
                erg_log::warn!(datasource = %name, %err, "optimize failed");
            }
        }
    }

    pub fn analyze_all(&self) {
        for (name, store) in self.open_stores() {
            if let Err(err) = store.analyze() {
                erg_log::warn!(datasource = %name, %err, "analyze failed");
            }
        }
    }

    pub fn checkpoint_all(&self) {
        for (name, store) in self.open_stores() {
            if let Err(err) = store.wal_checkpoint() {
                erg_log::warn!(datasource = %name, %err, "WAL checkpoint failed");
            }
        }
    }

    fn open_stores(&self) -> Vec<(String, Arc<GenericStorage>)> {
        self.stores
            .read()
            .iter()
            .map(|(name, store)| (name.clone(), store.clone()))
            .collect()
    }

    /// Drop every cached store handle, closing the underlying connections.
    pub fn close(&self) {
        let count = self.stores.write().drain().count();
        if count > 0 {
            erg_log::debug!(count, "closed stores");
        }
    }
}
