use std::sync::{Arc, OnceLock};

use ahash::HashMap;
use parking_lot::RwLock;

use crate::Datasource;

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("unknown datasource kind {kind:?}")]
    UnknownKind { kind: String },

    #[error("datasource {name:?} already exists; remove it before re-creating")]
    AlreadyExists { name: String },

    #[error("unknown datasource {name:?}")]
    UnknownDatasource { name: String },

    #[error("invalid config for datasource {name:?}: {reason}")]
    InvalidConfig { name: String, reason: String },
}

impl RegistryError {
    pub fn invalid_config(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Builds a datasource instance from `(name, raw_config)`.
pub type DatasourceFactory =
    Arc<dyn Fn(&str, serde_json::Value) -> Result<Arc<dyn Datasource>, RegistryError> + Send + Sync>;

// The process-wide prototype table. Adapters register their kind at program
// start (typically from a blank-import style `register()` function), so the
// table is written early and read concurrently afterwards.
fn prototypes() -> &'static RwLock<HashMap<String, DatasourceFactory>> {
    static PROTOTYPES: OnceLock<RwLock<HashMap<String, DatasourceFactory>>> = OnceLock::new();
    PROTOTYPES.get_or_init(|| RwLock::new(HashMap::default()))
}

/// Make `kind` creatable through [`Registry::create_datasource`].
///
/// Re-registering a kind replaces its factory.
pub fn register_datasource_kind(kind: impl Into<String>, factory: DatasourceFactory) {
    let kind = kind.into();
    erg_log::debug!(kind = %kind, "registering datasource kind");
    prototypes().write().insert(kind, factory);
}

/// All currently registered datasource kinds, sorted.
pub fn registered_kinds() -> Vec<String> {
    let mut kinds: Vec<_> = prototypes().read().keys().cloned().collect();
    kinds.sort();
    kinds
}

/// The process-wide map of live datasource instances.
///
/// The registry exclusively owns its instances; everyone else borrows
/// `Arc<dyn Datasource>` handles. Concurrent readers, exclusive writers.
#[derive(Default)]
pub struct Registry {
    datasources: RwLock<HashMap<String, Arc<dyn Datasource>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate `kind` under `name` with the given raw config.
    ///
    /// Fails with [`RegistryError::UnknownKind`] if no prototype is registered
    /// for `kind`, and with [`RegistryError::AlreadyExists`] if `name` is
    /// taken — a duplicate create only succeeds after an explicit
    /// [`Registry::remove_datasource`].
    pub fn create_datasource(
        &self,
        name: &str,
        kind: &str,
        config: serde_json::Value,
    ) -> Result<Arc<dyn Datasource>, RegistryError> {
        let factory = prototypes()
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownKind {
                kind: kind.to_owned(),
            })?;

        let mut datasources = self.datasources.write();
        if datasources.contains_key(name) {
            return Err(RegistryError::AlreadyExists {
                name: name.to_owned(),
            });
        }

        let instance = factory(name, config)?;
        datasources.insert(name.to_owned(), instance.clone());
        erg_log::info!(datasource = %name, kind = %kind, "created datasource");
        Ok(instance)
    }

    pub fn get_datasource(&self, name: &str) -> Option<Arc<dyn Datasource>> {
        self.datasources.read().get(name).cloned()
    }

    /// All live instances, sorted by name.
    pub fn all_datasources(&self) -> Vec<Arc<dyn Datasource>> {
        let mut all: Vec<_> = self.datasources.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Close `name` and drop it from the registry.
    pub fn remove_datasource(&self, name: &str) -> Result<(), RegistryError> {
        let removed = self.datasources.write().remove(name);
        match removed {
            Some(instance) => {
                instance.close();
                erg_log::info!(datasource = %name, "removed datasource");
                Ok(())
            }
            None => Err(RegistryError::UnknownDatasource {
                name: name.to_owned(),
            }),
        }
    }

    /// Close every instance and empty the registry.
    pub fn close(&self) {
        let drained: Vec<_> = self.datasources.write().drain().collect();
        for (_, instance) in drained {
            instance.close();
        }
    }

    pub fn len(&self) -> usize {
        self.datasources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasources.read().is_empty()
    }
}

/// The default process-wide registry.
pub fn default_registry() -> &'static Registry {
    static DEFAULT: OnceLock<Registry> = OnceLock::new();
    DEFAULT.get_or_init(Registry::new)
}
