use std::sync::Arc;

use erg_comms::{BridgeError, EventBridge, FirehoseHub};
use erg_importer::{ImportError, ImporterServer};
use erg_store::{SearchService, StorageError, StorageManager};
use erg_types::{CancelToken, EventSink, Registry, RegistryError, SinkSet};
use erg_warehouse::Warehouse;

use crate::Config;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] crate::ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Importer(#[from] ImportError),
}

/// Everything assembled: registry, stores, scheduler, firehose, ingress.
///
/// The engine owns its subsystems; callers borrow. Reconfiguration (SIGHUP,
/// file watching) is the driver's job — it calls
/// [`Warehouse::add_datasource_with_interval`] / [`Warehouse::remove_datasource`]
/// or rebuilds the engine.
pub struct Engine {
    registry: Registry,
    storage: Arc<StorageManager>,
    warehouse: Warehouse,
    hub: Arc<FirehoseHub>,

    // Shared with the warehouse's sink set; `EventBridge` is an `EventSink`.
    bridge: Option<Arc<EventBridge>>,
    importer: Option<ImporterServer>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Build the full pipeline from one config.
    ///
    /// Every configured datasource kind must already be registered in the
    /// process-wide prototype table (adapters do this at program start).
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        config.validate()?;

        let storage = Arc::new(StorageManager::new(&config.storage_dir)?);
        let hub = Arc::new(FirehoseHub::new());

        let mut sinks: Vec<Arc<dyn EventSink>> = vec![hub.clone()];
        let bridge = match &config.event_socket_path {
            Some(path) => Some(Arc::new(EventBridge::start(path)?)),
            None => None,
        };
        if let Some(bridge) = &bridge {
            sinks.push(bridge.clone());
        }

        let warehouse = Warehouse::new(
            config.warehouse_config(),
            storage.clone(),
            SinkSet::new(sinks),
        );

        let registry = Registry::new();
        for (name, datasource_config) in &config.datasources {
            let instance = registry.create_datasource(
                name,
                &datasource_config.kind,
                datasource_config.config.clone(),
            )?;
            warehouse.add_datasource_with_interval(instance, config.datasource_interval(name));
        }

        // After configuration, before any store opens: stray-store warnings
        // and the pending-migrations gate.
        storage.init()?;

        let importer = match &config.importer {
            Some(importer_config) => Some(ImporterServer::start(importer_config.clone())?),
            None => None,
        };

        Ok(Self {
            registry,
            storage,
            warehouse,
            hub,
            bridge,
            importer,
        })
    }

    /// Launch the scheduled workers; returns immediately.
    pub fn start(&self) {
        self.warehouse.start();
    }

    /// One synchronous fetch across every datasource.
    pub fn fetch_once(&self, token: &CancelToken) {
        self.warehouse.fetch_once(token);
    }

    pub fn search_service(&self) -> SearchService {
        self.storage.search_service()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn hub(&self) -> &Arc<FirehoseHub> {
        &self.hub
    }

    pub fn importer(&self) -> Option<&ImporterServer> {
        self.importer.as_ref()
    }

    /// Orderly shutdown: scheduler first, then the firehose, ingress,
    /// datasources, and finally the stores.
    pub fn shutdown(self) {
        self.warehouse.close();
        if let Some(bridge) = self.bridge {
            bridge.shutdown();
        }
        if let Some(importer) = self.importer {
            importer.stop();
        }
        self.registry.close();
        self.storage.close();
        erg_log::info!("engine stopped");
    }
}
