//! Ergs: a personal data-hoarding engine.
//!
//! Ergs periodically harvests *blocks* of content from heterogeneous
//! datasources, persists them in per-datasource full-text-indexed stores, and
//! exposes unified search plus a live event firehose.
//!
//! This crate ties the pieces together:
//!
//! * [`Config`] — the declarative surface an external driver (CLI, config
//!   file watcher) hands in.
//! * [`Engine`] — registry + storage manager + warehouse + firehose, built
//!   from one config.
//!
//! The individual subsystems live in their own crates and are re-exported
//! here: [`erg_types`] (the block model), [`erg_store`] (storage and search),
//! [`erg_warehouse`] (the scheduler), [`erg_comms`] (the firehose), and
//! [`erg_importer`] (the HTTP staging ingress).

mod config;
mod engine;

pub use self::config::{Config, ConfigError, DatasourceConfig};
pub use self::engine::{Engine, EngineError};

// One-stop re-exports of the public surface.
pub use erg_comms::{BridgeConsumer, EventBridge, FirehoseHub};
pub use erg_importer::{ImporterConfig, ImporterDatasource, ImporterServer};
pub use erg_store::{
    parse_search_params, GenericStorage, MigrationManager, QueryError, SearchParams,
    SearchResults, SearchService, StorageError, StorageManager,
};
pub use erg_types::{
    default_registry, register_datasource_kind, Block, BlockEvent, BlockSchema, CancelToken,
    ColumnType, Datasource, GenericBlock, Registry, RegistryError, Value, WireEvent,
};
pub use erg_warehouse::{FetchStatus, Warehouse, WarehouseConfig};

/// Install stderr logging for binaries embedding the engine.
pub use erg_log::setup_logging;
