//! The ergs importer: a staging boundary for externally-harvested blocks.
//!
//! External producers `POST` generic blocks to the [`ImporterServer`]; rows
//! wait in a [`StagingStore`] keyed by their *target* datasource. The built-in
//! [`ImporterDatasource`] periodically pulls the staged blocks back out
//! (deleting them atomically) and re-emits each one with its target as
//! [`erg_types::Block::source`], so the warehouse routes it into the correct
//! native store — and drops anything whose target was never configured.

mod datasource;
mod error;
mod server;
mod staging;

pub use self::datasource::{register_importer_kind, ImporterClientConfig, ImporterDatasource};
pub use self::error::ImportError;
pub use self::server::{ExportResponse, ImporterConfig, ImporterServer};
pub use self::staging::{StagingStats, StagingStore};
