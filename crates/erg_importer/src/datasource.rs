//! The built-in `importer` datasource: pulls staged blocks out of the ingress
//! and re-emits them under their target datasource name.

use std::sync::Arc;

use parking_lot::Mutex;

use erg_types::{
    register_datasource_kind, send_block, BlockFactory, BlockSchema, BlockSender, CancelToken,
    Datasource, FetchError, GenericBlockFactory, RegistryError,
};

use crate::server::ExportResponse;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ImporterClientConfig {
    /// Base URL of the importer ingress, e.g. `http://127.0.0.1:9090`.
    pub url: String,
    pub token: String,
}

/// Polls `GET /api/blocks/export` and streams whatever was staged.
///
/// This is the sanctioned exception to the `source == instance` routing rule:
/// every emitted block keeps the *target* datasource its producer declared,
/// so the warehouse routes it into the right native store (or drops it if
/// that target is not configured).
pub struct ImporterDatasource {
    name: String,
    config: Mutex<ImporterClientConfig>,
}

impl ImporterDatasource {
    pub const KIND: &'static str = "importer";

    pub fn new(name: impl Into<String>, config: ImporterClientConfig) -> Self {
        Self {
            name: name.into(),
            config: Mutex::new(config),
        }
    }
}

impl Datasource for ImporterDatasource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        Self::KIND
    }

    fn schema(&self) -> BlockSchema {
        // The importer routes into other instances' stores; its own store
        // stays empty and needs no metadata columns.
        BlockSchema::new()
    }

    fn block_prototype(&self) -> Arc<dyn BlockFactory> {
        Arc::new(GenericBlockFactory)
    }

    fn set_config(&self, config: serde_json::Value) -> Result<(), RegistryError> {
        let parsed: ImporterClientConfig = serde_json::from_value(config)
            .map_err(|err| RegistryError::invalid_config(&self.name, err.to_string()))?;
        *self.config.lock() = parsed;
        Ok(())
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(self.config.lock().clone()).unwrap_or_default()
    }

    fn fetch_blocks(&self, token: &CancelToken, out: &BlockSender) -> Result<(), FetchError> {
        let config = self.config.lock().clone();
        let url = format!("{}/api/blocks/export", config.url.trim_end_matches('/'));

        let mut response = ureq::get(&url)
            .header("Authorization", &format!("Bearer {}", config.token))
            .call()
            .map_err(|err| FetchError::datasource(&self.name, err.to_string()))?;

        let exported: ExportResponse = response
            .body_mut()
            .read_json()
            .map_err(|err| FetchError::datasource(&self.name, format!("bad export body: {err}")))?;

        let count = exported.blocks.len();
        for block in exported.blocks {
            send_block(token, out, Arc::new(block))?;
        }
        if count > 0 {
            erg_log::debug!(datasource = %self.name, count, "importer pulled staged blocks");
        }

        Ok(())
    }
}

/// Register the `importer` kind in the process-wide prototype table.
pub fn register_importer_kind() {
    register_datasource_kind(
        ImporterDatasource::KIND,
        Arc::new(|name, raw| {
            let config: ImporterClientConfig = serde_json::from_value(raw)
                .map_err(|err| RegistryError::invalid_config(name, err.to_string()))?;
            Ok(Arc::new(ImporterDatasource::new(name, config)) as Arc<dyn Datasource>)
        }),
    );
}
