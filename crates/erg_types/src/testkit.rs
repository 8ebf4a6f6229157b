//! Deterministic in-memory datasources for tests and demos.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone as _, Utc};
use parking_lot::Mutex;

use crate::{
    register_datasource_kind, send_block, Block, BlockFactory, BlockSchema, BlockSender,
    CancelToken, ColumnType, Datasource, FetchError, GenericBlock, GenericBlockFactory,
    RegistryError, Value,
};

/// Configuration for [`ToyDatasource`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToyConfig {
    /// How many blocks each fetch produces.
    pub count: usize,

    /// Free-form marker embedded in every block's text and metadata.
    pub tag: String,

    /// Stamp emitted blocks with this source instead of the instance name.
    ///
    /// Lets tests exercise the warehouse's routing (and its warn-and-drop path
    /// for unconfigured targets) the way the importer does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emit_source: Option<String>,

    /// Timestamp of the first block; later blocks step one second each.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_time: Option<DateTime<Utc>>,

    /// Artificial delay between blocks, for cancellation tests.
    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for ToyConfig {
    fn default() -> Self {
        Self {
            count: 3,
            tag: "toy".to_owned(),
            emit_source: None,
            base_time: None,
            delay_ms: 0,
        }
    }
}

/// A deterministic block generator: `count` blocks, one second apart, with a
/// `tag` text column and an `ordinal` integer column.
pub struct ToyDatasource {
    name: String,
    config: Mutex<ToyConfig>,
}

impl ToyDatasource {
    pub const KIND: &'static str = "toy";

    pub fn new(name: impl Into<String>, config: ToyConfig) -> Self {
        Self {
            name: name.into(),
            config: Mutex::new(config),
        }
    }

    pub fn schema() -> BlockSchema {
        BlockSchema::new()
            .with_column("tag", ColumnType::Text)
            .with_column("ordinal", ColumnType::Integer)
    }
}

impl Datasource for ToyDatasource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        Self::KIND
    }

    fn schema(&self) -> BlockSchema {
        Self::schema()
    }

    fn block_prototype(&self) -> Arc<dyn BlockFactory> {
        Arc::new(GenericBlockFactory)
    }

    fn set_config(&self, config: serde_json::Value) -> Result<(), RegistryError> {
        let parsed: ToyConfig = serde_json::from_value(config)
            .map_err(|err| RegistryError::invalid_config(&self.name, err.to_string()))?;
        *self.config.lock() = parsed;
        Ok(())
    }

    fn config(&self) -> serde_json::Value {
        serde_json::to_value(self.config.lock().clone()).unwrap_or_default()
    }

    fn fetch_blocks(&self, token: &CancelToken, out: &BlockSender) -> Result<(), FetchError> {
        let config = self.config.lock().clone();
        let source = config.emit_source.unwrap_or_else(|| self.name.clone());
        let base = config
            .base_time
            .unwrap_or_else(|| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        for ordinal in 0..config.count {
            if config.delay_ms > 0 && token.sleep(Duration::from_millis(config.delay_ms)) {
                return Err(FetchError::Cancelled);
            }

            let block = GenericBlock {
                id: format!("{}-{ordinal:04}", config.tag),
                text: format!("{} block {ordinal} from {}", config.tag, self.name),
                created_at: base + chrono::Duration::seconds(ordinal as i64),
                kind: Self::KIND.to_owned(),
                source: source.clone(),
                hostname: None,
                metadata: [
                    ("tag".to_owned(), Value::from(config.tag.as_str())),
                    ("ordinal".to_owned(), Value::from(ordinal as i64)),
                ]
                .into(),
            };
            send_block(token, out, Arc::new(block))?;
        }

        Ok(())
    }
}

/// Register the `toy` kind in the process-wide prototype table.
pub fn register_toy_kind() {
    register_datasource_kind(
        ToyDatasource::KIND,
        Arc::new(|name, raw| {
            let config = if raw.is_null() {
                ToyConfig::default()
            } else {
                serde_json::from_value(raw)
                    .map_err(|err| RegistryError::invalid_config(name, err.to_string()))?
            };
            Ok(Arc::new(ToyDatasource::new(name, config)) as Arc<dyn Datasource>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toy_fetch_is_deterministic() {
        let ds = ToyDatasource::new(
            "my_toy",
            ToyConfig {
                count: 2,
                tag: "t".to_owned(),
                ..Default::default()
            },
        );

        let token = CancelToken::new();
        let (tx, rx) = crossbeam::channel::unbounded();
        ds.fetch_blocks(&token, &tx).unwrap();
        drop(tx);

        let blocks: Vec<_> = rx.iter().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].id(), "t-0000");
        assert_eq!(blocks[0].source(), "my_toy");
        assert!(blocks[1].created_at() > blocks[0].created_at());
    }

    #[test]
    fn cancelled_fetch_stops_early() {
        let ds = ToyDatasource::new(
            "my_toy",
            ToyConfig {
                count: 100,
                delay_ms: 5,
                ..Default::default()
            },
        );

        let token = CancelToken::new();
        let (tx, rx) = crossbeam::channel::bounded(1);
        token.cancel();

        let err = ds.fetch_blocks(&token, &tx).unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        drop(tx);
        assert!(rx.iter().count() <= 1);
    }
}
