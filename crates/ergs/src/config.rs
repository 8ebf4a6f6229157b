use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;

use erg_importer::ImporterConfig;
use erg_warehouse::WarehouseConfig;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("couldn't compute a default storage location")]
    UnknownLocation,

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// One configured datasource instance.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DatasourceConfig {
    /// The adapter kind (`"type"` in config files, matching the wire format).
    #[serde(rename = "type")]
    pub kind: String,

    /// Per-instance fetch cadence override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    /// Adapter-specific configuration, passed through opaquely.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// The whole engine surface an external driver provides.
///
/// The core does not watch files or handle signals — a CLI layer loads (and
/// reloads) this and drives [`crate::Engine`] accordingly.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Default fetch cadence for datasources without their own.
    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: u64,

    /// Store-maintenance cadence; 0 disables.
    #[serde(default = "default_optimize_interval_secs")]
    pub optimize_interval_secs: u64,

    /// Where to publish the live firehose; absent disables the bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_socket_path: Option<PathBuf>,

    /// The HTTP staging ingress; absent disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importer: Option<ImporterConfig>,

    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            fetch_interval_secs: default_fetch_interval_secs(),
            optimize_interval_secs: default_optimize_interval_secs(),
            event_socket_path: None,
            importer: None,
            datasources: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Fatal-at-startup checks; everything else is the adapters' business.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_interval_secs == 0 {
            return Err(ConfigError::invalid("fetch_interval_secs must be positive"));
        }

        for (name, datasource) in &self.datasources {
            if !is_valid_instance_name(name) {
                return Err(ConfigError::invalid(format!(
                    "datasource name {name:?} is not usable as a store filename"
                )));
            }
            if datasource.kind.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "datasource {name:?} declares no type"
                )));
            }
            if datasource.interval_secs == Some(0) {
                return Err(ConfigError::invalid(format!(
                    "datasource {name:?} has a zero interval"
                )));
            }
        }

        Ok(())
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }

    /// The effective cadence for one configured datasource.
    pub fn datasource_interval(&self, name: &str) -> Duration {
        self.datasources
            .get(name)
            .and_then(|d| d.interval_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.fetch_interval())
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig {
            fetch_interval: self.fetch_interval(),
            optimize_interval: Duration::from_secs(self.optimize_interval_secs),
            ..Default::default()
        }
    }

    /// `<storage_dir>/internal/importer.db`, the staging store location.
    pub fn importer_db_path(&self) -> PathBuf {
        self.storage_dir.join("internal").join("importer.db")
    }
}

/// Instance names become `<name>.db` filenames and routing keys; keep them
/// path- and shell-safe.
fn is_valid_instance_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn default_storage_dir() -> PathBuf {
    ProjectDirs::from("", "", "ergs")
        .map(|dirs| dirs.data_local_dir().to_owned())
        .unwrap_or_else(|| PathBuf::from(".ergs"))
}

fn default_fetch_interval_secs() -> u64 {
    30 * 60
}

fn default_optimize_interval_secs() -> u64 {
    60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.fetch_interval_secs, 1800);
        assert_eq!(config.optimize_interval_secs, 3600);
        assert!(config.datasources.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn datasource_intervals_override_the_default() {
        let config: Config = serde_json::from_str(
            r#"{
                "storage_dir": "/tmp/ergs-test",
                "fetch_interval_secs": 600,
                "datasources": {
                    "my_github": { "type": "github", "interval_secs": 60,
                                   "config": { "user": "x" } },
                    "my_rss": { "type": "rss" }
                }
            }"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.datasource_interval("my_github"),
            Duration::from_secs(60)
        );
        assert_eq!(config.datasource_interval("my_rss"), Duration::from_secs(600));
        assert_eq!(config.datasources["my_github"].kind, "github");
    }

    #[test]
    fn hostile_instance_names_are_rejected() {
        for name in ["../evil", "a/b", "", "semi;colon", "sp ace"] {
            let config = Config {
                datasources: BTreeMap::from([(
                    name.to_owned(),
                    DatasourceConfig {
                        kind: "toy".to_owned(),
                        interval_secs: None,
                        config: serde_json::Value::Null,
                    },
                )]),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "accepted {name:?}");
        }
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let config: Config = serde_json::from_str(r#"{ "fetch_interval_secs": 0 }"#).unwrap();
        assert!(config.validate().is_err());
    }
}
