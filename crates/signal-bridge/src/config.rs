//! Bridge configuration.
//!
//! Configuration lives in a YAML file whose path is taken from the
//! `SIGNAL_BRIDGE_CONFIG` environment variable. Every field has a default so a
//! partial (or empty) document is valid. The bridge writes the file back when
//! it clears one-shot flags such as `bridge.resend_bridge_info`; the write
//! edits that single key in the raw document and swaps the file in by rename.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SIGNAL_BRIDGE_CONFIG";

/// Config file used when `SIGNAL_BRIDGE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Default ghost localpart template.
pub const DEFAULT_USERNAME_TEMPLATE: &str = "signal_{userid}";

/// Placeholder that the username template must contain.
pub const USERNAME_TEMPLATE_PLACEHOLDER: &str = "{userid}";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:29328";

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "signal_bridge=info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub homeserver: HomeserverConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeserverConfig {
    /// Server name used in ghost Matrix IDs.
    pub domain: String,
}

impl Default for HomeserverConfig {
    fn default() -> Self {
        Self {
            domain: "example.com".to_string(),
        }
    }
}

/// The `bridge` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Ghost localpart template, must contain `{userid}`.
    pub username_template: String,

    /// Seconds between full resyncs of every user. `<= 0` disables.
    pub periodic_sync: i64,

    /// Re-send bridge info state events to every portal on next startup.
    pub resend_bridge_info: bool,

    pub limits: LimitsConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            username_template: DEFAULT_USERNAME_TEMPLATE.to_string(),
            periodic_sync: 0,
            resend_bridge_info: false,
            limits: LimitsConfig::default(),
        }
    }
}

/// The `bridge.limits` section (admission control).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Puppets idle for longer than this many days are not counted.
    /// `None` means no inactivity cutoff.
    pub puppet_inactivity_days: Option<i64>,

    /// Puppets need strictly more than this many days of activity to count.
    pub min_puppet_activity_days: f64,

    /// Enables blocking together with `max_puppet_limit`. Only presence is
    /// checked, not the value.
    pub block_on_limit_reached: Option<bool>,

    /// Active puppet count above which the bridge blocks.
    pub max_puppet_limit: Option<i64>,
}

/// The `logging` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

/// The `health` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Bind address for `/health`, `/ready` and `/metrics`.
    pub bind_address: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_HEALTH_BIND_ADDRESS.to_string(),
        }
    }
}

impl Config {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty file deserializes to YAML null, which means "all defaults".
        let config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Render the config as YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Read, parse and validate the config file at `path`.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml_str(&raw)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self
            .bridge
            .username_template
            .contains(USERNAME_TEMPLATE_PLACEHOLDER)
        {
            return Err(ConfigError::InvalidValue(format!(
                "bridge.username_template must contain {USERNAME_TEMPLATE_PLACEHOLDER}"
            )));
        }

        let limits = &self.bridge.limits;
        if limits.puppet_inactivity_days.is_some_and(|days| days < 0) {
            return Err(ConfigError::InvalidValue(
                "bridge.limits.puppet_inactivity_days must not be negative".to_string(),
            ));
        }
        if limits.max_puppet_limit.is_some_and(|limit| limit < 0) {
            return Err(ConfigError::InvalidValue(
                "bridge.limits.max_puppet_limit must not be negative".to_string(),
            ));
        }
        if !limits.min_puppet_activity_days.is_finite() || limits.min_puppet_activity_days < 0.0 {
            return Err(ConfigError::InvalidValue(
                "bridge.limits.min_puppet_activity_days must be a non-negative number".to_string(),
            ));
        }

        Ok(())
    }
}

/// Resolve the config file path from environment variables.
#[must_use]
pub fn config_path_from_env() -> PathBuf {
    config_path_from_vars(&env::vars().collect())
}

/// Resolve the config file path from a `HashMap` (for testing).
#[must_use]
pub fn config_path_from_vars(vars: &HashMap<String, String>) -> PathBuf {
    vars.get(CONFIG_PATH_ENV)
        .filter(|path| !path.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Shared, writable view of the running configuration.
///
/// Readers take cheap clones through [`ConfigHandle::snapshot`]. Writes go
/// through dedicated methods that persist the file before returning.
#[derive(Debug)]
pub struct ConfigHandle {
    path: Option<PathBuf>,
    inner: RwLock<Config>,
}

impl ConfigHandle {
    /// Wrap a config that is persisted to `path` on writes.
    #[must_use]
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path: Some(path),
            inner: RwLock::new(config),
        }
    }

    /// Wrap a config that is never written to disk.
    #[must_use]
    pub fn in_memory(config: Config) -> Self {
        Self {
            path: None,
            inner: RwLock::new(config),
        }
    }

    /// Load the config file at `path` and keep it as the write-back target.
    pub async fn load(path: PathBuf) -> Result<Self, ConfigError> {
        let config = Config::load(&path).await?;
        Ok(Self::new(config, path))
    }

    /// Path writes are persisted to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Clone of the current config.
    pub async fn snapshot(&self) -> Config {
        self.inner.read().await.clone()
    }

    /// Clear `bridge.resend_bridge_info` and persist the change.
    ///
    /// Only that key is rewritten on disk. Sections this crate does not model
    /// (appservice registration, homeserver address, permissions) are kept.
    pub async fn clear_resend_bridge_info(&self) -> Result<(), ConfigError> {
        let mut config = self.inner.write().await;
        config.bridge.resend_bridge_info = false;
        self.persist_bridge_key(&config, "resend_bridge_info", Value::Bool(false))
            .await
    }

    async fn persist_bridge_key(
        &self,
        config: &Config,
        key: &str,
        value: Value,
    ) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut document = read_document(path, config).await?;
        set_bridge_key(&mut document, key, value)?;
        let yaml =
            serde_yaml::to_string(&document).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        write_atomically(path, yaml).await?;

        info!(target: "bridge.config", path = %path.display(), key = key, "Config saved");
        Ok(())
    }
}

/// Current on-disk document, or the typed config if the file is gone.
async fn read_document(path: &Path, config: &Config) -> Result<Value, ConfigError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) if raw.trim().is_empty() => Ok(Value::Mapping(Mapping::new())),
        Ok(raw) => serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            serde_yaml::to_value(config).map_err(|e| ConfigError::Serialize(e.to_string()))
        }
        Err(source) => Err(ConfigError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Set `bridge.<key>` in a raw config document, leaving everything else alone.
fn set_bridge_key(document: &mut Value, key: &str, value: Value) -> Result<(), ConfigError> {
    if document.is_null() {
        *document = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(root) = document else {
        return Err(ConfigError::InvalidValue(
            "config document must be a mapping".to_string(),
        ));
    };

    if !matches!(root.get("bridge"), Some(Value::Mapping(_))) {
        root.insert(Value::from("bridge"), Value::Mapping(Mapping::new()));
    }
    let Some(Value::Mapping(bridge)) = root.get_mut("bridge") else {
        return Err(ConfigError::InvalidValue(
            "bridge section must be a mapping".to_string(),
        ));
    };
    bridge.insert(Value::from(key), value);
    Ok(())
}

/// Write `contents` next to `path`, then rename it into place.
async fn write_atomically(path: &Path, contents: String) -> Result<(), ConfigError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let io_error = |source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    };

    tokio::fs::write(&tmp, contents).await.map_err(io_error)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        // The original file is still intact
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error(e));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
homeserver:
  domain: signal.example.org
bridge:
  username_template: "sig_{userid}"
  periodic_sync: 3600
  resend_bridge_info: true
  limits:
    puppet_inactivity_days: 30
    min_puppet_activity_days: 1.5
    block_on_limit_reached: true
    max_puppet_limit: 100
logging:
  filter: "signal_bridge=debug"
  json: true
health:
  bind_address: "127.0.0.1:9000"
"#;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bridge.periodic_sync, 0);
        assert!(!config.bridge.resend_bridge_info);
        assert_eq!(config.bridge.username_template, DEFAULT_USERNAME_TEMPLATE);
        assert_eq!(config.health.bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert!(config.bridge.limits.max_puppet_limit.is_none());
    }

    #[test]
    fn test_full_document() {
        let config = Config::from_yaml_str(FULL_CONFIG).unwrap();

        assert_eq!(config.homeserver.domain, "signal.example.org");
        assert_eq!(config.bridge.username_template, "sig_{userid}");
        assert_eq!(config.bridge.periodic_sync, 3600);
        assert!(config.bridge.resend_bridge_info);
        assert_eq!(config.bridge.limits.puppet_inactivity_days, Some(30));
        assert!((config.bridge.limits.min_puppet_activity_days - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.bridge.limits.block_on_limit_reached, Some(true));
        assert_eq!(config.bridge.limits.max_puppet_limit, Some(100));
        assert_eq!(config.logging.filter, "signal_bridge=debug");
        assert!(config.logging.json);
        assert_eq!(config.health.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn test_explicit_nulls_stay_unset() {
        let config = Config::from_yaml_str(
            "bridge:\n  limits:\n    puppet_inactivity_days: null\n    max_puppet_limit: null\n    block_on_limit_reached: null\n",
        )
        .unwrap();

        assert!(config.bridge.limits.puppet_inactivity_days.is_none());
        assert!(config.bridge.limits.max_puppet_limit.is_none());
        assert!(config.bridge.limits.block_on_limit_reached.is_none());
    }

    #[test]
    fn test_integer_min_activity_days() {
        let config =
            Config::from_yaml_str("bridge:\n  limits:\n    min_puppet_activity_days: 2\n").unwrap();
        assert!((config.bridge.limits.min_puppet_activity_days - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_negative_limits_rejected() {
        let result =
            Config::from_yaml_str("bridge:\n  limits:\n    max_puppet_limit: -1\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));

        let result =
            Config::from_yaml_str("bridge:\n  limits:\n    puppet_inactivity_days: -3\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));

        let result =
            Config::from_yaml_str("bridge:\n  limits:\n    min_puppet_activity_days: -0.5\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_negative_periodic_sync_is_valid() {
        // Negative interval means "disabled", not an error
        let config = Config::from_yaml_str("bridge:\n  periodic_sync: -5\n").unwrap();
        assert_eq!(config.bridge.periodic_sync, -5);
    }

    #[test]
    fn test_template_without_placeholder_rejected() {
        let result = Config::from_yaml_str("bridge:\n  username_template: \"signal_\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let result = Config::from_yaml_str("bridge: [unterminated");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_yaml_round_trip_preserves_values() {
        let config = Config::from_yaml_str(FULL_CONFIG).unwrap();
        let rendered = config.to_yaml_string().unwrap();
        assert_eq!(Config::from_yaml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn test_config_path_from_vars() {
        let vars = HashMap::new();
        assert_eq!(config_path_from_vars(&vars), PathBuf::from(DEFAULT_CONFIG_PATH));

        let vars = HashMap::from([(CONFIG_PATH_ENV.to_string(), "/etc/bridge.yaml".to_string())]);
        assert_eq!(config_path_from_vars(&vars), PathBuf::from("/etc/bridge.yaml"));

        let vars = HashMap::from([(CONFIG_PATH_ENV.to_string(), String::new())]);
        assert_eq!(config_path_from_vars(&vars), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[tokio::test]
    async fn test_in_memory_handle_clears_flag_without_path() {
        let mut config = Config::default();
        config.bridge.resend_bridge_info = true;
        let handle = ConfigHandle::in_memory(config);

        assert!(handle.path().is_none());
        handle.clear_resend_bridge_info().await.unwrap();
        assert!(!handle.snapshot().await.bridge.resend_bridge_info);
    }

    #[test]
    fn test_set_bridge_key_keeps_sibling_keys() {
        let raw = "bridge:\n  permissions:\n    '*': relay\n  resend_bridge_info: true\n";
        let mut document: Value = serde_yaml::from_str(raw).unwrap();

        set_bridge_key(&mut document, "resend_bridge_info", Value::Bool(false)).unwrap();

        assert_eq!(document["bridge"]["resend_bridge_info"], Value::Bool(false));
        assert_eq!(document["bridge"]["permissions"]["*"], Value::from("relay"));
    }

    #[test]
    fn test_set_bridge_key_creates_missing_section() {
        let mut document = Value::Null;
        set_bridge_key(&mut document, "resend_bridge_info", Value::Bool(false)).unwrap();
        assert_eq!(document["bridge"]["resend_bridge_info"], Value::Bool(false));

        let mut scalar = Value::from("not a config");
        let result = set_bridge_key(&mut scalar, "resend_bridge_info", Value::Bool(false));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[tokio::test]
    async fn test_clear_flag_recreates_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = Config::from_yaml_str(FULL_CONFIG).unwrap();
        let handle = ConfigHandle::new(config, path.clone());

        handle.clear_resend_bridge_info().await.unwrap();

        let on_disk = Config::load(&path).await.unwrap();
        assert!(!on_disk.bridge.resend_bridge_info);
        assert_eq!(on_disk.homeserver.domain, "signal.example.org");
        assert!(!dir.path().join("config.yaml.tmp").exists());
    }
}
