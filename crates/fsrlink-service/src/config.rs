//! Persisted configuration.
//!
//! The configuration file holds everything the pipeline reads but never
//! produces itself: the device identifier, the subscription target, the
//! bearer credential and tuning knobs. The device identifier is the one
//! field the pipeline writes back, through [`ConfigHandle::update`].
//!
//! A file that leaves out `link.service_uuid` or `link.characteristic_uuid`
//! has no subscription target, and starting a session from it is refused.
//! Only a missing file falls back to [`Config::template`], which targets the
//! Nordic UART service.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fsrlink_core::{LinkOptions, ReconnectOptions};
use fsrlink_types::uuids::{NUS_SERVICE, NUS_TX};
use fsrlink_types::{DeviceId, ParseError, SubscriptionTarget};
use uuid::Uuid;

/// Default collection endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://mybackendhaha.store/api/SensorData/by-name";

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device and subscription settings.
    pub link: LinkConfig,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Collection endpoint.
    pub uplink: UplinkConfig,
    /// Delivery and replay.
    pub delivery: DeliveryConfig,
    /// Pending store location.
    pub storage: StorageConfig,
}

impl Config {
    /// First-run configuration: defaults plus the Nordic UART subscription
    /// target.
    pub fn template() -> Self {
        let mut config = Self::default();
        config.link.service_uuid = Some(NUS_SERVICE.to_string());
        config.link.characteristic_uuid = Some(NUS_TX.to_string());
        config
    }

    /// Load configuration from the default path, or the
    /// [`template`](Self::template) when there is no file yet.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::template())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    ///
    /// The content is written to a sibling temporary file and renamed over
    /// the target, so readers never observe a half-written file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, content).map_err(|e| ConfigError::Write {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - The device identifier, when present, is not blank
    /// - Both subscription UUIDs are present and well formed
    /// - Timeouts are non-zero
    /// - Reconnect backoff is consistent
    /// - The endpoint is an absolute http(s) URL
    /// - The storage path is not empty
    ///
    /// A missing credential is not an error: readings are kept in the
    /// pending store until one is configured.
    ///
    /// # Example
    ///
    /// ```
    /// use fsrlink_service::Config;
    ///
    /// Config::template().validate().expect("template should be valid");
    /// assert!(Config::default().validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.link.validate());
        errors.extend(self.reconnect.validate());
        errors.extend(self.uplink.validate());
        errors.extend(self.storage.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Link driver options derived from the `[link]` and `[reconnect]`
    /// sections.
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions::default()
            .connect_timeout(Duration::from_secs(self.link.connect_timeout_secs))
            .reconnect(self.reconnect.to_options())
            .stable_after(Duration::from_secs(self.reconnect.stable_after_secs))
    }
}

/// Device and subscription settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Identifier of the sensor (MAC address, CoreBluetooth UUID or name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// GATT service holding the notification characteristic. No default:
    /// when absent, sessions refuse to start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_uuid: Option<String>,
    /// Characteristic whose notifications carry the sensor stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub characteristic_uuid: Option<String>,
    /// How long to scan for the device before giving up on one attempt.
    pub scan_timeout_secs: u64,
    /// Upper bound for one connection attempt.
    pub connect_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: None,
            service_uuid: None,
            characteristic_uuid: None,
            scan_timeout_secs: 10,
            connect_timeout_secs: 15,
        }
    }
}

impl LinkConfig {
    /// The configured device, if any.
    pub fn device(&self) -> Result<Option<DeviceId>, ParseError> {
        self.device.as_deref().map(DeviceId::new).transpose()
    }

    /// The configured subscription target.
    pub fn target(&self) -> Result<SubscriptionTarget, ParseError> {
        SubscriptionTarget::parse(
            self.service_uuid.as_deref(),
            self.characteristic_uuid.as_deref(),
        )
    }

    /// Scan timeout as a duration.
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    /// Validate link configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = self.device() {
            errors.push(ValidationError::new("link.device", e.to_string()));
        }
        for (field, raw) in [
            ("link.service_uuid", &self.service_uuid),
            ("link.characteristic_uuid", &self.characteristic_uuid),
        ] {
            match raw.as_deref().map(str::trim) {
                None | Some("") => errors.push(ValidationError::new(
                    field,
                    "not configured; the subscription target needs both UUIDs",
                )),
                Some(raw) if Uuid::parse_str(raw).is_err() => {
                    errors.push(ValidationError::new(field, format!("{raw:?} is not a UUID")));
                }
                Some(_) => {}
            }
        }
        if self.scan_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "link.scan_timeout_secs",
                "scan timeout must be at least 1 second",
            ));
        }
        if self.connect_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "link.connect_timeout_secs",
                "connect timeout must be at least 1 second",
            ));
        }

        errors
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt.
    pub initial_delay_ms: u64,
    /// Ceiling for the delay.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive failures.
    pub backoff_multiplier: f64,
    /// Randomize each delay within its upper half.
    pub jitter: bool,
    /// Seconds a connection must last before earlier failures are forgotten.
    pub stable_after_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
            stable_after_secs: 10,
        }
    }
}

impl ReconnectConfig {
    /// Convert to link reconnect options.
    pub fn to_options(&self) -> ReconnectOptions {
        ReconnectOptions::default()
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier)
            .jitter(self.jitter)
    }

    /// Validate reconnect configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        match self.to_options().validate() {
            Ok(()) => Vec::new(),
            Err(fsrlink_core::Error::InvalidConfig(message)) => {
                vec![ValidationError::new("reconnect", message)]
            }
            Err(e) => vec![ValidationError::new("reconnect", e.to_string())],
        }
    }
}

/// Collection endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// URL readings are POSTed to.
    pub endpoint: String,
    /// Bearer credential. Without one, readings go straight to the pending
    /// store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Upper bound for one request.
    pub timeout_secs: u64,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
            timeout_secs: 15,
        }
    }
}

impl UplinkConfig {
    /// The bearer credential, if one is set and non-empty.
    pub fn credential(&self) -> Option<&str> {
        self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate uplink configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        match reqwest::Url::parse(&self.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                "uplink.endpoint",
                format!("unsupported scheme '{}': expected http or https", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                "uplink.endpoint",
                format!("invalid URL '{}': {}", self.endpoint, e),
            )),
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "uplink.timeout_secs",
                "request timeout must be at least 1 second",
            ));
        }

        errors
    }
}

/// Delivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Seconds between pending replays. `0` disables periodic replay.
    pub replay_interval_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            replay_interval_secs: 300,
        }
    }
}

impl DeliveryConfig {
    /// Replay interval, or `None` when periodic replay is disabled.
    pub fn replay_interval(&self) -> Option<Duration> {
        (self.replay_interval_secs > 0).then(|| Duration::from_secs(self.replay_interval_secs))
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Pending store database path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: fsrlink_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid {field}: {source}")]
    Field {
        field: &'static str,
        source: ParseError,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field path (e.g., `link.service_uuid`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fsrlink")
        .join("config.toml")
}

/// Shared, persisted configuration.
///
/// Readers take a snapshot; writers go through [`update`](Self::update),
/// which saves the file before the new value becomes visible.
#[derive(Debug)]
pub struct ConfigHandle {
    path: PathBuf,
    config: RwLock<Config>,
}

impl ConfigHandle {
    /// Wrap an already loaded configuration that lives at `path`.
    pub fn new(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            config: RwLock::new(config),
        }
    }

    /// Load the file at `path`, or start from [`Config::template`] when it
    /// does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            Config::load(&path)?
        } else {
            debug!("No configuration at {}, using template", path.display());
            Config::template()
        };
        Ok(Self::new(path, config))
    }

    /// Open the default configuration file.
    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(default_config_path())
    }

    /// Path the configuration is saved to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the current configuration.
    pub fn snapshot(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read one value without cloning the whole configuration.
    pub fn read<T>(&self, f: impl FnOnce(&Config) -> T) -> T {
        f(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply `f`, save the result, then publish it.
    ///
    /// Nothing changes, on disk or in memory, if saving fails.
    pub fn update(&self, f: impl FnOnce(&mut Config)) -> Result<(), ConfigError> {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        f(&mut next);
        if next == *guard {
            return Ok(());
        }
        next.save(&self.path)?;
        *guard = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.link.device, None);
        assert_eq!(config.uplink.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.uplink.credential(), None);
        assert_eq!(config.delivery.replay_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.storage.path, fsrlink_store::default_db_path());
    }

    #[test]
    fn test_template_targets_nordic_uart() {
        let target = Config::template().link.target().unwrap();
        assert_eq!(target, SubscriptionTarget::new(NUS_SERVICE, NUS_TX));
    }

    #[test]
    fn test_template_validates() {
        Config::template().validate().unwrap();
    }

    #[test]
    fn test_default_has_no_target() {
        let config = Config::default();
        assert!(config.link.target().is_err());

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["link.service_uuid", "link.characteristic_uuid"]);
    }

    #[test]
    fn test_file_without_target_stays_without_target() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[link]\ndevice = \"glove\"\n").unwrap();

        let config = ConfigHandle::open(&path).unwrap().snapshot();

        assert_eq!(config.link.service_uuid, None);
        assert_eq!(config.link.characteristic_uuid, None);
        assert!(matches!(
            config.link.target(),
            Err(ParseError::InvalidUuid { field: "service", .. })
        ));
    }

    #[test]
    fn test_file_with_one_uuid_has_no_target() {
        let toml = "[link]\nservice_uuid = \"6e400001-b5a3-f393-e0a9-e50e24dcca9e\"\n";
        let config: Config = toml::from_str(toml).unwrap();

        assert!(matches!(
            config.link.target(),
            Err(ParseError::InvalidUuid { field: "characteristic", .. })
        ));
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [link]
            device = "AA:BB:CC:DD:EE:FF"
            service_uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
            characteristic_uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
            scan_timeout_secs = 20
            connect_timeout_secs = 30

            [reconnect]
            initial_delay_ms = 500
            max_delay_ms = 10000
            backoff_multiplier = 1.5
            jitter = false
            stable_after_secs = 30

            [uplink]
            endpoint = "http://localhost:8080/readings"
            token = "secret"
            timeout_secs = 5

            [delivery]
            replay_interval_secs = 0

            [storage]
            path = "/tmp/fsrlink.db"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.link.device().unwrap(),
            Some(DeviceId::new("AA:BB:CC:DD:EE:FF").unwrap())
        );
        assert_eq!(config.link.scan_timeout(), Duration::from_secs(20));
        assert_eq!(config.uplink.credential(), Some("secret"));
        assert_eq!(config.uplink.timeout(), Duration::from_secs(5));
        assert_eq!(config.delivery.replay_interval(), None);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/fsrlink.db"));

        let options = config.link_options();
        assert_eq!(options.connect_timeout, Duration::from_secs(30));
        assert_eq!(options.reconnect.initial_delay, Duration::from_millis(500));
        assert_eq!(options.reconnect.max_delay, Duration::from_millis(10_000));
        assert!(!options.reconnect.jitter);
        assert_eq!(options.stable_after, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("[uplink]\ntoken = \"abc\"\n").unwrap();
        assert_eq!(config.uplink.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.link, LinkConfig::default());
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_blank_credential_is_absent() {
        let uplink = UplinkConfig {
            token: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(uplink.credential(), None);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[link\ndevice = ").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.link.device = Some("FSR Glove".to_string());
        config.uplink.token = Some("token-123".to_string());
        config.storage.path = PathBuf::from("/tmp/test.db");

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(loaded, config);
        assert!(!temp_dir.path().join("nested").join("config.toml.tmp").exists());
    }

    #[test]
    fn test_invalid_target_fields() {
        let mut config = Config::default();
        config.link.service_uuid = Some("not-a-uuid".to_string());
        config.link.characteristic_uuid = Some("  ".to_string());

        let link_errors = config.link.validate();
        let fields: Vec<&str> = link_errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["link.service_uuid", "link.characteristic_uuid"]);
        assert!(link_errors[0].message.contains("not-a-uuid"));
        assert!(link_errors[1].message.contains("not configured"));

        config.link.service_uuid = Some(NUS_SERVICE.to_string());
        let link_errors = config.link.validate();
        assert_eq!(link_errors.len(), 1);
        assert_eq!(link_errors[0].field, "link.characteristic_uuid");
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = Config::template();
        config.link.device = Some("  ".to_string());
        config.link.connect_timeout_secs = 0;
        config.reconnect.backoff_multiplier = 0.5;
        config.uplink.endpoint = "ftp://example.com".to_string();
        config.storage.path = PathBuf::new();

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "link.device",
                "link.connect_timeout_secs",
                "reconnect",
                "uplink.endpoint",
                "storage.path"
            ]
        );
    }

    #[test]
    fn test_config_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError::new("uplink.endpoint", "invalid URL"),
            ValidationError::new("storage.path", "database path cannot be empty"),
        ]);
        let msg = error.to_string();
        assert!(msg.contains("Configuration validation failed"));
        assert!(msg.contains("  - uplink.endpoint: invalid URL"));
        assert!(msg.contains("  - storage.path: database path cannot be empty"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("fsrlink/config.toml"));
    }

    #[test]
    fn test_handle_update_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let handle = ConfigHandle::open(&path).unwrap();
        assert_eq!(handle.snapshot(), Config::template());
        assert!(!path.exists());

        handle
            .update(|c| c.link.device = Some("AA:BB:CC:DD:EE:FF".to_string()))
            .unwrap();
        assert_eq!(
            handle.read(|c| c.link.device.clone()),
            Some("AA:BB:CC:DD:EE:FF".to_string())
        );

        let reopened = ConfigHandle::open(&path).unwrap();
        assert_eq!(reopened.snapshot(), handle.snapshot());
    }

    #[test]
    fn test_handle_update_without_change_skips_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let handle = ConfigHandle::open(&path).unwrap();
        handle.update(|_| {}).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_handle_failed_save_keeps_old_value() {
        let temp_dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail
        let path = temp_dir.path().join("config.toml");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();

        let handle = ConfigHandle::new(&path, Config::default());
        let result = handle.update(|c| c.link.device = Some("glove".to_string()));

        assert!(matches!(result, Err(ConfigError::Write { .. })));
        assert_eq!(handle.read(|c| c.link.device.clone()), None);
    }
}
