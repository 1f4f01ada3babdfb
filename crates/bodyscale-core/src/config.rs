//! Configuration loading and validation.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables of the form `BODYSCALE__<SECTION>__<KEY>`
//! (for example `BODYSCALE__BLUETOOTH__SCAN_TIMEOUT_SECS=20`).
//!
//! The library never reads configuration on its own; hosts load a
//! [`ScaleConfig`] and derive a [`ScanFilter`] and [`SessionConfig`] from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calculator::{BiometricProfile, CalculatorError, Sex};
use crate::session::SessionConfig;
use crate::transport::ScanFilter;

static MAC_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC address pattern is valid")
});

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BODYSCALE";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file that must exist was not found.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The layered sources could not be merged or deserialized.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("failed to write {}: {source}", .path.display())]
    WriteError {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// One field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Discovery and link settings.
    pub bluetooth: BluetoothConfig,

    /// Session behaviour.
    pub session: SessionSettings,

    /// Biometric inputs for hosts that keep them in the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileConfig>,
}

/// Discovery and link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter to use (for example `hci0`). Defaults to the system adapter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,

    /// Connect only to this scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_address: Option<String>,

    /// Advertised name prefixes that identify a supported scale.
    pub name_prefixes: Vec<String>,

    /// How long a scan listens for advertisements.
    pub scan_timeout_secs: u64,

    /// Upper bound on opening the link.
    pub connect_timeout_secs: u64,

    /// Upper bound on resolving the measurement characteristic.
    pub subscribe_timeout_secs: u64,

    /// Bytes written to the vendor config characteristic to start a reading.
    pub start_command: Vec<u8>,

    /// Whether to send `start_command` after subscribing.
    pub request_measurement: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            device_address: None,
            name_prefixes: vec!["MIBFS".to_string(), "MI SCALE".to_string()],
            scan_timeout_secs: 10,
            connect_timeout_secs: 15,
            subscribe_timeout_secs: 10,
            start_command: vec![0x01],
            request_measurement: true,
        }
    }
}

/// Session behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Capacity of bounded notification and measurement channels.
    pub channel_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
        }
    }
}

/// Biometric inputs as written in a config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// `male` or `female`.
    pub sex: Sex,
    /// Age in whole years.
    pub age_years: u32,
    /// Height in centimetres.
    pub height_cm: f64,
}

impl ProfileConfig {
    /// Build the validated profile.
    ///
    /// # Errors
    ///
    /// Returns [`CalculatorError::InvalidInput`] for out-of-domain values.
    pub fn to_profile(&self) -> Result<BiometricProfile, CalculatorError> {
        BiometricProfile::new(self.sex, self.age_years, self.height_cm)
    }
}

impl ScaleConfig {
    /// Load configuration from `path` (optional) layered with environment
    /// overrides, then validate it.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bluetooth.name_prefixes")
                    .with_list_parse_key("bluetooth.start_command"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, which must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] when the file is absent, otherwise
    /// as [`ScaleConfig::load`].
    pub fn load_existing(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load(path)
    }

    /// Write this configuration to `path` as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, collecting all violations.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: &str| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        let bt = &self.bluetooth;
        if let Some(address) = &bt.device_address {
            if !is_valid_mac_address(address) {
                fail(
                    "bluetooth.device_address",
                    "expected six colon-separated hex octets (AA:BB:CC:DD:EE:FF)",
                );
            }
        }
        if bt.device_address.is_none() && bt.name_prefixes.iter().all(|p| p.trim().is_empty()) {
            fail(
                "bluetooth.name_prefixes",
                "at least one name prefix is required when no device address is pinned",
            );
        }
        if bt.scan_timeout_secs == 0 {
            fail("bluetooth.scan_timeout_secs", "must be greater than zero");
        }
        if bt.connect_timeout_secs == 0 {
            fail("bluetooth.connect_timeout_secs", "must be greater than zero");
        }
        if bt.subscribe_timeout_secs == 0 {
            fail("bluetooth.subscribe_timeout_secs", "must be greater than zero");
        }
        if bt.request_measurement && bt.start_command.is_empty() {
            fail(
                "bluetooth.start_command",
                "must not be empty while request_measurement is enabled",
            );
        }
        if self.session.channel_capacity == 0 {
            fail("session.channel_capacity", "must be greater than zero");
        }
        if let Some(profile) = &self.profile {
            if !(1..=150).contains(&profile.age_years) {
                fail("profile.age_years", "must be between 1 and 150");
            }
            if !(50.0..=272.0).contains(&profile.height_cm) {
                fail("profile.height_cm", "must be between 50 and 272 centimetres");
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Scan filter derived from the bluetooth section.
    #[must_use]
    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            name_prefixes: self
                .bluetooth
                .name_prefixes
                .iter()
                .filter(|prefix| !prefix.trim().is_empty())
                .cloned()
                .collect(),
            services: vec![crate::types::gatt::BODY_COMPOSITION_SERVICE],
            address: self.bluetooth.device_address.clone(),
            timeout: Duration::from_secs(self.bluetooth.scan_timeout_secs),
        }
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_secs(self.bluetooth.connect_timeout_secs),
            subscribe_timeout: Duration::from_secs(self.bluetooth.subscribe_timeout_secs),
            start_command: if self.bluetooth.request_measurement {
                Some(self.bluetooth.start_command.clone())
            } else {
                None
            },
            channel_capacity: self.session.channel_capacity,
        }
    }
}

/// Whether `address` looks like `AA:BB:CC:DD:EE:FF`.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS.is_match(address)
}

/// Default configuration file location.
///
/// On Linux the system-wide `/etc/bodyscale/config.toml` wins when present;
/// otherwise the per-user config directory is used.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let system = PathBuf::from("/etc/bodyscale/config.toml");
        if system.exists() {
            return system;
        }
    }
    directories::ProjectDirs::from("", "", "bodyscale").map_or_else(
        || PathBuf::from("bodyscale.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScaleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bluetooth.scan_timeout_secs, 10);
        assert_eq!(config.session.channel_capacity, 32);
        assert!(config.profile.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScaleConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ScaleConfig::default());
    }

    #[test]
    fn test_load_existing_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScaleConfig::load_existing(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[bluetooth]
device_address = "C8:47:8C:12:34:56"
connect_timeout_secs = 30

[profile]
sex = "female"
age_years = 41
height_cm = 168.0
"#,
        )
        .unwrap();

        let config = ScaleConfig::load(&path).unwrap();
        assert_eq!(
            config.bluetooth.device_address.as_deref(),
            Some("C8:47:8C:12:34:56")
        );
        assert_eq!(config.bluetooth.connect_timeout_secs, 30);
        assert_eq!(config.bluetooth.scan_timeout_secs, 10);

        let profile = config.profile.unwrap().to_profile().unwrap();
        assert_eq!(profile.sex(), Sex::Female);
        assert_eq!(profile.age_years(), 41);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = ScaleConfig::default();
        config.bluetooth.name_prefixes = vec!["MIBCS".to_string()];
        config.profile = Some(ProfileConfig {
            sex: Sex::Male,
            age_years: 30,
            height_cm: 175.0,
        });
        config.save(&path).unwrap();

        let loaded = ScaleConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bluetooth\nscan_timeout_secs = ").unwrap();
        assert!(matches!(
            ScaleConfig::load(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = ScaleConfig::default();
        config.bluetooth.scan_timeout_secs = 0;
        config.bluetooth.device_address = Some("not-a-mac".into());
        config.session.channel_capacity = 0;

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = ScaleConfig::default();
        config.bluetooth.start_command.clear();
        match config.validate() {
            Err(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field, "bluetooth.start_command");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }

        config.bluetooth.request_measurement = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prefixes_optional_with_pinned_address() {
        let mut config = ScaleConfig::default();
        config.bluetooth.name_prefixes.clear();
        assert!(config.validate().is_err());

        config.bluetooth.device_address = Some("AA:BB:CC:DD:EE:FF".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_profile_ranges() {
        let mut config = ScaleConfig::default();
        config.profile = Some(ProfileConfig {
            sex: Sex::Male,
            age_years: 0,
            height_cm: 20.0,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MultipleValidationErrors(_))
        ));
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address("c8:47:8c:00:11:22"));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac_address("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac_address(""));
    }

    #[test]
    fn test_derived_scan_filter_and_session_config() {
        let mut config = ScaleConfig::default();
        config.bluetooth.name_prefixes.push("  ".into());
        let filter = config.scan_filter();
        assert_eq!(filter.name_prefixes, vec!["MIBFS", "MI SCALE"]);
        assert_eq!(filter.timeout, Duration::from_secs(10));
        assert!(filter.address.is_none());

        let session = config.session_config();
        assert_eq!(session.connect_timeout, Duration::from_secs(15));
        assert_eq!(session.start_command, Some(vec![0x01]));

        config.bluetooth.request_measurement = false;
        assert_eq!(config.session_config().start_command, None);
    }

    #[test]
    fn test_default_config_path_is_toml() {
        let path = default_config_path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
    }
}
