//! Accessory configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::setup_code::SetupCode;

/// Default handshake deadline in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration for one accessory.
///
/// Loaded from TOML; every field is optional in the file.
///
/// ```toml
/// name = "Living Room Bridge"
/// setup_code = "031-45-154"
/// storage_dir = "/var/lib/hap"
/// port = 51826
/// handshake_timeout_secs = 30
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessoryConfig {
    /// Human readable accessory name.
    pub name: String,
    /// Setup code presented to controllers during pair-setup.
    pub setup_code: SetupCode,
    /// Directory holding the bridge identity and pairing records.
    pub storage_dir: PathBuf,
    /// TCP port to listen on (0 = OS chosen).
    pub port: u16,
    /// Deadline for the next handshake message, 0 disables it.
    pub handshake_timeout_secs: u64,
}

impl AccessoryConfig {
    /// Create a builder with defaults.
    pub fn builder() -> AccessoryConfigBuilder {
        AccessoryConfigBuilder::new()
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Handshake deadline, `None` when disabled.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        match self.handshake_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Path of the persisted bridge identity.
    pub fn identity_path(&self) -> PathBuf {
        self.storage_dir.join("identity")
    }

    /// Directory holding one file per paired controller.
    pub fn pairings_dir(&self) -> PathBuf {
        self.storage_dir.join("pairings")
    }

    /// True when the setup code is the built-in default, which anyone
    /// reading this source can pair with.
    pub fn uses_default_setup_code(&self) -> bool {
        self.setup_code == SetupCode::default()
    }
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            name: "HAP Bridge".to_string(),
            setup_code: SetupCode::default(),
            storage_dir: PathBuf::from("hap-data"),
            port: 51826,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

/// Builder for [`AccessoryConfig`].
pub struct AccessoryConfigBuilder {
    config: AccessoryConfig,
}

impl AccessoryConfigBuilder {
    /// Create new builder with defaults.
    pub fn new() -> Self {
        Self {
            config: AccessoryConfig::default(),
        }
    }

    /// Set accessory name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set setup code.
    pub fn setup_code(mut self, code: SetupCode) -> Self {
        self.config.setup_code = code;
        self
    }

    /// Set storage directory.
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    /// Set listen port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set handshake timeout. `Duration::ZERO` disables it.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout_secs = timeout.as_secs();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<AccessoryConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for AccessoryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod loading {
        use super::*;
        use std::io::Write;

        #[test]
        fn empty_file_uses_defaults() {
            let config = AccessoryConfig::from_toml_str("").unwrap();
            assert_eq!(config.port, 51826);
            assert_eq!(config.handshake_timeout_secs, DEFAULT_HANDSHAKE_TIMEOUT_SECS);
            assert_eq!(config.setup_code, SetupCode::default());
        }

        #[test]
        fn reads_all_fields() {
            let config = AccessoryConfig::from_toml_str(
                r#"
                name = "Garage"
                setup_code = "482-91-735"
                storage_dir = "/tmp/garage"
                port = 0
                handshake_timeout_secs = 5
                "#,
            )
            .unwrap();

            assert_eq!(config.name, "Garage");
            assert_eq!(config.setup_code.as_bytes(), b"482-91-735");
            assert_eq!(config.storage_dir, PathBuf::from("/tmp/garage"));
            assert_eq!(config.port, 0);
            assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(5)));
        }

        #[test]
        fn rejects_trivial_setup_code() {
            let result = AccessoryConfig::from_toml_str(r#"setup_code = "123-45-678""#);
            assert!(result.is_err());
        }

        #[test]
        fn rejects_unknown_fields() {
            let result = AccessoryConfig::from_toml_str("colour = \"blue\"");
            assert!(matches!(result, Err(ConfigError::Syntax(_))));
        }

        #[test]
        fn load_from_file() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "name = \"Porch\"").unwrap();
            writeln!(file, "port = 4000").unwrap();

            let config = AccessoryConfig::load(file.path()).unwrap();
            assert_eq!(config.name, "Porch");
            assert_eq!(config.port, 4000);
        }

        #[test]
        fn missing_file_is_read_error() {
            let result = AccessoryConfig::load("/nonexistent/hap.toml");
            assert!(matches!(result, Err(ConfigError::Read(_))));
        }
    }

    mod builder {
        use super::*;

        #[test]
        fn zero_timeout_disables_deadline() {
            let config = AccessoryConfig::builder()
                .handshake_timeout(Duration::ZERO)
                .build()
                .unwrap();
            assert_eq!(config.handshake_timeout(), None);
        }

        #[test]
        fn sets_fields() {
            let code = SetupCode::parse("482-91-735").unwrap();
            let config = AccessoryConfig::builder()
                .name("Office")
                .setup_code(code.clone())
                .storage_dir("/tmp/office")
                .port(0)
                .build()
                .unwrap();

            assert_eq!(config.name, "Office");
            assert_eq!(config.setup_code, code);
            assert_eq!(config.pairings_dir(), PathBuf::from("/tmp/office/pairings"));
            assert_eq!(config.identity_path(), PathBuf::from("/tmp/office/identity"));
        }

        #[test]
        fn default_setup_code_is_flagged() {
            assert!(AccessoryConfig::default().uses_default_setup_code());

            let config = AccessoryConfig::builder()
                .setup_code(SetupCode::parse("482-91-735").unwrap())
                .build()
                .unwrap();
            assert!(!config.uses_default_setup_code());
        }

        #[test]
        fn empty_name_rejected() {
            let result = AccessoryConfig::builder().name("  ").build();
            assert!(matches!(result, Err(ConfigError::InvalidValue { field: "name", .. })));
        }
    }
}
