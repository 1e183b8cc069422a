//! Configuration management for tagsheet.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::assets::{FailurePolicy, GatherOptions};
use crate::error::{Error, Result};
use crate::layout::PageGeometry;
use crate::registry::MAX_ID_LENGTH;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default config and data directory name.
const DATA_DIR_NAME: &str = "tagsheet";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "registry.db";

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "TAGSHEET_";

/// Default public origin of the scan site.
pub const DEFAULT_ORIGIN: &str = "http://localhost:5173";

/// Default remote QR image service.
pub const DEFAULT_SERVICE_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TAGSHEET_`, `__` between levels)
/// 2. TOML config file at `~/.config/tagsheet/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Page and label geometry.
    pub geometry: PageGeometry,
    /// Export configuration.
    pub export: ExportConfig,
    /// QR image provisioning.
    pub assets: AssetsConfig,
    /// Registry configuration.
    pub registry: RegistryConfig,
}

/// Export-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Public origin the QR codes point to; ids resolve to `origin/qr/<id>`.
    pub origin: String,
    /// Title printed in the page-1 header.
    pub title: String,
    /// Directory for generated PDFs. Defaults to the working directory.
    pub output_dir: Option<PathBuf>,
    /// What to do with items whose image cannot be loaded.
    pub failure_policy: FailurePolicy,
}

/// Where QR images come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSourceKind {
    /// Encode in-process.
    #[default]
    Local,
    /// Fetch from the QR image service.
    Remote,
}

impl std::fmt::Display for AssetSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// QR image provisioning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Image source.
    pub source: AssetSourceKind,
    /// Remote QR image service endpoint.
    pub service_url: String,
    /// Requested image side length in pixels (remote source).
    pub image_size_px: u32,
    /// Pixels per QR module (local source).
    pub module_px: u32,
    /// Maximum concurrent fetches.
    pub concurrency: usize,
    /// Extra attempts after a retryable failure.
    pub retries: u32,
    /// Backoff step between attempts in milliseconds.
    pub retry_backoff_ms: u64,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Registry-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/tagsheet/registry.db`
    pub database_path: Option<PathBuf>,
    /// Length of generated tag ids.
    pub id_length: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            title: "QR Codes".to_string(),
            output_dir: None,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            source: AssetSourceKind::default(),
            service_url: DEFAULT_SERVICE_URL.to_string(),
            image_size_px: 300,
            module_px: 12,
            concurrency: 8,
            retries: 2,
            retry_backoff_ms: 250,
            timeout_ms: 10_000,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Resolved at runtime
            id_length: 8,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and the environment apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Self::figment(config_path).extract::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// The layered configuration sources.
    #[must_use]
    pub fn figment(config_path: Option<PathBuf>) -> Figment {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unusable geometry and
    /// [`Error::ConfigValidation`] for any other invalid value.
    pub fn validate(&self) -> Result<()> {
        self.geometry.derive()?;

        let origin = url::Url::parse(&self.export.origin).map_err(|e| Error::ConfigValidation {
            message: format!("invalid origin '{}': {e}", self.export.origin),
        })?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(Error::ConfigValidation {
                message: format!("origin must use http or https: {}", self.export.origin),
            });
        }

        crate::assets::parse_service_url(&self.assets.service_url)?;

        if self.assets.concurrency == 0 {
            return Err(Error::ConfigValidation {
                message: "concurrency must be greater than 0".to_string(),
            });
        }
        if self.assets.image_size_px == 0 || self.assets.module_px == 0 {
            return Err(Error::ConfigValidation {
                message: "image_size_px and module_px must be greater than 0".to_string(),
            });
        }
        if self.assets.timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "timeout_ms must be greater than 0".to_string(),
            });
        }
        if self.registry.id_length == 0 || self.registry.id_length > MAX_ID_LENGTH {
            return Err(Error::ConfigValidation {
                message: format!(
                    "id_length must be between 1 and {MAX_ID_LENGTH}, got {}",
                    self.registry.id_length
                ),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.registry
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the output directory, defaulting to the working directory.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.export
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Gathering options derived from the assets section.
    #[must_use]
    pub fn gather_options(&self) -> GatherOptions {
        GatherOptions {
            concurrency: self.assets.concurrency,
            retries: self.assets.retries,
            retry_backoff: Duration::from_millis(self.assets.retry_backoff_ms),
            timeout: Duration::from_millis(self.assets.timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "tagsheet-config-{}-{name}.toml",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.geometry, PageGeometry::default());
        assert_eq!(config.export.origin, DEFAULT_ORIGIN);
        assert_eq!(config.export.failure_policy, FailurePolicy::Placeholder);
        assert_eq!(config.assets.source, AssetSourceKind::Local);
        assert_eq!(config.registry.id_length, 8);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_geometry() {
        let mut config = Config::default();
        config.geometry.qr_per_row = 10;

        let result = config.validate();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_validate_bad_origin() {
        let mut config = Config::default();
        config.export.origin = "not a url".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("origin"));

        config.export.origin = "ftp://tags.example.org".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_service_url() {
        let mut config = Config::default();
        config.assets.service_url = "::".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.assets.concurrency = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("concurrency"));
    }

    #[test]
    fn test_validate_id_length() {
        let mut config = Config::default();
        config.registry.id_length = 0;
        assert!(config.validate().is_err());
        config.registry.id_length = MAX_ID_LENGTH + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let path = Config::default().database_path();
        assert!(path.to_string_lossy().contains("registry.db"));
        assert!(path.to_string_lossy().contains("tagsheet"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.registry.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_gather_options() {
        let mut config = Config::default();
        config.assets.concurrency = 3;
        config.assets.retry_backoff_ms = 40;
        config.assets.timeout_ms = 1500;

        let options = config.gather_options();
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.retries, 2);
        assert_eq!(options.retry_backoff, Duration::from_millis(40));
        assert_eq!(options.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("tagsheet"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_toml_sections() {
        let path = write_temp_config(
            "sections",
            r#"
[geometry]
qr_per_row = 3
label_size = 120.0

[export]
origin = "https://tags.example.org"
failure_policy = "exclude"

[assets]
source = "remote"
concurrency = 2
"#,
        );

        let config = Config::load_from(Some(path.clone())).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.geometry.qr_per_row, 3);
        assert!((config.geometry.label_size - 120.0).abs() < f64::EPSILON);
        assert!((config.geometry.margin - 36.0).abs() < f64::EPSILON);
        assert_eq!(config.export.origin, "https://tags.example.org");
        assert_eq!(config.export.failure_policy, FailurePolicy::Exclude);
        assert_eq!(config.assets.source, AssetSourceKind::Remote);
        assert_eq!(config.assets.concurrency, 2);
        assert_eq!(config.assets.retries, 2);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let path = write_temp_config(
            "invalid",
            r"
[assets]
concurrency = 0
",
        );
        let result = Config::load_from(Some(path.clone()));
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::ConfigValidation { .. })));
    }

    #[test]
    fn test_load_rejects_wrong_types() {
        let path = write_temp_config(
            "types",
            r#"
[geometry]
qr_per_row = "four"
"#,
        );
        let result = Config::load_from(Some(path.clone()));
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::ConfigLoad(_))));
    }

    #[test]
    fn test_config_serializes_to_toml_shape() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert!(json["geometry"]["qr_per_row"].is_number());
        assert_eq!(json["export"]["failure_policy"], "placeholder");
        assert_eq!(json["assets"]["source"], "local");
    }
}
