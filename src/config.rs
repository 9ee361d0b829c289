//! Loader configuration file support
//!
//! The configuration is a TOML file with two sections:
//!
//! ```toml
//! [Parameters]
//! account = "xy12345"
//! database = "RAW"
//! schema = "BRONZE"
//!
//! [Dataset]
//! path = "data/bronze"
//! file_format = "csv"
//! ```
//!
//! Everything under `Parameters` is handed to the warehouse connection
//! verbatim.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::warehouse::ConnectionParams;

/// Configuration location used when no override is set
pub const DEFAULT_CONFIG_PATH: &str = "scripts/config/env.toml";

/// Environment variable overriding the configuration location
pub const ENV_CONFIG_PATH: &str = "BRONZE_LOADER_CONFIG";

/// Section holding connection parameters
pub const PARAMETERS_SECTION: &str = "Parameters";

/// Section holding dataset settings
pub const DATASET_SECTION: &str = "Dataset";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// A required section or key is absent
    #[error("Missing config key: {0}")]
    MissingKey(String),

    /// The file exists but could not be read
    #[error("Failed to read config {0}: {1}")]
    Read(PathBuf, String),

    /// The file is not valid TOML or has values of the wrong shape
    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// File layout before required keys are checked
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "Parameters")]
    parameters: Option<toml::Table>,
    #[serde(rename = "Dataset")]
    dataset: Option<RawDataset>,
}

#[derive(Debug, Deserialize)]
struct RawDataset {
    path: Option<String>,
    file_format: Option<String>,
}

/// Loader configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Warehouse connection parameters
    pub parameters: ConnectionParams,
    /// Directory holding the dataset files
    pub dataset_path: String,
    /// File format tag, also the dataset file extension
    pub file_format: String,
}

impl LoaderConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e.to_string()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let parameters = raw
            .parameters
            .ok_or_else(|| ConfigError::MissingKey(PARAMETERS_SECTION.to_string()))?;
        let dataset = raw
            .dataset
            .ok_or_else(|| ConfigError::MissingKey(DATASET_SECTION.to_string()))?;

        let dataset_path = dataset
            .path
            .ok_or_else(|| ConfigError::MissingKey(format!("{}.path", DATASET_SECTION)))?;
        let file_format = dataset
            .file_format
            .ok_or_else(|| ConfigError::MissingKey(format!("{}.file_format", DATASET_SECTION)))?;

        Ok(Self {
            parameters: parameters_from_table(parameters)?,
            dataset_path,
            file_format,
        })
    }

    /// Split into `(parameters, dataset_path, file_format)`
    pub fn into_parts(self) -> (ConnectionParams, String, String) {
        (self.parameters, self.dataset_path, self.file_format)
    }
}

/// Read the loader configuration at `path`
///
/// Returns the connection parameters, the dataset directory and the file
/// format.
pub fn read_config(path: impl AsRef<Path>) -> ConfigResult<(ConnectionParams, String, String)> {
    LoaderConfig::load(path.as_ref()).map(LoaderConfig::into_parts)
}

/// Resolve the configuration location, honouring [`ENV_CONFIG_PATH`]
pub fn config_path() -> PathBuf {
    std::env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Flatten `[Parameters]` into strings; scalars keep their TOML spelling
fn parameters_from_table(table: toml::Table) -> ConfigResult<ConnectionParams> {
    let mut params = BTreeMap::new();

    for (key, value) in table {
        let text = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Datetime(d) => d.to_string(),
            toml::Value::Array(_) | toml::Value::Table(_) => {
                return Err(ConfigError::Parse(format!(
                    "{}.{} must be a scalar value",
                    PARAMETERS_SECTION, key
                )));
            }
        };
        params.insert(key, text);
    }

    Ok(params.into())
}
