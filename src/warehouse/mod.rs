//! Warehouse backend abstraction
//!
//! The loader only needs a small capability set from a warehouse: run a
//! statement, fetch rows, empty a table and bulk-load a local file into it.
//! That set is the [`Warehouse`] trait. Backends:
//! - [`SnowflakeWarehouse`]: renders Snowflake SQL (table stages, `PUT`,
//!   `COPY INTO`) and sends it through a driver [`SqlSession`]
//! - `DuckDbWarehouse`: embedded local backend (feature `duckdb-backend`)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;
pub mod snowflake;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDbWarehouse;
pub use snowflake::{SnowflakeWarehouse, SqlSession};

/// Error type for warehouse operations
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// Failed to open or close the connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A statement failed to execute
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Uploading a local file into a stage failed
    #[error("Stage upload failed: {0}")]
    StageUploadFailed(String),

    /// Ingesting staged files into a table failed
    #[error("Copy into failed: {0}")]
    CopyIntoFailed(String),

    /// A connection parameter is missing or unusable
    #[error("Invalid connection parameter: {0}")]
    InvalidParameter(String),
}

impl WarehouseError {
    /// The underlying message, without the variant prefix
    pub(crate) fn into_detail(self) -> String {
        match self {
            WarehouseError::ConnectionFailed(msg)
            | WarehouseError::QueryFailed(msg)
            | WarehouseError::StageUploadFailed(msg)
            | WarehouseError::CopyIntoFailed(msg)
            | WarehouseError::InvalidParameter(msg) => msg,
        }
    }
}

/// Result type for warehouse operations
pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// Result row as a JSON object keyed by column name
pub type Row = serde_json::Value;

/// Connection parameters, copied verbatim from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionParams(BTreeMap<String, String>);

impl ConnectionParams {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a parameter the backend cannot work without
    pub fn require(&self, key: &str) -> WarehouseResult<&str> {
        self.get(key).ok_or_else(|| {
            WarehouseError::InvalidParameter(format!("missing required parameter '{}'", key))
        })
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<BTreeMap<String, String>> for ConnectionParams {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectionParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Warehouse backend trait
///
/// The minimum set of operations a backend must provide to be driven by
/// the loader. Every call blocks until the warehouse round-trip completes.
pub trait Warehouse {
    /// Execute a statement, discarding any result rows
    fn execute(&mut self, sql: &str) -> WarehouseResult<()>;

    /// Execute a statement and return its first row, if any
    fn fetch_one(&mut self, sql: &str) -> WarehouseResult<Option<Row>>;

    /// Execute a statement and return every row
    fn fetch_all(&mut self, sql: &str) -> WarehouseResult<Vec<Row>>;

    /// Remove all rows from a table, keeping its definition
    ///
    /// Fails with [`WarehouseError::QueryFailed`] when the table does not
    /// exist. No existence check is made beforehand.
    fn truncate(&mut self, table_name: &str) -> WarehouseResult<()>;

    /// Bulk-load `{file_path}/{table_name}.{file_format}` into the table
    ///
    /// Two steps: upload the file into the table's private stage, then copy
    /// the stage into the table (header row skipped, `"`-quoted fields) and
    /// purge the staged objects. A failure in either step is not rolled
    /// back.
    fn load_from_file(
        &mut self,
        table_name: &str,
        file_path: &str,
        file_format: &str,
    ) -> WarehouseResult<()>;

    /// Release the connection
    fn close(&mut self) -> WarehouseResult<()>;

    /// Backend type name
    fn backend_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_params_require() {
        let params: ConnectionParams = [("database", "RAW"), ("schema", "BRONZE")]
            .into_iter()
            .collect();

        assert_eq!(params.require("database").unwrap(), "RAW");
        assert_eq!(params.get("schema"), Some("BRONZE"));
        assert!(params.get("warehouse").is_none());

        let err = params.require("warehouse").unwrap_err();
        assert!(matches!(err, WarehouseError::InvalidParameter(_)));
        assert!(err.to_string().contains("warehouse"));
    }

    #[test]
    fn test_connection_params_iter_is_sorted() {
        let mut params = ConnectionParams::new();
        params.insert("user", "loader");
        params.insert("account", "xy12345");
        assert_eq!(params.len(), 2);

        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["account", "user"]);
    }
}
