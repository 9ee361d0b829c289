//! Bronze loader - reload warehouse tables from flat files
//!
//! Provides:
//! - Configuration loading (connection parameters and dataset location)
//! - A warehouse backend abstraction with Snowflake and DuckDB backends
//! - The truncate-then-load run over a dataset directory

pub mod config;
pub mod loader;
pub mod warehouse;

pub use config::{ConfigError, ConfigResult, LoaderConfig, read_config};
pub use loader::{DatasetFile, LoaderError, LoaderResult, process_files};
#[cfg(feature = "duckdb-backend")]
pub use warehouse::DuckDbWarehouse;
pub use warehouse::{
    ConnectionParams, Row, SnowflakeWarehouse, SqlSession, Warehouse, WarehouseError,
    WarehouseResult,
};
