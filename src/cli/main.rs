//! Binary entry point for bronze-loader
//!
//! Reads the configuration from its fixed location (overridable with
//! `BRONZE_LOADER_CONFIG`), opens the warehouse and reloads every table of
//! the dataset directory. Log level follows `RUST_LOG`, default `info`.

use anyhow::{Context, Result};
use bronze_loader::config::{config_path, read_config};
use bronze_loader::loader::process_files;
use bronze_loader::warehouse::{DuckDbWarehouse, Warehouse};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn run() -> Result<()> {
    let path = config_path();
    let (parameters, dataset_path, file_format) = read_config(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let mut connection =
        DuckDbWarehouse::connect(parameters).context("Failed to open warehouse connection")?;

    process_files(&mut connection, &dataset_path, &file_format)
        .with_context(|| format!("Failed to load dataset {}", dataset_path))?;

    connection.close().context("Failed to close warehouse connection")?;
    info!("Load complete");

    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
