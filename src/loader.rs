//! Truncate-and-load of a dataset directory
//!
//! Every file in the dataset directory feeds the table named after it:
//! `orders.csv` reloads table `orders`. The table is emptied first, then
//! the file is loaded through the warehouse's bulk-load path. Files are
//! processed one at a time in file name order, and the first failure stops
//! the run. Nothing is rolled back: a table whose load failed stays empty.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::warehouse::{Warehouse, WarehouseError};

/// Error type for loader runs
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The dataset directory could not be listed
    #[error("Failed to read dataset directory {0}: {1}")]
    Io(PathBuf, String),

    /// A dataset entry is a directory or other non-file
    #[error("Dataset entry is not a file: {0}")]
    NotAFile(PathBuf),

    /// A dataset file name cannot be turned into a table name
    #[error("Cannot derive a table name from {0}")]
    InvalidFileName(PathBuf),

    /// The warehouse rejected a truncate or load
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Result type for loader runs
pub type LoaderResult<T> = Result<T, LoaderError>;

/// A dataset file and the table it loads into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFile {
    pub path: PathBuf,
    pub table_name: String,
}

impl DatasetFile {
    /// Derive the table name from the file name, dropping its extension
    pub fn new(path: PathBuf) -> LoaderResult<Self> {
        let table_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LoaderError::InvalidFileName(path.clone()))?
            .to_string();

        Ok(Self { path, table_name })
    }
}

/// Hidden entries (leading `.`) are never loaded
pub fn is_hidden(file_name: &str) -> bool {
    file_name.starts_with('.')
}

/// List the files of a dataset directory, sorted by file name
///
/// Hidden entries are skipped. Any other entry that is not a regular file
/// fails the listing, so no table is touched for a malformed dataset.
pub fn discover_dataset_files(dataset_path: &Path) -> LoaderResult<Vec<DatasetFile>> {
    let io_err = |e: std::io::Error| LoaderError::Io(dataset_path.to_path_buf(), e.to_string());

    let mut entries = Vec::new();
    for entry in fs::read_dir(dataset_path).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();

        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            return Err(LoaderError::InvalidFileName(path));
        };
        if is_hidden(&file_name) {
            debug!("Skipping hidden entry {}", path.display());
            continue;
        }
        if !path.is_file() {
            return Err(LoaderError::NotAFile(path));
        }

        entries.push((file_name, path));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    entries
        .into_iter()
        .map(|(_, path)| DatasetFile::new(path))
        .collect()
}

/// Truncate and reload one table per dataset file
///
/// The file loaded for a table is `{dataset_path}/{table_name}.{file_format}`.
/// The first error aborts the run; tables already processed keep their new
/// contents and the rest are left untouched.
pub fn process_files<W>(
    connection: &mut W,
    dataset_path: &str,
    file_format: &str,
) -> LoaderResult<()>
where
    W: Warehouse + ?Sized,
{
    let files = discover_dataset_files(Path::new(dataset_path))?;
    info!(
        "Loading {} file(s) from {} into {}",
        files.len(),
        dataset_path,
        connection.backend_type()
    );

    for file in &files {
        info!("Reloading table {} from {}", file.table_name, file.path.display());

        connection.truncate(&file.table_name)?;
        connection.load_from_file(&file.table_name, dataset_path, file_format)?;
    }

    Ok(())
}
