//! DuckDB warehouse backend
//!
//! Embedded stand-in for a cloud warehouse, useful for local runs and tests.
//! Table stages are plain directories: `{stage_dir}/{table}/`. The stage
//! step copies the dataset file there, the copy step reads every staged
//! file with `COPY ... FROM` and then purges the stage.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{ConnectionParams, Row, Warehouse, WarehouseError, WarehouseResult};

/// Parameter naming the database file (or `:memory:`)
pub const PARAM_DATABASE: &str = "database";

/// Optional parameter naming the schema tables live in
pub const PARAM_SCHEMA: &str = "schema";

/// Optional parameter overriding the stage root directory
pub const PARAM_STAGE_DIR: &str = "stage_dir";

/// Database name selecting an in-memory database
pub const IN_MEMORY: &str = ":memory:";

/// Stage directory name used next to a database file
pub const DEFAULT_STAGE_DIRNAME: &str = ".stages";

/// DuckDB warehouse backend
pub struct DuckDbWarehouse {
    params: ConnectionParams,
    schema: Option<String>,
    stage_root: PathBuf,
    /// `None` once closed
    connection: Option<duckdb::Connection>,
}

impl DuckDbWarehouse {
    /// Open a backend from connection parameters
    ///
    /// Requires `database`; `schema` and `stage_dir` are optional.
    pub fn connect(params: ConnectionParams) -> WarehouseResult<Self> {
        let database = params.require(PARAM_DATABASE)?;

        let connection = if database == IN_MEMORY {
            duckdb::Connection::open_in_memory()
        } else {
            duckdb::Connection::open(database)
        }
        .map_err(|e| WarehouseError::ConnectionFailed(format!("Failed to open DuckDB: {}", e)))?;

        let stage_root = match params.get(PARAM_STAGE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => default_stage_root(database),
        };
        let schema = params.get(PARAM_SCHEMA).map(str::to_string);

        info!("DuckDB connection established ({})", database);

        Ok(Self {
            params,
            schema,
            stage_root,
            connection: Some(connection),
        })
    }

    /// Open an in-memory backend staging under `stage_root`
    pub fn in_memory(stage_root: impl AsRef<Path>) -> WarehouseResult<Self> {
        let mut params = ConnectionParams::new();
        params.insert(PARAM_DATABASE, IN_MEMORY);
        params.insert(PARAM_STAGE_DIR, stage_root.as_ref().to_string_lossy());
        Self::connect(params)
    }

    /// Connection parameters this backend was opened with
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Private stage directory of a table
    pub fn table_stage(&self, table_name: &str) -> PathBuf {
        self.stage_root.join(table_name)
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    fn connection(&self) -> WarehouseResult<&duckdb::Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| WarehouseError::ConnectionFailed("connection is closed".to_string()))
    }

    fn qualified(&self, table_name: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, table_name),
            None => table_name.to_string(),
        }
    }

    fn query_rows(&self, sql: &str, limit: Option<usize>) -> WarehouseResult<Vec<Row>> {
        let conn = self.connection()?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| WarehouseError::QueryFailed(format!("Prepare failed: {}", e)))?;

        let mut result_rows = stmt
            .query([])
            .map_err(|e| WarehouseError::QueryFailed(format!("Query failed: {}", e)))?;

        // Column names are only known once the statement has run
        let column_count = result_rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
        let columns: Vec<String> = (0..column_count)
            .map(|i| {
                result_rows
                    .as_ref()
                    .and_then(|r| r.column_name(i).ok())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("col{}", i))
            })
            .collect();

        let mut rows = Vec::new();
        while let Some(row) = result_rows
            .next()
            .map_err(|e| WarehouseError::QueryFailed(format!("Row fetch error: {}", e)))?
        {
            rows.push(row_to_json(row, &columns));
            if limit.is_some_and(|n| rows.len() >= n) {
                break;
            }
        }

        Ok(rows)
    }

    /// Copy the dataset file into the table stage, replacing a previous copy
    fn stage_file(&self, source: &Path, table_name: &str) -> WarehouseResult<PathBuf> {
        let stage = self.table_stage(table_name);
        fs::create_dir_all(&stage).map_err(|e| {
            WarehouseError::StageUploadFailed(format!(
                "Failed to create stage {}: {}",
                stage.display(),
                e
            ))
        })?;

        let file_name = source.file_name().ok_or_else(|| {
            WarehouseError::StageUploadFailed(format!("Not a file: {}", source.display()))
        })?;
        let target = stage.join(file_name);

        fs::copy(source, &target).map_err(|e| {
            WarehouseError::StageUploadFailed(format!(
                "Failed to stage {}: {}",
                source.display(),
                e
            ))
        })?;

        Ok(target)
    }

    /// Ingest every staged file of a table, then purge the stage
    fn copy_from_stage(&self, table_name: &str) -> WarehouseResult<()> {
        let stage = self.table_stage(table_name);
        let mut staged: Vec<PathBuf> = fs::read_dir(&stage)
            .map_err(|e| {
                WarehouseError::CopyIntoFailed(format!(
                    "Failed to read stage {}: {}",
                    stage.display(),
                    e
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        staged.sort();

        let conn = self.connection()?;
        let target = self.qualified(table_name);
        for path in &staged {
            let sql = copy_statement(&target, path);
            info!("{}", sql);
            conn.execute_batch(&sql)
                .map_err(|e| WarehouseError::CopyIntoFailed(format!("{}: {}", target, e)))?;
        }

        for path in &staged {
            fs::remove_file(path).map_err(|e| {
                WarehouseError::CopyIntoFailed(format!(
                    "Failed to purge {}: {}",
                    path.display(),
                    e
                ))
            })?;
            debug!("Purged staged file {}", path.display());
        }

        Ok(())
    }
}

impl Warehouse for DuckDbWarehouse {
    fn execute(&mut self, sql: &str) -> WarehouseResult<()> {
        self.connection()?
            .execute_batch(sql)
            .map_err(|e| WarehouseError::QueryFailed(format!("Execute failed: {}", e)))
    }

    fn fetch_one(&mut self, sql: &str) -> WarehouseResult<Option<Row>> {
        Ok(self.query_rows(sql, Some(1))?.into_iter().next())
    }

    fn fetch_all(&mut self, sql: &str) -> WarehouseResult<Vec<Row>> {
        self.query_rows(sql, None)
    }

    fn truncate(&mut self, table_name: &str) -> WarehouseResult<()> {
        let sql = format!("DELETE FROM {}", self.qualified(table_name));
        info!("{}", sql);
        self.connection()?
            .execute(&sql, [])
            .map_err(|e| WarehouseError::QueryFailed(format!("{}: {}", sql, e)))?;
        Ok(())
    }

    fn load_from_file(
        &mut self,
        table_name: &str,
        file_path: &str,
        file_format: &str,
    ) -> WarehouseResult<()> {
        let source = Path::new(file_path).join(format!("{}.{}", table_name, file_format));
        let staged = self.stage_file(&source, table_name)?;
        info!(
            "Staged {} into {}",
            source.display(),
            staged.parent().unwrap_or(&staged).display()
        );

        self.copy_from_stage(table_name)
    }

    fn close(&mut self) -> WarehouseResult<()> {
        if let Some(connection) = self.connection.take() {
            connection.close().map_err(|(_, e)| {
                WarehouseError::ConnectionFailed(format!("Failed to close DuckDB: {}", e))
            })?;
            info!("DuckDB connection closed");
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }
}

fn default_stage_root(database: &str) -> PathBuf {
    if database == IN_MEMORY {
        return std::env::temp_dir().join("bronze-loader-stages");
    }
    Path::new(database)
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(DEFAULT_STAGE_DIRNAME)
}

/// `COPY` of one staged file: delimited text, `"` quoting, header skipped
fn copy_statement(target: &str, path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/").replace('\'', "''");
    format!(
        "COPY {} FROM '{}' (FORMAT csv, HEADER true, QUOTE '\"')",
        target, path
    )
}

fn row_to_json(row: &duckdb::Row, columns: &[String]) -> Row {
    let mut map = serde_json::Map::new();
    for (i, col_name) in columns.iter().enumerate() {
        let value = match row.get_ref(i) {
            Ok(value_ref) => value_ref_to_json(value_ref),
            Err(_) => serde_json::Value::Null,
        };
        map.insert(col_name.clone(), value);
    }
    serde_json::Value::Object(map)
}

fn value_ref_to_json(value: duckdb::types::ValueRef) -> serde_json::Value {
    use duckdb::types::ValueRef;

    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Boolean(b) => serde_json::Value::Bool(b),
        ValueRef::TinyInt(i) => i.into(),
        ValueRef::SmallInt(i) => i.into(),
        ValueRef::Int(i) => i.into(),
        ValueRef::BigInt(i) => i.into(),
        // i128 may not fit a JSON number
        ValueRef::HugeInt(i) => serde_json::Value::String(i.to_string()),
        ValueRef::UTinyInt(i) => i.into(),
        ValueRef::USmallInt(i) => i.into(),
        ValueRef::UInt(i) => i.into(),
        ValueRef::UBigInt(i) => i.into(),
        ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Double(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
        ValueRef::Decimal(d) => serde_json::Value::String(d.to_string()),
        other => serde_json::Value::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DuckDbWarehouse) {
        let dir = TempDir::new().unwrap();
        let mut wh = DuckDbWarehouse::in_memory(dir.path().join("stages")).unwrap();
        wh.execute("CREATE TABLE orders (id INTEGER, customer VARCHAR)")
            .unwrap();
        (dir, wh)
    }

    fn count(wh: &mut DuckDbWarehouse, table: &str) -> serde_json::Value {
        wh.fetch_one(&format!("SELECT count(*) AS n FROM {}", table))
            .unwrap()
            .unwrap()["n"]
            .clone()
    }

    #[test]
    fn test_connect_requires_database() {
        let result = DuckDbWarehouse::connect(ConnectionParams::new());
        assert!(matches!(result, Err(WarehouseError::InvalidParameter(_))));
    }

    #[test]
    fn test_default_stage_root_next_to_database() {
        assert_eq!(
            default_stage_root("/var/lib/wh/bronze.duckdb"),
            PathBuf::from("/var/lib/wh/.stages")
        );
    }

    #[test]
    fn test_copy_statement_escapes_quotes() {
        let sql = copy_statement("orders", Path::new("/tmp/it's/orders.csv"));
        assert_eq!(
            sql,
            "COPY orders FROM '/tmp/it''s/orders.csv' (FORMAT csv, HEADER true, QUOTE '\"')"
        );
    }

    #[test]
    fn test_truncate_then_load() {
        let (dir, mut wh) = setup();
        wh.execute("INSERT INTO orders VALUES (99, 'stale')").unwrap();

        let data = dir.path().join("data");
        fs::create_dir(&data).unwrap();
        fs::write(
            data.join("orders.csv"),
            "id,customer\n1,\"Smith, J\"\n2,Jones\n",
        )
        .unwrap();

        wh.truncate("orders").unwrap();
        assert_eq!(count(&mut wh, "orders"), serde_json::json!(0));

        wh.load_from_file("orders", data.to_str().unwrap(), "csv")
            .unwrap();
        assert_eq!(count(&mut wh, "orders"), serde_json::json!(2));

        let rows = wh
            .fetch_all("SELECT id, customer FROM orders ORDER BY id")
            .unwrap();
        assert_eq!(rows[0]["customer"], "Smith, J");
        assert_eq!(rows[1]["id"], 2);

        // Staged files are purged after the copy
        let leftover = fs::read_dir(wh.table_stage("orders")).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_truncate_missing_table_fails() {
        let (_dir, mut wh) = setup();
        let err = wh.truncate("no_such_table").unwrap_err();
        assert!(matches!(err, WarehouseError::QueryFailed(_)));
    }

    #[test]
    fn test_missing_source_file_is_stage_error() {
        let (dir, mut wh) = setup();
        let err = wh
            .load_from_file("orders", dir.path().to_str().unwrap(), "csv")
            .unwrap_err();
        assert!(matches!(err, WarehouseError::StageUploadFailed(_)));
    }

    #[test]
    fn test_bad_rows_are_copy_error() {
        let (dir, mut wh) = setup();
        fs::write(dir.path().join("orders.csv"), "id,customer\nnot-a-number,x\n").unwrap();

        let err = wh
            .load_from_file("orders", dir.path().to_str().unwrap(), "csv")
            .unwrap_err();
        assert!(matches!(err, WarehouseError::CopyIntoFailed(_)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_dir, mut wh) = setup();
        wh.close().unwrap();
        wh.close().unwrap();
        assert!(wh.is_closed());
        assert!(matches!(
            wh.execute("SELECT 1"),
            Err(WarehouseError::ConnectionFailed(_))
        ));
    }
}
