//! End-to-end runs against the DuckDB backend

#![cfg(feature = "duckdb-backend")]

use std::fs;

use bronze_loader::config::read_config;
use bronze_loader::loader::{LoaderError, process_files};
use bronze_loader::warehouse::{DuckDbWarehouse, Warehouse, WarehouseError};
use tempfile::TempDir;

fn write_config(dir: &TempDir, data_dir: &str) -> std::path::PathBuf {
    let db_path = dir.path().join("bronze.duckdb");
    let config_path = dir.path().join("env.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[Parameters]
database = '{}'
schema = "main"

[Dataset]
path = '{}'
file_format = "csv"
"#,
            db_path.display(),
            data_dir
        ),
    )
    .unwrap();
    config_path
}

fn row_count(wh: &mut DuckDbWarehouse, table: &str) -> i64 {
    wh.fetch_one(&format!("SELECT count(*) AS n FROM {}", table))
        .unwrap()
        .and_then(|row| row["n"].as_i64())
        .unwrap()
}

#[test]
fn test_reload_dataset_from_config() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::write(
        data.join("customers.csv"),
        "id,name\n1,\"Doe, Jane\"\n2,Bob\n",
    )
    .unwrap();
    fs::write(data.join("orders.csv"), "id,amount\n10,9.5\n11,3.25\n12,1.0\n").unwrap();
    fs::write(data.join(".DS_Store"), "ignored").unwrap();

    let config_path = write_config(&dir, data.to_str().unwrap());
    let (params, dataset_path, file_format) = read_config(&config_path).unwrap();

    let mut wh = DuckDbWarehouse::connect(params).unwrap();
    wh.execute(
        "CREATE TABLE customers (id INTEGER, name VARCHAR);
         CREATE TABLE orders (id INTEGER, amount DOUBLE);
         INSERT INTO customers VALUES (99, 'stale');",
    )
    .unwrap();

    process_files(&mut wh, &dataset_path, &file_format).unwrap();

    assert_eq!(row_count(&mut wh, "customers"), 2);
    assert_eq!(row_count(&mut wh, "orders"), 3);

    let name = wh
        .fetch_one("SELECT name FROM customers WHERE id = 1")
        .unwrap()
        .unwrap();
    assert_eq!(name["name"], "Doe, Jane");

    // Running again replaces rather than appends
    process_files(&mut wh, &dataset_path, &file_format).unwrap();
    assert_eq!(row_count(&mut wh, "orders"), 3);

    wh.close().unwrap();
    assert!(dir.path().join(".stages").join("orders").is_dir());
}

#[test]
fn test_failed_load_leaves_table_empty() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.csv"), "id\nnot-a-number\n").unwrap();
    fs::write(dir.path().join("b.csv"), "id\n1\n").unwrap();

    let mut wh = DuckDbWarehouse::in_memory(dir.path().join("stages")).unwrap();
    wh.execute(
        "CREATE TABLE a (id INTEGER);
         CREATE TABLE b (id INTEGER);
         INSERT INTO a VALUES (1), (2);
         INSERT INTO b VALUES (7);",
    )
    .unwrap();

    let err = process_files(&mut wh, dir.path().to_str().unwrap(), "csv").unwrap_err();
    assert!(matches!(
        err,
        LoaderError::Warehouse(WarehouseError::CopyIntoFailed(_))
    ));

    assert_eq!(row_count(&mut wh, "a"), 0);
    // b comes after a and keeps its old rows
    assert_eq!(row_count(&mut wh, "b"), 1);
}
