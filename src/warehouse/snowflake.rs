//! Snowflake warehouse backend
//!
//! Loads go through the table's internal stage (`@%table`): the local file is
//! uploaded with `PUT`, then ingested with `COPY INTO ... PURGE = TRUE`.
//! The network driver itself is not part of this crate; it is plugged in as
//! a [`SqlSession`].

use std::path::Path;

use tracing::info;

use super::{ConnectionParams, Row, Warehouse, WarehouseError, WarehouseResult};

/// Statement channel of an open Snowflake connection
///
/// Implemented by the driver binding. Every statement is executed
/// synchronously and its result rows are returned as JSON objects.
pub trait SqlSession {
    /// Execute one statement and return its result rows
    fn execute(&mut self, sql: &str) -> WarehouseResult<Vec<Row>>;

    /// Close the cursor and the underlying connection
    fn close(&mut self) -> WarehouseResult<()>;
}

/// Fully qualified `database.schema.table` name
pub fn qualified_table_name(database: &str, schema: &str, table_name: &str) -> String {
    format!("{}.{}.{}", database, schema, table_name)
}

/// `TRUNCATE TABLE` for a qualified table
pub fn truncate_statement(database: &str, schema: &str, table_name: &str) -> String {
    format!(
        "TRUNCATE TABLE {}",
        qualified_table_name(database, schema, table_name)
    )
}

/// `PUT` of `{stage_path}/{table}.{format}` into the table stage
///
/// `stage_path` must already be absolute with `/` separators, see
/// [`normalize_stage_path`].
pub fn put_statement(stage_path: &str, table_name: &str, file_format: &str) -> String {
    format!(
        "PUT file://{}/{}.{} @%{} AUTO_COMPRESS = TRUE OVERWRITE = TRUE",
        stage_path, table_name, file_format, table_name
    )
}

/// `COPY INTO` from the table stage, purging staged files afterwards
pub fn copy_into_statement(
    database: &str,
    schema: &str,
    table_name: &str,
    file_format: &str,
) -> String {
    format!(
        "COPY INTO {} FROM @%{} FILE_FORMAT = (TYPE = '{}' FIELD_OPTIONALLY_ENCLOSED_BY = '\"' SKIP_HEADER = 1) PURGE = TRUE",
        qualified_table_name(database, schema, table_name),
        table_name,
        file_format
    )
}

/// Make a local directory path absolute and use `/` separators, as `PUT`
/// expects
pub fn normalize_stage_path(file_path: &str) -> WarehouseResult<String> {
    let absolute = std::path::absolute(Path::new(file_path)).map_err(|e| {
        WarehouseError::StageUploadFailed(format!(
            "Failed to resolve path '{}': {}",
            file_path, e
        ))
    })?;
    Ok(absolute.to_string_lossy().replace('\\', "/"))
}

/// Snowflake backend over a driver session
///
/// Requires the `database` and `schema` connection parameters; every table
/// name is qualified with them.
pub struct SnowflakeWarehouse<S: SqlSession> {
    params: ConnectionParams,
    database: String,
    schema: String,
    /// `None` once closed
    session: Option<S>,
}

impl<S: SqlSession> SnowflakeWarehouse<S> {
    /// Open a connection using `connector` and wrap it
    pub fn connect<F>(params: ConnectionParams, connector: F) -> WarehouseResult<Self>
    where
        F: FnOnce(&ConnectionParams) -> WarehouseResult<S>,
    {
        let database = params.require("database")?.to_string();
        let schema = params.require("schema")?.to_string();

        let session = connector(&params)?;
        info!("Snowflake connection established");

        Ok(Self {
            params,
            database,
            schema,
            session: Some(session),
        })
    }

    /// Connection parameters this backend was opened with
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    /// Alias of [`Warehouse::fetch_all`]
    pub fn get_data(&mut self, sql: &str) -> WarehouseResult<Vec<Row>> {
        self.fetch_all(sql)
    }

    fn session(&mut self) -> WarehouseResult<&mut S> {
        self.session
            .as_mut()
            .ok_or_else(|| WarehouseError::ConnectionFailed("connection is closed".to_string()))
    }
}

impl<S: SqlSession> Warehouse for SnowflakeWarehouse<S> {
    fn execute(&mut self, sql: &str) -> WarehouseResult<()> {
        self.session()?.execute(sql)?;
        Ok(())
    }

    fn fetch_one(&mut self, sql: &str) -> WarehouseResult<Option<Row>> {
        Ok(self.session()?.execute(sql)?.into_iter().next())
    }

    fn fetch_all(&mut self, sql: &str) -> WarehouseResult<Vec<Row>> {
        self.session()?.execute(sql)
    }

    fn truncate(&mut self, table_name: &str) -> WarehouseResult<()> {
        let sql = truncate_statement(&self.database, &self.schema, table_name);
        info!("{}", sql);
        self.session()?
            .execute(&sql)
            .map_err(|e| WarehouseError::QueryFailed(e.into_detail()))?;
        Ok(())
    }

    fn load_from_file(
        &mut self,
        table_name: &str,
        file_path: &str,
        file_format: &str,
    ) -> WarehouseResult<()> {
        let stage_path = normalize_stage_path(file_path)?;
        let put_sql = put_statement(&stage_path, table_name, file_format);
        info!("{}", put_sql);

        let copy_sql = copy_into_statement(&self.database, &self.schema, table_name, file_format);
        info!("{}", copy_sql);

        let session = self.session()?;
        session
            .execute(&put_sql)
            .map_err(|e| WarehouseError::StageUploadFailed(e.into_detail()))?;
        session
            .execute(&copy_sql)
            .map_err(|e| WarehouseError::CopyIntoFailed(e.into_detail()))?;

        Ok(())
    }

    fn close(&mut self) -> WarehouseResult<()> {
        if let Some(mut session) = self.session.take() {
            session.close()?;
            info!("Snowflake connection closed");
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "snowflake"
    }
}
