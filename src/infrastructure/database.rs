// Physical connection layer - the narrow interface the routing proxy forwards to
// Pool internals stay with sqlx; this layer only opens, probes, runs and closes

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, ValueRef};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Adapter, ConnectionParams};
use crate::error::{AppError, AppResult};
use crate::infrastructure::sqlite_database::SqliteConnection;

/// A single statement forwarded through a connection proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Write or DDL statement, reports rows affected
    Execute(String),
    /// Read statement, returns rows
    Query(String),
}

impl Operation {
    pub fn execute(sql: impl Into<String>) -> Self {
        Operation::Execute(sql.into())
    }

    pub fn query(sql: impl Into<String>) -> Self {
        Operation::Query(sql.into())
    }

    pub fn sql(&self) -> &str {
        match self {
            Operation::Execute(sql) | Operation::Query(sql) => sql,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Operation::Query(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    RowsAffected(u64),
    Rows(Vec<HashMap<String, String>>),
}

impl OperationOutput {
    pub fn rows(&self) -> &[HashMap<String, String>] {
        match self {
            OperationOutput::Rows(rows) => rows,
            OperationOutput::RowsAffected(_) => &[],
        }
    }

    pub fn rows_affected(&self) -> u64 {
        match self {
            OperationOutput::RowsAffected(n) => *n,
            OperationOutput::Rows(_) => 0,
        }
    }
}

/// Handle to one physical database connection (pool) owned by the driver
#[async_trait]
pub trait PhysicalConnection: Send + Sync {
    /// Connection name this handle was opened for
    fn name(&self) -> &str;

    /// Cheap, non-blocking check that the handle has not been closed
    fn is_open(&self) -> bool;

    /// Lightweight liveness probe; false on error or timeout
    async fn verify(&self, timeout: Duration) -> bool;

    async fn execute(&self, operation: &Operation) -> AppResult<OperationOutput>;

    /// Run every operation inside one transaction on this connection
    async fn execute_in_transaction(
        &self,
        operations: &[Operation],
    ) -> AppResult<Vec<OperationOutput>>;

    async fn close(&self);
}

/// Opens physical connections and classifies their failures
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        name: &str,
        params: &ConnectionParams,
    ) -> AppResult<Arc<dyn PhysicalConnection>>;

    /// Whether an error means the connection itself was lost and a
    /// reopen-and-retry may succeed
    fn is_transient(&self, error: &AppError) -> bool {
        matches!(error, AppError::TransientConnectionFailure { .. })
    }
}

/// Map an sqlx error, keeping connection-level failures distinguishable
pub(crate) fn map_sqlx_error(connection: &str, context: &str, err: sqlx::Error) -> AppError {
    let lost = matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed
    );
    if lost {
        AppError::TransientConnectionFailure {
            connection: connection.to_string(),
            message: format!("{}: {}", context, err),
        }
    } else {
        AppError::DatabaseError(format!("{} on {}: {}", context, connection, err))
    }
}

/// PostgreSQL connection backed by an sqlx pool
pub struct PostgresConnection {
    name: String,
    pool: PgPool,
}

impl PostgresConnection {
    pub async fn connect(name: &str, params: &ConnectionParams) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(params.max_connections)
            .min_connections(params.min_connections)
            .acquire_timeout(Duration::from_secs(params.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&params.url)
            .await
            .map_err(|e| map_sqlx_error(name, "Failed to connect to database", e))?;

        Ok(Self {
            name: name.to_string(),
            pool,
        })
    }
}

fn pg_row_to_map(row: &PgRow) -> AppResult<HashMap<String, String>> {
    let mut row_map = HashMap::new();
    for column in row.columns() {
        let col_name = column.name().to_string();
        let ordinal = column.ordinal();
        let value_ref = row.try_get_raw(ordinal).map_err(|e| {
            AppError::DatabaseError(format!(
                "Failed to get raw value for column {}: {}",
                col_name, e
            ))
        })?;

        let value_str = if value_ref.is_null() {
            "NULL".to_string()
        } else if let Ok(v) = row.try_get::<String, _>(ordinal) {
            v
        } else if let Ok(v) = row.try_get::<i64, _>(ordinal) {
            v.to_string()
        } else if let Ok(v) = row.try_get::<i32, _>(ordinal) {
            v.to_string()
        } else if let Ok(v) = row.try_get::<i16, _>(ordinal) {
            v.to_string()
        } else if let Ok(v) = row.try_get::<f64, _>(ordinal) {
            v.to_string()
        } else if let Ok(v) = row.try_get::<bool, _>(ordinal) {
            v.to_string()
        } else {
            "<value>".to_string()
        };
        row_map.insert(col_name, value_str);
    }
    Ok(row_map)
}

#[async_trait]
impl PhysicalConnection for PostgresConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn verify(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, sqlx::query("SELECT 1").execute(&self.pool)).await,
            Ok(Ok(_))
        )
    }

    async fn execute(&self, operation: &Operation) -> AppResult<OperationOutput> {
        match operation {
            Operation::Execute(sql) => {
                let result = sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(&self.name, "Failed to execute statement", e))?;
                Ok(OperationOutput::RowsAffected(result.rows_affected()))
            }
            Operation::Query(sql) => {
                let rows = sqlx::query(sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(&self.name, "Failed to execute query", e))?;
                let rows = rows.iter().map(pg_row_to_map).collect::<AppResult<Vec<_>>>()?;
                Ok(OperationOutput::Rows(rows))
            }
        }
    }

    async fn execute_in_transaction(
        &self,
        operations: &[Operation],
    ) -> AppResult<Vec<OperationOutput>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(&self.name, "Failed to begin transaction", e))?;

        let mut outputs = Vec::with_capacity(operations.len());
        for operation in operations {
            // Returning early drops `tx`, which rolls the transaction back
            let output = match operation {
                Operation::Execute(sql) => sqlx::query(sql)
                    .execute(&mut *tx)
                    .await
                    .map(|r| OperationOutput::RowsAffected(r.rows_affected()))
                    .map_err(|e| {
                        map_sqlx_error(&self.name, "Failed to execute statement in transaction", e)
                    })?,
                Operation::Query(sql) => {
                    let rows = sqlx::query(sql).fetch_all(&mut *tx).await.map_err(|e| {
                        map_sqlx_error(&self.name, "Failed to execute query in transaction", e)
                    })?;
                    OperationOutput::Rows(
                        rows.iter().map(pg_row_to_map).collect::<AppResult<Vec<_>>>()?,
                    )
                }
            };
            outputs.push(output);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(&self.name, "Failed to commit transaction", e))?;
        Ok(outputs)
    }

    async fn close(&self) {
        debug!("Closing postgres connection {}", self.name);
        self.pool.close().await;
    }
}

/// Connector that opens sqlx pools for the configured adapter
#[derive(Debug, Default, Clone)]
pub struct SqlxConnector;

impl SqlxConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    async fn open(
        &self,
        name: &str,
        params: &ConnectionParams,
    ) -> AppResult<Arc<dyn PhysicalConnection>> {
        info!(
            "Opening {:?} connection {} (max {} connections)",
            params.adapter, name, params.max_connections
        );
        let connection: Arc<dyn PhysicalConnection> = match params.adapter {
            Adapter::Postgres => Arc::new(PostgresConnection::connect(name, params).await?),
            Adapter::Sqlite => Arc::new(SqliteConnection::connect(name, params).await?),
        };
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kinds() {
        let read = Operation::query("SELECT 1");
        let write = Operation::execute("DELETE FROM t");
        assert!(read.is_read());
        assert!(!write.is_read());
        assert_eq!(write.sql(), "DELETE FROM t");
    }

    #[test]
    fn test_sqlx_error_classification() {
        let lost = map_sqlx_error("prod_alpha", "Failed to execute query", sqlx::Error::PoolClosed);
        assert!(matches!(
            lost,
            AppError::TransientConnectionFailure { ref connection, .. } if connection == "prod_alpha"
        ));
        assert!(SqlxConnector::new().is_transient(&lost));

        let fatal = map_sqlx_error("prod_alpha", "Failed to execute query", sqlx::Error::RowNotFound);
        assert!(matches!(fatal, AppError::DatabaseError(_)));
        assert!(!SqlxConnector::new().is_transient(&fatal));
    }
}
