use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, ValueRef};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::config::ConnectionParams;
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::{
    map_sqlx_error, Operation, OperationOutput, PhysicalConnection,
};

/// SQLite implementation of a physical connection, used for file-backed
/// shards in development and tests
pub struct SqliteConnection {
    name: String,
    pool: SqlitePool,
}

impl SqliteConnection {
    pub async fn connect(name: &str, params: &ConnectionParams) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&params.url)
            .map_err(|e| {
                AppError::ConfigurationError(format!(
                    "Invalid sqlite url for {}: {}",
                    name, e
                ))
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(params.max_connections)
            .min_connections(params.min_connections)
            .acquire_timeout(Duration::from_secs(params.acquire_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error(name, "Failed to connect to SQLite", e))?;

        Ok(Self {
            name: name.to_string(),
            pool,
        })
    }
}

fn sqlite_row_to_map(row: &SqliteRow) -> AppResult<HashMap<String, String>> {
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
        } else if let Ok(v) = row.try_get::<i64, _>(ordinal) {
            v.to_string()
        } else if let Ok(v) = row.try_get::<f64, _>(ordinal) {
            v.to_string()
        } else if let Ok(v) = row.try_get::<String, _>(ordinal) {
            v
        } else {
            "<value>".to_string()
        };
        row_map.insert(col_name, value_str);
    }
    Ok(row_map)
}

#[async_trait]
impl PhysicalConnection for SqliteConnection {
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
                let rows = rows
                    .iter()
                    .map(sqlite_row_to_map)
                    .collect::<AppResult<Vec<_>>>()?;
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
                        rows.iter()
                            .map(sqlite_row_to_map)
                            .collect::<AppResult<Vec<_>>>()?,
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
        debug!("Closing sqlite connection {}", self.name);
        self.pool.close().await;
    }
}
