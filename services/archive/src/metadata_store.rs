use crate::config::DatabaseConfig;
use crate::filter_compiler::{select_sql, CompiledFilter};
use crate::recording::{
    Column, NewStorageRow, RowValue, StorageRow, ALL_COLUMNS, INSERT_COLUMNS, RECORDINGS_TABLE,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::Postgres;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Bounds for a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

/// Storage of recording metadata rows.
///
/// Only reads and single-row inserts are exposed; rows are never updated
/// or deleted through this interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordingStore: Send + Sync {
    /// Rows matching the filter, most recent first, undated rows last
    async fn search(&self, filter: &CompiledFilter, page: Option<Page>) -> Result<Vec<StorageRow>>;

    /// Row by identity
    async fn get(&self, id: i64) -> Result<Option<StorageRow>>;

    /// Insert one row; the store assigns its identity
    async fn insert(&self, row: &NewStorageRow) -> Result<()>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}

/// Recording metadata store in PostgreSQL
pub struct PgRecordingStore {
    pool: PgPool,
}

impl PgRecordingStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordingStore for PgRecordingStore {
    #[instrument(skip(self, filter), fields(conditions = filter.conditions().len()))]
    async fn search(&self, filter: &CompiledFilter, page: Option<Page>) -> Result<Vec<StorageRow>> {
        let sql = select_sql(filter, page);
        debug!(sql = %sql, "Searching recordings");

        let mut query = sqlx::query_as::<_, StorageRow>(&sql);
        for param in filter.params() {
            query = query.bind(param);
        }
        if let Some(page) = page {
            query = query.bind(page.limit).bind(page.offset);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to query recordings")?;

        Ok(rows)
    }

    async fn get(&self, id: i64) -> Result<Option<StorageRow>> {
        let columns = column_list(&ALL_COLUMNS);
        let sql = format!(
            "SELECT {columns} FROM {RECORDINGS_TABLE} WHERE {} = $1",
            Column::Id
        );

        let row = sqlx::query_as::<_, StorageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query recording")?;

        Ok(row)
    }

    #[instrument(skip(self, row), fields(file_path = %row.file_path))]
    async fn insert(&self, row: &NewStorageRow) -> Result<()> {
        let sql = insert_sql();

        let mut query = sqlx::query(&sql);
        for column in INSERT_COLUMNS {
            query = bind_value(query, row.value(column));
        }

        query
            .execute(&self.pool)
            .await
            .context("Failed to insert recording")?;

        debug!("Recording inserted");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

fn column_list(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// INSERT covering every insertable column, one placeholder each
fn insert_sql() -> String {
    let placeholders = (1..=INSERT_COLUMNS.len())
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {RECORDINGS_TABLE} ({}) VALUES ({placeholders})",
        column_list(&INSERT_COLUMNS)
    )
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: RowValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        RowValue::Text(v) => query.bind(v),
        RowValue::Integer(v) => query.bind(v),
        RowValue::Timestamp(v) => query.bind(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql_binds_every_column() {
        let sql = insert_sql();

        assert!(sql.starts_with(
            "INSERT INTO archiveindex (recordingid, mediatype, recordingtype, filepath, recordingdate,"
        ));
        assert!(sql.contains("$17)"));
        assert!(!sql.contains("$18"));
        assert!(!sql.contains("(id,"));
    }

    #[test]
    fn test_column_list() {
        assert_eq!(
            column_list(&[Column::Id, Column::Dnis, Column::Ani]),
            "id, dnis, ani"
        );
    }
}
