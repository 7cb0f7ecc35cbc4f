//! PostgreSQL Backend Implementation
//!
//! Implements the backend traits over sqlx. CockroachDB and YugabyteDB speak the
//! same wire protocol and are served by this backend as well.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Pool, Postgres, Row, TypeInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::core::*;
use super::DatabaseBackendType;
use crate::error::{MigrationError, MigrationResult};

/// PostgreSQL database backend
#[derive(Debug, Default)]
pub struct PostgresBackend {
    backend_type: Option<DatabaseBackendType>,
}

impl PostgresBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare which PostgreSQL-compatible server is on the other end
    pub fn with_backend_type(mut self, backend_type: DatabaseBackendType) -> Self {
        self.backend_type = Some(backend_type);
        self
    }

    /// Create a connection pool from a database URL
    pub async fn create_pool(
        &self,
        database_url: &str,
        config: DatabasePoolConfig,
    ) -> MigrationResult<Arc<PostgresPool>> {
        parse_database_url(database_url)?;

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options.connect(database_url).await.map_err(|e| {
            MigrationError::Connection(format!("Failed to create PostgreSQL pool: {}", e))
        })?;

        tracing::debug!(
            "PostgreSQL pool created for {} (max_connections={})",
            mask_database_url(database_url),
            config.max_connections
        );

        Ok(Arc::new(PostgresPool::new(
            pool,
            self.backend_type.unwrap_or(DatabaseBackendType::PostgreSQL),
        )))
    }
}

/// PostgreSQL connection pool implementation
pub struct PostgresPool {
    pool: Pool<Postgres>,
    backend_type: DatabaseBackendType,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>, backend_type: DatabaseBackendType) -> Self {
        Self { pool, backend_type }
    }

    /// The underlying sqlx pool
    pub fn inner(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn acquire(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        let conn = self.pool.acquire().await.map_err(|e| {
            MigrationError::Connection(format!("Failed to acquire connection: {}", e))
        })?;

        Ok(Box::new(PostgresConnection::new(conn)))
    }

    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin().await.map_err(|e| {
            MigrationError::Transaction(format!("Failed to begin transaction: {}", e))
        })?;

        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        if params.is_empty() {
            let result = (&self.pool).execute(sql).await.map_err(query_error)?;
            return Ok(result.rows_affected());
        }

        let result = bind_all(sql, params)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>> {
        let row = bind_all(sql, params)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }

    async fn close(&self) -> MigrationResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn backend_type(&self) -> DatabaseBackendType {
        self.backend_type
    }
}

/// PostgreSQL connection implementation
pub struct PostgresConnection {
    conn: sqlx::pool::PoolConnection<Postgres>,
    id: u64,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl PostgresConnection {
    pub fn new(conn: sqlx::pool::PoolConnection<Postgres>) -> Self {
        Self {
            conn,
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DatabaseExecutor for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        if params.is_empty() {
            let result = (&mut *self.conn).execute(sql).await.map_err(query_error)?;
            return Ok(result.rows_affected());
        }

        let result = bind_all(sql, params)
            .execute(&mut *self.conn)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>> {
        let row = bind_all(sql, params)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(query_error)?;

        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }
}

impl DatabaseConnection for PostgresConnection {
    fn connection_id(&self) -> u64 {
        self.id
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> MigrationResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseExecutor for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let tx = self.active()?;

        if params.is_empty() {
            let result = (&mut **tx).execute(sql).await.map_err(query_error)?;
            return Ok(result.rows_affected());
        }

        let result = bind_all(sql, params)
            .execute(&mut **tx)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>> {
        let tx = self.active()?;

        let row = bind_all(sql, params)
            .fetch_optional(&mut **tx)
            .await
            .map_err(query_error)?;

        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))?;

        tx.commit().await.map_err(|e| {
            MigrationError::Transaction(format!("Transaction commit failed: {}", e))
        })
    }

    async fn rollback(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback().await.map_err(|e| {
            MigrationError::Transaction(format!("Transaction rollback failed: {}", e))
        })
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> MigrationResult<DatabaseValue> {
        let column = self
            .row
            .columns()
            .get(index)
            .ok_or_else(|| MigrationError::Query(format!("Column {} not found", index)))?;

        let value = match column.type_info().name() {
            "BOOL" => self.row.try_get::<Option<bool>, _>(index)?.map(DatabaseValue::Bool),
            "INT2" => self
                .row
                .try_get::<Option<i16>, _>(index)?
                .map(|v| DatabaseValue::Int32(v as i32)),
            "INT4" => self.row.try_get::<Option<i32>, _>(index)?.map(DatabaseValue::Int32),
            "INT8" => self.row.try_get::<Option<i64>, _>(index)?.map(DatabaseValue::Int64),
            _ => self.row.try_get::<Option<String>, _>(index)?.map(DatabaseValue::String),
        };

        Ok(value.unwrap_or(DatabaseValue::Null))
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }
}

fn query_error(err: sqlx::Error) -> MigrationError {
    MigrationError::Query(err.to_string())
}

/// Build a prepared query with every parameter bound
fn bind_all<'q>(sql: &'q str, params: &[DatabaseValue]) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_database_value(query, param))
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
    }
}
