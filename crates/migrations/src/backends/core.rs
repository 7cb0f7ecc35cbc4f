//! Core Database Backend Traits
//!
//! This module defines the capability traits the migration engine is written
//! against. Backends implement them for a concrete driver; the engine never
//! sees the driver types.

use async_trait::async_trait;
use std::collections::HashMap;

use super::DatabaseBackendType;
use crate::error::{MigrationError, MigrationResult};

/// Something statements can be executed against
#[async_trait]
pub trait DatabaseExecutor: Send {
    /// Execute a statement and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Execute a query and return the first result row
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>>;
}

/// A connection checked out of the pool until dropped
pub trait DatabaseConnection: DatabaseExecutor {
    /// Identifier of the underlying session, stable for the connection's lifetime
    fn connection_id(&self) -> u64;
}

/// Abstract database transaction trait
#[async_trait]
pub trait DatabaseTransaction: DatabaseExecutor {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrationResult<()>;
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Acquire a dedicated connection from the pool
    async fn acquire(&self) -> MigrationResult<Box<dyn DatabaseConnection>>;

    /// Begin a transaction on a fresh connection
    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>>;

    /// Execute a statement on whichever connection the pool hands out
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Execute a query on the pool and return the first result row
    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>>;

    /// Close the pool
    async fn close(&self) -> MigrationResult<()>;

    /// The kind of server behind this pool
    fn backend_type(&self) -> DatabaseBackendType;
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> MigrationResult<DatabaseValue>;

    /// Get column count
    fn column_count(&self) -> usize;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Widen an integer value to `i64`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Read the first column of a row as a 64-bit integer
pub fn first_column_i64(row: &dyn DatabaseRow) -> MigrationResult<i64> {
    let value = row.get_by_index(0)?;
    value
        .as_i64()
        .ok_or_else(|| MigrationError::Query(format!("Expected integer column, got {:?}", value)))
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

/// Database connection configuration parsed from URL
#[derive(Debug, Clone)]
pub struct DatabaseConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: Option<String>,
    pub additional_params: HashMap<String, String>,
}

/// Parse connection parameters from a PostgreSQL-style database URL
pub fn parse_database_url(url: &str) -> MigrationResult<DatabaseConnectionConfig> {
    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
        return Err(MigrationError::Connection(
            "Invalid PostgreSQL URL scheme".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| MigrationError::Connection(format!("Invalid database URL: {}", e)))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| MigrationError::Connection("Missing host in database URL".to_string()))?
        .to_string();

    let port = parsed.port().unwrap_or(5432);

    let database = parsed.path().trim_start_matches('/').to_string();
    if database.is_empty() {
        return Err(MigrationError::Connection(
            "Missing database name in URL".to_string(),
        ));
    }

    let username = if parsed.username().is_empty() {
        None
    } else {
        Some(parsed.username().to_string())
    };

    let password = parsed.password().map(|p| p.to_string());

    let additional_params: HashMap<String, String> = parsed
        .query_pairs()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

    let ssl_mode = additional_params.get("sslmode").cloned();

    Ok(DatabaseConnectionConfig {
        host,
        port,
        database,
        username,
        password,
        ssl_mode,
        additional_params,
    })
}

/// Render a database URL with its password masked, for logs
pub fn mask_database_url(url: &str) -> String {
    url::Url::parse(url)
        .map(|mut parsed| {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        })
        .unwrap_or_else(|_| "postgresql://***".to_string())
}
