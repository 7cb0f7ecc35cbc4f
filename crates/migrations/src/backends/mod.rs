//! Database Backend Abstractions
//!
//! The migration engine treats the SQL layer as an opaque capability: execute a
//! statement, run a predicate query, begin/commit/rollback a transaction and
//! check out a dedicated connection. PostgreSQL-compatible servers are reached
//! through sqlx; the in-memory backend is used by tests and dry runs.

pub mod core;
pub mod memory;
pub mod postgres;

pub use core::*;
pub use memory::{ExecutedStatement, MemoryOptions, MemoryPool};
pub use postgres::PostgresBackend;

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    CockroachDB,
    YugabyteDB,
    Memory,
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::CockroachDB => write!(f, "cockroachdb"),
            DatabaseBackendType::YugabyteDB => write!(f, "yugabytedb"),
            DatabaseBackendType::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "cockroachdb" | "cockroach" => Ok(DatabaseBackendType::CockroachDB),
            "yugabytedb" | "yugabyte" => Ok(DatabaseBackendType::YugabyteDB),
            "memory" => Ok(DatabaseBackendType::Memory),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}
