//! # shift-migrations: Versioned Schema Migrations
//!
//! Applies numbered schema changes to a PostgreSQL-compatible database and
//! records each applied version in an append-only ledger table. Commands that
//! touch the ledger run under an exclusive table lock so concurrent
//! invocations apply every step exactly once.
//!
//! ```no_run
//! use shift_migrations::{Migration, Migrator, MigratorConfig, PostgresBackend, DatabasePoolConfig};
//!
//! # async fn example() -> shift_migrations::MigrationResult<()> {
//! let pool = PostgresBackend::new()
//!     .create_pool("postgres://localhost/app", DatabasePoolConfig::default())
//!     .await?;
//!
//! let migrator = Migrator::new(MigratorConfig::default().with_sql_autodiscover(false))?;
//! migrator.register(Migration::sql(
//!     1,
//!     "CREATE TABLE users (id serial PRIMARY KEY)",
//!     "DROP TABLE users",
//! )?)?;
//!
//! migrator.init(&*pool).await?;
//! let result = migrator.run(&*pool, &["up"]).await?;
//! println!("migrated from version {} to {}", result.old_version, result.new_version);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;

pub use backends::{
    DatabaseBackendType, DatabaseConnection, DatabaseExecutor, DatabasePool, DatabasePoolConfig,
    DatabaseRow, DatabaseTransaction, DatabaseValue, MemoryOptions, MemoryPool, PostgresBackend,
};
pub use config::MigratorConfig;
pub use error::{MigrationError, MigrationResult};
pub use migrations::{
    Command, DirectorySource, Direction, EmbeddedSource, Migration, MigrationAction, MigrationContext,
    MigrationRegistry, MigrationRunResult, MigrationSource, Migrator, SqlAction, VersionLedger,
};
