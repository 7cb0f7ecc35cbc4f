//! Migration System
//!
//! Registry, ledger, lock coordination and the command runner.

pub mod command;
pub mod context;
pub mod definitions;
pub mod discovery;
pub mod ledger;
pub mod lock;
pub mod registry;
pub mod runner;
pub mod sql;
pub mod template;

pub use command::Command;
pub use context::MigrationContext;
pub use definitions::{Direction, Migration, MigrationAction, MigrationRunResult};
pub use discovery::{
    extract_version, scan_source, DirectorySource, EmbeddedSource, MigrationFileName, MigrationSource,
};
pub use ledger::{VersionLedger, DEFAULT_TABLE_NAME};
pub use lock::{is_lock_unsupported, COCKROACHDB_LOCK_ERROR, YUGABYTEDB_LOCK_ERROR};
pub use registry::MigrationRegistry;
pub use runner::Migrator;
pub use sql::{parse_sql, SqlAction, DIRECTIVE_PREFIX, SPLIT_DIRECTIVE};
pub use template::{migration_file_name, migration_file_stem, planned_templates};
