//! Migrator configuration
//!
//! Values come from code, from the environment (`MIGRATIONS_TABLE`,
//! `MIGRATIONS_DIR`, `MIGRATIONS_AUTODISCOVER`) or from the command line.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{MigrationError, MigrationResult};
use crate::migrations::{VersionLedger, DEFAULT_TABLE_NAME};

/// Default directory scanned for SQL migrations
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Configuration for the migration engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Ledger table, optionally schema-qualified
    pub table_name: String,
    /// Directory scanned for SQL migrations and where `create` writes templates
    pub migrations_dir: PathBuf,
    /// Scan `migrations_dir` before every command
    pub sql_autodiscover: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            sql_autodiscover: true,
        }
    }
}

impl MigratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_sql_autodiscover(mut self, enabled: bool) -> Self {
        self.sql_autodiscover = enabled;
        self
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> MigrationResult<Self> {
        let defaults = Self::default();

        let table_name = env::var("MIGRATIONS_TABLE").unwrap_or(defaults.table_name);
        let migrations_dir = env::var("MIGRATIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.migrations_dir);

        let sql_autodiscover = match env::var("MIGRATIONS_AUTODISCOVER") {
            Ok(value) => parse_bool(&value).ok_or_else(|| {
                MigrationError::Configuration(format!(
                    "MIGRATIONS_AUTODISCOVER must be true or false, got {:?}",
                    value
                ))
            })?,
            Err(_) => defaults.sql_autodiscover,
        };

        let config = Self {
            table_name,
            migrations_dir,
            sql_autodiscover,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> MigrationResult<()> {
        VersionLedger::new(&self.table_name)?;

        if self.migrations_dir.as_os_str().is_empty() {
            return Err(MigrationError::Configuration(
                "Migrations directory must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
