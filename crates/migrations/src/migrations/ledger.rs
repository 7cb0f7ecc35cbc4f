//! Version ledger
//!
//! An append-only table of `(id, version, created_at)` rows. The current
//! version is the version of the row with the greatest id, so recorded
//! versions may jump or repeat.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::backends::{first_column_i64, DatabaseExecutor, DatabasePool};
use crate::error::{MigrationError, MigrationResult};

/// Default ledger table name
pub const DEFAULT_TABLE_NAME: &str = "gopg_migrations";

const DEFAULT_SCHEMA: &str = "public";

/// Unquoted names are folded to lower case by the server, so only names that
/// are already folded can be looked up in the catalog as written.
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("identifier pattern is valid"));

/// Location of the ledger table and the statements that operate on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionLedger {
    schema: String,
    table: String,
    qualified: String,
}

impl Default for VersionLedger {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE_NAME.to_string(),
            qualified: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

impl VersionLedger {
    /// Build a ledger for `table` or `schema.table`
    pub fn new(table_name: &str) -> MigrationResult<Self> {
        let (schema, table) = match table_name.split_once('.') {
            Some((schema, table)) => (schema, table),
            None => (DEFAULT_SCHEMA, table_name),
        };

        for identifier in [schema, table] {
            if !IDENTIFIER.is_match(identifier) {
                return Err(MigrationError::Configuration(format!(
                    "invalid migrations table name {:?}: {:?} is not a lower-case SQL identifier",
                    table_name, identifier
                )));
            }
        }

        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
            qualified: table_name.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The table name as configured, used in SQL
    pub fn qualified_name(&self) -> &str {
        &self.qualified
    }

    /// Create the schema (if not `public`) and the ledger table
    pub async fn create<E>(&self, db: &mut E) -> MigrationResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        if self.schema != DEFAULT_SCHEMA {
            db.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema), &[])
                .await?;
        }

        db.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    id serial,\n    version bigint,\n    created_at timestamptz\n)",
                self.qualified
            ),
            &[],
        )
        .await?;

        Ok(())
    }

    /// Version of the most recently inserted row, or 0 for an empty ledger
    pub async fn current_version<E>(&self, db: &mut E) -> MigrationResult<i64>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let row = db
            .fetch_optional(
                &format!("SELECT version FROM {} ORDER BY id DESC LIMIT 1", self.qualified),
                &[],
            )
            .await?;

        match row {
            Some(row) => first_column_i64(row.as_ref()),
            None => Ok(0),
        }
    }

    /// Append a version row with a server-assigned timestamp
    pub async fn record_version<E>(&self, db: &mut E, version: i64) -> MigrationResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        db.execute(
            &format!(
                "INSERT INTO {} (version, created_at) VALUES ($1, now())",
                self.qualified
            ),
            &[version.into()],
        )
        .await?;
        Ok(())
    }

    pub async fn table_exists(&self, pool: &dyn DatabasePool) -> MigrationResult<bool> {
        let row = pool
            .fetch_optional(
                "SELECT 1 FROM pg_tables WHERE schemaname = $1 AND tablename = $2",
                &[self.schema.as_str().into(), self.table.as_str().into()],
            )
            .await?;
        Ok(row.is_some())
    }

    pub async fn schema_exists(&self, pool: &dyn DatabasePool) -> MigrationResult<bool> {
        let row = pool
            .fetch_optional(
                "SELECT 1 FROM pg_namespace WHERE nspname = $1",
                &[self.schema.as_str().into()],
            )
            .await?;
        Ok(row.is_some())
    }
}
