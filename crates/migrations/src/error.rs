//! Error types for the migration engine
//!
//! Configuration errors (file names, duplicate versions, directives) are raised
//! before any database interaction. Execution errors carry the version that was
//! being applied and the last version that was durably recorded.

use std::path::PathBuf;

use crate::migrations::Direction;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Two migrations claim the same version
    #[error("there are multiple migrations with version={version}")]
    DuplicateVersion { version: i64 },

    /// Versions start at 1; 0 is the ledger's "nothing applied" state
    #[error("migration version must be positive, got version={version}")]
    NonPositiveVersion { version: i64 },

    /// A migration file name does not follow `<version>_<label>.<variant>`
    #[error("file={file:?} {reason}")]
    BadFileName { file: String, reason: String },

    /// Two discovered files supply the same direction for one version
    #[error("migration={version} already has {direction} action")]
    DuplicateDirection { version: i64, direction: Direction },

    /// A `--gopg:` line that is not a known directive
    #[error("unknown directive: {0:?}")]
    UnknownDirective(String),

    /// The ledger table has not been created yet
    #[error("table {table:?} does not exist; did you run init?")]
    TableMissing { table: String },

    #[error("missing argument: {0}")]
    MissingArgument(String),

    #[error("invalid argument {argument:?}: {reason}")]
    InvalidArgument { argument: String, reason: String },

    #[error("unsupported command: {0:?}")]
    UnsupportedCommand(String),

    /// A migration action failed; `reached` is the last committed version
    #[error("migration {version} ({direction}) failed at version {reached}: {source}")]
    Execution {
        version: i64,
        direction: Direction,
        reached: i64,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("file={0:?} already exists")]
    TemplateExists(PathBuf),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Whether the error was raised while validating inputs, before any database work
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MigrationError::DuplicateVersion { .. }
                | MigrationError::NonPositiveVersion { .. }
                | MigrationError::BadFileName { .. }
                | MigrationError::DuplicateDirection { .. }
                | MigrationError::UnknownDirective(_)
                | MigrationError::Configuration(_)
        )
    }

    pub(crate) fn bad_file_name(file: impl Into<String>, reason: impl Into<String>) -> Self {
        MigrationError::BadFileName {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Query(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = MigrationError::DuplicateVersion { version: 7 };
        assert_eq!(err.to_string(), "there are multiple migrations with version=7");

        let err = MigrationError::TableMissing {
            table: "gopg_migrations".to_string(),
        };
        assert!(err.to_string().contains("did you run init?"));

        let err = MigrationError::Execution {
            version: 3,
            direction: Direction::Up,
            reached: 2,
            source: Box::new(MigrationError::Query("boom".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "migration 3 (up) failed at version 2: Query error: boom"
        );
    }

    #[test]
    fn test_configuration_classification() {
        assert!(MigrationError::UnknownDirective("nosplit".into()).is_configuration());
        assert!(MigrationError::bad_file_name("x.sql", "bad").is_configuration());
        assert!(MigrationError::NonPositiveVersion { version: 0 }.is_configuration());
        assert!(!MigrationError::Query("x".into()).is_configuration());
        assert!(!MigrationError::MissingArgument("n".into()).is_configuration());
    }
}
