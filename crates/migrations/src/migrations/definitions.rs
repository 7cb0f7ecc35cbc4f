//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the migration record itself, the action capability a record runs in
//! each direction, and the result reported by every command.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::context::MigrationContext;
use super::discovery::extract_version;
use super::sql::SqlAction;
use crate::error::{MigrationError, MigrationResult};

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration
    Up,
    /// Revert the migration
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// One direction of a migration step
///
/// Actions receive a [`MigrationContext`] that says whether they run inside the
/// transaction recording the version, and route statements accordingly.
#[async_trait]
pub trait MigrationAction: Send + Sync {
    async fn apply(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()>;
}

/// A single versioned schema change
///
/// Records are immutable once registered; the builder methods consume `self`.
#[derive(Clone)]
pub struct Migration {
    version: i64,
    name: Option<String>,
    up: Option<Arc<dyn MigrationAction>>,
    down: Option<Arc<dyn MigrationAction>>,
    up_transactional: bool,
    down_transactional: bool,
}

impl Migration {
    /// Create a migration with an up action and no down action
    pub fn new<A>(version: i64, up: A) -> Self
    where
        A: MigrationAction + 'static,
    {
        Self::empty(version).with_up(up)
    }

    /// A migration without actions; both directions are no-ops until set
    pub(crate) fn empty(version: i64) -> Self {
        Self {
            version,
            name: None,
            up: None,
            down: None,
            up_transactional: false,
            down_transactional: false,
        }
    }

    /// Create a migration from up and down SQL text, honouring `--gopg:` directives
    pub fn sql(version: i64, up_sql: &str, down_sql: &str) -> MigrationResult<Self> {
        Ok(Self::new(version, SqlAction::parse(up_sql)?).with_down(SqlAction::parse(down_sql)?))
    }

    /// Create a migration whose version comes from a `<version>_<label>.<ext>` file name
    pub fn from_file_name<A>(file: impl AsRef<Path>, up: A) -> MigrationResult<Self>
    where
        A: MigrationAction + 'static,
    {
        let file = file.as_ref();
        let base = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| MigrationError::bad_file_name(file.display().to_string(), "is not a file name"))?;

        let version = extract_version(base)?;
        let label = base
            .split_once('_')
            .map(|(_, rest)| rest.split('.').next().unwrap_or(rest))
            .unwrap_or_default();

        let migration = Self::new(version, up);
        Ok(if label.is_empty() {
            migration
        } else {
            migration.with_name(label)
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn with_up<A>(mut self, up: A) -> Self
    where
        A: MigrationAction + 'static,
    {
        self.up = Some(Arc::new(up));
        self
    }

    pub fn with_down<A>(mut self, down: A) -> Self
    where
        A: MigrationAction + 'static,
    {
        self.down = Some(Arc::new(down));
        self
    }

    /// Run both directions inside the transaction that records the version
    pub fn transactional(self) -> Self {
        self.with_up_transactional(true).with_down_transactional(true)
    }

    pub fn with_up_transactional(mut self, transactional: bool) -> Self {
        self.up_transactional = transactional;
        self
    }

    pub fn with_down_transactional(mut self, transactional: bool) -> Self {
        self.down_transactional = transactional;
        self
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The action for a direction, if one was supplied
    pub fn action(&self, direction: Direction) -> Option<&Arc<dyn MigrationAction>> {
        match direction {
            Direction::Up => self.up.as_ref(),
            Direction::Down => self.down.as_ref(),
        }
    }

    pub fn has_action(&self, direction: Direction) -> bool {
        self.action(direction).is_some()
    }

    /// Whether the action for a direction runs inside the surrounding transaction
    pub fn is_transactional(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.up_transactional,
            Direction::Down => self.down_transactional,
        }
    }

    /// Install a discovered action; fails if the direction is already taken
    pub(crate) fn set_action(
        &mut self,
        direction: Direction,
        action: Arc<dyn MigrationAction>,
        transactional: bool,
    ) -> MigrationResult<()> {
        let (slot, flag) = match direction {
            Direction::Up => (&mut self.up, &mut self.up_transactional),
            Direction::Down => (&mut self.down, &mut self.down_transactional),
        };

        if slot.is_some() {
            return Err(MigrationError::DuplicateDirection {
                version: self.version,
                direction,
            });
        }

        *slot = Some(action);
        *flag = transactional;
        Ok(())
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("up", &self.up.is_some())
            .field("up_transactional", &self.up_transactional)
            .field("down", &self.down.is_some())
            .field("down_transactional", &self.down_transactional)
            .finish()
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Migration<Version={} UpTx={} DownTx={}>",
            self.version, self.up_transactional, self.down_transactional
        )
    }
}

/// Result of running a migration command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationRunResult {
    /// Ledger version observed when the command started
    pub old_version: i64,
    /// Ledger version when the command finished
    pub new_version: i64,
    /// Versions whose up action ran, in order
    pub applied_versions: Vec<i64>,
    /// Versions whose down action ran, in order
    pub reverted_versions: Vec<i64>,
    /// Template files written by `create`
    pub created_files: Vec<PathBuf>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub(crate) fn unchanged(version: i64) -> Self {
        Self {
            old_version: version,
            new_version: version,
            ..Self::default()
        }
    }

    /// Whether the command moved the ledger
    pub fn changed(&self) -> bool {
        self.old_version != self.new_version
    }
}
