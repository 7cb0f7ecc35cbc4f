//! Migration file discovery
//!
//! File names follow `<version>_<label>.<variant>` where the variant is one of
//! `up.sql`, `down.sql`, `tx.up.sql` or `tx.down.sql`. Files not ending in
//! `.sql` are ignored. Files come from a [`MigrationSource`]: a directory on
//! disk or a set of files embedded in the binary.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::definitions::{Direction, Migration};
use super::sql::SqlAction;
use crate::error::{MigrationError, MigrationResult};

/// Parsed pieces of a migration file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFileName {
    pub version: i64,
    pub label: String,
    pub direction: Direction,
    pub transactional: bool,
}

impl MigrationFileName {
    /// Parse a SQL migration file name; `Ok(None)` for files that are not SQL
    pub fn parse(file_name: &str) -> MigrationResult<Option<Self>> {
        let Some(stem) = file_name.strip_suffix(".sql") else {
            return Ok(None);
        };

        let version = extract_version(file_name)?;

        let (stem, direction) = if let Some(stem) = stem.strip_suffix(".up") {
            (stem, Direction::Up)
        } else if let Some(stem) = stem.strip_suffix(".down") {
            (stem, Direction::Down)
        } else {
            return Err(MigrationError::bad_file_name(
                file_name,
                "must have extension .up.sql or .down.sql",
            ));
        };

        let (stem, transactional) = match stem.strip_suffix(".tx") {
            Some(stem) => (stem, true),
            None => (stem, false),
        };

        let label = stem
            .split_once('_')
            .map(|(_, label)| label.to_string())
            .unwrap_or_default();

        Ok(Some(Self {
            version,
            label,
            direction,
            transactional,
        }))
    }
}

/// Extract the version from a `<version>_<label>...` file name
pub fn extract_version(file_name: &str) -> MigrationResult<i64> {
    let (prefix, _) = file_name.split_once('_').ok_or_else(|| {
        MigrationError::bad_file_name(
            file_name,
            "must have name in format version_comment, e.g. 1_initial",
        )
    })?;

    let version: i64 = prefix.parse().map_err(|e| {
        MigrationError::bad_file_name(file_name, format!("has invalid version {:?}: {}", prefix, e))
    })?;

    if version <= 0 {
        return Err(MigrationError::bad_file_name(
            file_name,
            "must have a positive version",
        ));
    }

    Ok(version)
}

/// A collection of migration files, on disk or compiled into the binary
pub trait MigrationSource: Send + Sync {
    /// Identity of the source; a registry scans each location once
    fn location(&self) -> String;

    /// Names of the files directly inside the source, subdirectories excluded
    fn file_names(&self) -> MigrationResult<Vec<String>>;

    fn read(&self, file_name: &str) -> MigrationResult<String>;
}

/// Migration files in a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MigrationSource for DirectorySource {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn file_names(&self) -> MigrationResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                continue;
            }
            // Non UTF-8 names cannot follow the naming scheme.
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn read(&self, file_name: &str) -> MigrationResult<String> {
        Ok(fs::read_to_string(self.dir.join(file_name))?)
    }
}

/// Migration files held in memory, typically pulled in with `include_str!`
///
/// ```
/// use shift_migrations::EmbeddedSource;
///
/// let source = EmbeddedSource::new("app")
///     .with_file("1_users.up.sql", "CREATE TABLE users (id int)")
///     .with_file("1_users.down.sql", "DROP TABLE users");
/// ```
#[derive(Debug, Clone, Default)]
pub struct EmbeddedSource {
    name: String,
    files: BTreeMap<String, String>,
}

impl EmbeddedSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: BTreeMap::new(),
        }
    }

    /// Build from a static table of `(file name, contents)` pairs
    pub fn from_static(name: impl Into<String>, files: &[(&str, &str)]) -> Self {
        files
            .iter()
            .fold(Self::new(name), |source, (file, contents)| source.with_file(*file, *contents))
    }

    pub fn with_file(mut self, file_name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(file_name.into(), contents.into());
        self
    }
}

impl MigrationSource for EmbeddedSource {
    fn location(&self) -> String {
        format!("embedded:{}", self.name)
    }

    fn file_names(&self) -> MigrationResult<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, file_name: &str) -> MigrationResult<String> {
        self.files.get(file_name).cloned().ok_or_else(|| {
            MigrationError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no file {:?}", self.location(), file_name),
            ))
        })
    }
}

/// Read every SQL migration in `source`, grouped by version in ascending order
///
/// Files are visited in name order so that errors are deterministic. Nothing
/// is returned unless every file in the source is valid.
pub fn scan_source(source: &dyn MigrationSource) -> MigrationResult<Vec<Migration>> {
    let mut file_names = source.file_names()?;
    file_names.sort();

    let mut migrations: Vec<Migration> = Vec::new();

    for file_name in file_names {
        let Some(parsed) = MigrationFileName::parse(&file_name)? else {
            continue;
        };

        let contents = source.read(&file_name)?;
        let action = SqlAction::parse(&contents)?;

        let index = match migrations.iter().position(|m| m.version() == parsed.version) {
            Some(index) => index,
            None => {
                let mut migration = Migration::empty(parsed.version);
                if !parsed.label.is_empty() {
                    migration = migration.with_name(parsed.label.clone());
                }
                migrations.push(migration);
                migrations.len() - 1
            }
        };

        migrations[index].set_action(parsed.direction, Arc::new(action), parsed.transactional)?;

        tracing::debug!(
            "discovered {} migration {} from {} in {}",
            parsed.direction,
            parsed.version,
            file_name,
            source.location()
        );
    }

    migrations.sort_by_key(Migration::version);
    Ok(migrations)
}
