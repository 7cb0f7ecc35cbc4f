//! Migration Registry - Ordered collection of migrations
//!
//! Registration keeps the list sorted by version. Registration may happen from
//! several initialization paths at once, so the list lives behind a mutex and
//! callers work on snapshots.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::definitions::Migration;
use super::discovery::{scan_source, DirectorySource, MigrationSource};
use crate::error::{MigrationError, MigrationResult};

#[derive(Default)]
struct RegistryState {
    migrations: Vec<Arc<Migration>>,
    visited_sources: HashSet<String>,
}

impl RegistryState {
    fn contains(&self, version: i64) -> bool {
        self.migrations.iter().any(|m| m.version() == version)
    }

    /// Insert before the first migration with a greater version
    fn insert_sorted(&mut self, migration: Arc<Migration>) {
        let index = self
            .migrations
            .iter()
            .position(|m| m.version() > migration.version())
            .unwrap_or(self.migrations.len());
        self.migrations.insert(index, migration);
    }

    /// Insert a batch, or nothing if any version collides
    fn insert_all(&mut self, migrations: Vec<Migration>) -> MigrationResult<()> {
        validate_versions(migrations.iter())?;
        if let Some(existing) = migrations.iter().find(|m| self.contains(m.version())) {
            return Err(MigrationError::DuplicateVersion {
                version: existing.version(),
            });
        }

        for migration in migrations {
            self.insert_sorted(Arc::new(migration));
        }
        Ok(())
    }
}

/// Process-local registry of migrations
#[derive(Default)]
pub struct MigrationRegistry {
    state: Mutex<RegistryState>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one migration; fails without side effects on an invalid or colliding version
    pub fn register(&self, migration: Migration) -> MigrationResult<()> {
        self.register_all(vec![migration])
    }

    /// Register several migrations atomically
    pub fn register_all(&self, migrations: impl IntoIterator<Item = Migration>) -> MigrationResult<()> {
        let migrations: Vec<Migration> = migrations.into_iter().collect();
        let count = migrations.len();
        self.state.lock().insert_all(migrations)?;
        tracing::debug!("registered {} migration(s)", count);
        Ok(())
    }

    /// Discover `<version>_<label>.<variant>.sql` files in a directory
    ///
    /// A directory is scanned once; later calls for the same absolute path are
    /// no-ops. A missing directory is not an error.
    pub fn discover_sql_migrations(&self, dir: impl AsRef<Path>) -> MigrationResult<()> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            tracing::debug!("migrations directory {} not found, skipping", dir.display());
            return Ok(());
        }

        self.discover_from_source(&DirectorySource::new(dir.canonicalize()?))
    }

    /// Discover SQL migrations from any source, once per source location
    pub fn discover_from_source(&self, source: &dyn MigrationSource) -> MigrationResult<()> {
        let location = source.location();
        if self.state.lock().visited_sources.contains(&location) {
            return Ok(());
        }

        let discovered = scan_source(source)?;
        let count = discovered.len();

        let mut state = self.state.lock();
        // Another caller may have finished the same source meanwhile.
        if state.visited_sources.contains(&location) {
            return Ok(());
        }
        state.insert_all(discovered)?;
        state.visited_sources.insert(location.clone());
        drop(state);

        tracing::debug!("discovered {} migration(s) in {}", count, location);
        Ok(())
    }

    /// Independent copy of the registered migrations in ascending version order
    pub fn snapshot(&self) -> Vec<Arc<Migration>> {
        self.state.lock().migrations.clone()
    }

    pub fn versions(&self) -> Vec<i64> {
        self.state.lock().migrations.iter().map(|m| m.version()).collect()
    }

    pub fn last_version(&self) -> Option<i64> {
        self.state.lock().migrations.last().map(|m| m.version())
    }

    pub fn len(&self) -> usize {
        self.state.lock().migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().migrations.is_empty()
    }

    /// Check a snapshot for duplicate or non-positive versions
    pub fn validate(migrations: &[Arc<Migration>]) -> MigrationResult<()> {
        validate_versions(migrations.iter().map(|m| m.as_ref()))
    }
}

fn validate_versions<'a>(migrations: impl Iterator<Item = &'a Migration>) -> MigrationResult<()> {
    let mut seen = HashSet::new();
    for migration in migrations {
        if migration.version() <= 0 {
            return Err(MigrationError::NonPositiveVersion {
                version: migration.version(),
            });
        }
        if !seen.insert(migration.version()) {
            return Err(MigrationError::DuplicateVersion {
                version: migration.version(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::SqlAction;

    fn migration(version: i64) -> Migration {
        Migration::new(version, SqlAction::new(format!("SELECT {}", version)))
    }

    #[test]
    fn test_register_keeps_ascending_order() {
        let registry = MigrationRegistry::new();
        registry.register(migration(3)).unwrap();
        registry.register(migration(1)).unwrap();
        registry.register(migration(2)).unwrap();
        registry.register(migration(10)).unwrap();

        assert_eq!(registry.versions(), vec![1, 2, 3, 10]);
        assert_eq!(registry.last_version(), Some(10));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_duplicate_registration_leaves_registry_unchanged() {
        let registry = MigrationRegistry::new();
        registry.register(migration(1)).unwrap();

        let err = registry.register(migration(1)).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { version: 1 }));
        assert_eq!(registry.versions(), vec![1]);

        let err = registry
            .register_all(vec![migration(2), migration(1)])
            .unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { version: 1 }));
        assert_eq!(registry.versions(), vec![1]);

        let err = registry
            .register_all(vec![migration(4), migration(4)])
            .unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { version: 4 }));
        assert_eq!(registry.versions(), vec![1]);
    }

    #[test]
    fn test_non_positive_versions_are_rejected() {
        let registry = MigrationRegistry::new();

        for version in [0, -4] {
            let err = registry.register(migration(version)).unwrap_err();
            assert!(matches!(err, MigrationError::NonPositiveVersion { version: v } if v == version));
        }
        assert!(registry.is_empty());

        let err = registry
            .register_all(vec![migration(1), migration(0)])
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(registry.is_empty());

        let snapshot = vec![Arc::new(migration(-1))];
        assert!(MigrationRegistry::validate(&snapshot).is_err());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let registry = MigrationRegistry::new();
        registry.register(migration(1)).unwrap();

        let snapshot = registry.snapshot();
        registry.register(migration(2)).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_validate_detects_duplicates() {
        let snapshot = vec![Arc::new(migration(1)), Arc::new(migration(1))];
        assert!(matches!(
            MigrationRegistry::validate(&snapshot),
            Err(MigrationError::DuplicateVersion { version: 1 })
        ));
        assert!(MigrationRegistry::validate(&[]).is_ok());
    }

    #[test]
    fn test_embedded_source_is_discovered_once() {
        let registry = MigrationRegistry::new();
        registry.register(migration(3)).unwrap();

        let source = crate::migrations::EmbeddedSource::new("app")
            .with_file("1_users.up.sql", "CREATE TABLE users (id int)")
            .with_file("2_orders.up.sql", "CREATE TABLE orders (id int)");
        registry.discover_from_source(&source).unwrap();
        registry.discover_from_source(&source).unwrap();
        assert_eq!(registry.versions(), vec![1, 2, 3]);

        let colliding = crate::migrations::EmbeddedSource::new("other")
            .with_file("3_dup.up.sql", "SELECT 1")
            .with_file("4_next.up.sql", "SELECT 1");
        let err = registry.discover_from_source(&colliding).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { version: 3 }));
        assert_eq!(registry.versions(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_directory_is_noop() {
        let registry = MigrationRegistry::new();
        registry
            .discover_sql_migrations("/definitely/not/a/migrations/dir")
            .unwrap();
        assert!(registry.is_empty());
    }
}
