//! Migration Runner - Executes migration commands against the database
//!
//! `up` and `reset` commit once per migration: each step opens its own locked
//! transaction, re-reads the ledger, applies one migration, records the new
//! version and commits. A failure rolls back only the failing step.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::command::Command;
use super::context::MigrationContext;
use super::definitions::{Direction, Migration, MigrationRunResult};
use super::discovery::MigrationSource;
use super::ledger::VersionLedger;
use super::lock::{begin_locked, rollback_with};
use super::registry::MigrationRegistry;
use super::template::{planned_templates, write_templates};
use crate::backends::{DatabasePool, DatabaseTransaction};
use crate::config::MigratorConfig;
use crate::error::{MigrationError, MigrationResult};

/// Migration engine bound to one registry and one ledger table
pub struct Migrator {
    config: MigratorConfig,
    ledger: VersionLedger,
    registry: MigrationRegistry,
}

impl Default for Migrator {
    fn default() -> Self {
        Self {
            config: MigratorConfig::default(),
            ledger: VersionLedger::default(),
            registry: MigrationRegistry::new(),
        }
    }
}

impl Migrator {
    /// Create a migrator with custom configuration
    pub fn new(config: MigratorConfig) -> MigrationResult<Self> {
        config.validate()?;
        let ledger = VersionLedger::new(&config.table_name)?;

        Ok(Self {
            config,
            ledger,
            registry: MigrationRegistry::new(),
        })
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn register(&self, migration: Migration) -> MigrationResult<()> {
        self.registry.register(migration)
    }

    pub fn register_all(&self, migrations: impl IntoIterator<Item = Migration>) -> MigrationResult<()> {
        self.registry.register_all(migrations)
    }

    pub fn discover_sql_migrations(&self, dir: impl AsRef<Path>) -> MigrationResult<()> {
        self.registry.discover_sql_migrations(dir)
    }

    /// Discover SQL migrations from an embedded or custom source
    pub fn discover_from_source(&self, source: &dyn MigrationSource) -> MigrationResult<()> {
        self.registry.discover_from_source(source)
    }

    /// Snapshot of all migrations, discovering the migrations directory first when enabled
    pub fn migrations(&self) -> MigrationResult<Vec<Arc<Migration>>> {
        if self.config.sql_autodiscover {
            self.registry.discover_sql_migrations(&self.config.migrations_dir)?;
        }
        Ok(self.registry.snapshot())
    }

    /// Run a command given as plain strings, e.g. `["up", "5"]`; no arguments means `up`
    pub async fn run<S: AsRef<str>>(
        &self,
        pool: &dyn DatabasePool,
        args: &[S],
    ) -> MigrationResult<MigrationRunResult> {
        let command = Command::parse(args)?;
        self.run_command(pool, command).await
    }

    /// Run a parsed command
    pub async fn run_command(
        &self,
        pool: &dyn DatabasePool,
        command: Command,
    ) -> MigrationResult<MigrationRunResult> {
        if let Command::Create { description } = &command {
            return self.create(&description.join(" "));
        }

        let start_time = Instant::now();

        let migrations = self.migrations()?;
        MigrationRegistry::validate(&migrations)?;

        tracing::debug!("running {} with {} registered migration(s)", command, migrations.len());

        let mut result = match command {
            Command::Init => {
                self.create_ledger(pool).await?;
                tracing::info!("migrations table {} is ready", self.ledger.qualified_name());
                MigrationRunResult::default()
            }
            command => {
                if !self.ledger.table_exists(pool).await? {
                    return Err(MigrationError::TableMissing {
                        table: self.ledger.qualified_name().to_string(),
                    });
                }
                self.run_locked(pool, &migrations, command).await?
            }
        };

        result.execution_time_ms = start_time.elapsed().as_millis();

        if result.changed() {
            tracing::info!(
                "migrated from version {} to {}",
                result.old_version,
                result.new_version
            );
        }

        Ok(result)
    }

    /// Create the ledger schema and table
    pub async fn init(&self, pool: &dyn DatabasePool) -> MigrationResult<MigrationRunResult> {
        self.run_command(pool, Command::Init).await
    }

    /// Write an empty SQL migration pair numbered after the last registered version
    ///
    /// Only the migrations directory is touched; no database is needed.
    pub fn create(&self, description: &str) -> MigrationResult<MigrationRunResult> {
        let start_time = Instant::now();
        let (version, description) = self.next_template(description)?;

        let created_files = write_templates(&self.config.migrations_dir, version, &description)?;
        for file in &created_files {
            tracing::info!("created new migration {}", file.display());
        }

        Ok(MigrationRunResult {
            created_files,
            execution_time_ms: start_time.elapsed().as_millis(),
            ..MigrationRunResult::default()
        })
    }

    /// Files `create` would write for `description`, without writing them
    pub fn planned_templates(&self, description: &str) -> MigrationResult<Vec<PathBuf>> {
        let (version, description) = self.next_template(description)?;
        planned_templates(&self.config.migrations_dir, version, &description)
    }

    fn next_template(&self, description: &str) -> MigrationResult<(i64, String)> {
        let description = description.split_whitespace().collect::<Vec<_>>().join(" ");
        if description.is_empty() {
            return Err(MigrationError::MissingArgument(
                "create requires a migration description".to_string(),
            ));
        }

        let migrations = self.migrations()?;
        MigrationRegistry::validate(&migrations)?;
        let version = migrations.last().map_or(0, |m| m.version()) + 1;
        Ok((version, description))
    }

    /// Apply pending migrations up to `target`, or all of them
    pub async fn up(
        &self,
        pool: &dyn DatabasePool,
        target: Option<i64>,
    ) -> MigrationResult<MigrationRunResult> {
        self.run_command(pool, Command::Up { target }).await
    }

    /// Revert the migration matching the current version
    pub async fn down(&self, pool: &dyn DatabasePool) -> MigrationResult<MigrationRunResult> {
        self.run_command(pool, Command::Down).await
    }

    /// Revert migrations until the version stops changing
    pub async fn reset(&self, pool: &dyn DatabasePool) -> MigrationResult<MigrationRunResult> {
        self.run_command(pool, Command::Reset).await
    }

    /// Report the current version under the ledger lock
    pub async fn version(&self, pool: &dyn DatabasePool) -> MigrationResult<MigrationRunResult> {
        self.run_command(pool, Command::Version).await
    }

    /// Record `version` as current without running any migration
    pub async fn set_version(
        &self,
        pool: &dyn DatabasePool,
        version: i64,
    ) -> MigrationResult<MigrationRunResult> {
        self.run_command(pool, Command::SetVersion { version }).await
    }

    /// Read the current version, creating the ledger if it does not exist yet
    pub async fn current_version(&self, pool: &dyn DatabasePool) -> MigrationResult<i64> {
        let mut tx = pool.begin_transaction().await?;

        let created = self.ledger.create(&mut *tx).await;
        if let Err(err) = created {
            return Err(rollback_with(tx, err).await);
        }

        let version = self.ledger.current_version(&mut *tx).await;
        match version {
            Ok(version) => {
                tx.commit().await?;
                Ok(version)
            }
            Err(err) => Err(rollback_with(tx, err).await),
        }
    }

    async fn create_ledger(&self, pool: &dyn DatabasePool) -> MigrationResult<()> {
        let mut conn = pool.acquire().await?;
        self.ledger.create(&mut *conn).await
    }

    async fn run_locked(
        &self,
        pool: &dyn DatabasePool,
        migrations: &[Arc<Migration>],
        command: Command,
    ) -> MigrationResult<MigrationRunResult> {
        let (mut tx, version) = begin_locked(pool, &self.ledger).await?;
        let mut result = MigrationRunResult::unchanged(version);

        match command {
            Command::Up { target } => {
                self.up_locked(pool, migrations, tx, target, &mut result).await?;
            }
            Command::Down => {
                let new_version = self.down_step(pool, migrations, tx, version, &mut result).await?;
                result.new_version = new_version;
            }
            Command::Reset => {
                self.reset_locked(pool, migrations, tx, &mut result).await?;
            }
            Command::SetVersion { version: new_version } => {
                let recorded = self.ledger.record_version(&mut *tx, new_version).await;
                if let Err(err) = recorded {
                    return Err(rollback_with(tx, err).await);
                }
                tx.commit().await?;
                tracing::info!("set version to {}", new_version);
                result.new_version = new_version;
            }
            Command::Version | Command::Init | Command::Create { .. } => {
                tx.commit().await?;
            }
        }

        Ok(result)
    }

    async fn up_locked(
        &self,
        pool: &dyn DatabasePool,
        migrations: &[Arc<Migration>],
        tx: Box<dyn DatabaseTransaction>,
        target: Option<i64>,
        result: &mut MigrationRunResult,
    ) -> MigrationResult<()> {
        let target = target.unwrap_or(i64::MAX);
        let mut current = result.old_version;
        let mut tx = Some(tx);

        if current <= target {
            for migration in migrations {
                if migration.version() > target {
                    break;
                }

                let mut active = match tx.take() {
                    Some(active) => active,
                    None => {
                        let (active, version) = begin_locked(pool, &self.ledger).await?;
                        current = version;
                        active
                    }
                };

                if migration.version() <= current {
                    tx = Some(active);
                    continue;
                }

                let version = migration.version();
                let applied = self
                    .apply_step(pool, &mut *active, migration, Direction::Up, version)
                    .await;
                if let Err(err) = applied {
                    let source = rollback_with(active, err).await;
                    return Err(execution_error(version, Direction::Up, result.new_version, source));
                }

                active
                    .commit()
                    .await
                    .map_err(|err| execution_error(version, Direction::Up, result.new_version, err))?;

                tracing::info!("applied migration {}", describe(migration));
                current = version;
                result.new_version = version;
                result.applied_versions.push(version);
            }
        }

        if let Some(tx) = tx {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn reset_locked(
        &self,
        pool: &dyn DatabasePool,
        migrations: &[Arc<Migration>],
        tx: Box<dyn DatabaseTransaction>,
        result: &mut MigrationRunResult,
    ) -> MigrationResult<()> {
        let mut current = result.old_version;
        let mut tx = Some(tx);

        loop {
            let active = match tx.take() {
                Some(active) => active,
                None => {
                    let (active, version) = begin_locked(pool, &self.ledger).await?;
                    current = version;
                    active
                }
            };

            let new_version = self.down_step(pool, migrations, active, current, result).await?;
            result.new_version = new_version;
            if new_version == current {
                return Ok(());
            }
            current = new_version;
        }
    }

    /// Revert the migration at `current` inside `tx` and commit; returns the new version
    async fn down_step(
        &self,
        pool: &dyn DatabasePool,
        migrations: &[Arc<Migration>],
        mut tx: Box<dyn DatabaseTransaction>,
        current: i64,
        result: &mut MigrationRunResult,
    ) -> MigrationResult<i64> {
        let migration = match migrations.iter().find(|m| m.version() == current) {
            Some(migration) if current != 0 => migration,
            _ => {
                tx.commit().await?;
                return Ok(current);
            }
        };

        let new_version = current - 1;
        let reverted = self
            .apply_step(pool, &mut *tx, migration, Direction::Down, new_version)
            .await;
        if let Err(err) = reverted {
            let source = rollback_with(tx, err).await;
            return Err(execution_error(current, Direction::Down, current, source));
        }

        tx.commit()
            .await
            .map_err(|err| execution_error(current, Direction::Down, current, err))?;

        tracing::info!("reverted migration {}", describe(migration));
        result.reverted_versions.push(current);
        Ok(new_version)
    }

    /// Run one direction of a migration and record `new_version`, without committing
    async fn apply_step(
        &self,
        pool: &dyn DatabasePool,
        tx: &mut (dyn DatabaseTransaction + 'static),
        migration: &Migration,
        direction: Direction,
        new_version: i64,
    ) -> MigrationResult<()> {
        if let Some(action) = migration.action(direction) {
            let transactional = migration.is_transactional(direction);
            tracing::debug!(
                "running {} for migration {} ({})",
                direction,
                migration.version(),
                if transactional { "in transaction" } else { "outside transaction" }
            );

            let scoped = if transactional { Some(&mut *tx) } else { None };
            let mut ctx = MigrationContext::new(pool, scoped, migration.version(), direction);
            action.apply(&mut ctx).await?;
        }

        self.ledger.record_version(&mut *tx, new_version).await
    }
}

fn execution_error(version: i64, direction: Direction, reached: i64, source: MigrationError) -> MigrationError {
    MigrationError::Execution {
        version,
        direction,
        reached,
        source: Box::new(source),
    }
}

fn describe(migration: &Migration) -> String {
    match migration.name() {
        Some(name) => format!("{} ({})", migration.version(), name),
        None => migration.version().to_string(),
    }
}
