//! Shared fixtures for the migration integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shift_migrations::{
    Direction, MigrationAction, MigrationContext, MigrationError, MigrationResult, Migrator,
    MigratorConfig,
};

/// One observed action invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub version: i64,
    pub direction: Direction,
    pub in_transaction: bool,
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// Action that records its invocation and issues one marker statement
pub struct Recording {
    events: EventLog,
    delay: Option<Duration>,
}

impl Recording {
    pub fn new(events: &EventLog) -> Self {
        Self {
            events: events.clone(),
            delay: None,
        }
    }

    pub fn with_delay(events: &EventLog, delay: Duration) -> Self {
        Self {
            events: events.clone(),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl MigrationAction for Recording {
    async fn apply(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.events.lock().unwrap().push(Event {
            version: ctx.version(),
            direction: ctx.direction(),
            in_transaction: ctx.in_transaction(),
        });

        let marker = format!("SELECT 'migration {} {}'", ctx.version(), ctx.direction());
        ctx.execute(&marker).await?;
        Ok(())
    }
}

/// Action that always fails
pub struct Failing;

#[async_trait]
impl MigrationAction for Failing {
    async fn apply(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        Err(MigrationError::Query(format!(
            "relation \"missing_{}\" does not exist",
            ctx.version()
        )))
    }
}

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<Event> {
    log.lock().unwrap().clone()
}

pub fn versions_applied(log: &EventLog, direction: Direction) -> Vec<i64> {
    events(log)
        .into_iter()
        .filter(|event| event.direction == direction)
        .map(|event| event.version)
        .collect()
}

/// Migrator that only knows programmatically registered migrations
pub fn migrator() -> Migrator {
    Migrator::new(MigratorConfig::default().with_sql_autodiscover(false))
        .expect("default configuration is valid")
}

/// Migrator that discovers SQL migrations in `dir`
pub fn discovering_migrator(dir: &Path) -> Migrator {
    Migrator::new(MigratorConfig::default().with_migrations_dir(dir))
        .expect("configuration is valid")
}
