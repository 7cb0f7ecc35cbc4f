use std::path::PathBuf;

use anyhow::{bail, Context};
use shift_migrations::{
    Command, DatabasePool, DatabasePoolConfig, MemoryPool, MigrationRunResult, Migrator,
    MigratorConfig, PostgresBackend,
};

use crate::Cli;

/// Build the migrator from environment defaults overridden by flags
pub fn migrator_config(cli: &Cli) -> anyhow::Result<MigratorConfig> {
    let mut config = MigratorConfig::from_env().context("invalid migrations environment")?;

    if let Some(table) = &cli.table {
        config = config.with_table_name(table.clone());
    }
    if let Some(dir) = &cli.dir {
        config = config.with_migrations_dir(dir.clone());
    }
    if cli.no_autodiscover {
        config = config.with_sql_autodiscover(false);
    }

    Ok(config)
}

pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    let command = Command::parse(&cli.args[..])?;
    let migrator = Migrator::new(migrator_config(cli)?)?;

    let result = match command {
        Command::Create { description } if cli.dry_run => {
            let planned = migrator.planned_templates(&description.join(" "))?;
            return report_planned(cli, &planned);
        }
        // `create` only writes files; no connection is needed
        Command::Create { description } => migrator.create(&description.join(" "))?,
        command if cli.dry_run => dry_run(&migrator, command).await?,
        command => {
            let Some(database_url) = cli.database_url.as_deref() else {
                bail!("no database configured; pass --database-url or set DATABASE_URL");
            };

            let pool_config = DatabasePoolConfig {
                max_connections: cli.max_connections,
                acquire_timeout_seconds: cli.acquire_timeout,
                ..DatabasePoolConfig::default()
            };
            let pool = PostgresBackend::new()
                .with_backend_type(cli.backend)
                .create_pool(database_url, pool_config)
                .await?;

            let result = migrator.run_command(&*pool, command).await;
            pool.close().await?;
            result?
        }
    };

    report(cli, &result)
}

async fn dry_run(migrator: &Migrator, command: Command) -> anyhow::Result<MigrationRunResult> {
    let pool = MemoryPool::new();
    migrator.init(&pool).await?;
    let before = pool.executed().len();

    let result = migrator.run_command(&pool, command).await?;

    for statement in pool.executed().iter().skip(before) {
        println!(
            "{}{};",
            if statement.in_transaction { "[tx] " } else { "" },
            statement.sql.trim_end().trim_end_matches(';')
        );
    }

    Ok(result)
}

fn report_planned(cli: &Cli, planned: &[PathBuf]) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(planned)?);
        return Ok(());
    }

    for file in planned {
        println!("would create {}", file.display());
    }
    Ok(())
}

fn report(cli: &Cli, result: &MigrationRunResult) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    for file in &result.created_files {
        println!("created {}", file.display());
    }

    if result.changed() {
        println!(
            "migrated from version {} to {}",
            result.old_version, result.new_version
        );
    } else {
        println!("version is {}", result.new_version);
    }

    Ok(())
}
