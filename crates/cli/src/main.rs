mod logging;
mod migrate;

use std::path::PathBuf;

use clap::Parser;
use shift_migrations::DatabaseBackendType;

/// Run versioned SQL schema migrations against PostgreSQL-compatible databases
#[derive(Parser, Debug)]
#[command(name = "shift")]
#[command(version, about)]
#[command(after_help = "COMMANDS:\n  \
    init                 create the migrations table\n  \
    up [target]          apply pending migrations (default)\n  \
    down                 revert the last migration\n  \
    reset                revert all migrations\n  \
    version              print the current version\n  \
    set_version <n>      record <n> as the current version\n  \
    create <words...>    write an empty .up.sql/.down.sql pair")]
pub struct Cli {
    /// Command followed by its arguments, e.g. `up 5`
    #[arg(value_name = "COMMAND")]
    pub args: Vec<String>,

    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Migrations table, optionally schema qualified (`schema.table`)
    #[arg(long, env = "MIGRATIONS_TABLE")]
    pub table: Option<String>,

    /// Directory holding `<version>_<label>.up.sql` files
    #[arg(long, env = "MIGRATIONS_DIR")]
    pub dir: Option<PathBuf>,

    /// Only run migrations compiled into the binary; do not scan the directory
    #[arg(long)]
    pub no_autodiscover: bool,

    /// Server flavour: postgresql, cockroachdb or yugabytedb
    #[arg(long, default_value = "postgresql")]
    pub backend: DatabaseBackendType,

    /// Maximum number of pooled connections
    #[arg(long, default_value_t = 5)]
    pub max_connections: u32,

    /// Seconds to wait for a free connection
    #[arg(long, default_value_t = 30)]
    pub acquire_timeout: u64,

    /// Run against an empty in-memory database and print the statements that would execute.
    /// With `create`, print the files that would be written
    #[arg(long)]
    pub dry_run: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Debug logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_logging(&logging::LoggingConfig::from_flags(cli.verbose, cli.json_logs))
        .map_err(|err| anyhow::anyhow!(err))?;

    if let Err(err) = migrate::run(&cli).await {
        tracing::error!("{:#}", err);
        std::process::exit(1);
    }

    Ok(())
}
