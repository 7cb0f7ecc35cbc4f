//! Log output for the `shift` binary
//!
//! Logs go to stderr so that `--json` results on stdout stay machine readable.

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the CLI
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter used when `RUST_LOG` is unset (e.g. "info", "debug")
    pub level: String,
    /// Emit one JSON object per event instead of plain text
    pub json_format: bool,
    /// Include the module target of each event
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    /// Configuration derived from the `--verbose` and `--json-logs` flags
    pub fn from_flags(verbose: bool, json_format: bool) -> Self {
        Self {
            level: if verbose { "debug" } else { "info" }.to_string(),
            json_format,
            include_target: verbose,
        }
    }

    /// Default filter directive: the chosen level for shift crates, warnings for the rest
    pub fn filter_directive(&self) -> String {
        format!(
            "warn,shift_migrations={level},shift_cli={level}",
            level = self.level
        )
    }
}

/// Install the global tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.filter_directive()))?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stderr)
                    .with_target(config.include_target),
            )
            .try_init()?;
    }

    tracing::debug!(
        "logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_select_level() {
        assert_eq!(LoggingConfig::from_flags(false, false).level, "info");

        let verbose = LoggingConfig::from_flags(true, true);
        assert_eq!(verbose.level, "debug");
        assert!(verbose.json_format);
        assert_eq!(
            verbose.filter_directive(),
            "warn,shift_migrations=debug,shift_cli=debug"
        );
    }
}
