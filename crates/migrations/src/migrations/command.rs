//! Command parsing
//!
//! Commands arrive as plain strings: the command name followed by its
//! arguments. An empty argument list means `up`.

use std::fmt;

use crate::error::{MigrationError, MigrationResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the ledger schema and table
    Init,
    /// Write an empty migration template pair
    Create { description: Vec<String> },
    /// Apply pending migrations up to and including `target`
    Up { target: Option<i64> },
    /// Revert the migration at the current version
    Down,
    /// Revert until nothing more can be reverted
    Reset,
    /// Report the current version
    Version,
    /// Record a version without running anything
    SetVersion { version: i64 },
}

impl Command {
    /// Parse `args`, where the first element is the command name
    pub fn parse<S: AsRef<str>>(args: &[S]) -> MigrationResult<Self> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Up { target: None });
        };
        let rest: Vec<&str> = rest.iter().map(AsRef::as_ref).collect();

        match name.as_ref() {
            "init" => Ok(Command::Init),
            "create" => {
                if rest.is_empty() {
                    return Err(MigrationError::MissingArgument(
                        "create requires a migration description, e.g. create add users table".to_string(),
                    ));
                }
                Ok(Command::Create {
                    description: rest.iter().map(|word| word.to_string()).collect(),
                })
            }
            "up" => {
                let target = rest.first().map(|arg| parse_version_arg(arg)).transpose()?;
                Ok(Command::Up { target })
            }
            "down" => Ok(Command::Down),
            "reset" => Ok(Command::Reset),
            "version" => Ok(Command::Version),
            "set_version" => {
                let arg = rest.first().ok_or_else(|| {
                    MigrationError::MissingArgument(
                        "set_version requires version as 2nd arg, e.g. set_version 42".to_string(),
                    )
                })?;
                let version = arg.parse().map_err(|_| {
                    MigrationError::MissingArgument(format!(
                        "set_version requires a numeric version, got {:?}",
                        arg
                    ))
                })?;
                Ok(Command::SetVersion { version })
            }
            other => Err(MigrationError::UnsupportedCommand(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::Create { .. } => "create",
            Command::Up { .. } => "up",
            Command::Down => "down",
            Command::Reset => "reset",
            Command::Version => "version",
            Command::SetVersion { .. } => "set_version",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Create { description } => write!(f, "create {}", description.join(" ")),
            Command::Up { target: Some(target) } => write!(f, "up {}", target),
            Command::SetVersion { version } => write!(f, "set_version {}", version),
            other => f.write_str(other.name()),
        }
    }
}

fn parse_version_arg(arg: &str) -> MigrationResult<i64> {
    arg.parse().map_err(|e| MigrationError::InvalidArgument {
        argument: arg.to_string(),
        reason: format!("target version must be an integer: {}", e),
    })
}
