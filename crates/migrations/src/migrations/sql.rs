//! SQL migration files
//!
//! A migration file is plain SQL. Lines starting with `--gopg:` are
//! directives; `--gopg:split` ends the current statement chunk and starts a new
//! one. Every other line is kept verbatim.

use async_trait::async_trait;

use super::context::MigrationContext;
use super::definitions::MigrationAction;
use crate::error::{MigrationError, MigrationResult};

/// Prefix that marks a directive line
pub const DIRECTIVE_PREFIX: &str = "--gopg:";

/// Directive that splits a file into separately executed chunks
pub const SPLIT_DIRECTIVE: &str = "split";

/// Split migration text into the statement chunks it should be executed as
///
/// Chunks holding only whitespace are dropped.
pub fn parse_sql(text: &str) -> MigrationResult<Vec<String>> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if let Some(directive) = line.strip_prefix(DIRECTIVE_PREFIX) {
            if directive != SPLIT_DIRECTIVE {
                return Err(MigrationError::UnknownDirective(directive.to_string()));
            }
            push_statement(&mut statements, std::mem::take(&mut current));
            continue;
        }

        current.push_str(line);
        current.push('\n');
    }

    push_statement(&mut statements, current);
    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, statement: String) {
    if !statement.trim().is_empty() {
        statements.push(statement);
    }
}

/// Migration action that executes SQL chunks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlAction {
    statements: Vec<String>,
}

impl SqlAction {
    /// An action executing a single statement verbatim
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            statements: vec![sql.into()],
        }
    }

    /// Parse migration text, honouring directives
    pub fn parse(text: &str) -> MigrationResult<Self> {
        Ok(Self {
            statements: parse_sql(text)?,
        })
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[async_trait]
impl MigrationAction for SqlAction {
    async fn apply(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
        ctx.execute_batch(&self.statements).await
    }
}
