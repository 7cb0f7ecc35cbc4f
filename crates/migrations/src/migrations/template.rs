//! Migration templates written by `create`

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use super::definitions::Direction;
use crate::error::{MigrationError, MigrationResult};

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("invalid migration name regex"));

/// `<version>_<label>` with the description lower-cased and every run of other
/// characters collapsed to `_`
pub fn migration_file_stem(version: i64, description: &str) -> String {
    let description = description.to_lowercase();
    format!("{}_{}", version, NON_ALPHANUMERIC.replace_all(&description, "_"))
}

/// File name of one direction of a SQL migration
pub fn migration_file_name(version: i64, description: &str, direction: Direction) -> String {
    format!("{}.{}.sql", migration_file_stem(version, description), direction)
}

/// Paths of the up/down pair `write_templates` would write, without touching the filesystem
///
/// Fails with `TemplateExists` when either file is already present.
pub fn planned_templates(dir: &Path, version: i64, description: &str) -> MigrationResult<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = [Direction::Up, Direction::Down]
        .into_iter()
        .map(|direction| dir.join(migration_file_name(version, description, direction)))
        .collect();

    if let Some(existing) = paths.iter().find(|path| path.exists()) {
        return Err(MigrationError::TemplateExists(existing.clone()));
    }

    Ok(paths)
}

/// Write an empty up/down pair into `dir`, refusing to overwrite existing files
pub fn write_templates(dir: &Path, version: i64, description: &str) -> MigrationResult<Vec<PathBuf>> {
    let paths = planned_templates(dir, version, description)?;

    fs::create_dir_all(dir)?;
    for (path, direction) in paths.iter().zip([Direction::Up, Direction::Down]) {
        fs::write(path, template_contents(version, description, direction))?;
    }

    Ok(paths)
}

fn template_contents(version: i64, description: &str, direction: Direction) -> String {
    format!(
        "-- Migration {}: {} ({})\n-- Separate statements that must not share a transaction with {}split\n",
        version,
        description,
        direction,
        super::sql::DIRECTIVE_PREFIX
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::sql::parse_sql;

    #[test]
    fn test_file_stem_normalization() {
        assert_eq!(migration_file_stem(1, "initial"), "1_initial");
        assert_eq!(migration_file_stem(12, "Add Users-Table!"), "12_add_users_table_");
        assert_eq!(migration_file_stem(3, "add_email  index"), "3_add_email_index");
    }

    #[test]
    fn test_file_names() {
        assert_eq!(migration_file_name(4, "seed data", Direction::Up), "4_seed_data.up.sql");
        assert_eq!(migration_file_name(4, "seed data", Direction::Down), "4_seed_data.down.sql");
    }

    #[test]
    fn test_templates_are_valid_sql_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_templates(dir.path(), 2, "add users").unwrap();
        assert_eq!(written.len(), 2);
        for path in &written {
            let contents = fs::read_to_string(path).unwrap();
            parse_sql(&contents).unwrap();
        }

        let err = write_templates(dir.path(), 2, "add users").unwrap_err();
        assert!(matches!(err, MigrationError::TemplateExists(_)));
    }

    #[test]
    fn test_planned_templates_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing");

        let planned = planned_templates(&target, 5, "add users").unwrap();
        assert_eq!(
            planned,
            vec![target.join("5_add_users.up.sql"), target.join("5_add_users.down.sql")]
        );
        assert!(!target.exists());

        write_templates(&target, 5, "add users").unwrap();
        assert!(matches!(
            planned_templates(&target, 5, "add users"),
            Err(MigrationError::TemplateExists(_))
        ));
    }
}
