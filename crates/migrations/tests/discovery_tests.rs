//! Integration tests for SQL file discovery and `create` templates

mod support;

use std::fs;
use std::path::Path;

use shift_migrations::{Direction, EmbeddedSource, Migration, MigrationError, MemoryPool};
use support::*;

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

#[tokio::test]
async fn test_split_file_runs_on_one_connection() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "5_init.up.sql",
        "SET search_path = app;\n--gopg:split\nCREATE TABLE app.users (id int);\n",
    );
    write(dir.path(), "5_init.down.sql", "DROP TABLE app.users;\n");
    write(dir.path(), "README.md", "not a migration");

    let migrator = discovering_migrator(dir.path());
    let pool = MemoryPool::new();
    migrator.init(&pool).await.unwrap();

    let migrations = migrator.migrations().unwrap();
    assert_eq!(migrations.len(), 1);
    assert_eq!(migrations[0].version(), 5);
    assert_eq!(migrations[0].name(), Some("init"));
    assert!(!migrations[0].is_transactional(Direction::Up));

    let result = migrator.run(&pool, &["up"]).await.unwrap();
    assert_eq!((result.old_version, result.new_version), (0, 5));

    let set = pool.executed_matching("SET search_path");
    let create = pool.executed_matching("CREATE TABLE app.users");
    assert_eq!(set.len(), 1);
    assert_eq!(create.len(), 1);
    assert_eq!(set[0].connection_id, create[0].connection_id);
    assert!(!create[0].in_transaction);

    let result = migrator.run(&pool, &["down"]).await.unwrap();
    assert_eq!((result.old_version, result.new_version), (5, 4));
    assert_eq!(pool.executed_matching("DROP TABLE app.users").len(), 1);
}

#[tokio::test]
async fn test_tx_variant_runs_inside_transaction() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "1_accounts.tx.up.sql", "CREATE TABLE accounts (id int);");
    write(dir.path(), "1_accounts.down.sql", "DROP TABLE accounts;");

    let migrator = discovering_migrator(dir.path());
    let migrations = migrator.migrations().unwrap();
    assert!(migrations[0].is_transactional(Direction::Up));
    assert!(!migrations[0].is_transactional(Direction::Down));

    let pool = MemoryPool::new();
    migrator.init(&pool).await.unwrap();
    migrator.up(&pool, None).await.unwrap();
    migrator.down(&pool).await.unwrap();

    let create = pool.executed_matching("CREATE TABLE accounts");
    assert!(create[0].in_transaction);
    let drop = pool.executed_matching("DROP TABLE accounts");
    assert!(!drop[0].in_transaction);
}

#[tokio::test]
async fn test_embedded_files_migrate_without_a_directory() {
    const FILES: &[(&str, &str)] = &[
        ("1_users.tx.up.sql", "CREATE TABLE users (id int);"),
        ("1_users.tx.down.sql", "DROP TABLE users;"),
        ("2_index.up.sql", "CREATE INDEX CONCURRENTLY users_id ON users (id);"),
    ];

    let migrator = migrator();
    let source = EmbeddedSource::from_static("app", FILES);
    migrator.discover_from_source(&source).unwrap();
    migrator.discover_from_source(&source).unwrap();
    assert_eq!(migrator.registry().versions(), vec![1, 2]);

    let pool = MemoryPool::new();
    migrator.init(&pool).await.unwrap();
    let result = migrator.up(&pool, None).await.unwrap();
    assert_eq!(result.applied_versions, vec![1, 2]);

    assert!(pool.executed_matching("CREATE TABLE users")[0].in_transaction);
    assert!(!pool.executed_matching("CREATE INDEX CONCURRENTLY")[0].in_transaction);
    assert_eq!(pool.ledger_versions("gopg_migrations"), vec![1, 2]);
}

#[tokio::test]
async fn test_configuration_errors_precede_database_work() {
    let cases: [(&str, fn(&MigrationError) -> bool); 4] = [
        ("abc_initial.up.sql", |e| matches!(e, MigrationError::BadFileName { .. })),
        ("1_initial.sql", |e| matches!(e, MigrationError::BadFileName { .. })),
        ("initial.up.sql", |e| matches!(e, MigrationError::BadFileName { .. })),
        ("2_bad.up.sql", |e| matches!(e, MigrationError::UnknownDirective(_))),
    ];

    for (file_name, expected) in cases {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), file_name, "SELECT 1;\n--gopg:nosplit\nSELECT 2;\n");

        let migrator = discovering_migrator(dir.path());
        let pool = MemoryPool::new();
        let err = migrator.run(&pool, &["init"]).await.unwrap_err();

        assert!(expected(&err), "{} produced {:?}", file_name, err);
        assert!(err.is_configuration());
        assert!(!pool.has_table("gopg_migrations"));
        assert!(pool.executed().is_empty());
    }
}

#[tokio::test]
async fn test_duplicate_direction_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "3_first.up.sql", "SELECT 1;");
    write(dir.path(), "3_second.tx.up.sql", "SELECT 2;");

    let migrator = discovering_migrator(dir.path());
    let err = migrator.migrations().unwrap_err();
    assert!(matches!(
        err,
        MigrationError::DuplicateDirection {
            version: 3,
            direction: Direction::Up
        }
    ));
    assert!(migrator.registry().is_empty());
}

#[tokio::test]
async fn test_discovered_version_collision_registers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "1_users.up.sql", "CREATE TABLE users (id int);");
    write(dir.path(), "2_orders.up.sql", "CREATE TABLE orders (id int);");

    let migrator = migrator();
    migrator
        .register(Migration::sql(2, "SELECT 2", "").unwrap())
        .unwrap();

    let err = migrator.discover_sql_migrations(dir.path()).unwrap_err();
    assert!(matches!(err, MigrationError::DuplicateVersion { version: 2 }));
    assert_eq!(migrator.registry().versions(), vec![2]);
}

#[tokio::test]
async fn test_directories_are_scanned_once() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "1_users.up.sql", "CREATE TABLE users (id int);");

    let migrator = migrator();
    migrator.discover_sql_migrations(dir.path()).unwrap();
    migrator.discover_sql_migrations(dir.path()).unwrap();
    assert_eq!(migrator.registry().versions(), vec![1]);

    // Same directory through a different relative spelling.
    migrator
        .discover_sql_migrations(dir.path().join("."))
        .unwrap();

    write(dir.path(), "2_orders.up.sql", "CREATE TABLE orders (id int);");
    migrator.discover_sql_migrations(dir.path()).unwrap();
    assert_eq!(migrator.registry().versions(), vec![1]);
}

#[tokio::test]
async fn test_create_writes_next_template_pair() {
    let dir = tempfile::tempdir().unwrap();
    let migrations_dir = dir.path().join("migrations");
    write_dir_with(&migrations_dir, &[("1_users.up.sql", "CREATE TABLE users (id int);")]);

    let migrator = discovering_migrator(&migrations_dir);
    migrator
        .register(Migration::sql(2, "SELECT 2", "").unwrap())
        .unwrap();
    let pool = MemoryPool::new();

    let result = migrator
        .run(&pool, &["create", "Add", "Orders-Table"])
        .await
        .unwrap();
    assert_eq!((result.old_version, result.new_version), (0, 0));

    let names: Vec<String> = result
        .created_files
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["3_add_orders_table.up.sql", "3_add_orders_table.down.sql"]);
    assert!(result.created_files.iter().all(|path| path.exists()));

    let err = migrator.create("add orders table").unwrap_err();
    assert!(matches!(err, MigrationError::TemplateExists(_)));
    let err = migrator.planned_templates("add  orders table").unwrap_err();
    assert!(matches!(err, MigrationError::TemplateExists(_)));

    let err = migrator.create("   ").unwrap_err();
    assert!(matches!(err, MigrationError::MissingArgument(_)));

    // `create` never touches the database.
    assert!(pool.executed().is_empty());
}

#[tokio::test]
async fn test_create_in_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let migrations_dir = dir.path().join("db").join("migrations");

    let migrator = discovering_migrator(&migrations_dir);
    let planned = migrator.planned_templates("initial").unwrap();
    assert!(!migrations_dir.exists());

    let result = migrator.create("initial").unwrap();
    assert_eq!(result.created_files, planned);

    assert_eq!(result.created_files.len(), 2);
    assert!(migrations_dir.join("1_initial.up.sql").exists());
    assert!(migrations_dir.join("1_initial.down.sql").exists());
}

fn write_dir_with(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).unwrap();
    for (name, contents) in files {
        write(dir, name, contents);
    }
}
