//! Concurrent runners sharing one ledger

mod support;

use std::sync::Arc;
use std::time::Duration;

use shift_migrations::{Direction, MemoryPool, Migration, MigrationRunResult};
use support::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_up_applies_each_migration_once() {
    let log = event_log();
    let migrator = Arc::new(migrator());
    for version in 1..=5 {
        migrator
            .register(Migration::new(
                version,
                Recording::with_delay(&log, Duration::from_millis(10)),
            ))
            .unwrap();
    }

    let pool = MemoryPool::new();
    migrator.init(&pool).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let migrator = Arc::clone(&migrator);
            let pool = pool.clone();
            tokio::spawn(async move { migrator.up(&pool, None).await })
        })
        .collect();

    let mut results: Vec<MigrationRunResult> = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    let mut applied: Vec<i64> = results
        .iter()
        .flat_map(|result| result.applied_versions.iter().copied())
        .collect();
    applied.sort_unstable();
    assert_eq!(applied, vec![1, 2, 3, 4, 5]);

    assert_eq!(versions_applied(&log, Direction::Up), vec![1, 2, 3, 4, 5]);
    assert_eq!(pool.ledger_versions("gopg_migrations"), vec![1, 2, 3, 4, 5]);
    assert!(results.iter().all(|result| result.new_version <= 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_up_waits_for_ledger_lock() {
    let log = event_log();
    let migrator = Arc::new(migrator());
    migrator
        .register(Migration::new(
            1,
            Recording::with_delay(&log, Duration::from_millis(100)),
        ))
        .unwrap();

    let pool = MemoryPool::new();
    migrator.init(&pool).await.unwrap();

    let first = {
        let migrator = Arc::clone(&migrator);
        let pool = pool.clone();
        tokio::spawn(async move { migrator.up(&pool, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Blocks on the ledger lock until the first runner commits, then sees version 1.
    let second = migrator.version(&pool).await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!((first.old_version, first.new_version), (0, 1));
    assert_eq!(second.old_version, 1);
    assert_eq!(events(&log).len(), 1);
}
