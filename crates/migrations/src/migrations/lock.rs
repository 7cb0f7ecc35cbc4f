//! Ledger lock coordination
//!
//! Every command that reads or writes the ledger runs inside a transaction
//! holding an exclusive lock on the ledger table, so concurrent invocations
//! serialize their read-then-append of the current version. Servers that cannot
//! lock tables (CockroachDB, YugabyteDB) fall back to an unlocked transaction.

use crate::backends::{DatabaseExecutor, DatabasePool, DatabaseTransaction};
use crate::error::{MigrationError, MigrationResult};

use super::ledger::VersionLedger;

/// Error fragment CockroachDB reports for `LOCK TABLE`
pub const COCKROACHDB_LOCK_ERROR: &str = r#"at or near "lock""#;

/// Error fragment YugabyteDB reports for `LOCK TABLE`
pub const YUGABYTEDB_LOCK_ERROR: &str = "lock mode not supported yet";

/// Whether a lock failure means the server has no table locks at all
pub fn is_lock_unsupported(message: &str) -> bool {
    message.contains(COCKROACHDB_LOCK_ERROR) || message.contains(YUGABYTEDB_LOCK_ERROR)
}

/// Open a transaction holding the ledger lock and read the current version
pub async fn begin_locked(
    pool: &dyn DatabasePool,
    ledger: &VersionLedger,
) -> MigrationResult<(Box<dyn DatabaseTransaction>, i64)> {
    let mut tx = pool.begin_transaction().await?;

    let timeout = tx
        .execute("SET idle_in_transaction_session_timeout = 0", &[])
        .await;
    if let Err(err) = timeout {
        tracing::debug!("idle transaction timeout not supported, continuing without it: {}", err);
        rollback_quietly(tx).await;
        tx = pool.begin_transaction().await?;
    }

    let lock_sql = format!("LOCK TABLE {} IN EXCLUSIVE MODE", ledger.qualified_name());
    let locked = tx.execute(&lock_sql, &[]).await;
    if let Err(err) = locked {
        rollback_quietly(tx).await;

        if !is_lock_unsupported(&err.to_string()) {
            return Err(err);
        }

        tracing::warn!(
            "{} does not support table locks; concurrent migration runs are not serialized",
            pool.backend_type()
        );
        tx = pool.begin_transaction().await?;
    }

    let version = ledger.current_version(&mut *tx).await;
    match version {
        Ok(version) => {
            tracing::debug!("ledger {} locked at version {}", ledger.qualified_name(), version);
            Ok((tx, version))
        }
        Err(err) => {
            rollback_quietly(tx).await;
            Err(err)
        }
    }
}

/// Roll back, logging rather than returning a rollback failure
pub(crate) async fn rollback_quietly(tx: Box<dyn DatabaseTransaction>) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!("transaction rollback failed: {}", err);
    }
}

/// Roll back and hand back the error that caused it
pub(crate) async fn rollback_with(tx: Box<dyn DatabaseTransaction>, err: MigrationError) -> MigrationError {
    rollback_quietly(tx).await;
    err
}
