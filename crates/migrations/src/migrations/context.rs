//! Execution context handed to migration actions
//!
//! Whether an action runs inside the transaction that records its version is
//! decided by the migration's transactional flag and passed in explicitly here.
//! Statements go to that transaction when present and to the ambient pool
//! otherwise.

use crate::backends::{
    DatabaseConnection, DatabaseExecutor, DatabasePool, DatabaseRow, DatabaseTransaction, DatabaseValue,
};
use crate::error::MigrationResult;

use super::definitions::Direction;

pub struct MigrationContext<'a> {
    pool: &'a dyn DatabasePool,
    tx: Option<&'a mut (dyn DatabaseTransaction + 'static)>,
    version: i64,
    direction: Direction,
}

impl<'a> MigrationContext<'a> {
    pub(crate) fn new(
        pool: &'a dyn DatabasePool,
        tx: Option<&'a mut (dyn DatabaseTransaction + 'static)>,
        version: i64,
        direction: Direction,
    ) -> Self {
        Self {
            pool,
            tx,
            version,
            direction,
        }
    }

    /// Version of the migration being applied
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether statements run inside the transaction that records the version
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn pool(&self) -> &dyn DatabasePool {
        self.pool
    }

    pub async fn execute(&mut self, sql: &str) -> MigrationResult<u64> {
        self.execute_with(sql, &[]).await
    }

    pub async fn execute_with(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        match &mut self.tx {
            Some(tx) => tx.execute(sql, params).await,
            None => self.pool.execute(sql, params).await,
        }
    }

    pub async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>> {
        match &mut self.tx {
            Some(tx) => tx.fetch_optional(sql, params).await,
            None => self.pool.fetch_optional(sql, params).await,
        }
    }

    /// Execute statements in order
    ///
    /// A single statement goes to the ambient handle. Several statements share
    /// one session: the surrounding transaction if there is one, otherwise a
    /// connection checked out for the whole sequence, so session settings made
    /// by an early statement stay in effect for the later ones.
    pub async fn execute_batch<S>(&mut self, statements: &[S]) -> MigrationResult<()>
    where
        S: AsRef<str> + Sync,
    {
        match statements {
            [] => return Ok(()),
            [statement] => {
                self.execute(statement.as_ref()).await?;
                return Ok(());
            }
            _ => {}
        }

        if let Some(tx) = &mut self.tx {
            for statement in statements {
                tx.execute(statement.as_ref(), &[]).await?;
            }
            return Ok(());
        }

        let mut conn = self.pool.acquire().await?;
        tracing::debug!(
            "running {} statements for migration {} on connection {}",
            statements.len(),
            self.version,
            conn.connection_id()
        );
        for statement in statements {
            conn.execute(statement.as_ref(), &[]).await?;
        }

        Ok(())
    }

    /// Check out a dedicated connection from the pool
    pub async fn acquire(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        self.pool.acquire().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryPool;

    #[tokio::test]
    async fn test_batch_without_transaction_uses_one_connection() {
        let pool = MemoryPool::new();
        let mut ctx = MigrationContext::new(&pool, None, 1, Direction::Up);
        assert!(!ctx.in_transaction());

        ctx.execute_batch(&["SET search_path = app", "CREATE TABLE users (id int)"])
            .await
            .unwrap();

        let executed = pool.executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0].connection_id, executed[1].connection_id);
        assert!(!executed[0].in_transaction);
    }

    #[tokio::test]
    async fn test_statements_follow_transaction() {
        let pool = MemoryPool::new();
        let mut tx = pool.begin_transaction().await.unwrap();
        {
            let mut ctx = MigrationContext::new(&pool, Some(&mut *tx), 2, Direction::Down);
            assert!(ctx.in_transaction());
            assert_eq!(ctx.direction(), Direction::Down);
            ctx.execute_batch(&["DROP TABLE a", "DROP TABLE b"]).await.unwrap();
        }
        assert!(pool.executed().is_empty());

        tx.commit().await.unwrap();
        let executed = pool.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed.iter().all(|stmt| stmt.in_transaction));
    }
}
