//! In-Memory Backend
//!
//! A process-local stand-in for a PostgreSQL server. It understands the ledger,
//! existence and locking statements issued by the migration engine and journals
//! every other statement together with the connection that ran it.
//!
//! Transactions buffer ledger inserts and journal entries until commit; a
//! rollback (or dropping the transaction) discards them. `LOCK TABLE` inside a
//! transaction takes an async mutex held until the transaction ends, so two
//! concurrent transactions serialize the same way they would on PostgreSQL.
//! Schema and table creation take effect immediately, even inside a
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::core::*;
use super::DatabaseBackendType;
use crate::error::{MigrationError, MigrationResult};

/// Behaviour switches used to imitate different PostgreSQL-compatible servers
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Whether `SET idle_in_transaction_session_timeout` is accepted
    pub supports_idle_timeout: bool,
    /// Error message returned for `LOCK TABLE`, if table locks are unsupported
    pub lock_error: Option<String>,
    /// Reported backend type
    pub backend_type: DatabaseBackendType,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            supports_idle_timeout: true,
            lock_error: None,
            backend_type: DatabaseBackendType::Memory,
        }
    }
}

impl MemoryOptions {
    /// PostgreSQL before 9.6, which lacks the idle transaction timeout setting
    pub fn legacy_postgres() -> Self {
        Self {
            supports_idle_timeout: false,
            ..Self::default()
        }
    }

    pub fn cockroachdb() -> Self {
        Self {
            lock_error: Some(r#"ERROR: at or near "lock": syntax error (SQLSTATE 42601)"#.to_string()),
            backend_type: DatabaseBackendType::CockroachDB,
            ..Self::default()
        }
    }

    pub fn yugabytedb() -> Self {
        Self {
            lock_error: Some("ERROR: lock mode not supported yet".to_string()),
            backend_type: DatabaseBackendType::YugabyteDB,
            ..Self::default()
        }
    }

    /// A server that rejects table locks with an arbitrary error
    pub fn failing_lock(message: impl Into<String>) -> Self {
        Self {
            lock_error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// One statement that reached the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub connection_id: u64,
    pub in_transaction: bool,
}

/// One row of a ledger table
#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub id: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct MemoryData {
    schemas: BTreeSet<String>,
    tables: BTreeMap<String, Vec<LedgerRow>>,
    next_row_id: i64,
    journal: Vec<ExecutedStatement>,
    failures: Vec<String>,
    options: MemoryOptions,
}

struct MemoryShared {
    data: Mutex<MemoryData>,
    table_lock: Arc<AsyncMutex<()>>,
    next_connection_id: AtomicU64,
}

/// In-memory connection pool
#[derive(Clone)]
pub struct MemoryPool {
    shared: Arc<MemoryShared>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::with_options(MemoryOptions::default())
    }

    pub fn with_options(options: MemoryOptions) -> Self {
        let mut schemas = BTreeSet::new();
        schemas.insert("public".to_string());

        Self {
            shared: Arc::new(MemoryShared {
                data: Mutex::new(MemoryData {
                    schemas,
                    tables: BTreeMap::new(),
                    next_row_id: 1,
                    journal: Vec::new(),
                    failures: Vec::new(),
                    options,
                }),
                table_lock: Arc::new(AsyncMutex::new(())),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    /// Make every statement containing `fragment` fail
    pub fn fail_on(&self, fragment: impl Into<String>) {
        self.shared.data.lock().failures.push(fragment.into());
    }

    pub fn clear_failures(&self) {
        self.shared.data.lock().failures.clear();
    }

    /// Every committed or ambient statement, in execution order
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.shared.data.lock().journal.clone()
    }

    /// Committed statements containing `fragment`
    pub fn executed_matching(&self, fragment: &str) -> Vec<ExecutedStatement> {
        self.shared
            .data
            .lock()
            .journal
            .iter()
            .filter(|stmt| stmt.sql.contains(fragment))
            .cloned()
            .collect()
    }

    /// Committed rows of a ledger table, in insertion order
    pub fn ledger_rows(&self, table: &str) -> Vec<LedgerRow> {
        self.shared
            .data
            .lock()
            .tables
            .get(&qualify(table))
            .cloned()
            .unwrap_or_default()
    }

    /// Committed versions of a ledger table, in insertion order
    pub fn ledger_versions(&self, table: &str) -> Vec<i64> {
        self.ledger_rows(table).iter().map(|row| row.version).collect()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.shared.data.lock().tables.contains_key(&qualify(table))
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.shared.data.lock().schemas.contains(schema)
    }

    fn session(&self, transactional: bool) -> Session {
        Session {
            shared: self.shared.clone(),
            connection_id: self.shared.next_connection_id.fetch_add(1, Ordering::Relaxed),
            tx: transactional.then(TxState::default),
        }
    }
}

#[async_trait]
impl DatabasePool for MemoryPool {
    async fn acquire(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        Ok(Box::new(MemoryConnection {
            session: self.session(false),
        }))
    }

    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let session = self.session(true);
        tracing::trace!("memory transaction begun on connection {}", session.connection_id);
        Ok(Box::new(MemoryTransaction { session }))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        self.session(false).execute(sql, params).await
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>> {
        self.session(false).fetch_optional(sql, params).await
    }

    async fn close(&self) -> MigrationResult<()> {
        Ok(())
    }

    fn backend_type(&self) -> DatabaseBackendType {
        self.shared.data.lock().options.backend_type
    }
}

/// Dedicated in-memory connection
pub struct MemoryConnection {
    session: Session,
}

#[async_trait]
impl DatabaseExecutor for MemoryConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        self.session.execute(sql, params).await
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>> {
        self.session.fetch_optional(sql, params).await
    }
}

impl DatabaseConnection for MemoryConnection {
    fn connection_id(&self) -> u64 {
        self.session.connection_id
    }
}

/// In-memory transaction
pub struct MemoryTransaction {
    session: Session,
}

#[async_trait]
impl DatabaseExecutor for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        self.session.execute(sql, params).await
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>> {
        self.session.fetch_optional(sql, params).await
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn commit(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self
            .session
            .tx
            .take()
            .ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))?;

        let mut data = self.session.shared.data.lock();
        for (table, version) in tx.pending_rows {
            let id = data.next_row_id;
            data.next_row_id += 1;
            data.tables.entry(table).or_default().push(LedgerRow {
                id,
                version,
                created_at: Utc::now(),
            });
        }
        data.journal.extend(tx.pending_journal);
        // The table lock guard in `tx.lock` is released when `tx` goes out of scope.
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> MigrationResult<()> {
        self.session
            .tx
            .take()
            .ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))?;
        Ok(())
    }
}

/// In-memory row
pub struct MemoryRow {
    values: Vec<DatabaseValue>,
}

impl DatabaseRow for MemoryRow {
    fn get_by_index(&self, index: usize) -> MigrationResult<DatabaseValue> {
        self.values
            .get(index)
            .cloned()
            .ok_or_else(|| MigrationError::Query(format!("Column {} not found", index)))
    }

    fn column_count(&self) -> usize {
        self.values.len()
    }
}

#[derive(Default)]
struct TxState {
    pending_rows: Vec<(String, i64)>,
    pending_journal: Vec<ExecutedStatement>,
    lock: Option<OwnedMutexGuard<()>>,
}

struct Session {
    shared: Arc<MemoryShared>,
    connection_id: u64,
    tx: Option<TxState>,
}

impl Session {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        self.check_failures(sql)?;

        let affected = match Statement::classify(sql) {
            Statement::SetIdleTimeout => {
                if !self.shared.data.lock().options.supports_idle_timeout {
                    return Err(MigrationError::Query(
                        r#"unrecognized configuration parameter "idle_in_transaction_session_timeout""#
                            .to_string(),
                    ));
                }
                0
            }
            Statement::LockTable(table) => {
                self.lock_table(&table).await?;
                0
            }
            Statement::CreateSchema(schema) => {
                self.shared.data.lock().schemas.insert(schema);
                0
            }
            Statement::CreateTable(table) => {
                let mut data = self.shared.data.lock();
                let (schema, _) = split_qualified(&table);
                if !data.schemas.contains(schema) {
                    return Err(MigrationError::Query(format!(
                        r#"schema "{}" does not exist"#,
                        schema
                    )));
                }
                data.tables.entry(table).or_default();
                0
            }
            Statement::InsertInto(table) if self.is_ledger(&table) => {
                let version = params.first().and_then(DatabaseValue::as_i64).ok_or_else(|| {
                    MigrationError::Query("ledger insert expects an integer version".to_string())
                })?;
                match self.tx.as_mut() {
                    Some(tx) => tx.pending_rows.push((table, version)),
                    None => {
                        let mut data = self.shared.data.lock();
                        let id = data.next_row_id;
                        data.next_row_id += 1;
                        data.tables.entry(table).or_default().push(LedgerRow {
                            id,
                            version,
                            created_at: Utc::now(),
                        });
                    }
                }
                1
            }
            _ => 0,
        };

        self.record(sql);
        Ok(affected)
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<Box<dyn DatabaseRow>>> {
        self.check_failures(sql)?;

        let row = match Statement::classify(sql) {
            Statement::SelectVersion(table) => {
                let data = self.shared.data.lock();
                let committed = data.tables.get(&table).ok_or_else(|| {
                    MigrationError::Query(format!(r#"relation "{}" does not exist"#, table))
                })?;

                let pending = self.tx.as_ref().and_then(|tx| {
                    tx.pending_rows
                        .iter()
                        .rev()
                        .find(|(name, _)| *name == table)
                        .map(|(_, version)| *version)
                });

                let latest = pending.or_else(|| committed.last().map(|row| row.version));
                latest.map(|version| vec![DatabaseValue::Int64(version)])
            }
            Statement::TableExists => {
                let schema = param_str(params, 0)?;
                let table = param_str(params, 1)?;
                let qualified = format!("{}.{}", schema, table);
                let exists = self.shared.data.lock().tables.contains_key(&qualified);
                exists.then(|| vec![DatabaseValue::Int32(1)])
            }
            Statement::SchemaExists => {
                let schema = param_str(params, 0)?;
                let exists = self.shared.data.lock().schemas.contains(schema);
                exists.then(|| vec![DatabaseValue::Int32(1)])
            }
            _ => None,
        };

        self.record(sql);
        Ok(row.map(|values| Box::new(MemoryRow { values }) as Box<dyn DatabaseRow>))
    }

    async fn lock_table(&mut self, table: &str) -> MigrationResult<()> {
        {
            let data = self.shared.data.lock();
            if let Some(message) = &data.options.lock_error {
                return Err(MigrationError::Query(message.clone()));
            }
            if !data.tables.contains_key(table) {
                return Err(MigrationError::Query(format!(
                    r#"relation "{}" does not exist"#,
                    table
                )));
            }
        }

        let lock = self.shared.table_lock.clone();
        match self.tx.as_mut() {
            Some(tx) if tx.lock.is_none() => {
                tx.lock = Some(lock.lock_owned().await);
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(MigrationError::Query(
                "LOCK TABLE can only be used in transaction blocks".to_string(),
            )),
        }
    }

    fn is_ledger(&self, table: &str) -> bool {
        self.shared.data.lock().tables.contains_key(table)
    }

    fn check_failures(&self, sql: &str) -> MigrationResult<()> {
        let data = self.shared.data.lock();
        match data.failures.iter().find(|fragment| sql.contains(fragment.as_str())) {
            Some(fragment) => Err(MigrationError::Query(format!(
                "simulated failure for statement containing {:?}",
                fragment
            ))),
            None => Ok(()),
        }
    }

    fn record(&mut self, sql: &str) {
        let statement = ExecutedStatement {
            sql: sql.to_string(),
            connection_id: self.connection_id,
            in_transaction: self.tx.is_some(),
        };
        match self.tx.as_mut() {
            Some(tx) => tx.pending_journal.push(statement),
            None => self.shared.data.lock().journal.push(statement),
        }
    }
}

/// The statements this backend gives meaning to
#[derive(Debug, PartialEq, Eq)]
enum Statement {
    SetIdleTimeout,
    LockTable(String),
    CreateSchema(String),
    CreateTable(String),
    SelectVersion(String),
    InsertInto(String),
    TableExists,
    SchemaExists,
    Other,
}

impl Statement {
    fn classify(sql: &str) -> Self {
        let words: Vec<&str> = sql.split_whitespace().collect();
        let upper: Vec<String> = words.iter().map(|w| w.to_uppercase()).collect();
        let starts_with = |prefix: &[&str]| {
            upper.len() > prefix.len() && prefix.iter().zip(&upper).all(|(p, w)| *p == w)
        };
        let identifier = |index: usize| qualify(words[index]);

        if upper.first().map(String::as_str) == Some("SET")
            && upper
                .get(1)
                .map_or(false, |w| w.starts_with("IDLE_IN_TRANSACTION_SESSION_TIMEOUT"))
        {
            Statement::SetIdleTimeout
        } else if starts_with(&["LOCK", "TABLE"]) {
            Statement::LockTable(identifier(2))
        } else if starts_with(&["CREATE", "SCHEMA", "IF", "NOT", "EXISTS"]) {
            Statement::CreateSchema(clean_identifier(words[5]).to_string())
        } else if starts_with(&["CREATE", "TABLE", "IF", "NOT", "EXISTS"]) {
            Statement::CreateTable(identifier(5))
        } else if starts_with(&["SELECT", "VERSION", "FROM"]) {
            Statement::SelectVersion(identifier(3))
        } else if starts_with(&["INSERT", "INTO"]) {
            Statement::InsertInto(identifier(2))
        } else if upper.iter().any(|w| w == "PG_TABLES") {
            Statement::TableExists
        } else if upper.iter().any(|w| w == "PG_NAMESPACE") {
            Statement::SchemaExists
        } else {
            Statement::Other
        }
    }
}

fn clean_identifier(word: &str) -> &str {
    word.split('(')
        .next()
        .unwrap_or(word)
        .trim_end_matches(';')
        .trim_matches('"')
}

/// Schema-qualify a table name, defaulting to `public`
fn qualify(name: &str) -> String {
    let name = clean_identifier(name);
    if name.contains('.') {
        name.replace('"', "")
    } else {
        format!("public.{}", name)
    }
}

fn split_qualified(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or(("public", name))
}

fn param_str(params: &[DatabaseValue], index: usize) -> MigrationResult<&str> {
    params
        .get(index)
        .and_then(DatabaseValue::as_str)
        .ok_or_else(|| MigrationError::Query(format!("expected text parameter ${}", index + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_classification() {
        assert_eq!(
            Statement::classify("LOCK TABLE gopg_migrations IN EXCLUSIVE MODE"),
            Statement::LockTable("public.gopg_migrations".to_string())
        );
        assert_eq!(
            Statement::classify("CREATE TABLE IF NOT EXISTS audit.versions (\n id serial\n)"),
            Statement::CreateTable("audit.versions".to_string())
        );
        assert_eq!(
            Statement::classify("SELECT version FROM gopg_migrations ORDER BY id DESC LIMIT 1"),
            Statement::SelectVersion("public.gopg_migrations".to_string())
        );
        assert_eq!(
            Statement::classify("SET idle_in_transaction_session_timeout = 0"),
            Statement::SetIdleTimeout
        );
        assert_eq!(Statement::classify("CREATE TABLE users (id int)"), Statement::Other);
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_ledger_rows() {
        let pool = MemoryPool::new();
        pool.execute("CREATE TABLE IF NOT EXISTS ledger (id serial)", &[])
            .await
            .unwrap();

        let mut tx = pool.begin_transaction().await.unwrap();
        tx.execute("INSERT INTO ledger (version, created_at) VALUES ($1, now())", &[5i64.into()])
            .await
            .unwrap();
        let row = tx
            .fetch_optional("SELECT version FROM ledger ORDER BY id DESC LIMIT 1", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_column_i64(row.as_ref()).unwrap(), 5);
        tx.rollback().await.unwrap();

        assert!(pool.ledger_versions("ledger").is_empty());
    }

    #[tokio::test]
    async fn test_commit_publishes_rows_and_journal() {
        let pool = MemoryPool::new();
        pool.execute("CREATE TABLE IF NOT EXISTS ledger (id serial)", &[])
            .await
            .unwrap();

        let mut tx = pool.begin_transaction().await.unwrap();
        tx.execute("INSERT INTO ledger (version, created_at) VALUES ($1, now())", &[1i64.into()])
            .await
            .unwrap();
        tx.execute("CREATE INDEX idx ON users (email)", &[]).await.unwrap();
        assert!(pool.executed_matching("CREATE INDEX").is_empty());
        tx.commit().await.unwrap();

        assert_eq!(pool.ledger_versions("public.ledger"), vec![1]);
        let index = pool.executed_matching("CREATE INDEX");
        assert_eq!(index.len(), 1);
        assert!(index[0].in_transaction);
    }

    #[tokio::test]
    async fn test_lock_outside_transaction_fails() {
        let pool = MemoryPool::new();
        pool.execute("CREATE TABLE IF NOT EXISTS ledger (id serial)", &[])
            .await
            .unwrap();
        let err = pool
            .execute("LOCK TABLE ledger IN EXCLUSIVE MODE", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transaction blocks"));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let pool = MemoryPool::new();
        pool.fail_on("DROP TABLE");
        assert!(pool.execute("DROP TABLE users", &[]).await.is_err());
        pool.clear_failures();
        assert!(pool.execute("DROP TABLE users", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_table_requires_schema() {
        let pool = MemoryPool::new();
        assert!(pool
            .execute("CREATE TABLE IF NOT EXISTS audit.ledger (id serial)", &[])
            .await
            .is_err());
        pool.execute("CREATE SCHEMA IF NOT EXISTS audit", &[]).await.unwrap();
        pool.execute("CREATE TABLE IF NOT EXISTS audit.ledger (id serial)", &[])
            .await
            .unwrap();
        assert!(pool.has_schema("audit"));
        assert!(pool.has_table("audit.ledger"));
    }
}
