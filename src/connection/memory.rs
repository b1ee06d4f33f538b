use super::faults::{FaultPlan, FaultRule};
use super::{Backend, Connection};
use crate::core::{DbError, QueryDescriptor, Result};
use crate::executor::{ExecutionContext, ExecutorPipeline};
use crate::parser::{SqlParserAdapter, Statement};
use crate::result::QueryResult;
use crate::storage::MemoryStore;
use crate::transaction::UndoLog;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// In-process SQL backend.
///
/// Clones share one store. Statements run against the shared tables as soon
/// as they execute; an open transaction keeps an undo log so it can be rolled
/// back, and other connections see its uncommitted writes.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

struct Shared {
    store: RwLock<MemoryStore>,
    parser: SqlParserAdapter,
    pipeline: ExecutorPipeline,
    faults: Mutex<FaultPlan>,
    counters: Counters,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Counters {
    opened: AtomicU64,
    released: AtomicU64,
    statements: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// Snapshot of backend activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendStats {
    pub connections_opened: u64,
    pub connections_released: u64,
    pub open_connections: u64,
    /// Calls to `execute`, including those that failed.
    pub statements_executed: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

impl std::fmt::Display for BackendStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Backend Stats: {} open ({} opened, {} released), {} statements, {} commits, {} rollbacks",
            self.open_connections,
            self.connections_opened,
            self.connections_released,
            self.statements_executed,
            self.commits,
            self.rollbacks
        )
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                store: RwLock::new(MemoryStore::new()),
                parser: SqlParserAdapter::new(),
                pipeline: ExecutorPipeline::with_default_executors(),
                faults: Mutex::new(FaultPlan::new()),
                counters: Counters::default(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Run one statement directly against the store, outside any connection.
    ///
    /// Faults, latency and statistics do not apply. Meant for seeding and
    /// inspecting data.
    pub fn run(&self, query: impl Into<QueryDescriptor>) -> Result<QueryResult> {
        let query = query.into();
        let stmt = self.shared.parser.parse(&query)?;
        let mut store = self.shared.store.write()?;
        self.shared.execute_atomically(&stmt, &mut store, None)
    }

    /// Run several statements in order, stopping at the first failure.
    pub fn run_script<I, Q>(&self, statements: I) -> Result<()>
    where
        I: IntoIterator<Item = Q>,
        Q: Into<QueryDescriptor>,
    {
        for statement in statements {
            self.run(statement)?;
        }
        Ok(())
    }

    pub fn inject(&self, rule: FaultRule) -> Result<()> {
        self.shared.faults.lock()?.add_rule(rule);
        Ok(())
    }

    /// Make the next `count` connection attempts fail with an acquisition error.
    pub fn fail_next_connects(&self, count: u32) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.fail_next_connects(count);
        }
    }

    /// Suspend every statement matching `pattern` for `delay` before it runs.
    pub fn latency(&self, pattern: &str, delay: Duration) -> Result<()> {
        self.shared.faults.lock()?.add_latency(pattern, delay)
    }

    pub fn clear_faults(&self) -> Result<()> {
        self.shared.faults.lock()?.clear();
        Ok(())
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.shared.store.read()?.table_names())
    }

    pub fn stats(&self) -> BackendStats {
        let c = &self.shared.counters;
        let opened = c.opened.load(Ordering::SeqCst);
        let released = c.released.load(Ordering::SeqCst);
        BackendStats {
            connections_opened: opened,
            connections_released: released,
            open_connections: opened.saturating_sub(released),
            statements_executed: c.statements.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    /// Run one statement; if it fails part way, its own changes are undone so
    /// the store is left as it was. On success the changes join `txn` when a
    /// transaction is open.
    fn execute_atomically(
        &self,
        stmt: &Statement,
        store: &mut MemoryStore,
        txn: Option<&mut UndoLog>,
    ) -> Result<QueryResult> {
        let mut statement_log = UndoLog::new();
        let result = {
            let mut ctx = ExecutionContext::new(store, Some(&mut statement_log));
            self.pipeline.execute(stmt, &mut ctx)
        };

        match result {
            Ok(result) => {
                if let Some(txn) = txn {
                    txn.absorb(statement_log);
                }
                Ok(result)
            }
            Err(err) => {
                statement_log.rollback(store);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Conn = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        if let Some(err) = self.shared.faults.lock()?.check_connect() {
            return Err(err);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.counters.opened.fetch_add(1, Ordering::SeqCst);
        debug!(connection = id, "Opened memory connection");

        Ok(MemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
            state: ConnectionState::Active,
            undo: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    InTransaction,
    Closed,
}

/// A session on a [`MemoryBackend`].
///
/// Dropping an open connection rolls back its transaction and counts it as
/// released, so a cancelled operation never leaks one.
pub struct MemoryConnection {
    id: u64,
    shared: Arc<Shared>,
    state: ConnectionState,
    undo: Option<UndoLog>,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(DbError::ExecutionError("Connection is closed".into()));
        }
        Ok(())
    }

    fn begin_now(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == ConnectionState::InTransaction {
            return Err(DbError::ExecutionError("Transaction already active".into()));
        }
        self.state = ConnectionState::InTransaction;
        self.undo = Some(UndoLog::new());
        debug!(connection = self.id, "BEGIN");
        Ok(())
    }

    fn commit_now(&mut self) -> Result<()> {
        if self.state != ConnectionState::InTransaction {
            return Err(DbError::ExecutionError("No active transaction".into()));
        }
        self.state = ConnectionState::Active;
        self.undo = None;
        self.shared.counters.commits.fetch_add(1, Ordering::SeqCst);
        debug!(connection = self.id, "COMMIT");
        Ok(())
    }

    fn rollback_now(&mut self) -> Result<()> {
        if self.state != ConnectionState::InTransaction {
            return Err(DbError::ExecutionError("No active transaction".into()));
        }
        self.state = ConnectionState::Active;

        if let Some(log) = self.undo.take() {
            let mut store = self.shared.store.write()?;
            let undone = log.rollback(&mut store);
            debug!(connection = self.id, undone, "ROLLBACK");
        }
        self.shared.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close_now(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }

        let rolled_back = if self.state == ConnectionState::InTransaction {
            self.rollback_now()
        } else {
            Ok(())
        };

        self.state = ConnectionState::Closed;
        self.shared.counters.released.fetch_add(1, Ordering::SeqCst);
        debug!(connection = self.id, "Closed memory connection");
        rolled_back
    }

    fn run_statement(&mut self, stmt: &Statement) -> Result<QueryResult> {
        let mut store = self.shared.store.write()?;
        self.shared
            .execute_atomically(stmt, &mut store, self.undo.as_mut())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, query: &QueryDescriptor) -> Result<QueryResult> {
        self.ensure_open()?;
        self.shared.counters.statements.fetch_add(1, Ordering::SeqCst);

        let delay = self.shared.faults.lock()?.latency_for(query.sql());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fault = self.shared.faults.lock()?.check_statement(query.sql());
        if let Some(err) = fault {
            return Err(err);
        }

        let stmt = self.shared.parser.parse(query)?;
        match stmt {
            Statement::Begin => self.begin_now().map(|_| QueryResult::empty()),
            Statement::Commit => self.commit_now().map(|_| QueryResult::empty()),
            Statement::Rollback => self.rollback_now().map(|_| QueryResult::empty()),
            stmt => self.run_statement(&stmt),
        }
    }

    async fn begin(&mut self) -> Result<()> {
        self.begin_now()
    }

    async fn commit(&mut self) -> Result<()> {
        self.commit_now()
    }

    async fn rollback(&mut self) -> Result<()> {
        self.rollback_now()
    }

    async fn close(&mut self) -> Result<()> {
        self.close_now()
    }

    fn is_in_transaction(&self) -> bool {
        self.state == ConnectionState::InTransaction
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.state == ConnectionState::InTransaction {
            warn!(connection = self.id, "Connection dropped inside a transaction, rolling back");
        }
        if let Err(err) = self.close_now() {
            warn!(connection = self.id, error = %err, "Failed to release dropped connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorKind, Value};

    fn backend_with_users() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .run_script([
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER)",
                "INSERT INTO users VALUES (1, 'Alice', 30), (2, 'Bob', 25)",
            ])
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_execute_with_parameters() {
        let backend = backend_with_users();
        let mut conn = backend.connect().await.unwrap();

        let query = QueryDescriptor::with_params("SELECT name FROM users WHERE age > $1", vec![26]);
        let result = conn.execute(&query).await.unwrap();

        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0].get("name"), Some(&Value::from("Alice")));
    }

    #[tokio::test]
    async fn test_rollback_undoes_writes() {
        let backend = backend_with_users();
        let mut conn = backend.connect().await.unwrap();

        conn.begin().await.unwrap();
        conn.execute(&"INSERT INTO users VALUES (3, 'Carol', 41)".into())
            .await
            .unwrap();
        conn.execute(&"DELETE FROM users WHERE id = 1".into())
            .await
            .unwrap();
        conn.rollback().await.unwrap();

        let result = backend.run("SELECT id FROM users ORDER BY id").unwrap();
        let ids: Vec<_> = result.rows.iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(Value::Integer(1)), Some(Value::Integer(2))]);
        assert_eq!(backend.stats().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_failed_statement_leaves_no_partial_write() {
        let backend = backend_with_users();
        let mut conn = backend.connect().await.unwrap();

        // Second row violates the primary key after the first was inserted
        let err = conn
            .execute(&"INSERT INTO users VALUES (5, 'Eve', 20), (1, 'Dup', 20)".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);

        let result = backend.run("SELECT * FROM users").unwrap();
        assert_eq!(result.row_count(), 2);
    }

    #[tokio::test]
    async fn test_sql_transaction_control() {
        let backend = backend_with_users();
        let mut conn = backend.connect().await.unwrap();

        conn.execute(&"BEGIN".into()).await.unwrap();
        assert!(conn.is_in_transaction());
        conn.execute(&"UPDATE users SET age = age + 1".into())
            .await
            .unwrap();
        conn.execute(&"COMMIT".into()).await.unwrap();

        let result = backend.run("SELECT age FROM users WHERE id = 2").unwrap();
        assert_eq!(result.rows[0].get("age"), Some(&Value::Integer(26)));
        assert_eq!(backend.stats().commits, 1);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let backend = backend_with_users();
        backend
            .inject(FaultRule::transient("FROM users").unwrap().times(1))
            .unwrap();
        let mut conn = backend.connect().await.unwrap();

        let query: QueryDescriptor = "SELECT * FROM users".into();
        let err = conn.execute(&query).await.unwrap_err();
        assert!(err.is_transient());
        assert!(conn.execute(&query).await.is_ok());
        assert_eq!(backend.stats().statements_executed, 2);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_statements() {
        let backend = backend_with_users();
        let mut conn = backend.connect().await.unwrap();
        conn.close().await.unwrap();

        assert!(conn.is_closed());
        assert!(conn.execute(&"SELECT * FROM users".into()).await.is_err());
        assert_eq!(backend.stats().connections_released, 1);

        drop(conn);
        assert_eq!(backend.stats().connections_released, 1);
    }

    #[test]
    fn test_stats_display() {
        let stats = BackendStats {
            connections_opened: 3,
            connections_released: 2,
            open_connections: 1,
            ..Default::default()
        };
        assert!(stats.to_string().contains("1 open (3 opened, 2 released)"));
    }
}
