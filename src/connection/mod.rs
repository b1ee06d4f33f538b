pub mod faults;
pub mod memory;

use crate::core::{QueryDescriptor, Result};
use crate::result::QueryResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

pub use faults::{FaultKind, FaultPlan, FaultRule};
pub use memory::{BackendStats, MemoryBackend, MemoryConnection};

/// An open session with a database backend.
///
/// `execute` is the only capability the resilience stages need; transaction
/// control is used by the transaction coordinator.
#[async_trait]
pub trait Connection: Send {
    async fn execute(&mut self, query: &QueryDescriptor) -> Result<QueryResult>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Release the session. Rolls back an open transaction first.
    async fn close(&mut self) -> Result<()>;

    fn is_in_transaction(&self) -> bool;
}

/// Source of fresh connections. Every call opens a new session.
#[async_trait]
pub trait Backend: Send + Sync {
    type Conn: Connection;

    /// Failures must be reported as `DbError::Acquisition`.
    async fn connect(&self) -> Result<Self::Conn>;
}

/// Owns one connection for the length of an operation.
///
/// Prefer [`with_connection`]. When the scope is dropped without
/// [`ConnectionScope::release`] (a cancelled future, a panic) the connection
/// is dropped with it, and the backend's own drop handling releases it.
pub struct ConnectionScope<C: Connection> {
    connection: C,
    released: bool,
}

impl<C: Connection> ConnectionScope<C> {
    pub async fn acquire<B>(backend: &B) -> Result<Self>
    where
        B: Backend<Conn = C> + ?Sized,
    {
        let connection = backend.connect().await?;
        debug!("Connection acquired");
        Ok(Self {
            connection,
            released: false,
        })
    }

    pub fn connection(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Close the connection. Later calls do nothing.
    pub async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let closed = self.connection.close().await;
        debug!("Connection released");
        closed
    }
}

impl<C: Connection> Drop for ConnectionScope<C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.connection.is_in_transaction() {
            warn!("Connection scope dropped with an open transaction");
        } else {
            debug!("Connection scope dropped before release");
        }
    }
}

/// Run `op` with a freshly acquired connection and release it afterwards.
///
/// If acquisition fails, `op` is never invoked and the acquisition error is
/// returned unchanged. An error from `op` takes precedence over an error
/// closing the connection.
pub async fn with_connection<B, T, F>(backend: &B, op: F) -> Result<T>
where
    B: Backend + ?Sized,
    F: for<'c> FnOnce(&'c mut B::Conn) -> BoxFuture<'c, Result<T>>,
{
    let mut scope = ConnectionScope::acquire(backend).await?;
    let outcome = op(scope.connection()).await;
    let released = scope.release().await;

    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(error = %close_err, "Failed to close connection after error");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
    }
}

/// Execute `query`, logging it first when `log_queries` is set.
pub async fn execute_logged<C>(
    conn: &mut C,
    query: &QueryDescriptor,
    log_queries: bool,
) -> Result<QueryResult>
where
    C: Connection + ?Sized,
{
    if log_queries {
        info!(params = query.params().len(), "Executing query: {}", query.sql());
    }
    conn.execute(query).await
}
