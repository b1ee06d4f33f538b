use crate::connection::Connection;
use crate::core::Result;
use futures::future::BoxFuture;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Committed,
    RolledBack,
}

/// Run `op` inside a transaction on an already open connection.
///
/// Commits when `op` succeeds. When `op` fails the transaction is rolled
/// back and the original error is returned; a failing rollback is logged but
/// never replaces it. If the commit itself fails, the transaction is rolled
/// back and the commit error is returned.
pub async fn transactional<C, T, F>(conn: &mut C, op: F) -> Result<T>
where
    C: Connection + ?Sized,
    F: for<'x> FnOnce(&'x mut C) -> BoxFuture<'x, Result<T>>,
{
    conn.begin().await?;

    let outcome = op(&mut *conn).await;
    let (result, state) = match outcome {
        Ok(value) => match conn.commit().await {
            Ok(()) => (Ok(value), Outcome::Committed),
            Err(err) => {
                error!(error = %err, "Commit failed, rolling back");
                rollback_quietly(conn).await;
                (Err(err), Outcome::RolledBack)
            }
        },
        Err(err) => {
            error!(error = %err, "Transaction failed, rolling back");
            rollback_quietly(conn).await;
            (Err(err), Outcome::RolledBack)
        }
    };

    debug!(outcome = ?state, "Transaction finished");
    result
}

async fn rollback_quietly<C: Connection + ?Sized>(conn: &mut C) {
    if !conn.is_in_transaction() {
        return;
    }
    if let Err(err) = conn.rollback().await {
        error!(error = %err, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Backend, MemoryBackend};
    use crate::core::{DbError, QueryDescriptor, Value};

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .run("CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER)")
            .unwrap();
        backend
            .run("INSERT INTO accounts VALUES (1, 100), (2, 0)")
            .unwrap();
        backend
    }

    fn balance(backend: &MemoryBackend, id: i64) -> Value {
        let result = backend
            .run(QueryDescriptor::with_params(
                "SELECT balance FROM accounts WHERE id = $1",
                [id],
            ))
            .unwrap();
        result.rows[0].get("balance").cloned().unwrap()
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let backend = backend();
        let mut conn = backend.connect().await.unwrap();

        let moved = transactional(&mut conn, |c| {
            Box::pin(async move {
                c.execute(&"UPDATE accounts SET balance = balance - 40 WHERE id = 1".into())
                    .await?;
                c.execute(&"UPDATE accounts SET balance = balance + 40 WHERE id = 2".into())
                    .await?;
                Ok::<_, DbError>(40)
            })
        })
        .await
        .unwrap();

        assert_eq!(moved, 40);
        assert!(!conn.is_in_transaction());
        assert_eq!(balance(&backend, 1), Value::Integer(60));
        assert_eq!(backend.stats().commits, 1);
    }

    #[tokio::test]
    async fn test_rollback_reraises_original_error() {
        let backend = backend();
        let mut conn = backend.connect().await.unwrap();

        let err = transactional(&mut conn, |c| {
            Box::pin(async move {
                c.execute(&"UPDATE accounts SET balance = 0 WHERE id = 1".into())
                    .await?;
                Err::<(), _>(DbError::Fatal("abort transfer".into()))
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, DbError::Fatal(msg) if msg == "abort transfer"));
        assert_eq!(balance(&backend, 1), Value::Integer(100));
        assert_eq!(backend.stats().rollbacks, 1);
    }
}
