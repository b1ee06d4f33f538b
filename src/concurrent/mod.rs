use crate::core::{DbError, Result};
use futures::future::try_join_all;
use std::future::Future;
use tracing::warn;

/// Drive every fetch concurrently on the current task and collect their
/// results in the order the fetches were given.
///
/// Fetches interleave only where they await. The first failure is returned
/// and the remaining fetches are dropped at their current await point.
pub async fn join_all<I, Fut, T>(fetches: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T>>,
{
    try_join_all(fetches).await
}

/// Like [`join_all`], but give up with [`DbError::Cancelled`] as soon as
/// `cancel` resolves.
///
/// Unfinished fetches are dropped where they are suspended, which releases
/// the connections they hold.
pub async fn join_all_until<I, Fut, T, C>(fetches: I, cancel: C) -> Result<Vec<T>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T>>,
    C: Future<Output = ()>,
{
    let joined = try_join_all(fetches);
    tokio::select! {
        biased;
        _ = cancel => {
            warn!("Concurrent fetch cancelled");
            Err(DbError::Cancelled)
        }
        results = joined => results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::time::Duration;
    use tokio::time::sleep;

    async fn after(ms: u64, value: &'static str) -> Result<&'static str> {
        sleep(Duration::from_millis(ms)).await;
        Ok(value)
    }

    #[tokio::test]
    async fn test_results_follow_call_order() {
        let results = join_all(vec![after(40, "slow"), after(1, "fast")])
            .await
            .unwrap();

        assert_eq!(results, vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_first_failure_wins() {
        let failing = async {
            sleep(Duration::from_millis(5)).await;
            Err::<&str, _>(DbError::Fatal("no such table".into()))
        };
        let err = join_all(vec![
            Box::pin(after(200, "never")) as BoxFuture<'static, _>,
            Box::pin(failing),
        ])
        .await
        .unwrap_err();

        assert!(matches!(err, DbError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let err = join_all_until([after(500, "late")], sleep(Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Cancelled));
    }

    #[tokio::test]
    async fn test_finishes_before_cancellation() {
        let results = join_all_until([after(1, "a"), after(2, "b")], sleep(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(results, vec!["a", "b"]);
    }
}
