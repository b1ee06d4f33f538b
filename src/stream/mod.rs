// ============================================================================
// Batch Stream Producer and Filter Stage
// ============================================================================
//
// A stream reads a table page by page with
// `ORDER BY <key> LIMIT <batch> OFFSET <offset>`, emitting each non-empty
// page and advancing the offset by its length. The first empty page ends
// the stream for good; a new scan needs a new stream.
//
// One connection is held from the first page until the stream ends, fails
// or is dropped. Each page read is retried on transient failures.
//
// ============================================================================

use crate::connection::{Backend, ConnectionScope, execute_logged};
use crate::core::{Result, Row, RowBatch, TableDescriptor};
use crate::retry::RetryExecutor;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// Lazily produced, finite sequence of rows.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Everything needed to read one page.
struct PageSource<B: Backend> {
    backend: Arc<B>,
    retry: RetryExecutor,
    table: TableDescriptor,
    batch_size: usize,
    log_queries: bool,
}

struct Cursor<B: Backend> {
    source: Arc<PageSource<B>>,
    scope: Option<ConnectionScope<B::Conn>>,
    offset: usize,
}

/// Stream of non-empty [`RowBatch`]es read from one table.
pub struct BatchStream {
    inner: BoxStream<'static, Result<RowBatch>>,
}

impl BatchStream {
    /// Open a paging stream over `table`. A `batch_size` of 0 reads as 1.
    pub fn open<B>(
        backend: Arc<B>,
        table: TableDescriptor,
        batch_size: usize,
        retry: RetryExecutor,
        log_queries: bool,
    ) -> Self
    where
        B: Backend + 'static,
    {
        let cursor = Cursor {
            source: Arc::new(PageSource {
                backend,
                retry,
                table,
                batch_size: batch_size.max(1),
                log_queries,
            }),
            scope: None,
            offset: 0,
        };

        Self {
            inner: stream::try_unfold(cursor, next_batch::<B>).boxed(),
        }
    }

    /// Flatten batches into single rows, in order.
    pub fn rows(self) -> RowStream {
        self.map_ok(|batch| stream::iter(batch.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// The filter stage: forward only rows satisfying `predicate`, keeping
    /// their relative order.
    pub fn filter_rows<P>(self, mut predicate: P) -> RowStream
    where
        P: FnMut(&Row) -> bool + Send + 'static,
    {
        self.rows()
            .try_filter(move |row| futures::future::ready(predicate(row)))
            .boxed()
    }
}

impl Stream for BatchStream {
    type Item = Result<RowBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

async fn next_batch<B: Backend>(mut cursor: Cursor<B>) -> Result<Option<(RowBatch, Cursor<B>)>> {
    let source = Arc::clone(&cursor.source);
    let mut scope = match cursor.scope.take() {
        Some(scope) => scope,
        None => ConnectionScope::acquire(source.backend.as_ref()).await?,
    };

    let query = source.table.page_query(source.batch_size, cursor.offset);
    let log_queries = source.log_queries;
    debug!(table = source.table.table(), offset = cursor.offset, "Reading page");

    let page = source
        .retry
        .run_with(query.sql(), scope.connection(), |conn| {
            let query = query.clone();
            Box::pin(async move { execute_logged(conn, &query, log_queries).await })
        })
        .await;

    let rows = match page {
        Ok(result) => result.into_rows(),
        Err(err) => {
            if let Err(close_err) = scope.release().await {
                warn!(error = %close_err, "Failed to release stream connection");
            }
            return Err(err);
        }
    };

    if rows.is_empty() {
        debug!(table = source.table.table(), rows = cursor.offset, "Stream exhausted");
        scope.release().await?;
        return Ok(None);
    }

    let batch = RowBatch::new(cursor.offset, rows);
    cursor.offset += batch.len();
    cursor.scope = Some(scope);
    Ok(Some((batch, cursor)))
}

/// Stock predicate: rows whose numeric `age` column exceeds `threshold`.
/// Rows without a numeric age never match.
pub fn age_above(threshold: i64) -> impl Fn(&Row) -> bool + Send + Sync + Clone + 'static {
    move |row| {
        row.get("age")
            .and_then(|age| age.as_f64())
            .is_some_and(|age| age > threshold as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{FaultRule, MemoryBackend};
    use crate::core::{ErrorKind, QueryDescriptor, Value};
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    fn backend(ages: &[i64]) -> Arc<MemoryBackend> {
        let backend = MemoryBackend::new();
        backend
            .run("CREATE TABLE user_data (id INTEGER PRIMARY KEY, age INTEGER)")
            .unwrap();
        for (id, age) in ages.iter().enumerate() {
            backend
                .run(QueryDescriptor::with_params(
                    "INSERT INTO user_data VALUES ($1, $2)",
                    [id as i64, *age],
                ))
                .unwrap();
        }
        Arc::new(backend)
    }

    fn open(backend: &Arc<MemoryBackend>, batch_size: usize) -> BatchStream {
        BatchStream::open(
            Arc::clone(backend),
            TableDescriptor::new("user_data", "id").unwrap(),
            batch_size,
            RetryExecutor::new(RetryPolicy::new(2, Duration::from_millis(1))),
            false,
        )
    }

    #[tokio::test]
    async fn test_batches_until_empty_page() {
        let backend = backend(&[20, 30, 26, 10, 45]);
        let batches: Vec<RowBatch> = open(&backend, 2).try_collect().await.unwrap();

        let sizes: Vec<usize> = batches.iter().map(RowBatch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let offsets: Vec<usize> = batches.iter().map(RowBatch::offset).collect();
        assert_eq!(offsets, vec![0, 2, 4]);

        let stats = backend.stats();
        assert_eq!(stats.connections_opened, 1);
        assert_eq!(stats.open_connections, 0);
        // Three pages plus the empty sentinel page
        assert_eq!(stats.statements_executed, 4);
    }

    #[tokio::test]
    async fn test_filter_keeps_relative_order() {
        let backend = backend(&[20, 30, 26, 10]);
        let ages: Vec<Value> = open(&backend, 3)
            .filter_rows(age_above(25))
            .map_ok(|row| row.get("age").cloned().unwrap_or(Value::Null))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ages, vec![Value::Integer(30), Value::Integer(26)]);
    }

    #[tokio::test]
    async fn test_empty_table_yields_nothing() {
        let backend = backend(&[]);
        let mut stream = open(&backend, 10);
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_page_failure_ends_stream_and_releases() {
        let backend = backend(&[1, 2, 3]);
        backend
            .inject(FaultRule::fatal("OFFSET").unwrap())
            .unwrap();

        let mut stream = open(&backend, 2);
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(stream.next().await.is_none());
        assert_eq!(backend.stats().open_connections, 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_connection() {
        let backend = backend(&[1, 2, 3]);
        let mut stream = open(&backend, 1);
        stream.next().await.unwrap().unwrap();
        assert_eq!(backend.stats().open_connections, 1);

        drop(stream);
        assert_eq!(backend.stats().open_connections, 0);
    }

    #[test]
    fn test_age_above() {
        let pred = age_above(25);
        assert!(pred(&Row::from_pairs([("age", 26)])));
        assert!(!pred(&Row::from_pairs([("age", 25)])));
        assert!(pred(&Row::from_pairs([("age", Value::Float(25.5))])));
        assert!(!pred(&Row::from_pairs([("age", Value::Null)])));
        assert!(!pred(&Row::from_pairs([("name", "x")])));
    }
}
