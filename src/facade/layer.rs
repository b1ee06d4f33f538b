use crate::cache::{CacheStats, CacheStore};
use crate::concurrent;
use crate::config::LayerConfig;
use crate::connection::{Backend, execute_logged, with_connection};
use crate::core::{QueryDescriptor, Result, Rows, TableDescriptor};
use crate::retry::RetryExecutor;
use crate::stream::{BatchStream, RowStream};
use crate::transaction::transactional;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Resilient query execution over a [`Backend`].
///
/// Stages run in a fixed order, outermost first:
///
/// 1. result cache (reads only, when enabled)
/// 2. connection scope: one fresh connection per call, always released
/// 3. retry executor: transient failures are retried on that connection
/// 4. transaction coordinator (writes only): each attempt is its own
///    transaction, rolled back before the next attempt starts
/// 5. the statement itself
///
/// A connection that cannot be acquired is reported at once, never retried.
///
/// Cloning is cheap; clones share the backend and the cache store.
pub struct QueryLayer<B: Backend> {
    backend: Arc<B>,
    cache: Option<Arc<CacheStore>>,
    retry: RetryExecutor,
    config: LayerConfig,
}

impl<B: Backend> Clone for QueryLayer<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cache: self.cache.clone(),
            retry: self.retry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: Backend> QueryLayer<B> {
    pub fn builder(backend: B) -> QueryLayerBuilder<B> {
        QueryLayerBuilder::new(backend)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// The injected cache store, if caching is enabled.
    pub fn cache(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Resilient read: cache, then connection scope and retry.
    ///
    /// With the default key strategy the cache key is the query text alone.
    /// A second fetch with the same text but different parameters returns
    /// the first fetch's rows without touching the backend.
    pub async fn fetch(&self, query: impl Into<QueryDescriptor>) -> Result<Rows> {
        let query = query.into();
        match &self.cache {
            Some(cache) => {
                let rows = cache
                    .get_or_fetch(&query, || self.fetch_uncached(query.clone()))
                    .await?;
                Ok(rows.as_ref().clone())
            }
            None => self.fetch_uncached(query).await,
        }
    }

    /// Read without consulting or filling the cache.
    pub async fn fetch_uncached(&self, query: impl Into<QueryDescriptor>) -> Result<Rows> {
        let query = query.into();
        let retry = self.retry.clone();
        let log_queries = self.config.log_queries;
        debug!(query = %query, "Fetching");

        with_connection(self.backend.as_ref(), move |conn| {
            Box::pin(async move {
                let label = query.sql().to_string();
                let result = retry
                    .run_with(&label, conn, |c| {
                        let query = query.clone();
                        Box::pin(async move { execute_logged(c, &query, log_queries).await })
                    })
                    .await?;
                Ok(result.into_rows())
            })
        })
        .await
    }

    /// Resilient write: one statement in its own transaction, retried as a
    /// whole. Returns the number of affected rows.
    pub async fn execute(&self, query: impl Into<QueryDescriptor>) -> Result<u64> {
        let query = query.into();
        let log_queries = self.config.log_queries;
        debug!(query = %query, "Executing");

        let label = query.sql().to_string();
        self.transaction_labeled(label, move |conn| {
            let query = query.clone();
            Box::pin(async move {
                let result = execute_logged(conn, &query, log_queries).await?;
                Ok(result.affected_rows)
            })
        })
        .await
    }

    /// Run a multi-statement unit of work in a transaction.
    ///
    /// `op` may be called more than once: every transient failure rolls the
    /// attempt back and runs `op` again in a new transaction on the same
    /// connection.
    pub async fn transaction<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut B::Conn) -> BoxFuture<'c, Result<T>> + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.transaction_labeled("transaction".to_string(), op).await
    }

    /// `label` names the unit of work in `RetryExhausted`.
    async fn transaction_labeled<T, F>(&self, label: String, op: F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut B::Conn) -> BoxFuture<'c, Result<T>> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        let retry = self.retry.clone();

        with_connection(self.backend.as_ref(), move |conn| {
            Box::pin(async move {
                retry
                    .run_with(&label, conn, |c| {
                        let op = Arc::clone(&op);
                        Box::pin(async move { transactional(c, op.as_ref()).await })
                    })
                    .await
            })
        })
        .await
    }

    /// The bare connection scope: acquire, run `op`, release.
    pub async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut B::Conn) -> BoxFuture<'c, Result<T>>,
    {
        with_connection(self.backend.as_ref(), op).await
    }

    /// Fetch every query concurrently; results keep the order of `queries`.
    pub async fn fetch_concurrently<I, Q>(&self, queries: I) -> Result<Vec<Rows>>
    where
        I: IntoIterator<Item = Q>,
        Q: Into<QueryDescriptor>,
    {
        concurrent::join_all(queries.into_iter().map(|q| self.fetch(q))).await
    }

    /// [`fetch_concurrently`](Self::fetch_concurrently) that stops with
    /// `DbError::Cancelled` when `cancel` resolves first.
    pub async fn fetch_concurrently_until<I, Q, C>(&self, queries: I, cancel: C) -> Result<Vec<Rows>>
    where
        I: IntoIterator<Item = Q>,
        Q: Into<QueryDescriptor>,
        C: Future<Output = ()>,
    {
        concurrent::join_all_until(queries.into_iter().map(|q| self.fetch(q)), cancel).await
    }
}

impl<B: Backend + 'static> QueryLayer<B> {
    /// Page through `table` in batches of `batch_size` rows.
    ///
    /// A `batch_size` of 0 is read as 1; only [`LayerConfig`] rejects it.
    pub fn stream(&self, table: TableDescriptor, batch_size: usize) -> BatchStream {
        BatchStream::open(
            Arc::clone(&self.backend),
            table,
            batch_size,
            self.retry.clone(),
            self.config.log_queries,
        )
    }

    /// [`stream`](Self::stream) with the configured batch size.
    pub fn stream_default(&self, table: TableDescriptor) -> BatchStream {
        self.stream(table, self.config.stream.batch_size)
    }

    /// Rows of `table` one at a time, read in batches of `batch_size`.
    pub fn stream_rows(&self, table: TableDescriptor, batch_size: usize) -> RowStream {
        self.stream(table, batch_size).rows()
    }
}

/// Assembles a [`QueryLayer`].
///
/// # Examples
///
/// ```
/// use queryward::{CacheStore, LayerConfig, MemoryBackend, QueryLayer};
/// use std::sync::Arc;
///
/// let cache = Arc::new(CacheStore::new());
/// let layer = QueryLayer::builder(MemoryBackend::new())
///     .config(LayerConfig::new().max_retries(5))
///     .cache_store(Arc::clone(&cache))
///     .build()
///     .unwrap();
/// assert!(Arc::ptr_eq(layer.cache().unwrap(), &cache));
/// ```
pub struct QueryLayerBuilder<B: Backend> {
    backend: Arc<B>,
    config: LayerConfig,
    cache: Option<Arc<CacheStore>>,
}

impl<B: Backend> QueryLayerBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    pub fn from_shared(backend: Arc<B>) -> Self {
        Self {
            backend,
            config: LayerConfig::default(),
            cache: None,
        }
    }

    pub fn config(mut self, config: LayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of a fresh one built from the cache settings.
    pub fn cache_store(mut self, store: Arc<CacheStore>) -> Self {
        self.config.cache.enabled = true;
        self.cache = Some(store);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.config.cache.enabled = false;
        self.cache = None;
        self
    }

    pub fn build(self) -> Result<QueryLayer<B>> {
        self.config.validate()?;

        let cache = if self.config.cache.enabled {
            let store = match self.cache {
                Some(store) => store,
                None => {
                    let store = match self.config.cache.capacity {
                        Some(capacity) => CacheStore::bounded(capacity)?,
                        None => CacheStore::new(),
                    };
                    Arc::new(store.key_strategy(self.config.cache.key_strategy))
                }
            };
            Some(store)
        } else {
            None
        };

        Ok(QueryLayer {
            backend: self.backend,
            cache,
            retry: RetryExecutor::new(self.config.retry.policy()),
            config: self.config,
        })
    }
}
