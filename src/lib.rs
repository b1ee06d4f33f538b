// ============================================================================
// Queryward Library
// ============================================================================
//
// Resilient query execution over a pluggable backend. Every read and write
// passes through the same stages:
//
//   cache -> connection scope -> retry -> transaction -> statement
//
// The bundled `MemoryBackend` is a small SQL engine with fault injection,
// used by the binary and the tests.
//
// ============================================================================

//! Resilient query layer over an in-memory backend.
//!
//! # Examples
//!
//! ```
//! use queryward::{LayerConfig, MemoryBackend, QueryDescriptor, QueryLayer};
//!
//! # #[tokio::main]
//! # async fn main() -> queryward::Result<()> {
//! let backend = MemoryBackend::new();
//! backend.run("CREATE TABLE users (id INTEGER, name TEXT, age INTEGER)")?;
//! backend.run("INSERT INTO users VALUES (1, 'Alice', 30)")?;
//!
//! let layer = QueryLayer::builder(backend)
//!     .config(LayerConfig::new().max_retries(2))
//!     .build()?;
//!
//! let rows = layer
//!     .fetch(QueryDescriptor::with_params("SELECT name FROM users WHERE id = $1", [1]))
//!     .await?;
//! assert_eq!(rows.len(), 1);
//!
//! let updated = layer.execute("UPDATE users SET age = 31 WHERE id = 1").await?;
//! assert_eq!(updated, 1);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod concurrent;
pub mod config;
pub mod connection;
pub mod core;
pub mod facade;
pub mod result;
pub mod retry;
pub mod storage;
pub mod stream;
pub mod transaction;
mod executor;
mod parser;

pub use facade::{QueryLayer, QueryLayerBuilder};

pub use cache::{CacheKey, CacheKeyStrategy, CacheStats, CacheStore};
pub use config::LayerConfig;
pub use connection::{
    Backend, BackendStats, Connection, ConnectionScope, FaultKind, FaultRule, MemoryBackend,
    MemoryConnection, with_connection,
};
pub use core::{
    DataType, DbError, ErrorKind, QueryDescriptor, Result, Row, RowBatch, Rows, TableDescriptor,
    Value,
};
pub use result::QueryResult;
pub use retry::{RetryExecutor, RetryPolicy};
pub use stream::{BatchStream, RowStream, age_above};
pub use transaction::transactional;
