//! Result cache for read-only queries.
//!
//! The store is an explicit object handed to the query layer, so each layer
//! (and each test) decides whether it shares one.

pub mod key;
pub mod store;

pub use key::{CacheKey, CacheKeyStrategy};
pub use store::{CacheEntry, CacheStats, CacheStore};
