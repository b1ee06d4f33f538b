/// Result cache tests
///
/// Read-through caching keyed by the query text digest
/// Run with: cargo test --test cache_tests

use queryward::{
    CacheKeyStrategy, CacheStore, LayerConfig, MemoryBackend, QueryDescriptor, QueryLayer, Value,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn users_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend
        .run_script([
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
            "INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob')",
        ])
        .unwrap();
    backend
}

fn layer_with(backend: MemoryBackend, config: LayerConfig) -> QueryLayer<MemoryBackend> {
    QueryLayer::builder(backend)
        .config(config.base_delay(Duration::from_millis(1)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_fetch_all_users_twice_executes_once() {
    let layer = layer_with(users_backend(), LayerConfig::new());

    let result1 = assert_ok!(layer.fetch("SELECT * FROM users").await);
    let result2 = assert_ok!(layer.fetch("SELECT * FROM users").await);

    assert_eq!(result1, result2);
    assert_eq!(result1.len(), 2);
    assert_eq!(layer.backend().stats().statements_executed, 1);
    assert_eq!(layer.backend().stats().connections_opened, 1);
}

/// The default key is the query text alone. A second call with different
/// parameters gets the first call's rows back. This is a known hazard of
/// the text-only key; parameter-aware keys are opt-in.
#[tokio::test]
async fn test_same_text_different_params_is_a_hit() {
    let layer = layer_with(users_backend(), LayerConfig::new());
    let sql = "SELECT name FROM users WHERE id = $1";

    let alice = layer
        .fetch(QueryDescriptor::with_params(sql, [1]))
        .await
        .unwrap();
    let stale = layer
        .fetch(QueryDescriptor::with_params(sql, [2]))
        .await
        .unwrap();

    assert_eq!(alice[0].get("name"), Some(&Value::from("Alice")));
    assert_eq!(stale, alice);
    assert_eq!(layer.backend().stats().statements_executed, 1);

    let stats = layer.cache_stats().unwrap();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_param_aware_keys_are_opt_in() {
    let config = LayerConfig::new().cache_key_strategy(CacheKeyStrategy::QueryTextAndParams);
    let layer = layer_with(users_backend(), config);
    let sql = "SELECT name FROM users WHERE id = $1";

    let alice = layer.fetch(QueryDescriptor::with_params(sql, [1])).await.unwrap();
    let bob = layer.fetch(QueryDescriptor::with_params(sql, [2])).await.unwrap();

    assert_eq!(alice[0].get("name"), Some(&Value::from("Alice")));
    assert_eq!(bob[0].get("name"), Some(&Value::from("Bob")));
    assert_eq!(layer.backend().stats().statements_executed, 2);
}

#[tokio::test]
async fn test_failed_fetch_is_not_cached() {
    let layer = layer_with(MemoryBackend::new(), LayerConfig::new());

    assert_err!(layer.fetch("SELECT * FROM users").await);
    layer
        .backend()
        .run("CREATE TABLE users (id INTEGER, name TEXT)")
        .unwrap();

    let rows = assert_ok!(layer.fetch("SELECT * FROM users").await);
    assert!(rows.is_empty());
    assert_eq!(layer.cache().unwrap().len(), 1);
}

#[tokio::test]
async fn test_injected_store_is_shared_and_isolated() {
    let store = Arc::new(CacheStore::new());
    let first = QueryLayer::builder(users_backend())
        .cache_store(Arc::clone(&store))
        .build()
        .unwrap();
    let second = QueryLayer::builder(users_backend())
        .cache_store(Arc::clone(&store))
        .build()
        .unwrap();
    let isolated = layer_with(users_backend(), LayerConfig::new());

    first.fetch("SELECT * FROM users").await.unwrap();
    second.fetch("SELECT * FROM users").await.unwrap();
    isolated.fetch("SELECT * FROM users").await.unwrap();

    assert_eq!(first.backend().stats().statements_executed, 1);
    assert_eq!(second.backend().stats().statements_executed, 0);
    assert_eq!(isolated.backend().stats().statements_executed, 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let layer = layer_with(users_backend(), LayerConfig::new());
    let query = QueryDescriptor::new("SELECT * FROM users");

    layer.fetch(query.clone()).await.unwrap();
    layer
        .execute("INSERT INTO users VALUES (3, 'Carol')")
        .await
        .unwrap();
    assert_eq!(layer.fetch(query.clone()).await.unwrap().len(), 2);

    assert!(layer.cache().unwrap().invalidate(&query).unwrap());
    assert_eq!(layer.fetch(query).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_bounded_cache_evicts() {
    let layer = layer_with(users_backend(), LayerConfig::new().cache_capacity(1));

    layer.fetch("SELECT * FROM users WHERE id = 1").await.unwrap();
    layer.fetch("SELECT * FROM users WHERE id = 2").await.unwrap();
    layer.fetch("SELECT * FROM users WHERE id = 1").await.unwrap();

    assert_eq!(layer.backend().stats().statements_executed, 3);
    assert_eq!(layer.cache().unwrap().len(), 1);
}

#[tokio::test]
async fn test_disabled_cache_always_executes() {
    let layer = layer_with(users_backend(), LayerConfig::new().cache_enabled(false));

    layer.fetch("SELECT * FROM users").await.unwrap();
    layer.fetch("SELECT * FROM users").await.unwrap();

    assert!(layer.cache().is_none());
    assert_eq!(layer.backend().stats().statements_executed, 2);
}
