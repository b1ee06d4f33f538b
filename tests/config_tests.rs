/// Layer configuration tests
///
/// Run with: cargo test --test config_tests

use queryward::{
    CacheKeyStrategy, FaultRule, LayerConfig, MemoryBackend, QueryDescriptor, QueryLayer,
};
use std::io::Write;
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"{
            "retry": { "max_retries": 1, "base_delay_ms": 5, "max_jitter": 0.0 },
            "cache": { "capacity": 16, "key_strategy": "query_text_and_params" },
            "stream": { "batch_size": 25 },
            "log_queries": true
        }"#,
    );

    let config = assert_ok!(LayerConfig::from_json_file(file.path()));

    assert_eq!(config.retry.max_retries, 1);
    assert_eq!(config.retry.policy().max_attempts(), 2);
    assert_eq!(config.cache.capacity, Some(16));
    assert_eq!(config.cache.key_strategy, CacheKeyStrategy::QueryTextAndParams);
    assert_eq!(config.stream.batch_size, 25);
    assert!(config.log_queries);
}

#[test]
fn test_missing_or_invalid_file_is_rejected() {
    assert_err!(LayerConfig::from_json_file("/nonexistent/queryward.json"));

    let file = write_config(r#"{ "cache": { "capacity": 0 } }"#);
    assert_err!(LayerConfig::from_json_file(file.path()));
}

#[test]
fn test_config_round_trips_through_json() {
    let config = LayerConfig::new().max_retries(7).batch_size(10);
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(LayerConfig::from_json_str(&json).unwrap(), config);
}

#[tokio::test]
async fn test_file_config_drives_the_layer() {
    let file = write_config(r#"{ "retry": { "max_retries": 1, "base_delay_ms": 1 } }"#);
    let config = LayerConfig::from_json_file(file.path()).unwrap();

    let backend = MemoryBackend::new();
    backend.run("CREATE TABLE t (id INTEGER)").unwrap();
    backend
        .inject(FaultRule::transient("FROM t").unwrap())
        .unwrap();

    let layer = QueryLayer::builder(backend).config(config).build().unwrap();
    assert_err!(layer.fetch(QueryDescriptor::new("SELECT * FROM t")).await);
    assert_eq!(layer.backend().stats().statements_executed, 2);
}

#[tokio::test]
async fn test_logged_queries_still_execute() {
    let backend = MemoryBackend::new();
    backend.run("CREATE TABLE t (id INTEGER)").unwrap();

    let layer = QueryLayer::builder(backend)
        .config(LayerConfig::new().log_queries(true))
        .build()
        .unwrap();

    assert_eq!(assert_ok!(layer.execute("INSERT INTO t VALUES (1)").await), 1);
    assert_eq!(assert_ok!(layer.fetch("SELECT * FROM t").await).len(), 1);
}
