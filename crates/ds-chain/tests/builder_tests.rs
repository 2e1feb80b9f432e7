//! Chains assembled from configuration, backed by a real directory.

use ds_chain::build_chain;
use ds_core::config::{BackendKind, SessionStoreConfig, WaitBudget};
use ds_core::error::DsError;
use ds_core::record::SessionRecord;
use ds_persist::Persister;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> SessionStoreConfig {
    let mut config = SessionStoreConfig::default();
    config.file.root = dir.path().join("sessions");
    config.chain.wait_budget_secs = 5;
    config
}

#[tokio::test]
async fn test_default_chain_is_memory_then_file() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(&config_in(&dir)).await.unwrap();

    let names: Vec<String> = chain.persisters().iter().map(|p| p.name().to_string()).collect();
    assert_eq!(names, vec!["memory", "file"]);
    assert_eq!(chain.wait_budget(), WaitBudget::Bounded(Duration::from_secs(5)));
    assert!(chain.retry_timed_out_writes());
    assert!(dir.path().join("sessions").is_dir());
}

#[tokio::test]
async fn test_persist_reaches_both_backends() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(&config_in(&dir)).await.unwrap();
    let record = SessionRecord::create_with_id("s1", 1800).with_attribute("user", json!("ada"));

    chain.persist(&record).await.unwrap();

    for backend in chain.persisters() {
        let stored = backend.fetch("s1").await.unwrap().unwrap();
        assert_eq!(stored.attribute("user"), Some(&json!("ada")), "{}", backend.name());
    }
    assert!(chain.is_valid("s1").await.unwrap());
    let ids: Vec<String> = chain.list_ids().await.unwrap().collect();
    assert_eq!(ids, vec!["s1"]);

    chain.invalidate("s1").await.unwrap();
    assert!(chain.fetch("s1").await.unwrap().is_none());
    assert!(!chain.is_valid("s1").await.unwrap());
}

#[tokio::test]
async fn test_fetch_falls_back_to_file_after_cache_is_cleared() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(&config_in(&dir)).await.unwrap();
    let record = SessionRecord::create_with_id("s2", 1800).with_attribute("cart", json!([1, 2, 3]));
    chain.persist(&record).await.unwrap();

    let cache = chain.persisters()[0].clone();
    cache.release_resources().await.unwrap();
    assert!(cache.fetch("s2").await.unwrap().is_none());

    let fetched = chain.fetch("s2").await.unwrap().unwrap();
    assert_eq!(fetched.session_id(), "s2");
    assert_eq!(fetched.attribute("cart"), Some(&json!([1, 2, 3])));
    assert_eq!(fetched.created_at(), record.created_at());
}

#[tokio::test]
async fn test_duplicate_insert_is_not_surfaced() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(&config_in(&dir)).await.unwrap();
    let record = SessionRecord::create_with_id("s3", 1800);

    chain.persist(&record).await.unwrap();
    // the file backend rejects the second insert; the chain only logs it
    chain.persist(&record.clone().with_attribute("late", json!(true))).await.unwrap();

    let file = chain.persisters()[1].clone();
    let stored = file.fetch("s3").await.unwrap().unwrap();
    assert!(stored.attribute("late").is_none());
}

#[tokio::test]
async fn test_updates_overwrite_stored_session() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(&config_in(&dir)).await.unwrap();
    let record = SessionRecord::create_with_id("s4", 1800);
    chain.persist(&record).await.unwrap();

    let updated = record.stored().with_attribute("step", json!(2));
    chain.persist(&updated).await.unwrap();

    let file = chain.persisters()[1].clone();
    let stored = file.fetch("s4").await.unwrap().unwrap();
    assert_eq!(stored.attribute("step"), Some(&json!(2)));
}

#[tokio::test]
async fn test_chain_from_json_config() {
    let dir = TempDir::new().unwrap();
    let raw = json!({
        "chain": { "backends": ["file"], "wait_budget_secs": 0, "max_in_flight": 2 },
        "file": { "root": dir.path().join("only-file") },
    })
    .to_string();
    let config = SessionStoreConfig::from_json(&raw).unwrap();
    assert_eq!(config.chain.backends, vec![BackendKind::File]);

    let chain = build_chain(&config).await.unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain.wait_budget(), WaitBudget::Unbounded);
}

#[tokio::test]
async fn test_largest_configured_budget_is_usable() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.chain.wait_budget_secs = i64::MAX;
    let chain = build_chain(&config).await.unwrap();
    let record = SessionRecord::create_with_id("s5", 1800);

    chain.persist(&record).await.unwrap();
    assert!(chain.fetch("s5").await.unwrap().is_some());
    chain.invalidate("s5").await.unwrap();
    assert!(!chain.is_valid("s5").await.unwrap());
}

#[tokio::test]
async fn test_zero_max_in_flight_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.chain.max_in_flight = Some(0);
    let err = build_chain(&config).await.unwrap_err();
    assert!(matches!(err, DsError::InvalidConfig(_)));
}
