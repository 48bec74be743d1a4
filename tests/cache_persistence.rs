//! Persistent cache reused across engine instances.

mod common;

use ai_lib_dispatch::cache::{CacheConfig, CacheKey, CacheStore, PutStatus};
use ai_lib_dispatch::types::MediaPayload;
use ai_lib_dispatch::{ExecutionEngine, GeneratedValue, RuntimeConfig};
use common::{text, MockProvider};
use serde_json::json;
use std::sync::Arc;

async fn open(dir: &std::path::Path) -> Arc<CacheStore> {
    Arc::new(
        CacheStore::open(CacheConfig::new().with_dir(dir).with_hot_entries(4))
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn second_session_is_served_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let first_provider = Arc::new(MockProvider::upper());
    {
        let engine = ExecutionEngine::builder()
            .cache(open(dir.path()).await)
            .provider(first_provider.clone())
            .build()
            .unwrap();
        let report = engine.run_many(vec![text("alpha"), text("beta")], Some(2)).await;
        assert!(report.all_succeeded());
    }
    assert_eq!(first_provider.calls(), 2);

    let second_provider = Arc::new(MockProvider::upper());
    let engine = ExecutionEngine::builder()
        .cache(open(dir.path()).await)
        .provider(second_provider.clone())
        .build()
        .unwrap();
    let report = engine
        .run_many(vec![text("alpha"), text("beta"), text("gamma")], Some(2))
        .await;

    assert!(report.all_succeeded());
    assert_eq!(report.summary.cache_hits, 2);
    assert_eq!(second_provider.calls(), 1);
    assert_eq!(engine.cache().len().await.unwrap(), 3);
}

#[tokio::test]
async fn non_text_values_round_trip_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let image_key = CacheKey::derive(&text("image"));
    let json_key = CacheKey::derive(&text("json"));
    let image = GeneratedValue::Image(MediaPayload::new(
        "image/png",
        vec![0x89, 0x50, 0x4e, 0x47, 0, 255],
    ));
    let structured =
        GeneratedValue::Structured(json!({"title": "x", "tags": ["a", "b"], "score": 0.5}));

    {
        let store = open(dir.path()).await;
        assert_eq!(
            store.put(image_key, image.clone(), "img/model").await.unwrap(),
            PutStatus::Inserted
        );
        store.put(json_key, structured.clone(), "llm/model").await.unwrap();
    }

    let store = open(dir.path()).await;
    assert_eq!(store.get(&image_key).await.unwrap(), Some(image));
    assert_eq!(store.get(&json_key).await.unwrap(), Some(structured));
    let entry = store.get_entry(&image_key).await.unwrap().unwrap();
    assert_eq!(entry.model_id, "img/model");
}

#[tokio::test]
async fn bulk_operations_persist() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path()).await;
        for payload in ["a", "b", "c"] {
            let model = if payload == "c" { "other/model" } else { "mock/upper" };
            store
                .put(CacheKey::derive(&text(payload)), GeneratedValue::text(payload), model)
                .await
                .unwrap();
        }
        assert_eq!(store.invalidate_model("mock/upper").await.unwrap(), 2);
    }

    let store = open(dir.path()).await;
    let rows = store.entries().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].model_id, "other/model");

    store.clear().await.unwrap();
    drop(store);
    assert!(open(dir.path()).await.is_empty().await.unwrap());
}

#[tokio::test]
async fn runtime_config_builds_a_persistent_store() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!("cache:\n  dir: {}\n  hot_entries: 8\n", dir.path().display());
    let config = RuntimeConfig::from_yaml_str(&yaml).unwrap();
    let store = CacheStore::open(config.cache).await.unwrap();
    assert_eq!(store.backend_name(), "file");
}
