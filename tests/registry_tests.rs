use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use hermes_gateway::dao::init_db;
use hermes_gateway::dao::provider::{get_provider_by_id, STATUS_ACTIVE, STATUS_ERROR, STATUS_PENDING};
use hermes_gateway::gateway::normalizer::Normalizer;
use hermes_gateway::gateway::registry::{ProviderPatch, ProviderRegistry};

/// 初始化测试环境的辅助函数（内存库，单连接）
async fn setup_registry() -> (Arc<SqlitePool>, Arc<ProviderRegistry>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory sqlite");
    init_db(&pool, "data/init.sql").await.expect("DB init failed");
    let pool = Arc::new(pool);
    let registry = Arc::new(ProviderRegistry::new(pool.clone(), Arc::new(Normalizer::new())));
    registry.bootstrap().await.expect("bootstrap failed");
    (pool, registry)
}

#[tokio::test]
async fn test_provider_create_then_get_roundtrip() {
    let (pool, registry) = setup_registry().await;

    let created = registry
        .create(
            "alpha",
            "https://u1.example/",
            "sk-upstream",
            vec!["  gpt-4o-audio ".to_string(), String::new()],
        )
        .await
        .expect("create failed");

    let stored = get_provider_by_id(&pool, &created.id)
        .await
        .unwrap()
        .expect("provider missing");
    assert_eq!(stored.name, "alpha");
    // 末尾斜杠被归一化掉
    assert_eq!(stored.base_url, "https://u1.example");
    assert_eq!(stored.status, STATUS_PENDING);
    assert_eq!(stored.blacklist(), vec!["gpt-4o-audio".to_string()]);
    assert!(stored.model_list().is_empty());
}

#[tokio::test]
async fn test_sync_success_activates_and_indexes_models() {
    let (_pool, registry) = setup_registry().await;
    let provider = registry
        .create("alpha", "https://u1", "k", vec![])
        .await
        .unwrap();

    registry
        .apply_sync_success(&provider.id, &["gpt-4o-mini".to_string(), "qwen-turbo".to_string()])
        .await
        .unwrap();

    let snapshot = registry.snapshot();
    let view = snapshot.providers.get(&provider.id).unwrap();
    assert_eq!(view.status, STATUS_ACTIVE);
    assert!(view.last_synced_at.is_some());

    let canonical = snapshot.resolve_canonical(&registry.normalizer().canonical("gpt-4o-mini"));
    let candidates = registry.providers_for(&canonical);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, provider.id);
}

#[tokio::test]
async fn test_blacklist_is_subtracted_from_effective_set() {
    let (_pool, registry) = setup_registry().await;
    let provider = registry
        .create("alpha", "https://u1", "k", vec!["gpt-4".to_string()])
        .await
        .unwrap();

    registry
        .apply_sync_success(
            &provider.id,
            &["gpt-4o-mini".to_string(), "openai/gpt-4".to_string()],
        )
        .await
        .unwrap();

    let snapshot = registry.snapshot();
    let view = snapshot.providers.get(&provider.id).unwrap();
    // 黑名单按归一化后的 id 剔除，连厂商前缀写法一起拦下
    assert_eq!(view.models, vec!["gpt-4o-mini".to_string()]);

    let union = snapshot.active_model_union();
    assert!(union.iter().all(|m| !m.contains("gpt-4") || m.contains("4o")));
}

#[tokio::test]
async fn test_model_union_deduplicates_across_providers() {
    let (_pool, registry) = setup_registry().await;
    let p1 = registry.create("alpha", "https://u1", "k", vec![]).await.unwrap();
    let p2 = registry.create("beta", "https://u2", "k", vec![]).await.unwrap();

    registry
        .apply_sync_success(&p1.id, &["gpt-4o-mini".to_string()])
        .await
        .unwrap();
    registry
        .apply_sync_success(&p2.id, &["openai/gpt-4o-mini".to_string()])
        .await
        .unwrap();

    let snapshot = registry.snapshot();
    let union = snapshot.active_model_union();
    assert_eq!(union.len(), 1, "same family must collapse, got {:?}", union);

    // 两家供应商都要出现在该模型的候选里
    let canonical = union[0].clone();
    let candidates = registry.providers_for(&canonical);
    assert_eq!(candidates.len(), 2);
}

#[tokio::test]
async fn test_pending_providers_are_not_in_union() {
    let (_pool, registry) = setup_registry().await;
    let p1 = registry.create("alpha", "https://u1", "k", vec![]).await.unwrap();
    registry.apply_sync_success(&p1.id, &["gpt-4o-mini".to_string()]).await.unwrap();
    // 第二家保持 pending
    registry.create("beta", "https://u2", "k", vec![]).await.unwrap();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.active_count(), 1);
    assert_eq!(snapshot.active_model_union().len(), 1);
}

#[tokio::test]
async fn test_sync_failure_marks_pending_as_error_and_keeps_models() {
    let (pool, registry) = setup_registry().await;
    let p1 = registry.create("alpha", "https://u1", "k", vec![]).await.unwrap();

    // pending 阶段同步失败 → error
    registry.apply_sync_failure(&p1.id).await.unwrap();
    let stored = get_provider_by_id(&pool, &p1.id).await.unwrap().unwrap();
    assert_eq!(stored.status, STATUS_ERROR);

    // active 供应商失败保持 active，模型列表不动
    let p2 = registry.create("beta", "https://u2", "k", vec![]).await.unwrap();
    registry.apply_sync_success(&p2.id, &["qwen-turbo".to_string()]).await.unwrap();
    registry.apply_sync_failure(&p2.id).await.unwrap();
    let stored = get_provider_by_id(&pool, &p2.id).await.unwrap().unwrap();
    assert_eq!(stored.status, STATUS_ACTIVE);
    assert_eq!(stored.model_list(), vec!["qwen-turbo".to_string()]);
}

#[tokio::test]
async fn test_strip_model_removes_family() {
    let (pool, registry) = setup_registry().await;
    let p1 = registry.create("alpha", "https://u1", "k", vec![]).await.unwrap();
    registry
        .apply_sync_success(
            &p1.id,
            &["gpt-4o-mini".to_string(), "qwen-turbo".to_string()],
        )
        .await
        .unwrap();

    let stripped = registry.strip_model(&p1.id, "GPT-4o-mini").await.unwrap();
    assert!(stripped);

    let stored = get_provider_by_id(&pool, &p1.id).await.unwrap().unwrap();
    assert_eq!(stored.model_list(), vec!["qwen-turbo".to_string()]);

    // 再剔一次没有效果
    assert!(!registry.strip_model(&p1.id, "gpt-4o-mini").await.unwrap());
}

#[tokio::test]
async fn test_update_resets_sync_state() {
    let (pool, registry) = setup_registry().await;
    let p1 = registry.create("alpha", "https://u1", "k", vec![]).await.unwrap();
    registry.apply_sync_success(&p1.id, &["gpt-4o-mini".to_string()]).await.unwrap();

    registry
        .update(
            &p1.id,
            ProviderPatch {
                base_url: Some("https://u1-new".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .expect("provider should exist");

    let stored = get_provider_by_id(&pool, &p1.id).await.unwrap().unwrap();
    assert_eq!(stored.base_url, "https://u1-new");
    assert_eq!(stored.status, STATUS_PENDING);
    assert!(stored.model_list().is_empty());
    assert!(stored.last_synced_at.is_none());
}

#[tokio::test]
async fn test_delete_removes_provider_from_snapshot() {
    let (_pool, registry) = setup_registry().await;
    let p1 = registry.create("alpha", "https://u1", "k", vec![]).await.unwrap();
    registry.apply_sync_success(&p1.id, &["gpt-4o-mini".to_string()]).await.unwrap();

    assert!(registry.delete(&p1.id).await.unwrap());
    let snapshot = registry.snapshot();
    assert!(snapshot.providers.is_empty());
    assert!(snapshot.active_model_union().is_empty());
    assert!(!registry.delete(&p1.id).await.unwrap());
}

#[tokio::test]
async fn test_snapshot_version_increments_on_reload() {
    let (_pool, registry) = setup_registry().await;
    let v1 = registry.snapshot().version;
    registry.create("alpha", "https://u1", "k", vec![]).await.unwrap();
    let v2 = registry.snapshot().version;
    assert!(v2 > v1);
}
