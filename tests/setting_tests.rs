use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use hermes_gateway::dao::init_db;
use hermes_gateway::dao::setting::*;

/// 初始化测试环境的辅助函数（内存库，单连接）
async fn setup_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory sqlite");
    init_db(&pool, "data/init.sql").await.expect("DB init failed");
    Arc::new(pool)
}

#[tokio::test]
async fn test_set_then_get_roundtrip() {
    let pool = setup_pool().await;

    set_setting(&pool, SETTING_CHAT_MAX_RETRIES, "5").await.unwrap();
    assert_eq!(
        get_setting(&pool, SETTING_CHAT_MAX_RETRIES).await.unwrap(),
        Some("5".to_string())
    );

    // 重复写入是覆盖
    set_setting(&pool, SETTING_CHAT_MAX_RETRIES, "7").await.unwrap();
    assert_eq!(
        get_setting_number(&pool, SETTING_CHAT_MAX_RETRIES, 3).await.unwrap(),
        7
    );
}

#[tokio::test]
async fn test_numeric_accessor_falls_back_to_default() {
    let pool = setup_pool().await;

    assert_eq!(get_setting_number(&pool, SETTING_CHAT_MAX_RETRIES, 3).await.unwrap(), 3);

    set_setting(&pool, SETTING_CHAT_MAX_RETRIES, "not-a-number").await.unwrap();
    assert_eq!(get_setting_number(&pool, SETTING_CHAT_MAX_RETRIES, 3).await.unwrap(), 3);
}

#[tokio::test]
async fn test_list_and_delete() {
    let pool = setup_pool().await;

    set_setting(&pool, SETTING_RATE_LIMIT_MAX, "120").await.unwrap();
    set_setting(&pool, SETTING_RATE_LIMIT_WINDOW, "60").await.unwrap();

    let all = list_settings(&pool).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.get(SETTING_RATE_LIMIT_MAX), Some(&"120".to_string()));

    delete_setting(&pool, SETTING_RATE_LIMIT_MAX).await.unwrap();
    assert!(get_setting(&pool, SETTING_RATE_LIMIT_MAX).await.unwrap().is_none());
}

#[test]
fn test_reserved_keys_are_known() {
    for key in [
        SETTING_PERIODIC_SYNC_INTERVAL_HOURS,
        SETTING_CHAT_MAX_RETRIES,
        SETTING_INITIAL_PENALTY_MS,
        SETTING_MAX_PENALTY_MS,
        SETTING_RESYNC_THRESHOLD,
        SETTING_RATE_LIMIT_MAX,
        SETTING_RATE_LIMIT_WINDOW,
    ] {
        assert!(KNOWN_SETTING_KEYS.contains(&key));
    }
}
