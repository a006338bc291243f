use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use hermes_gateway::dao::metrics::{get_counter, COUNTER_TOTAL_REQUESTS, COUNTER_UPSTREAM_ERRORS};
use hermes_gateway::dao::request_log::{count_request_logs, list_request_logs, RequestLogFilter};
use hermes_gateway::dao::request_log::RequestLog;
use hermes_gateway::dao::sync_log::{count_sync_logs, SyncLog};
use hermes_gateway::dao::{init_db, now_ms};
use hermes_gateway::gateway::sink::{LogSink, LogSinkConfig};

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

fn request_log(status: i64, duration: i64) -> RequestLog {
    RequestLog {
        id: Uuid::new_v4().to_string(),
        method: "POST".to_string(),
        path: "/v1/chat/completions".to_string(),
        model: Some("gpt-4o-mini".to_string()),
        status,
        duration,
        ip: Some("1.2.3.4".to_string()),
        created_at: now_ms(),
    }
}

#[tokio::test]
async fn test_enqueue_then_flush_persists_every_row() {
    let pool = setup_pool().await;
    let sink = LogSink::new(pool.clone(), LogSinkConfig::default());

    for i in 0..150 {
        sink.log_request(request_log(200, 100 + i));
    }
    sink.flush().await.expect("flush failed");

    assert_eq!(count_request_logs(&pool).await.unwrap(), 150);
    // 每条请求同时累计 totalRequests
    assert_eq!(get_counter(&pool, COUNTER_TOTAL_REQUESTS).await.unwrap(), 150);
    assert_eq!(sink.dropped_count(), 0);
}

#[tokio::test]
async fn test_overflow_prefers_dropping_non_request_entries() {
    let pool = setup_pool().await;
    let sink = LogSink::new(
        pool.clone(),
        LogSinkConfig {
            batch_size: 1000,
            flush_interval_ms: 60_000,
            queue_capacity: 20,
        },
    );

    // 请求日志各带一条计数事件；容量打满后计数事件先被牺牲
    for i in 0..30 {
        sink.log_request(request_log(200, i));
    }
    assert!(sink.dropped_count() > 0);

    sink.flush().await.expect("flush failed");
    let persisted = count_request_logs(&pool).await.unwrap();
    assert!(persisted >= 10, "request logs should be preserved first, got {}", persisted);
}

#[tokio::test]
async fn test_request_logs_dropped_only_after_hard_cap() {
    let pool = setup_pool().await;
    let sink = LogSink::new(
        pool.clone(),
        LogSinkConfig {
            batch_size: 1000,
            flush_interval_ms: 60_000,
            queue_capacity: 10,
        },
    );

    for i in 0..50 {
        // 只发请求日志（绕过计数事件），把队列灌到硬上限
        sink.push(hermes_gateway::gateway::sink::SinkEvent::Request(request_log(200, i)));
    }
    sink.flush().await.expect("flush failed");

    let persisted = count_request_logs(&pool).await.unwrap();
    assert_eq!(persisted, 10, "hard cap bounds persisted request logs");
    assert_eq!(sink.dropped_count(), 40);
}

#[tokio::test]
async fn test_sync_logs_and_error_counters_flow_through() {
    let pool = setup_pool().await;
    let sink = LogSink::new(pool.clone(), LogSinkConfig::default());

    sink.log_sync(SyncLog {
        id: Uuid::new_v4().to_string(),
        provider_id: "p1".to_string(),
        provider_name: "alpha".to_string(),
        model: "gpt-4o-mini".to_string(),
        result: "ok".to_string(),
        message: "model discovered".to_string(),
        created_at: now_ms(),
    });
    sink.track_upstream_error("p1", "alpha");
    sink.track_usage("p1", "alpha", "gpt-4o-mini");
    sink.flush().await.expect("flush failed");

    assert_eq!(count_sync_logs(&pool).await.unwrap(), 1);
    assert_eq!(get_counter(&pool, COUNTER_UPSTREAM_ERRORS).await.unwrap(), 1);
}

#[tokio::test]
async fn test_metrics_survive_restart_via_cold_start() {
    let pool = setup_pool().await;

    {
        let sink = LogSink::new(pool.clone(), LogSinkConfig::default());
        for _ in 0..5 {
            sink.log_request(request_log(200, 42));
        }
        sink.track_usage("p1", "alpha", "gpt-4o-mini");
        sink.flush().await.expect("flush failed");
    }

    // 新实例冷启动后从持久化指标恢复聚合
    let reborn = LogSink::new(pool.clone(), LogSinkConfig::default());
    reborn.initialize().await;
    let view = reborn.metrics_view();
    assert_eq!(view["counters"][COUNTER_TOTAL_REQUESTS], 5);
    assert_eq!(view["models"]["gpt-4o-mini"], 1);
    assert_eq!(view["providers"]["p1"]["count"], 1);
}

#[tokio::test]
async fn test_latency_percentiles() {
    let pool = setup_pool().await;
    let sink = LogSink::new(pool, LogSinkConfig::default());

    for i in 1..=100 {
        sink.record_latency(i * 10);
    }
    let pct = sink.latency_percentiles();
    assert_eq!(pct.p50, 510);
    assert_eq!(pct.p90, 910);
    assert_eq!(pct.p99, 1000);
}

#[tokio::test]
async fn test_filtered_listing() {
    let pool = setup_pool().await;
    let sink = LogSink::new(pool.clone(), LogSinkConfig::default());

    sink.log_request(request_log(200, 100));
    sink.log_request(request_log(502, 300));
    sink.flush().await.expect("flush failed");

    let filter = RequestLogFilter {
        status: Some(502),
        ..Default::default()
    };
    let rows = list_request_logs(&pool, &filter, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, 502);
}
