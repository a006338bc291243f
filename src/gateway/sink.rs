//! # 异步日志与指标汇集器
//!
//! 请求日志、同步日志和计数增量先进入内存队列，由后台任务按批落库，
//! 热路径从不等待数据库。单批最多 `batch_size` 条，或每隔
//! `flush_interval_ms` 刷一次，先到者为准。队列打满时优先丢弃最老的
//! 非请求日志；请求日志保留到硬上限，超过后连同新条目一起丢弃并累加
//! 丢弃计数。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::dao::metrics::{
    bump_counter_tx, bump_model_count_tx, bump_provider_metric_tx, list_counters,
    list_model_counts, list_provider_metrics, COUNTER_TOTAL_REQUESTS, COUNTER_UPSTREAM_ERRORS,
};
use crate::dao::request_log::{insert_request_log_tx, RequestLog};
use crate::dao::sync_log::{insert_sync_log_tx, SyncLog};

/// 滚动时延窗口大小
const LATENCY_WINDOW: usize = 512;

#[derive(Debug, Clone)]
pub enum SinkEvent {
    Request(RequestLog),
    Sync(SyncLog),
    Counter { key: String, delta: i64 },
    ModelCount { model: String },
    ProviderUsage { id: String, name: String, error: bool },
}

impl SinkEvent {
    fn is_request_log(&self) -> bool {
        matches!(self, SinkEvent::Request(_))
    }
}

#[derive(Debug, Clone)]
pub struct LogSinkConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    /// 队列容量，同时是请求日志的硬上限
    pub queue_capacity: usize,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 1000,
            queue_capacity: 2000,
        }
    }
}

#[derive(Debug, Default)]
struct UsageAggregates {
    counters: HashMap<String, i64>,
    models: HashMap<String, i64>,
    providers: HashMap<String, (String, i64, i64)>,
}

/// P50/P90/P99 视图
#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct LatencyPercentiles {
    pub p50: i64,
    pub p90: i64,
    pub p99: i64,
}

struct SinkInner {
    config: LogSinkConfig,
    pool: Arc<SqlitePool>,
    queue: Mutex<VecDeque<SinkEvent>>,
    notify: Notify,
    dropped: AtomicU64,
    usage: Mutex<UsageAggregates>,
    latency: Mutex<VecDeque<i64>>,
    first_byte: Mutex<VecDeque<i64>>,
    provider_latency: Mutex<HashMap<String, VecDeque<i64>>>,
}

#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl LogSink {
    pub fn new(pool: Arc<SqlitePool>, config: LogSinkConfig) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                config,
                pool,
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
                usage: Mutex::new(UsageAggregates::default()),
                latency: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
                first_byte: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
                provider_latency: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 从持久化指标冷启动内存聚合，重启后管理端数字不清零
    pub async fn initialize(&self) {
        let pool = self.inner.pool.as_ref();
        let mut usage = UsageAggregates::default();
        match list_counters(pool).await {
            Ok(rows) => {
                for (key, value) in rows {
                    usage.counters.insert(key, value);
                }
            }
            Err(e) => error!(error = %e, "failed to load persisted counters"),
        }
        match list_model_counts(pool).await {
            Ok(rows) => {
                for (model, count) in rows {
                    usage.models.insert(model, count);
                }
            }
            Err(e) => error!(error = %e, "failed to load persisted model counts"),
        }
        match list_provider_metrics(pool).await {
            Ok(rows) => {
                for metric in rows {
                    usage.providers.insert(
                        metric.id,
                        (metric.name.unwrap_or_default(), metric.count, metric.errors),
                    );
                }
            }
            Err(e) => error!(error = %e, "failed to load persisted provider metrics"),
        }
        *self.inner.usage.lock().unwrap() = usage;
        info!("log sink metrics restored from storage");
    }

    /// 启动后台刷盘任务
    pub fn start(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let interval = Duration::from_millis(inner.config.flush_interval_ms);
            loop {
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = flush_once(&inner).await {
                    error!(error = %e, "log sink flush failed");
                }
            }
        });
    }

    /// 入队一条事件；队列满时按溢出策略丢弃，永不阻塞
    pub fn push(&self, event: SinkEvent) {
        self.apply_to_aggregates(&event);

        let mut queue = self.inner.queue.lock().unwrap();
        if queue.len() >= self.inner.config.queue_capacity {
            // 先牺牲最老的非请求日志
            if let Some(pos) = queue.iter().position(|e| !e.is_request_log()) {
                queue.remove(pos);
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            } else {
                // 整队都是请求日志且已到硬上限，丢弃新条目
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        queue.push_back(event);
        let should_flush = queue.len() >= self.inner.config.batch_size;
        drop(queue);
        if should_flush {
            self.inner.notify.notify_one();
        }
    }

    /// 请求完成日志（热路径入口）
    pub fn log_request(&self, log: RequestLog) {
        self.record_latency(log.duration);
        self.push(SinkEvent::Counter {
            key: COUNTER_TOTAL_REQUESTS.to_string(),
            delta: 1,
        });
        self.push(SinkEvent::Request(log));
    }

    /// 模型同步日志
    pub fn log_sync(&self, log: SyncLog) {
        self.push(SinkEvent::Sync(log));
    }

    /// 记录一次上游使用（计数 + 每供应商统计）
    pub fn track_usage(&self, provider_id: &str, provider_name: &str, model: &str) {
        self.push(SinkEvent::ModelCount {
            model: model.to_string(),
        });
        self.push(SinkEvent::ProviderUsage {
            id: provider_id.to_string(),
            name: provider_name.to_string(),
            error: false,
        });
    }

    /// 记录一次上游错误
    pub fn track_upstream_error(&self, provider_id: &str, provider_name: &str) {
        self.push(SinkEvent::Counter {
            key: COUNTER_UPSTREAM_ERRORS.to_string(),
            delta: 1,
        });
        self.push(SinkEvent::ProviderUsage {
            id: provider_id.to_string(),
            name: provider_name.to_string(),
            error: true,
        });
    }

    /// 总时延样本（毫秒）
    pub fn record_latency(&self, duration_ms: i64) {
        let mut window = self.inner.latency.lock().unwrap();
        if window.len() >= LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(duration_ms);
    }

    /// 首字节时延样本，单独成指标，不参与评分
    pub fn record_first_byte(&self, duration_ms: i64) {
        let mut window = self.inner.first_byte.lock().unwrap();
        if window.len() >= LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(duration_ms);
    }

    /// 按供应商记录时延样本，/health 的分位数从这里出
    pub fn record_provider_latency(&self, provider_id: &str, duration_ms: i64) {
        let mut map = self.inner.provider_latency.lock().unwrap();
        let window = map.entry(provider_id.to_string()).or_default();
        if window.len() >= LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(duration_ms);
    }

    pub fn provider_percentiles(&self, provider_id: &str) -> LatencyPercentiles {
        let map = self.inner.provider_latency.lock().unwrap();
        map.get(provider_id)
            .map(percentiles_of)
            .unwrap_or_default()
    }

    /// 供应商删除时回收其时延窗口
    pub fn forget_provider(&self, provider_id: &str) {
        self.inner
            .provider_latency
            .lock()
            .unwrap()
            .remove(provider_id);
    }

    pub fn latency_percentiles(&self) -> LatencyPercentiles {
        percentiles_of(&self.inner.latency.lock().unwrap())
    }

    pub fn first_byte_percentiles(&self) -> LatencyPercentiles {
        percentiles_of(&self.inner.first_byte.lock().unwrap())
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// 管理端指标快照
    pub fn metrics_view(&self) -> Value {
        let usage = self.inner.usage.lock().unwrap();
        let providers: HashMap<&String, Value> = usage
            .providers
            .iter()
            .map(|(id, (name, count, errors))| {
                (id, json!({ "name": name, "count": count, "errors": errors }))
            })
            .collect();
        json!({
            "counters": &usage.counters,
            "models": &usage.models,
            "providers": providers,
            "latency": self.latency_percentiles(),
            "firstByteLatency": self.first_byte_percentiles(),
            "droppedLogs": self.dropped_count(),
        })
    }

    fn apply_to_aggregates(&self, event: &SinkEvent) {
        let mut usage = self.inner.usage.lock().unwrap();
        match event {
            SinkEvent::Counter { key, delta } => {
                *usage.counters.entry(key.clone()).or_insert(0) += delta;
            }
            SinkEvent::ModelCount { model } => {
                *usage.models.entry(model.clone()).or_insert(0) += 1;
            }
            SinkEvent::ProviderUsage { id, name, error } => {
                let entry = usage
                    .providers
                    .entry(id.clone())
                    .or_insert_with(|| (name.clone(), 0, 0));
                entry.0 = name.clone();
                if *error {
                    entry.2 += 1;
                } else {
                    entry.1 += 1;
                }
            }
            _ => {}
        }
    }

    /// 立刻刷空队列（测试与停机路径）
    pub async fn flush(&self) -> anyhow::Result<()> {
        while !self.inner.queue.lock().unwrap().is_empty() {
            flush_once(&self.inner).await?;
        }
        Ok(())
    }

    /// 当前排队长度
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }
}

/// 取一批写库，同批内的计数增量先合并再落盘
async fn flush_once(inner: &SinkInner) -> anyhow::Result<()> {
    let batch: Vec<SinkEvent> = {
        let mut queue = inner.queue.lock().unwrap();
        let take = queue.len().min(inner.config.batch_size);
        queue.drain(..take).collect()
    };
    if batch.is_empty() {
        return Ok(());
    }

    let mut counter_deltas: HashMap<String, i64> = HashMap::new();
    let mut model_deltas: HashMap<String, i64> = HashMap::new();
    let mut provider_deltas: HashMap<String, (String, i64, i64)> = HashMap::new();

    let mut tx = inner.pool.begin().await?;
    for event in &batch {
        match event {
            SinkEvent::Request(log) => {
                insert_request_log_tx(&mut tx, log).await?;
            }
            SinkEvent::Sync(log) => {
                insert_sync_log_tx(&mut tx, log).await?;
            }
            SinkEvent::Counter { key, delta } => {
                *counter_deltas.entry(key.clone()).or_insert(0) += delta;
            }
            SinkEvent::ModelCount { model } => {
                *model_deltas.entry(model.clone()).or_insert(0) += 1;
            }
            SinkEvent::ProviderUsage { id, name, error } => {
                let entry = provider_deltas
                    .entry(id.clone())
                    .or_insert_with(|| (name.clone(), 0, 0));
                if *error {
                    entry.2 += 1;
                } else {
                    entry.1 += 1;
                }
            }
        }
    }
    for (key, delta) in &counter_deltas {
        bump_counter_tx(&mut tx, key, *delta).await?;
    }
    for (model, delta) in &model_deltas {
        bump_model_count_tx(&mut tx, model, *delta).await?;
    }
    for (id, (name, count, errors)) in &provider_deltas {
        bump_provider_metric_tx(&mut tx, id, name, *count, *errors).await?;
    }
    tx.commit().await?;

    debug!(batch = batch.len(), "log sink batch flushed");

    // 队列里还有整批就继续追
    if inner.queue.lock().unwrap().len() >= inner.config.batch_size {
        inner.notify.notify_one();
    }
    Ok(())
}

fn percentiles_of(window: &VecDeque<i64>) -> LatencyPercentiles {
    if window.is_empty() {
        return LatencyPercentiles::default();
    }
    let mut samples: Vec<i64> = window.iter().copied().collect();
    samples.sort_unstable();
    let pick = |q: f64| -> i64 {
        let idx = ((samples.len() as f64) * q) as usize;
        samples[idx.min(samples.len() - 1)]
    };
    LatencyPercentiles {
        p50: pick(0.5),
        p90: pick(0.9),
        p99: pick(0.99),
    }
}
