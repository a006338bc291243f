//! # 请求调度器
//!
//! 一次聊天请求的完整路径：取快照里支持该模型的供应商，按熔断状态
//! 过滤、按评分排序，逐个尝试转发。供应商侧失败换下一家重试，
//! 模型缺失做本地剔除不计入重试次数，客户端类错误立即回传。
//! 评分、熔断、使用时间的回写都经由 `RouteFeedback` 收口。

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::dao::setting::{get_setting_number, SETTING_CHAT_MAX_RETRIES};
use crate::gateway::breaker::{BreakerState, CircuitBreaker};
use crate::gateway::proxy::{ForwardFailure, ForwardReply, UpstreamFault};
use crate::gateway::registry::{ProviderRegistry, ProviderView};
use crate::gateway::scorer::RoutingScorer;
use crate::gateway::sink::LogSink;
use crate::gateway::sync::ModelSync;

/// 上游转发的窄接口；真实实现是 HTTP 代理，测试里可替换
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    async fn forward(
        &self,
        provider: &ProviderView,
        model: &str,
        body: Bytes,
        want_stream: bool,
        feedback: Arc<RouteFeedback>,
    ) -> Result<ForwardReply, ForwardFailure>;

    /// 自愈探测：发一个最小请求确认上游恢复
    async fn probe(&self, provider: &ProviderView, model: &str) -> bool;
}

/// 结果回写通道。代理与调度器只通过它更新评分、熔断与指标，
/// 不反向持有调度器。
pub struct RouteFeedback {
    pub scorer: Arc<RoutingScorer>,
    pub breaker: Arc<CircuitBreaker>,
    pub registry: Arc<ProviderRegistry>,
    pub sink: LogSink,
    pub sync: ModelSync,
}

impl RouteFeedback {
    /// 成功完成（含流式走完）
    pub fn on_success(&self, provider_id: &str, duration_ms: i64) {
        self.scorer.observe_success(provider_id, duration_ms);
        self.breaker.on_success(provider_id);
        self.sink.record_latency(duration_ms);
        self.sink.record_provider_latency(provider_id, duration_ms);
    }

    /// 供应商侧失败（5xx/超时/传输/配额）
    pub fn on_provider_fault(&self, provider_id: &str, provider_name: &str) {
        self.scorer.observe_failure(provider_id);
        let verdict = self.breaker.on_failure(provider_id);
        self.sink.track_upstream_error(provider_id, provider_name);
        if verdict.should_resync {
            warn!(
                provider_id = %provider_id,
                failures = verdict.consecutive_failures,
                "failure threshold reached, scheduling model resync"
            );
            self.sync.schedule(provider_id);
        }
    }

    /// 首字节时延，只进指标不进评分
    pub fn on_first_byte(&self, duration_ms: i64) {
        self.sink.record_first_byte(duration_ms);
    }
}

/// 调度成功的结果
pub struct DispatchSuccess {
    pub provider_id: String,
    pub provider_name: String,
    pub resolved_model: String,
    /// 选中时刻的路由评分，回写到响应头
    pub score: f64,
    pub reply: ForwardReply,
}

/// 终止响应里列出的单次尝试
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub provider_id: String,
    pub classification: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

pub enum DispatchError {
    /// 没有活跃供应商支持该模型
    NoProvider,
    /// 上游判定为客户端错误，原样回传，不再重试
    ClientRejected {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
        attempted: Vec<AttemptRecord>,
    },
    /// 候选耗尽
    Exhausted { attempted: Vec<AttemptRecord> },
}

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    scorer: Arc<RoutingScorer>,
    breaker: Arc<CircuitBreaker>,
    upstream: Arc<dyn ChatUpstream>,
    feedback: Arc<RouteFeedback>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        scorer: Arc<RoutingScorer>,
        breaker: Arc<CircuitBreaker>,
        upstream: Arc<dyn ChatUpstream>,
        feedback: Arc<RouteFeedback>,
    ) -> Self {
        Self {
            registry,
            scorer,
            breaker,
            upstream,
            feedback,
        }
    }

    pub fn feedback(&self) -> Arc<RouteFeedback> {
        self.feedback.clone()
    }

    /// 调度一次聊天请求。`payload` 是已解析的请求体，除 model 字段按
    /// 供应商实际广告的写法回填外原样转发。
    pub async fn dispatch(
        &self,
        model: &str,
        mut payload: Value,
        want_stream: bool,
        trace_id: &str,
    ) -> Result<DispatchSuccess, DispatchError> {
        let snapshot = self.registry.snapshot();
        let normalized = self.registry.normalizer().canonical(model);
        let canonical = snapshot.resolve_canonical(&normalized);

        let all: Vec<ProviderView> = self
            .registry
            .providers_for(&canonical)
            .into_iter()
            .filter(|p| p.is_active())
            .collect();
        if all.is_empty() {
            return Err(DispatchError::NoProvider);
        }

        // 熔断过滤：有 CLOSED 候选时 HALF_OPEN 交给显式探测；
        // 全员 HALF_OPEN 时放行流量探路，避免整体断流
        let mut closed = Vec::new();
        let mut half_open = Vec::new();
        for provider in all {
            match self.breaker.state(&provider.id) {
                BreakerState::Closed => closed.push(provider),
                BreakerState::HalfOpen => half_open.push(provider),
                BreakerState::Open => {}
            }
        }
        let mut candidates = if closed.is_empty() {
            half_open
        } else {
            for provider in half_open {
                self.maybe_spawn_probe(provider, &canonical, &snapshot);
            }
            closed
        };
        if candidates.is_empty() {
            return Err(DispatchError::Exhausted { attempted: Vec::new() });
        }

        // 评分降序，平分时把机会让给更久未被使用的供应商
        let mut ranked: Vec<(f64, ProviderView)> = candidates
            .drain(..)
            .map(|p| (self.scorer.score(&p.id), p))
            .collect();
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.1.last_used_at
                        .unwrap_or(0)
                        .cmp(&b.1.last_used_at.unwrap_or(0))
                })
        });

        let max_retries = get_setting_number(self.registry.pool(), SETTING_CHAT_MAX_RETRIES, 3)
            .await
            .unwrap_or(3)
            .max(1) as usize;

        let mut attempted: Vec<AttemptRecord> = Vec::new();
        let mut counted_attempts = 0usize;

        for (score, provider) in ranked {
            if counted_attempts >= max_retries {
                break;
            }

            let resolved_model = {
                let variants = snapshot.variants_of(&provider, &canonical);
                variants
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .unwrap_or_else(|| canonical.clone())
            };
            payload["model"] = Value::String(resolved_model.clone());
            let body = match serde_json::to_vec(&payload) {
                Ok(bytes) => Bytes::from(bytes),
                Err(_) => return Err(DispatchError::Exhausted { attempted }),
            };

            info!(
                trace_id = %trace_id,
                provider_id = %provider.id,
                provider = %provider.name,
                model = %resolved_model,
                requested = %model,
                score = score,
                "dispatching to upstream"
            );
            self.feedback
                .sink
                .track_usage(&provider.id, &provider.name, &canonical);

            match self
                .upstream
                .forward(&provider, &resolved_model, body, want_stream, self.feedback.clone())
                .await
            {
                Ok(reply) => {
                    if let ForwardReply::Buffered { duration_ms, .. } = &reply {
                        self.feedback.on_success(&provider.id, *duration_ms);
                    }
                    // 流式结果在流走完时经 RouteFeedback 自行上报
                    self.registry.touch_used(&provider.id);
                    return Ok(DispatchSuccess {
                        provider_id: provider.id.clone(),
                        provider_name: provider.name.clone(),
                        resolved_model,
                        score,
                        reply,
                    });
                }
                Err(failure) => {
                    attempted.push(AttemptRecord {
                        provider_id: provider.id.clone(),
                        classification: failure.fault.as_str().to_string(),
                        status: failure.status,
                    });
                    match failure.fault {
                        UpstreamFault::ModelMissing => {
                            // 本地剔除 + 安排重同步；不计入重试，也不动熔断
                            warn!(
                                trace_id = %trace_id,
                                provider_id = %provider.id,
                                model = %resolved_model,
                                "upstream reported missing model, stripping locally"
                            );
                            let registry = self.registry.clone();
                            let sync = self.feedback.sync.clone();
                            let provider_id = provider.id.clone();
                            let missing = resolved_model.clone();
                            tokio::spawn(async move {
                                if let Err(e) = registry.strip_model(&provider_id, &missing).await {
                                    warn!(provider_id = %provider_id, error = %e, "failed to strip model");
                                }
                                sync.schedule(&provider_id);
                            });
                        }
                        UpstreamFault::QuotaExhausted | UpstreamFault::Upstream => {
                            self.feedback.on_provider_fault(&provider.id, &provider.name);
                            counted_attempts += 1;
                        }
                        UpstreamFault::Client => {
                            return Err(DispatchError::ClientRejected {
                                status: failure.status.unwrap_or(400),
                                content_type: failure.content_type,
                                body: failure.body,
                                attempted,
                            });
                        }
                    }
                }
            }
        }

        Err(DispatchError::Exhausted { attempted })
    }

    /// 有 CLOSED 候选时，为 HALF_OPEN 供应商安排一次显式自愈探测
    fn maybe_spawn_probe(
        &self,
        provider: ProviderView,
        canonical: &str,
        snapshot: &crate::gateway::registry::RegistrySnapshot,
    ) {
        if !self.breaker.try_begin_probe(&provider.id) {
            return;
        }
        let model = snapshot
            .variants_of(&provider, canonical)
            .first()
            .cloned()
            .unwrap_or_else(|| canonical.to_string());
        let upstream = self.upstream.clone();
        let breaker = self.breaker.clone();
        tokio::spawn(async move {
            let ok = upstream.probe(&provider, &model).await;
            info!(provider_id = %provider.id, ok = ok, "self-heal probe finished");
            breaker.finish_probe(&provider.id, ok);
        });
    }
}
