//! # 上游转发代理
//!
//! 持有唯一的 HTTP/2 连接池，把聊天请求转发到选定供应商：
//! - 流式响应逐块透传，完成或中断时经 `RouteFeedback` 上报结果
//! - 非流式响应在上限内读入内存后整体回传
//! - 失败按四类定性：模型缺失 / 配额耗尽 / 上游故障 / 客户端错误
//!
//! 代理自身从不向调用方抛错，所有结局都以定性结果返回。

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::time::Sleep;
use tracing::{debug, error, warn};

use crate::dao::setting::{
    get_setting, SETTING_MODEL_MISSING_MARKERS, SETTING_QUOTA_MARKERS,
};
use crate::gateway::dispatcher::{ChatUpstream, RouteFeedback};
use crate::gateway::registry::ProviderView;

/// 连接建立超时
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// 非流式请求总超时
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// 流式响应相邻块之间的最大空闲
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// 探测请求超时
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// 每主机空闲连接上限
const MAX_IDLE_PER_HOST: usize = 32;
/// 非流式响应体的内存上限
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
/// 错误响应体的读取上限
const ERROR_BODY_CAP: usize = 64 * 1024;

/// 失败定性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFault {
    /// 上游声称支持却返回模型不存在
    ModelMissing,
    /// 429 或配额类 4xx
    QuotaExhausted,
    /// 5xx、超时、传输错误
    Upstream,
    /// 其余 4xx，原样回传调用方
    Client,
}

impl UpstreamFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamFault::ModelMissing => "model_missing",
            UpstreamFault::QuotaExhausted => "quota_exhausted",
            UpstreamFault::Upstream => "upstream_error",
            UpstreamFault::Client => "client_error",
        }
    }
}

impl fmt::Display for UpstreamFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次失败转发的完整定性结果
#[derive(Debug)]
pub struct ForwardFailure {
    pub fault: UpstreamFault,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    /// 上游原始错误体（客户端类错误需要原样回传）
    pub body: Bytes,
    pub message: String,
    pub duration_ms: i64,
}

impl fmt::Display for ForwardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (status: {:?}, {}ms): {}",
            self.fault, self.status, self.duration_ms, self.message
        )
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static>>;

/// 转发成功的两种形态
pub enum ForwardReply {
    /// 已整体读入内存的响应
    Buffered {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
        duration_ms: i64,
    },
    /// 透传中的流；结果在流走完时上报
    Streaming {
        status: u16,
        content_type: Option<String>,
        body: ByteStream,
    },
}

/// 定性用的子串表，可由 settings 覆盖
#[derive(Debug, Clone)]
pub struct FaultMarkers {
    pub quota: Vec<String>,
    pub model_missing: Vec<String>,
}

impl Default for FaultMarkers {
    fn default() -> Self {
        Self {
            quota: vec!["insufficient_quota".to_string(), "quota".to_string()],
            model_missing: vec![
                "model_not_found".to_string(),
                "model does not exist".to_string(),
            ],
        }
    }
}

pub struct UpstreamProxy {
    client: reqwest::Client,
    markers: RwLock<FaultMarkers>,
}

impl UpstreamProxy {
    pub fn new() -> anyhow::Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .build()?;
        Ok(Arc::new(Self {
            client,
            markers: RwLock::new(FaultMarkers::default()),
        }))
    }

    /// 从 settings 重载定性子串表（逗号分隔）
    pub async fn reload_markers(&self, pool: &SqlitePool) {
        let mut markers = FaultMarkers::default();
        if let Ok(Some(raw)) = get_setting(pool, SETTING_QUOTA_MARKERS).await {
            let list = split_markers(&raw);
            if !list.is_empty() {
                markers.quota = list;
            }
        }
        if let Ok(Some(raw)) = get_setting(pool, SETTING_MODEL_MISSING_MARKERS).await {
            let list = split_markers(&raw);
            if !list.is_empty() {
                markers.model_missing = list;
            }
        }
        *self.markers.write().unwrap() = markers;
    }

    fn classify(&self, status: StatusCode, body_lower: &str) -> UpstreamFault {
        let markers = self.markers.read().unwrap();
        if status == StatusCode::NOT_FOUND
            && markers.model_missing.iter().any(|m| body_lower.contains(m))
        {
            return UpstreamFault::ModelMissing;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return UpstreamFault::QuotaExhausted;
        }
        if status.is_client_error() && markers.quota.iter().any(|m| body_lower.contains(m)) {
            return UpstreamFault::QuotaExhausted;
        }
        if status.is_server_error() {
            return UpstreamFault::Upstream;
        }
        UpstreamFault::Client
    }

    /// 在上限内把响应体读入内存
    async fn read_capped(
        response: reqwest::Response,
        cap: usize,
    ) -> Result<Bytes, (String, bool)> {
        let mut stream = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if buf.len() + chunk.len() > cap {
                        return Err(("response body exceeds configured cap".to_string(), true));
                    }
                    buf.extend_from_slice(&chunk);
                }
                Err(e) => return Err((e.to_string(), false)),
            }
        }
        Ok(Bytes::from(buf))
    }
}

fn split_markers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect()
}

fn content_type_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn transport_failure(message: String, duration_ms: i64) -> ForwardFailure {
    ForwardFailure {
        fault: UpstreamFault::Upstream,
        status: None,
        content_type: None,
        body: Bytes::new(),
        message,
        duration_ms,
    }
}

#[async_trait]
impl ChatUpstream for UpstreamProxy {
    async fn forward(
        &self,
        provider: &ProviderView,
        model: &str,
        body: Bytes,
        want_stream: bool,
        feedback: Arc<RouteFeedback>,
    ) -> Result<ForwardReply, ForwardFailure> {
        let url = format!(
            "{}/v1/chat/completions",
            provider.base_url.trim_end_matches('/')
        );
        let started = Instant::now();

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&provider.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if !want_stream {
            // 流式响应不能设总超时，改由逐块空闲超时约束
            request = request.timeout(REQUEST_TIMEOUT);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                error!(
                    provider_id = %provider.id,
                    url = %url,
                    model = %model,
                    error = %e,
                    duration_ms = duration_ms,
                    "upstream transport error"
                );
                return Err(transport_failure(e.to_string(), duration_ms));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let content_type = content_type_of(&response);
            let error_body = Self::read_capped(response, ERROR_BODY_CAP)
                .await
                .unwrap_or_default();
            let duration_ms = started.elapsed().as_millis() as i64;
            let body_text = String::from_utf8_lossy(&error_body).to_string();
            let fault = self.classify(status, &body_text.to_lowercase());
            warn!(
                provider_id = %provider.id,
                model = %model,
                status = status.as_u16(),
                fault = %fault,
                duration_ms = duration_ms,
                "upstream returned error status"
            );
            return Err(ForwardFailure {
                fault,
                status: Some(status.as_u16()),
                content_type,
                body: error_body,
                message: truncate(&body_text, 200),
                duration_ms,
            });
        }

        let content_type = content_type_of(&response);
        let is_event_stream = content_type
            .as_deref()
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if want_stream || is_event_stream {
            debug!(provider_id = %provider.id, model = %model, "relaying upstream stream");
            let relay = RelayStream::new(
                response.bytes_stream(),
                started,
                provider.id.clone(),
                provider.name.clone(),
                feedback,
            );
            return Ok(ForwardReply::Streaming {
                status: status.as_u16(),
                content_type,
                body: Box::pin(relay),
            });
        }

        match Self::read_capped(response, MAX_BODY_BYTES).await {
            Ok(bytes) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                feedback.on_first_byte(duration_ms);
                Ok(ForwardReply::Buffered {
                    status: status.as_u16(),
                    content_type,
                    body: bytes,
                    duration_ms,
                })
            }
            Err((message, _oversize)) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                Err(transport_failure(message, duration_ms))
            }
        }
    }

    async fn probe(&self, provider: &ProviderView, model: &str) -> bool {
        let url = format!(
            "{}/v1/chat/completions",
            provider.base_url.trim_end_matches('/')
        );
        let payload = json!({
            "model": model,
            "messages": [{ "role": "user", "content": "ping" }],
            "max_tokens": 1,
        });
        match self
            .client
            .post(&url)
            .bearer_auth(&provider.api_key)
            .timeout(PROBE_TIMEOUT)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// 透传流。走完上报成功，上游中断或空闲超时上报失败；
/// 下游先断开时整条流被丢弃，不产生任何观测。
struct RelayStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    idle: Pin<Box<Sleep>>,
    started: Instant,
    saw_first_byte: bool,
    finished: bool,
    provider_id: String,
    provider_name: String,
    feedback: Arc<RouteFeedback>,
}

impl RelayStream {
    fn new(
        inner: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
        started: Instant,
        provider_id: String,
        provider_name: String,
        feedback: Arc<RouteFeedback>,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            idle: Box::pin(tokio::time::sleep(STREAM_IDLE_TIMEOUT)),
            started,
            saw_first_byte: false,
            finished: false,
            provider_id,
            provider_name,
            feedback,
        }
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.idle
                    .as_mut()
                    .reset(tokio::time::Instant::now() + STREAM_IDLE_TIMEOUT);
                if !this.saw_first_byte {
                    this.saw_first_byte = true;
                    this.feedback
                        .on_first_byte(this.started.elapsed().as_millis() as i64);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                warn!(
                    provider_id = %this.provider_id,
                    error = %e,
                    "upstream stream aborted"
                );
                this.feedback
                    .on_provider_fault(&this.provider_id, &this.provider_name);
                Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e,
                ))))
            }
            Poll::Ready(None) => {
                this.finished = true;
                let duration_ms = this.started.elapsed().as_millis() as i64;
                this.feedback.on_success(&this.provider_id, duration_ms);
                Poll::Ready(None)
            }
            Poll::Pending => match this.idle.as_mut().poll(cx) {
                Poll::Ready(_) => {
                    this.finished = true;
                    warn!(
                        provider_id = %this.provider_id,
                        "upstream stream idle timeout"
                    );
                    this.feedback
                        .on_provider_fault(&this.provider_id, &this.provider_name);
                    Poll::Ready(Some(Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "upstream stream idle timeout",
                    ))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if !self.finished {
            // 客户端提前断开：信息不足，不更新评分与熔断
            debug!(provider_id = %self.provider_id, "downstream disconnected mid-stream");
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}
