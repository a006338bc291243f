use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::info;
use uuid::Uuid;

use crate::dao::now_ms;
use crate::dao::request_log::RequestLog;
use crate::web::middleware::trace::TraceId;
use crate::web::server::AppState;

/// 聊天请求完成后由处理器塞进响应扩展，日志中间件据此补上模型名
#[derive(Debug, Clone)]
pub struct LoggedModel(pub String);

/// 聊天路径的请求落盘日志；其余路径直接放行
pub async fn request_log_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path != "/v1/chat/completions" {
        return next.run(request).await;
    }

    let method = request.method().to_string();
    let trace_id = request
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_else(|| "-".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let duration = started.elapsed().as_millis() as i64;
    let status = response.status().as_u16() as i64;
    let model = response.extensions().get::<LoggedModel>().map(|m| m.0.clone());

    info!(
        trace_id = %trace_id,
        status = status,
        duration_ms = duration,
        model = model.as_deref().unwrap_or("-"),
        "{} {} completed",
        method,
        path
    );

    state.sink.log_request(RequestLog {
        id: Uuid::new_v4().to_string(),
        method,
        path,
        model,
        status,
        duration,
        ip: Some(addr.ip().to_string()),
        created_at: now_ms(),
    });

    response
}
