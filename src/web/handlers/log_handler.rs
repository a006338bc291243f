use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dao::request_log::{list_request_logs, RequestLogFilter};
use crate::dao::sync_log::{list_sync_logs, SyncLogFilter};
use crate::web::handlers::{ensure_admin, error_response};
use crate::web::server::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct RequestLogQuery {
    limit: Option<i64>,
    /// Unix 毫秒，返回此时间之后的记录
    since: Option<i64>,
    method: Option<String>,
    model: Option<String>,
    status: Option<i64>,
}

/// 获取请求日志（倒序，支持过滤）
pub async fn list_request_log_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RequestLogQuery>,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    let filter = RequestLogFilter {
        since_ms: params.since,
        method: params.method,
        model: params.model,
        status: params.status,
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match list_request_logs(&state.pool, &filter, limit).await {
        Ok(logs) => Ok(Json(json!({ "data": logs }))),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SyncLogQuery {
    limit: Option<i64>,
    #[serde(rename = "providerId")]
    provider_id: Option<String>,
    model: Option<String>,
    result: Option<String>,
}

/// 获取同步日志（倒序，支持过滤）
pub async fn list_sync_log_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SyncLogQuery>,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    if let Some(result) = &params.result {
        if result != "ok" && result != "error" {
            return Err(error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "result must be 'ok' or 'error'.",
                "invalid_request_error",
                "invalid_filter",
            ));
        }
    }

    let filter = SyncLogFilter {
        provider_id: params.provider_id,
        model: params.model,
        result: params.result,
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match list_sync_logs(&state.pool, &filter, limit).await {
        Ok(logs) => Ok(Json(json!({ "data": logs }))),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

/// 当前指标快照（内存聚合 + 时延分位数）
pub async fn get_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;
    Ok(Json(json!({ "data": state.sink.metrics_view() })))
}
