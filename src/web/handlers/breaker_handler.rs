use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::web::handlers::ensure_admin;
use crate::web::server::AppState;

/// 获取所有熔断器状态
pub async fn get_breaker_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    let config = state.breaker.config();
    Ok(Json(json!({
        "data": state.breaker.all_status(),
        "config": {
            "initialPenaltyMs": config.initial_penalty_ms,
            "maxPenaltyMs": config.max_penalty_ms,
            "resyncThreshold": config.resync_threshold,
        }
    })))
}

/// 手动复位指定供应商的熔断器
pub async fn reset_breaker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(provider_id): Path<String>,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    state.breaker.reset(&provider_id);
    info!(provider_id = %provider_id, "circuit breaker manually reset");
    Ok(Json(json!({ "success": true, "providerId": provider_id })))
}

/// 失效模型列表缓存并整体重建注册表快照
pub async fn invalidate_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    state.models_cache.invalidate_all();
    if let Err(e) = state.registry.reload().await {
        warn!(error = %e, "registry reload during cache invalidation failed");
    }
    state.proxy.reload_markers(&state.pool).await;
    Ok(Json(json!({ "success": true, "message": "caches invalidated" })))
}
