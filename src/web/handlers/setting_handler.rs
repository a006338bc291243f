use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::dao::setting::*;
use crate::gateway::breaker::BreakerConfig;
use crate::gateway::limiter::SlidingWindowLimiter;
use crate::web::dto::setting_dto::SetSettingRequest;
use crate::web::handlers::{ensure_admin, error_response};
use crate::web::server::AppState;

/// 列出全部持久化设置
pub async fn get_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    match list_settings(&state.pool).await {
        Ok(settings) => Ok(Json(json!({ "data": settings }))),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

/// 写入一项设置并立即应用到运行中的组件
pub async fn set_setting_value(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetSettingRequest>,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    if !KNOWN_SETTING_KEYS.contains(&request.key.as_str()) {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &format!("Unknown setting key '{}'.", request.key),
            "invalid_request_error",
            "unknown_setting",
        ));
    }

    // 数值键必须是正整数
    let numeric = !matches!(
        request.key.as_str(),
        SETTING_QUOTA_MARKERS | SETTING_MODEL_MISSING_MARKERS
    );
    if numeric {
        match request.value.trim().parse::<i64>() {
            Ok(n) if n > 0 => {}
            _ => {
                return Err(error_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    &format!("Setting '{}' requires a positive integer.", request.key),
                    "invalid_request_error",
                    "invalid_setting_value",
                ));
            }
        }
    }

    if set_setting(&state.pool, &request.key, request.value.trim())
        .await
        .is_err()
    {
        return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    apply_runtime_settings(&state).await;
    info!(key = %request.key, "setting updated");
    Ok(Json(json!({ "success": true })))
}

/// 把 settings 表的当前值应用到熔断器、代理和限流器。
/// 启动时和每次设置变更后都会调用。
pub async fn apply_runtime_settings(state: &AppState) {
    let pool = &*state.pool;
    let defaults = BreakerConfig::default();

    let initial = get_setting_number(pool, SETTING_INITIAL_PENALTY_MS, defaults.initial_penalty_ms)
        .await
        .unwrap_or(defaults.initial_penalty_ms);
    let max = get_setting_number(pool, SETTING_MAX_PENALTY_MS, defaults.max_penalty_ms)
        .await
        .unwrap_or(defaults.max_penalty_ms);
    let threshold = get_setting_number(pool, SETTING_RESYNC_THRESHOLD, defaults.resync_threshold as i64)
        .await
        .unwrap_or(defaults.resync_threshold as i64);
    state.breaker.set_config(BreakerConfig {
        initial_penalty_ms: initial.max(1),
        max_penalty_ms: max.max(initial.max(1)),
        resync_threshold: threshold.max(1) as u32,
        resync_cooldown_ms: defaults.resync_cooldown_ms,
    });

    state.proxy.reload_markers(pool).await;

    let rate_max = get_setting_number(pool, SETTING_RATE_LIMIT_MAX, state.config.rate_limit_max as i64)
        .await
        .unwrap_or(state.config.rate_limit_max as i64);
    let rate_window =
        get_setting_number(pool, SETTING_RATE_LIMIT_WINDOW, state.config.rate_limit_window as i64)
            .await
            .unwrap_or(state.config.rate_limit_window as i64);
    *state.limiter.write().unwrap() = Arc::new(SlidingWindowLimiter::new(
        rate_max.max(1) as u32,
        rate_window.max(12) as u32,
    ));
}
