pub mod breaker_handler;
pub mod chat_handler;
pub mod health_handler;
pub mod key_handler;
pub mod log_handler;
pub mod provider_handler;
pub mod setting_handler;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::web::auth::is_admin;
use crate::web::server::AppState;

/// OpenAI 风格的错误响应体
pub fn error_response(status: StatusCode, message: &str, err_type: &str, code: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "message": message,
                "type": err_type,
                "code": code
            }
        })),
    )
        .into_response()
}

pub fn unauthorized() -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        "Invalid Hermes key provided.",
        "invalid_request_error",
        "invalid_api_key",
    )
}

/// 管理接口门禁
pub async fn ensure_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if is_admin(&state.pool, &state.config.hermes_secret, headers).await {
        Ok(())
    } else {
        Err(unauthorized())
    }
}
