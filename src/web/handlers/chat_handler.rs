use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::gateway::dispatcher::{DispatchError, DispatchSuccess};
use crate::gateway::proxy::ForwardReply;
use crate::web::auth::validate_gateway_key;
use crate::web::handlers::{error_response, unauthorized};
use crate::web::middleware::request_log::LoggedModel;
use crate::web::middleware::trace::TraceId;
use crate::web::server::AppState;

/// 聚合后的模型列表，按注册表快照版本缓存 30 秒
pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if validate_gateway_key(&state.pool, &headers).await.is_none() {
        return unauthorized();
    }

    let snapshot = state.registry.snapshot();
    let cache_key = format!(
        "models:{}:{}",
        snapshot.version,
        state.registry.normalizer().table_hash()
    );
    if let Some(cached) = state.models_cache.get(&cache_key).await {
        return Json(cached).into_response();
    }

    let created = chrono::Utc::now().timestamp();
    let data: Vec<Value> = snapshot
        .active_model_union()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "hermes-gateway"
            })
        })
        .collect();
    let payload = json!({ "object": "list", "data": data });

    state.models_cache.insert(cache_key, payload.clone()).await;
    Json(payload).into_response()
}

/// 聊天入口：鉴权 → 调度 → 透传上游响应
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(trace): Extension<TraceId>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    if validate_gateway_key(&state.pool, &headers).await.is_none() {
        return unauthorized();
    }

    let Some(model) = payload.get("model").and_then(|m| m.as_str()).map(String::from) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Request body must carry a string `model` field.",
            "invalid_request_error",
            "invalid_model",
        );
    };
    let want_stream = payload
        .get("stream")
        .and_then(|s| s.as_bool())
        .unwrap_or(false);

    let mut response = match state
        .dispatcher
        .dispatch(&model, payload, want_stream, &trace.0)
        .await
    {
        Ok(success) => upstream_response(success, &trace.0),
        Err(DispatchError::NoProvider) => error_response(
            StatusCode::NOT_FOUND,
            &format!("No active upstream serves model '{}'.", model),
            "invalid_request_error",
            "model_not_found",
        ),
        Err(DispatchError::ClientRejected {
            status,
            content_type,
            body,
            ..
        }) => {
            // 上游判定请求本身有问题，原样回给调用方
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST));
            if let Some(ct) = content_type {
                builder = builder.header(header::CONTENT_TYPE, ct);
            }
            builder
                .body(Body::from(body))
                .unwrap_or_else(|_| error_response(
                    StatusCode::BAD_GATEWAY,
                    "Failed to relay upstream error.",
                    "api_error",
                    "upstream_error",
                ))
        }
        Err(DispatchError::Exhausted { attempted }) => {
            warn!(trace_id = %trace.0, model = %model, attempts = attempted.len(), "all upstream candidates failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": {
                        "message": "All upstream providers failed for this request.",
                        "type": "api_error",
                        "code": "upstream_error",
                        "attempted": attempted
                    }
                })),
            )
                .into_response()
        }
    };

    response.extensions_mut().insert(LoggedModel(model));
    response
}

fn upstream_response(success: DispatchSuccess, trace_id: &str) -> Response {
    let mut response = match success.reply {
        ForwardReply::Buffered {
            status,
            content_type,
            body,
            ..
        } => {
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK));
            if let Some(ct) = content_type {
                builder = builder.header(header::CONTENT_TYPE, ct);
            }
            builder.body(Body::from(body)).unwrap_or_else(|_| {
                error_response(
                    StatusCode::BAD_GATEWAY,
                    "Failed to relay upstream response.",
                    "api_error",
                    "upstream_error",
                )
            })
        }
        ForwardReply::Streaming {
            status,
            content_type,
            body,
        } => {
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
                .header("x-accel-buffering", "no");
            if let Some(ct) = content_type {
                builder = builder.header(header::CONTENT_TYPE, ct);
            }
            builder.body(Body::from_stream(body)).unwrap_or_else(|_| {
                error_response(
                    StatusCode::BAD_GATEWAY,
                    "Failed to relay upstream stream.",
                    "api_error",
                    "upstream_error",
                )
            })
        }
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&success.provider_id) {
        headers.insert("x-hermes-provider", value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{:.4}", success.score)) {
        headers.insert("x-hermes-score", value);
    }
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        headers.insert("x-hermes-trace", value);
    }
    response
}
