use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::dao::gateway_key::{
    create_gateway_key,
    crypto::{generate_gateway_key, generate_key_hash},
    delete_gateway_key, list_gateway_keys, GatewayKey,
};
use crate::dao::now_ms;
use crate::web::dto::key_dto::*;
use crate::web::handlers::{ensure_admin, error_response};
use crate::web::server::AppState;

/// 列出全部网关密钥（只有哈希，无明文）
pub async fn list_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<KeyResponse>>, Response> {
    ensure_admin(&state, &headers).await?;

    match list_gateway_keys(&state.pool).await {
        Ok(keys) => Ok(Json(
            keys.into_iter()
                .map(|k| KeyResponse {
                    id: k.id,
                    description: k.description,
                    created_at: k.created_at,
                    last_used_at: k.last_used_at,
                })
                .collect(),
        )),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}

/// 生成（或登记调用方提供的）网关密钥；明文只返回这一次
pub async fn create_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateKeyRequest>,
) -> Result<Json<CreatedKeyResponse>, Response> {
    ensure_admin(&state, &headers).await?;

    let plaintext = match request.key {
        Some(provided) if !provided.trim().is_empty() => provided.trim().to_string(),
        _ => generate_gateway_key(),
    };
    if plaintext.len() < 16 {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Key must be at least 16 characters.",
            "invalid_request_error",
            "invalid_key",
        ));
    }

    let record = GatewayKey {
        id: Uuid::new_v4().to_string(),
        key_hash: generate_key_hash(&plaintext),
        description: request
            .description
            .or_else(|| Some("Generated by admin".to_string())),
        created_at: Some(now_ms()),
        last_used_at: None,
    };

    match create_gateway_key(&state.pool, &record).await {
        Ok(_) => Ok(Json(CreatedKeyResponse {
            id: record.id,
            key: plaintext,
            description: record.description,
        })),
        Err(e) => {
            error!(error = %e, "failed to store gateway key");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// 删除网关密钥
pub async fn delete_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, Response> {
    ensure_admin(&state, &headers).await?;

    match delete_gateway_key(&state.pool, &id).await {
        Ok(rows) if rows > 0 => Ok(Json(json!({ "success": true }))),
        Ok(_) => Err(StatusCode::NOT_FOUND.into_response()),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
    }
}
