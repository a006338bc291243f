//! # 请求鉴权
//!
//! 下游凭证是 Bearer token，存库的只有 SHA-256 哈希；校验时对呈递的
//! token 取哈希后比对。管理接口额外接受环境配置的后门密钥。

use axum::http::HeaderMap;
use sqlx::SqlitePool;
use tracing::warn;

use crate::dao::gateway_key::{
    crypto::{constant_time_eq, generate_key_hash},
    get_gateway_key_by_hash, touch_gateway_key, GatewayKey,
};
use crate::dao::now_ms;

/// 从请求头取出 Bearer token
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// 校验网关密钥；命中时异步刷新 last_used_at
pub async fn validate_gateway_key(pool: &SqlitePool, headers: &HeaderMap) -> Option<GatewayKey> {
    let token = bearer_token(headers)?;
    let presented_hash = generate_key_hash(&token);
    let key = match get_gateway_key_by_hash(pool, &presented_hash).await {
        Ok(found) => found?,
        Err(e) => {
            warn!(error = %e, "gateway key lookup failed");
            return None;
        }
    };
    if !constant_time_eq(&key.key_hash, &presented_hash) {
        return None;
    }

    let pool = pool.clone();
    let key_id = key.id.clone();
    tokio::spawn(async move {
        if let Err(e) = touch_gateway_key(&pool, &key_id, now_ms()).await {
            warn!(key_id = %key_id, error = %e, "failed to stamp key usage");
        }
    });
    Some(key)
}

/// 管理接口：后门密钥或有效网关密钥皆可
pub async fn is_admin(pool: &SqlitePool, secret: &str, headers: &HeaderMap) -> bool {
    if let Some(token) = bearer_token(headers) {
        if constant_time_eq(&token, secret) {
            return true;
        }
    }
    validate_gateway_key(pool, headers).await.is_some()
}
