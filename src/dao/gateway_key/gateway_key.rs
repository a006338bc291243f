use sqlx::{Result, SqlitePool};
use serde::{Deserialize, Serialize};

/// A downstream client credential. Only the SHA-256 hash of the secret is
/// stored; validation hashes the presented token and compares.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct GatewayKey {
    pub id: String,
    pub key_hash: String,
    pub description: Option<String>,
    pub created_at: Option<i64>,
    pub last_used_at: Option<i64>,
}

/// Create a new gateway key record
pub async fn create_gateway_key(pool: &SqlitePool, key: &GatewayKey) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO hermes_keys (id, key_hash, description, created_at, last_used_at)
        VALUES (?, ?, ?, ?, ?)
    "#)
        .bind(&key.id)
        .bind(&key.key_hash)
        .bind(&key.description)
        .bind(key.created_at)
        .bind(key.last_used_at)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Get a key record by the hash of its secret
pub async fn get_gateway_key_by_hash(pool: &SqlitePool, key_hash: &str) -> Result<Option<GatewayKey>> {
    let key = sqlx::query_as::<_, GatewayKey>("SELECT * FROM hermes_keys WHERE key_hash = ?")
        .bind(key_hash)
        .fetch_optional(pool)
        .await?;
    Ok(key)
}

/// List all gateway keys, newest first
pub async fn list_gateway_keys(pool: &SqlitePool) -> Result<Vec<GatewayKey>> {
    let keys = sqlx::query_as::<_, GatewayKey>("SELECT * FROM hermes_keys ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    Ok(keys)
}

/// Stamp last_used_at after a successful validation
pub async fn touch_gateway_key(pool: &SqlitePool, id: &str, now_ms: i64) -> Result<u64> {
    let res = sqlx::query("UPDATE hermes_keys SET last_used_at = ? WHERE id = ?")
        .bind(now_ms)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Delete a gateway key by id
pub async fn delete_gateway_key(pool: &SqlitePool, id: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM hermes_keys WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
