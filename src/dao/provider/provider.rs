use sqlx::{Result, SqlitePool};
use serde::{Deserialize, Serialize};

/// Upstream provider lifecycle status
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_ERROR: &str = "error";

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    /// JSON array of advertised model ids
    pub models: String,
    /// JSON array of model ids never offered downstream
    pub model_blacklist: String,
    pub status: String,
    pub last_synced_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub created_at: Option<i64>,
}

impl Provider {
    /// Decode the advertised model list
    pub fn model_list(&self) -> Vec<String> {
        serde_json::from_str(&self.models).unwrap_or_default()
    }

    /// Decode the blacklist
    pub fn blacklist(&self) -> Vec<String> {
        serde_json::from_str(&self.model_blacklist).unwrap_or_default()
    }
}

/// Create a new provider
pub async fn create_provider(pool: &SqlitePool, provider: &Provider) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO providers (
            id, name, base_url, api_key, models, model_blacklist, status,
            last_synced_at, last_used_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#)
        .bind(&provider.id)
        .bind(&provider.name)
        .bind(&provider.base_url)
        .bind(&provider.api_key)
        .bind(&provider.models)
        .bind(&provider.model_blacklist)
        .bind(&provider.status)
        .bind(provider.last_synced_at)
        .bind(provider.last_used_at)
        .bind(provider.created_at)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Get provider by id
pub async fn get_provider_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Provider>> {
    let provider = sqlx::query_as::<_, Provider>("SELECT * FROM providers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(provider)
}

/// Get all providers, newest first
pub async fn get_all_providers(pool: &SqlitePool) -> Result<Vec<Provider>> {
    let providers = sqlx::query_as::<_, Provider>("SELECT * FROM providers ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    Ok(providers)
}

/// Update provider identity and credentials; resets sync state to pending
pub async fn update_provider(pool: &SqlitePool, id: &str, provider: &Provider) -> Result<u64> {
    let res = sqlx::query(r#"
        UPDATE providers
        SET name = ?, base_url = ?, api_key = ?, models = '[]', model_blacklist = ?,
            status = ?, last_synced_at = NULL
        WHERE id = ?
    "#)
        .bind(&provider.name)
        .bind(&provider.base_url)
        .bind(&provider.api_key)
        .bind(&provider.model_blacklist)
        .bind(STATUS_PENDING)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Replace a provider's synced model list and stamp the sync time
pub async fn update_provider_models(
    pool: &SqlitePool,
    id: &str,
    status: &str,
    models_json: &str,
    now_ms: i64,
) -> Result<u64> {
    let res = sqlx::query(r#"
        UPDATE providers SET status = ?, models = ?, last_synced_at = ? WHERE id = ?
    "#)
        .bind(status)
        .bind(models_json)
        .bind(now_ms)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Update only the lifecycle status
pub async fn update_provider_status(pool: &SqlitePool, id: &str, status: &str) -> Result<u64> {
    let res = sqlx::query("UPDATE providers SET status = ? WHERE id = ?")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Stamp last_used_at after a successful dispatch
pub async fn touch_provider_used(pool: &SqlitePool, id: &str, now_ms: i64) -> Result<u64> {
    let res = sqlx::query("UPDATE providers SET last_used_at = ? WHERE id = ?")
        .bind(now_ms)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Remove a model from the advertised list (upstream reported it missing)
pub async fn remove_provider_model(pool: &SqlitePool, id: &str, models_json: &str) -> Result<u64> {
    let res = sqlx::query("UPDATE providers SET models = ? WHERE id = ?")
        .bind(models_json)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Hard delete provider
pub async fn delete_provider(pool: &SqlitePool, id: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM providers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Count all providers
pub async fn count_providers(pool: &SqlitePool) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM providers")
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}
