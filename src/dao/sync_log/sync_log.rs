use sqlx::{Result, Sqlite, SqlitePool, Transaction};
use serde::{Deserialize, Serialize};

pub const SYNC_OK: &str = "ok";
pub const SYNC_ERROR: &str = "error";

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: String,
    pub provider_id: String,
    /// Provider display name at the time of the sync
    pub provider_name: String,
    pub model: String,
    /// 'ok' | 'error'
    pub result: String,
    pub message: String,
    pub created_at: i64,
}

/// Insert one sync log row inside an open transaction (batch flush path)
pub async fn insert_sync_log_tx(tx: &mut Transaction<'_, Sqlite>, log: &SyncLog) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO sync_logs (id, provider_id, provider_name, model, result, message, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
    "#)
        .bind(&log.id)
        .bind(&log.provider_id)
        .bind(&log.provider_name)
        .bind(&log.model)
        .bind(&log.result)
        .bind(&log.message)
        .bind(log.created_at)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}

#[derive(Debug, Default, Clone)]
pub struct SyncLogFilter {
    pub provider_id: Option<String>,
    pub model: Option<String>,
    pub result: Option<String>,
}

/// List sync logs, newest first, with optional filters
pub async fn list_sync_logs(
    pool: &SqlitePool,
    filter: &SyncLogFilter,
    limit: i64,
) -> Result<Vec<SyncLog>> {
    let mut sql = String::from("SELECT * FROM sync_logs WHERE 1=1");
    if filter.provider_id.is_some() {
        sql.push_str(" AND provider_id = ?");
    }
    if filter.model.is_some() {
        sql.push_str(" AND model = ?");
    }
    if filter.result.is_some() {
        sql.push_str(" AND result = ?");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ?");

    let mut query = sqlx::query_as::<_, SyncLog>(&sql);
    if let Some(provider_id) = &filter.provider_id {
        query = query.bind(provider_id);
    }
    if let Some(model) = &filter.model {
        query = query.bind(model);
    }
    if let Some(result) = &filter.result {
        query = query.bind(result);
    }
    query = query.bind(limit);

    let logs = query.fetch_all(pool).await?;
    Ok(logs)
}

/// Get count of sync logs
pub async fn count_sync_logs(pool: &SqlitePool) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_logs")
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}
