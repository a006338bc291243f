use sqlx::{Result, Sqlite, SqlitePool, Transaction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: String,
    pub method: String,
    pub path: String,
    pub model: Option<String>,
    pub status: i64,
    pub duration: i64,
    pub ip: Option<String>,
    pub created_at: i64,
}

/// Insert one request log row inside an open transaction (batch flush path)
pub async fn insert_request_log_tx(
    tx: &mut Transaction<'_, Sqlite>,
    log: &RequestLog,
) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO request_logs (id, method, path, model, status, duration, ip, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    "#)
        .bind(&log.id)
        .bind(&log.method)
        .bind(&log.path)
        .bind(&log.model)
        .bind(log.status)
        .bind(log.duration)
        .bind(&log.ip)
        .bind(log.created_at)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}

/// Listing filters for the admin surface
#[derive(Debug, Default, Clone)]
pub struct RequestLogFilter {
    pub since_ms: Option<i64>,
    pub method: Option<String>,
    pub model: Option<String>,
    pub status: Option<i64>,
}

/// List request logs, newest first, with optional filters
pub async fn list_request_logs(
    pool: &SqlitePool,
    filter: &RequestLogFilter,
    limit: i64,
) -> Result<Vec<RequestLog>> {
    let mut sql = String::from("SELECT * FROM request_logs WHERE 1=1");
    if filter.since_ms.is_some() {
        sql.push_str(" AND created_at >= ?");
    }
    if filter.method.is_some() {
        sql.push_str(" AND method = ?");
    }
    if filter.model.is_some() {
        sql.push_str(" AND model = ?");
    }
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ?");

    let mut query = sqlx::query_as::<_, RequestLog>(&sql);
    if let Some(since) = filter.since_ms {
        query = query.bind(since);
    }
    if let Some(method) = &filter.method {
        query = query.bind(method);
    }
    if let Some(model) = &filter.model {
        query = query.bind(model);
    }
    if let Some(status) = filter.status {
        query = query.bind(status);
    }
    query = query.bind(limit);

    let logs = query.fetch_all(pool).await?;
    Ok(logs)
}

/// Get count of request logs
pub async fn count_request_logs(pool: &SqlitePool) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM request_logs")
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}

/// Delete request logs older than the given timestamp
pub async fn delete_old_request_logs(pool: &SqlitePool, before_ms: i64) -> Result<u64> {
    let res = sqlx::query("DELETE FROM request_logs WHERE created_at < ?")
        .bind(before_ms)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
