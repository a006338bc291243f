use sqlx::{Result, Sqlite, SqlitePool, Transaction};
use serde::{Deserialize, Serialize};

/// Well-known global counter keys
pub const COUNTER_TOTAL_REQUESTS: &str = "totalRequests";
pub const COUNTER_UPSTREAM_ERRORS: &str = "upstreamErrors";

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProviderMetric {
    pub id: String,
    pub name: Option<String>,
    pub count: i64,
    pub errors: i64,
}

/// Add a delta to a global counter inside an open transaction
pub async fn bump_counter_tx(
    tx: &mut Transaction<'_, Sqlite>,
    key: &str,
    delta: i64,
) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO metrics_counters (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = value + excluded.value
    "#)
        .bind(key)
        .bind(delta)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}

/// Add a delta to a per-model request count inside an open transaction
pub async fn bump_model_count_tx(
    tx: &mut Transaction<'_, Sqlite>,
    model: &str,
    delta: i64,
) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO metrics_models (model, count) VALUES (?, ?)
        ON CONFLICT(model) DO UPDATE SET count = count + excluded.count
    "#)
        .bind(model)
        .bind(delta)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}

/// Add request/error deltas to a per-provider row inside an open transaction
pub async fn bump_provider_metric_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    name: &str,
    count_delta: i64,
    error_delta: i64,
) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO metrics_providers (id, name, count, errors) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            count = count + excluded.count,
            errors = errors + excluded.errors
    "#)
        .bind(id)
        .bind(name)
        .bind(count_delta)
        .bind(error_delta)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}

/// Read one global counter (0 when absent)
pub async fn get_counter(pool: &SqlitePool, key: &str) -> Result<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM metrics_counters WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.0).unwrap_or(0))
}

/// Read all global counters
pub async fn list_counters(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT key, value FROM metrics_counters")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Read all per-model counts
pub async fn list_model_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT model, count FROM metrics_models")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Read all per-provider metrics
pub async fn list_provider_metrics(pool: &SqlitePool) -> Result<Vec<ProviderMetric>> {
    let rows = sqlx::query_as::<_, ProviderMetric>("SELECT * FROM metrics_providers")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Drop per-provider metrics for a deleted provider
pub async fn delete_provider_metric(pool: &SqlitePool, id: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM metrics_providers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
