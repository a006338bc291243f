use sqlx::{Result, SqlitePool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime-tunable keys persisted in the settings table
pub const SETTING_PERIODIC_SYNC_INTERVAL_HOURS: &str = "periodicSyncIntervalHours";
pub const SETTING_CHAT_MAX_RETRIES: &str = "chatMaxRetries";
pub const SETTING_INITIAL_PENALTY_MS: &str = "dispatcher_initial_penalty_ms";
pub const SETTING_MAX_PENALTY_MS: &str = "dispatcher_max_penalty_ms";
pub const SETTING_RESYNC_THRESHOLD: &str = "dispatcher_resync_threshold";
pub const SETTING_RATE_LIMIT_MAX: &str = "rateLimitMax";
pub const SETTING_RATE_LIMIT_WINDOW: &str = "rateLimitWindow";
pub const SETTING_QUOTA_MARKERS: &str = "proxy_quota_markers";
pub const SETTING_MODEL_MISSING_MARKERS: &str = "proxy_model_missing_markers";

/// All keys the admin settings endpoint accepts
pub const KNOWN_SETTING_KEYS: &[&str] = &[
    SETTING_PERIODIC_SYNC_INTERVAL_HOURS,
    SETTING_CHAT_MAX_RETRIES,
    SETTING_INITIAL_PENALTY_MS,
    SETTING_MAX_PENALTY_MS,
    SETTING_RESYNC_THRESHOLD,
    SETTING_RATE_LIMIT_MAX,
    SETTING_RATE_LIMIT_WINDOW,
    SETTING_QUOTA_MARKERS,
    SETTING_MODEL_MISSING_MARKERS,
];

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// Get a setting value
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.0))
}

/// Get a numeric setting with a default
pub async fn get_setting_number(pool: &SqlitePool, key: &str, default: i64) -> Result<i64> {
    let value = get_setting(pool, key).await?;
    Ok(value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default))
}

/// Upsert a setting value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
    "#)
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// List all persisted settings as an ordered map
pub async fn list_settings(pool: &SqlitePool) -> Result<BTreeMap<String, String>> {
    let rows: Vec<Setting> = sqlx::query_as("SELECT key, value FROM settings ORDER BY key")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|s| (s.key, s.value)).collect())
}

/// Delete a setting (falls back to the built-in default)
pub async fn delete_setting(pool: &SqlitePool, key: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
