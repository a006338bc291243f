use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use once_cell::sync::OnceCell;
use std::sync::Arc;

pub static SQLITE_POOL: OnceCell<Arc<SqlitePool>> = OnceCell::new();

/// 异步初始化全局 SqlitePool
pub async fn init_sqlite_pool(db_url: &str) -> anyhow::Result<Arc<SqlitePool>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await?;
    let pool = Arc::new(pool);
    SQLITE_POOL.set(pool.clone()).ok();
    Ok(pool)
}

pub mod cache;

pub mod provider;
pub mod request_log;
pub mod sync_log;
pub mod gateway_key;
pub mod setting;
pub mod metrics;

use tokio::fs;

/// 执行 SQL 初始化脚本，多条语句按分号分割执行
pub async fn init_db(pool: &SqlitePool, sql_path: &str) -> anyhow::Result<()> {
    let sql = fs::read_to_string(sql_path).await?;
    apply_schema(pool, &sql).await
}

/// 直接应用一段 SQL 脚本（测试环境使用内存库时走这里）
pub async fn apply_schema(pool: &SqlitePool, sql: &str) -> anyhow::Result<()> {
    for statement in sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt).execute(pool).await?;
        }
    }
    Ok(())
}

/// 当前 Unix 毫秒时间戳，持久化审计字段统一用它
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
