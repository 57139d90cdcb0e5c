//! Bootstrap of the provenance table.
//!
//! Notebook tables are created on demand during conversion; the only fixed
//! table is `_source_info_`, which records which source produced which
//! destination table.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub const SOURCE_INFO_TABLE: &str = "_source_info_";

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create `_source_info_` and its index. Safe to call repeatedly.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _source_info_ (
            source_id INTEGER NOT NULL,
            dir_name TEXT,
            base_name TEXT NOT NULL,
            format_name TEXT NOT NULL,
            dst_table TEXT NOT NULL,
            size INTEGER,
            mtime INTEGER,
            converted_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_info_source_id ON _source_info_(source_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
