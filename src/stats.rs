//! Database statistics.
//!
//! Summarizes what has been converted: every source recorded in
//! `_source_info_` with the tables it populated, followed by the row count
//! of each table in the database. Used by `nbt stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate::{self, SOURCE_INFO_TABLE};
use crate::store::quote_ident;

/// One converted source and how many tables it populated.
struct SourceStats {
    source_id: i64,
    dir_name: Option<String>,
    base_name: String,
    format_name: String,
    table_count: i64,
    size: Option<i64>,
    converted_at: i64,
}

/// Row count of one destination table.
pub struct TableStats {
    pub name: String,
    pub rows: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let source_rows = sqlx::query(
        r#"
        SELECT
            source_id,
            MAX(dir_name) AS dir_name,
            MAX(base_name) AS base_name,
            MAX(format_name) AS format_name,
            COUNT(*) AS table_count,
            MAX(size) AS size,
            MAX(converted_at) AS converted_at
        FROM _source_info_
        GROUP BY source_id
        ORDER BY source_id
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let sources: Vec<SourceStats> = source_rows
        .iter()
        .map(|row| SourceStats {
            source_id: row.get("source_id"),
            dir_name: row.get("dir_name"),
            base_name: row.get("base_name"),
            format_name: row.get("format_name"),
            table_count: row.get("table_count"),
            size: row.get("size"),
            converted_at: row.get("converted_at"),
        })
        .collect();

    let tables = table_stats(&pool).await?;

    println!("nbtables: Database Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Sources:     {}", sources.len());
    println!("  Tables:      {}", tables.len());

    if !sources.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:>4}  {:<32} {:<6} {:>6} {:>10}   {}",
            "ID", "SOURCE", "FORMAT", "TABLES", "SIZE", "CONVERTED"
        );
        println!("  {}", "-".repeat(80));
        for s in &sources {
            let name = match &s.dir_name {
                Some(dir) => format!("{}/{}", dir, s.base_name),
                None => s.base_name.clone(),
            };
            println!(
                "  {:>4}  {:<32} {:<6} {:>6} {:>10}   {}",
                s.source_id,
                name,
                s.format_name,
                s.table_count,
                s.size
                    .map(|b| format_bytes(b.max(0) as u64))
                    .unwrap_or_else(|| "-".to_string()),
                format_ts_relative(s.converted_at)
            );
        }
    }

    if !tables.is_empty() {
        println!();
        println!("  By table:");
        println!("  {:<32} {:>8}", "TABLE", "ROWS");
        println!("  {}", "-".repeat(41));
        for t in &tables {
            println!("  {:<32} {:>8}", t.name, t.rows);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Row counts of every user table except the provenance table.
pub async fn table_stats(pool: &SqlitePool) -> Result<Vec<TableStats>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != ? ORDER BY name",
    )
    .bind(SOURCE_INFO_TABLE)
    .fetch_all(pool)
    .await?;

    let mut stats = Vec::with_capacity(names.len());
    for name in names {
        let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(&name)))
            .fetch_one(pool)
            .await?;
        stats.push(TableStats { name, rows });
    }
    Ok(stats)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn old_timestamps_fall_back_to_iso() {
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
        assert_eq!(format_ts_relative(chrono::Utc::now().timestamp()), "just now");
    }

    #[test]
    fn recent_timestamps_count_days() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now - 86400 - 60), "1 day ago");
        assert_eq!(format_ts_relative(now - 3 * 86400 - 60), "3 days ago");
        assert_eq!(format_ts_relative(now - 2 * 3600 - 60), "2 hours ago");
    }
}
