//! End-to-end conversion into a SQLite database through the library API.

use std::path::{Path, PathBuf};

use nbtables::config::Config;
use nbtables::ingest::convert_and_record;
use nbtables::load::load_file;
use nbtables::report::{ResultReporter, SilentReporter};
use nbtables::store::SqliteTableStore;
use nbtables::{db, migrate, stats};
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/analysis.ipynb")
}

async fn setup() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data/out.sqlite");
    let pool = db::connect(&config).await.unwrap();
    migrate::ensure_schema(&pool).await.unwrap();
    (tmp, pool)
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn fixture_produces_every_table() {
    let (_tmp, pool) = setup().await;
    let store = SqliteTableStore::new(pool.clone());
    let reporter = SilentReporter::default();
    let loaded = load_file(&fixture()).unwrap();

    let tables = convert_and_record(&store, &reporter, &loaded).await.unwrap();
    let tables: Vec<&str> = tables.iter().map(String::as_str).collect();
    assert_eq!(
        tables,
        vec![
            "cells_kv",
            "cells_outputs",
            "cells_outputs_kv",
            "cells_source",
            "kv",
            "metadata_kernelspec",
            "metadata_language_info",
        ]
    );

    assert_eq!(count(&pool, "cells_source").await, 3);
    assert_eq!(count(&pool, "cells_outputs").await, 3);
    assert_eq!(count(&pool, "cells_outputs_kv").await, 5);
    assert_eq!(count(&pool, "cells_kv").await, 5);
    assert_eq!(count(&pool, "metadata_kernelspec").await, 3);
    assert_eq!(count(&pool, "metadata_language_info").await, 4);
    assert_eq!(count(&pool, "kv").await, 2);

    let snapshot = reporter.counter().snapshot();
    assert_eq!(snapshot.fail, 0);
    assert_eq!(snapshot.created_tables, 7);
}

#[tokio::test]
async fn source_lines_are_trimmed_and_ordered() {
    let (_tmp, pool) = setup().await;
    let store = SqliteTableStore::new(pool.clone());
    let loaded = load_file(&fixture()).unwrap();
    convert_and_record(&store, &SilentReporter::default(), &loaded)
        .await
        .unwrap();

    let rows = sqlx::query("SELECT cell_id, line_no, text FROM cells_source ORDER BY rowid")
        .fetch_all(&pool)
        .await
        .unwrap();
    let lines: Vec<(i64, i64, String)> = rows
        .iter()
        .map(|r| (r.get("cell_id"), r.get("line_no"), r.get("text")))
        .collect();
    assert_eq!(
        lines,
        vec![
            (0, 0, "import math".to_string()),
            (0, 1, "print(math.pi)".to_string()),
            (1, 0, "# Title".to_string()),
        ]
    );
}

#[tokio::test]
async fn outputs_keep_text_data_and_images() {
    let (_tmp, pool) = setup().await;
    let store = SqliteTableStore::new(pool.clone());
    let loaded = load_file(&fixture()).unwrap();
    convert_and_record(&store, &SilentReporter::default(), &loaded)
        .await
        .unwrap();

    let rows = sqlx::query(
        "SELECT \"type\", line_no, typeof(data) AS kind, CAST(data AS TEXT) AS body \
         FROM cells_outputs ORDER BY rowid",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    let outputs: Vec<(String, i64, String, String)> = rows
        .iter()
        .map(|r| (r.get("type"), r.get("line_no"), r.get("kind"), r.get("body")))
        .collect();
    assert_eq!(
        outputs,
        vec![
            ("text".into(), 0, "text".into(), "3.14159".into()),
            ("text/plain".into(), 0, "text".into(), "42".into()),
            ("image/png".into(), 0, "blob".into(), "iVBORw0KGgo=".into()),
        ]
    );

    let empty_metadata: Option<String> = sqlx::query_scalar(
        "SELECT value FROM cells_outputs_kv WHERE cell_id = 0 AND key = 'metadata'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(empty_metadata.is_none());
}

#[tokio::test]
async fn language_info_flattens_codemirror_mode() {
    let (_tmp, pool) = setup().await;
    let store = SqliteTableStore::new(pool.clone());
    let loaded = load_file(&fixture()).unwrap();
    convert_and_record(&store, &SilentReporter::default(), &loaded)
        .await
        .unwrap();

    let keys: Vec<String> =
        sqlx::query_scalar("SELECT key FROM metadata_language_info ORDER BY rowid")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(
        keys,
        vec![
            "codemirror_mode_name",
            "codemirror_mode_version",
            "name",
            "version"
        ]
    );

    // `value` has TEXT affinity, so integers come back as text.
    let nbformat: String = sqlx::query_scalar("SELECT value FROM kv WHERE key = 'nbformat'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(nbformat, "4");
}

#[tokio::test]
async fn second_conversion_appends_and_gets_new_source_id() {
    let (_tmp, pool) = setup().await;
    let store = SqliteTableStore::new(pool.clone());
    let loaded = load_file(&fixture()).unwrap();

    let first = SilentReporter::default();
    convert_and_record(&store, &first, &loaded).await.unwrap();
    let second = SilentReporter::default();
    convert_and_record(&store, &second, &loaded).await.unwrap();

    let snapshot = second.counter().snapshot();
    assert_eq!(snapshot.created_tables, 0);
    assert_eq!(snapshot.appended_tables, 11);
    assert_eq!(count(&pool, "cells_source").await, 6);

    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT DISTINCT source_id FROM _source_info_ ORDER BY source_id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(ids, vec![1, 2]);

    let row = sqlx::query(
        "SELECT base_name, format_name, size FROM _source_info_ WHERE source_id = 2 LIMIT 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    let base_name: String = row.get("base_name");
    let format_name: String = row.get("format_name");
    let size: i64 = row.get("size");
    assert_eq!(base_name, "analysis.ipynb");
    assert_eq!(format_name, "ipynb");
    assert_eq!(size, loaded.size as i64);
}

#[tokio::test]
async fn table_stats_skip_provenance() {
    let (_tmp, pool) = setup().await;
    let store = SqliteTableStore::new(pool.clone());
    let loaded = load_file(&fixture()).unwrap();
    convert_and_record(&store, &SilentReporter::default(), &loaded)
        .await
        .unwrap();

    let table_stats = stats::table_stats(&pool).await.unwrap();
    assert_eq!(table_stats.len(), 7);
    assert!(table_stats.iter().all(|t| t.name != "_source_info_"));
    let kv = table_stats.iter().find(|t| t.name == "kv").unwrap();
    assert_eq!(kv.rows, 2);
}

#[tokio::test]
async fn legacy_v3_notebook_is_upgraded() {
    let (_tmp, pool) = setup().await;
    let store = SqliteTableStore::new(pool.clone());
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/legacy_v3.ipynb");
    let loaded = load_file(&path).unwrap();
    convert_and_record(&store, &SilentReporter::default(), &loaded)
        .await
        .unwrap();

    let lines: Vec<String> = sqlx::query_scalar("SELECT text FROM cells_source ORDER BY rowid")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(lines, vec!["# Legacy", "print('hi')", "1 + 1"]);

    let outputs: Vec<(String, String)> =
        sqlx::query("SELECT \"type\", CAST(data AS TEXT) AS body FROM cells_outputs ORDER BY rowid")
            .fetch_all(&pool)
            .await
            .unwrap()
            .iter()
            .map(|r| (r.get("type"), r.get("body")))
            .collect();
    assert_eq!(
        outputs,
        vec![
            ("text".to_string(), "hi".to_string()),
            ("text/plain".to_string(), "2".to_string()),
        ]
    );

    let nbformat: String = sqlx::query_scalar("SELECT value FROM kv WHERE key = 'nbformat'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(nbformat, "4");
}
