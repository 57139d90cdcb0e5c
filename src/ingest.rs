//! Conversion pipeline orchestration.
//!
//! Coordinates the flow for each input: discovery → load → convert →
//! provenance. Inputs are handled one after another on a single store
//! handle. A failing input is logged and counted, and the run moves on to
//! the next one.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::SqlitePool;
use walkdir::WalkDir;

use crate::config::Config;
use crate::convert::convert_notebook;
use crate::db;
use crate::load::{self, LoadError, LoadedNotebook, IPYNB_FORMAT};
use crate::migrate::{self, SOURCE_INFO_TABLE};
use crate::report::ResultReporter;
use crate::store::SqliteTableStore;

/// Per-run tallies at the source level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub sources: u64,
    pub converted: u64,
    pub failed: u64,
    pub unsupported: u64,
    pub http_failed: u64,
    pub proxy_failed: u64,
}

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const FAILED_LOADER_NOT_FOUND: u8 = 1;
    pub const FAILED_CONVERT: u8 = 2;
    pub const FAILED_HTTP: u8 = 3;
    pub const NO_INPUT: u8 = 4;
    /// `ECONNABORTED`: the proxy was rejected or could not be reached.
    pub const FAILED_PROXY: u8 = 103;
}

impl IngestOutcome {
    pub fn exit_code(&self) -> u8 {
        if self.sources == 0 {
            exit_code::NO_INPUT
        } else if self.converted > 0 {
            exit_code::SUCCESS
        } else if self.proxy_failed > 0 {
            exit_code::FAILED_PROXY
        } else if self.http_failed > 0 {
            exit_code::FAILED_HTTP
        } else if self.unsupported == self.sources {
            exit_code::FAILED_LOADER_NOT_FOUND
        } else {
            exit_code::FAILED_CONVERT
        }
    }

    fn record_load_error(&mut self, err: &LoadError) {
        self.failed += 1;
        match err {
            LoadError::Http(_) => self.http_failed += 1,
            LoadError::Proxy { .. } => self.proxy_failed += 1,
            LoadError::UnsupportedFormat(_) => self.unsupported += 1,
            _ => {}
        }
    }
}

/// Whether `format` (from `--format`) forces notebook loading.
fn forced_format(format: Option<&str>) -> Result<bool, LoadError> {
    match format {
        None => Ok(false),
        Some(f) if f.eq_ignore_ascii_case(IPYNB_FORMAT) => Ok(true),
        Some(other) => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

/// Convert local files and directories.
pub async fn run_file(
    config: &Config,
    paths: &[PathBuf],
    format: Option<&str>,
    reporter: &dyn ResultReporter,
) -> Result<IngestOutcome> {
    let inputs = collect_inputs(paths, &config.ingest.exclude_globs)?;
    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;
    let store = SqliteTableStore::new(pool.clone());

    let mut outcome = IngestOutcome::default();
    for input in &inputs {
        outcome.sources += 1;

        let loaded = forced_format(format).and_then(|forced| {
            if forced || load::is_ipynb_file_path(input) {
                load::load_file(input)
            } else {
                Err(LoadError::UnsupportedFormat(input.display().to_string()))
            }
        });
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                reporter.logging_failure(&input.display().to_string(), &e.to_string());
                outcome.record_load_error(&e);
                continue;
            }
        };

        match convert_and_record(&store, reporter, &loaded).await {
            Ok(_) => outcome.converted += 1,
            Err(e) => {
                reporter.logging_failure(&loaded.source, &format!("{:#}", e));
                outcome.failed += 1;
            }
        }
    }

    print_summary(&outcome, reporter);
    pool.close().await;
    Ok(outcome)
}

/// Convert one notebook fetched over HTTP(S).
pub async fn run_url(
    config: &Config,
    url: &str,
    format: Option<&str>,
    proxy: Option<&str>,
    reporter: &dyn ResultReporter,
) -> Result<IngestOutcome> {
    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;
    let store = SqliteTableStore::new(pool.clone());

    let mut outcome = IngestOutcome {
        sources: 1,
        ..Default::default()
    };

    let loaded = match forced_format(format) {
        Ok(forced) if forced || load::is_ipynb_url(url) => {
            load::load_url(url, &config.fetch, proxy).await
        }
        Ok(_) => Err(LoadError::UnsupportedFormat(url.to_string())),
        Err(e) => Err(e),
    };

    match loaded {
        Ok(loaded) => match convert_and_record(&store, reporter, &loaded).await {
            Ok(_) => outcome.converted += 1,
            Err(e) => {
                reporter.logging_failure(&loaded.source, &format!("{:#}", e));
                outcome.failed += 1;
            }
        },
        Err(e) => {
            reporter.logging_failure(url, &e.to_string());
            outcome.record_load_error(&e);
        }
    }

    print_summary(&outcome, reporter);
    pool.close().await;
    Ok(outcome)
}

/// Convert a loaded notebook and record one provenance row per table.
pub async fn convert_and_record(
    store: &SqliteTableStore,
    reporter: &dyn ResultReporter,
    loaded: &LoadedNotebook,
) -> Result<BTreeSet<String>> {
    let tables = convert_notebook(store, reporter, &loaded.source, &loaded.notebook).await?;
    record_source_info(store.pool(), loaded, &tables).await?;
    tracing::debug!(source = %loaded.source, tables = tables.len(), "converted");
    Ok(tables)
}

async fn record_source_info(
    pool: &SqlitePool,
    loaded: &LoadedNotebook,
    tables: &BTreeSet<String>,
) -> Result<()> {
    let source_id: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(source_id), 0) + 1 FROM _source_info_")
            .fetch_one(pool)
            .await?;
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;
    for table in tables {
        sqlx::query(
            r#"
            INSERT INTO _source_info_ (source_id, dir_name, base_name, format_name, dst_table, size, mtime, converted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(source_id)
        .bind(&loaded.dir_name)
        .bind(&loaded.base_name)
        .bind(IPYNB_FORMAT)
        .bind(table)
        .bind(loaded.size as i64)
        .bind(loaded.mtime)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::debug!(
        table = SOURCE_INFO_TABLE,
        source_id,
        rows = tables.len(),
        "recorded provenance"
    );
    Ok(())
}

/// Expand the given paths into input files, in sorted order.
///
/// Files are taken as given; directories are walked for `*.ipynb` files,
/// skipping checkpoints, `.git`, and the configured exclude globs. Paths
/// that do not exist are kept so that loading reports them.
pub fn collect_inputs(paths: &[PathBuf], exclude_globs: &[String]) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&["**/*.ipynb".to_string()])?;

    let mut excludes = vec![
        "**/.ipynb_checkpoints/**".to_string(),
        "**/.git/**".to_string(),
    ];
    excludes.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut inputs = Vec::new();
    for path in paths {
        if !path.is_dir() {
            inputs.push(path.clone());
            continue;
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(path) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file = entry.path();
            let relative = file.strip_prefix(path).unwrap_or(file);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            found.push(file.to_path_buf());
        }
        found.sort();
        inputs.extend(found);
    }

    Ok(inputs)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn print_summary(outcome: &IngestOutcome, reporter: &dyn ResultReporter) {
    let counts = reporter.counter().snapshot();
    println!("converted results:");
    println!("  sources: {}", outcome.sources);
    println!("  converted: {}", outcome.converted);
    println!("  failed: {}", outcome.failed);
    println!("  tables written: {}", counts.success);
    println!("  created tables: {}", counts.created_tables);
    println!("  appended tables: {}", counts.appended_tables);
    if outcome.sources == 0 {
        println!("no input found");
    } else if outcome.converted > 0 {
        println!("ok");
    }
}
