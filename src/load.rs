//! Notebook loading from local files and URLs.
//!
//! Loading produces a [`LoadedNotebook`]: the parsed document plus what the
//! provenance table needs (directory, base name, byte size, mtime). Errors
//! are classified by [`LoadError`] so the CLI can tell HTTP failures from
//! unreadable or unsupported input.

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use reqwest::Url;
use serde_json::Value;
use thiserror::Error;

use crate::config::FetchConfig;
use crate::models::Notebook;
use crate::upgrade;

pub const IPYNB_FORMAT: &str = "ipynb";
const IPYNB_EXTENSION: &str = "ipynb";
const MIN_NBFORMAT: i64 = 3;
const LEGACY_NBFORMAT: i64 = 3;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("proxy '{proxy}' failed: {message}")]
    Proxy { proxy: String, message: String },
    #[error("invalid notebook {source_name}: {message}")]
    Parse { source_name: String, message: String },
    #[error("unsupported nbformat {found} in {source_name} (requires >= 3)")]
    UnsupportedVersion { source_name: String, found: i64 },
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// A parsed notebook and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedNotebook {
    pub notebook: Notebook,
    /// Identifier used in reports: the path, or `host/path` for URLs.
    pub source: String,
    pub dir_name: Option<String>,
    pub base_name: String,
    pub size: u64,
    pub mtime: Option<i64>,
}

/// Extension match is case-sensitive: `NB.IPYNB` is not detected.
pub fn is_ipynb_file_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == IPYNB_EXTENSION)
}

/// An absolute URL whose path names an `.ipynb` file.
pub fn is_ipynb_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| is_ipynb_file_path(Path::new(u.path())))
        .unwrap_or(false)
}

/// Parse notebook JSON. Version 3 documents are upgraded to the version 4
/// layout first; anything older is rejected.
pub fn parse_notebook(text: &str, source_name: &str) -> Result<Notebook, LoadError> {
    let parse_err = |message: String| LoadError::Parse {
        source_name: source_name.to_string(),
        message,
    };

    let value: Value = serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?;
    let Value::Object(mut doc) = value else {
        return Err(parse_err("top level is not a JSON object".to_string()));
    };

    match doc.get("nbformat").and_then(Value::as_i64) {
        Some(found) if found < MIN_NBFORMAT => {
            return Err(LoadError::UnsupportedVersion {
                source_name: source_name.to_string(),
                found,
            });
        }
        Some(LEGACY_NBFORMAT) => {
            tracing::debug!(source = source_name, "upgrading nbformat 3 document");
            upgrade::upgrade_v3(&mut doc);
        }
        _ => {}
    }

    serde_json::from_value(Value::Object(doc)).map_err(|e| parse_err(e.to_string()))
}

pub fn load_file(path: &Path) -> Result<LoadedNotebook, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = std::fs::read(path).map_err(io_err)?;
    let metadata = std::fs::metadata(path).map_err(io_err)?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);

    let source = path.display().to_string();
    let text = String::from_utf8(bytes).map_err(|e| LoadError::Parse {
        source_name: source.clone(),
        message: e.to_string(),
    })?;
    let notebook = parse_notebook(&text, &source)?;

    Ok(LoadedNotebook {
        notebook,
        dir_name: path
            .parent()
            .map(|p| p.display().to_string())
            .filter(|p| !p.is_empty()),
        base_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        size: text.len() as u64,
        mtime,
        source,
    })
}

/// `host/path` of a URL, used to identify it in reports.
pub fn url_log_path(url: &Url) -> String {
    format!("{}{}", url.host_str().unwrap_or_default(), url.path())
}

fn http_client(fetch: &FetchConfig, proxy: Option<&str>) -> Result<reqwest::Client, LoadError> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(fetch.timeout_secs))
        .user_agent(fetch.user_agent.clone());

    if let Some(proxy) = proxy {
        let p = reqwest::Proxy::all(proxy).map_err(|e| LoadError::Proxy {
            proxy: proxy.to_string(),
            message: e.to_string(),
        })?;
        builder = builder.proxy(p);
    }

    builder.build().map_err(|e| LoadError::Http(e.to_string()))
}

/// Fetch and parse a notebook. `proxy` overrides `fetch.proxy`.
pub async fn load_url(
    url: &str,
    fetch: &FetchConfig,
    proxy: Option<&str>,
) -> Result<LoadedNotebook, LoadError> {
    let parsed = Url::parse(url).map_err(|e| LoadError::Http(format!("{}: {}", url, e)))?;
    let proxy = proxy.or(fetch.proxy.as_deref());
    let client = http_client(fetch, proxy)?;

    let response = client
        .get(parsed.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| match proxy {
            // Every connection goes through the proxy, so a refused or
            // unreachable connection is the proxy's failure.
            Some(proxy) if e.is_connect() => LoadError::Proxy {
                proxy: proxy.to_string(),
                message: e.to_string(),
            },
            _ => LoadError::Http(e.to_string()),
        })?;
    let body = response
        .bytes()
        .await
        .map_err(|e| LoadError::Http(e.to_string()))?;

    let source = url_log_path(&parsed);
    let text = std::str::from_utf8(&body).map_err(|e| LoadError::Parse {
        source_name: source.clone(),
        message: e.to_string(),
    })?;
    let notebook = parse_notebook(text, &source)?;

    let path = Path::new(parsed.path());
    let dir_name = path
        .parent()
        .map(|p| format!("{}{}", parsed.host_str().unwrap_or_default(), p.display()));
    let base_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(LoadedNotebook {
        notebook,
        source,
        dir_name,
        base_name,
        size: body.len() as u64,
        mtime: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detects_ipynb_paths_and_urls() {
        assert!(is_ipynb_file_path(Path::new("a/b/nb.ipynb")));
        assert!(!is_ipynb_file_path(Path::new("data.csv")));
        assert!(!is_ipynb_file_path(Path::new("NB.IPYNB")));
        assert!(!is_ipynb_file_path(Path::new("nb.Ipynb")));
        assert!(is_ipynb_url("https://example.com/x/nb.ipynb"));
        assert!(is_ipynb_url("https://example.com/x/nb.ipynb?raw=true"));
        assert!(!is_ipynb_url("https://example.com/x/data.json"));
        assert!(!is_ipynb_url("nb.ipynb"));
    }

    #[test]
    fn upgrades_nbformat_3() {
        let text = r#"{
            "metadata": {"name": "old"},
            "nbformat": 3,
            "nbformat_minor": 0,
            "worksheets": [{"cells": [
                {"cell_type": "code", "input": "x = 1", "language": "python",
                 "outputs": [], "prompt_number": 1}
            ]}]
        }"#;
        let nb = parse_notebook(text, "old.ipynb").unwrap();
        assert_eq!(nb.nbformat, Some(Value::from(4)));
        assert_eq!(nb.cells.len(), 1);
        let cell = &nb.cells[0];
        assert_eq!(cell.extra.get("execution_count"), Some(&Value::from(1)));
        assert!(!cell.extra.contains_key("language"));
        let source = cell.source.as_ref().unwrap();
        assert_eq!(source.lines().collect::<Vec<_>>(), vec!["x = 1"]);
    }

    #[test]
    fn rejects_nbformat_below_3() {
        let err = parse_notebook(r#"{"nbformat": 2, "worksheets": []}"#, "old.ipynb")
            .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedVersion { found: 2, .. }));
    }

    #[test]
    fn rejects_non_object_document() {
        let err = parse_notebook("[1, 2]", "list.ipynb").unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = parse_notebook("{not json", "bad.ipynb").unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn load_file_records_origin() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nb.ipynb");
        let body = r#"{"cells": [], "metadata": {}, "nbformat": 4, "nbformat_minor": 5}"#;
        std::fs::write(&path, body).unwrap();

        let loaded = load_file(&path).unwrap();
        assert_eq!(loaded.base_name, "nb.ipynb");
        assert_eq!(loaded.size, body.len() as u64);
        assert!(loaded.mtime.is_some());
        assert_eq!(
            loaded.dir_name.as_deref(),
            Some(tmp.path().display().to_string().as_str())
        );
    }

    #[test]
    fn load_file_missing_is_io_error() {
        let err = load_file(Path::new("/nonexistent/nb.ipynb")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn url_log_path_is_host_and_path() {
        let url = Url::parse("https://example.com/dir/nb.ipynb?x=1").unwrap();
        assert_eq!(url_log_path(&url), "example.com/dir/nb.ipynb");
    }
}
