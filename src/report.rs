//! Conversion result reporting.
//!
//! The converter notifies a [`ResultReporter`] once per non-empty batch it
//! writes. Reporters log the event and keep a shared [`ResultCounter`] so the
//! CLI can print a summary and choose an exit code. Human-readable events go
//! through `tracing`; JSON events go to **stderr** one object per line so
//! stdout stays parseable for scripts.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Success and failure tallies for a run.
#[derive(Debug, Default)]
pub struct ResultCounter {
    success: AtomicU64,
    fail: AtomicU64,
    created_tables: AtomicU64,
    appended_tables: AtomicU64,
}

/// Point-in-time copy of a [`ResultCounter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub success: u64,
    pub fail: u64,
    pub created_tables: u64,
    pub appended_tables: u64,
}

impl ResultCounter {
    pub fn inc_success(&self, is_new_table: bool) {
        self.success.fetch_add(1, Ordering::Relaxed);
        if is_new_table {
            self.created_tables.fetch_add(1, Ordering::Relaxed);
        } else {
            self.appended_tables.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_fail(&self) {
        self.fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            success: self.success.load(Ordering::Relaxed),
            fail: self.fail.load(Ordering::Relaxed),
            created_tables: self.created_tables.load(Ordering::Relaxed),
            appended_tables: self.appended_tables.load(Ordering::Relaxed),
        }
    }
}

/// Receives per-table outcomes from the converter.
pub trait ResultReporter: Send + Sync {
    /// A batch of rows was written to `table_name`.
    fn logging_success(&self, header: &str, table_name: &str, is_new_table: bool);

    /// A source could not be converted.
    fn logging_failure(&self, header: &str, message: &str);

    fn counter(&self) -> &ResultCounter;
}

/// Logs each event through `tracing`.
#[derive(Default)]
pub struct HumanReporter {
    counter: ResultCounter,
}

impl ResultReporter for HumanReporter {
    fn logging_success(&self, header: &str, table_name: &str, is_new_table: bool) {
        self.counter.inc_success(is_new_table);
        tracing::info!(
            created = is_new_table,
            "convert '{}' to '{}' table",
            header,
            table_name
        );
    }

    fn logging_failure(&self, header: &str, message: &str) {
        self.counter.inc_fail();
        tracing::error!("failed to convert '{}': {}", header, message);
    }

    fn counter(&self) -> &ResultCounter {
        &self.counter
    }
}

/// Machine-readable events: one JSON object per line on stderr.
#[derive(Default)]
pub struct JsonReporter {
    counter: ResultCounter,
}

impl JsonReporter {
    fn emit(&self, obj: serde_json::Value) {
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

impl ResultReporter for JsonReporter {
    fn logging_success(&self, header: &str, table_name: &str, is_new_table: bool) {
        self.counter.inc_success(is_new_table);
        self.emit(serde_json::json!({
            "event": "success",
            "source": header,
            "table": table_name,
            "created": is_new_table
        }));
    }

    fn logging_failure(&self, header: &str, message: &str) {
        self.counter.inc_fail();
        self.emit(serde_json::json!({
            "event": "failure",
            "source": header,
            "message": message
        }));
    }

    fn counter(&self) -> &ResultCounter {
        &self.counter
    }
}

/// Counts without logging.
#[derive(Default)]
pub struct SilentReporter {
    counter: ResultCounter,
}

impl ResultReporter for SilentReporter {
    fn logging_success(&self, _header: &str, _table_name: &str, is_new_table: bool) {
        self.counter.inc_success(is_new_table);
    }

    fn logging_failure(&self, _header: &str, _message: &str) {
        self.counter.inc_fail();
    }

    fn counter(&self) -> &ResultCounter {
        &self.counter
    }
}

/// Report mode for the CLI: off, human (tracing), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ReportMode {
    Off,
    Human,
    Json,
}

impl ReportMode {
    /// Default: human reporting when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ReportMode::Human
        } else {
            ReportMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ResultReporter> {
        match self {
            ReportMode::Off => Box::new(SilentReporter::default()),
            ReportMode::Human => Box::new(HumanReporter::default()),
            ReportMode::Json => Box::new(JsonReporter::default()),
        }
    }
}
