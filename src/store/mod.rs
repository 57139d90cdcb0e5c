//! Destination store abstraction.
//!
//! The converter decides *when* a table must exist and *what* its columns
//! are; the [`TableStore`] performs the existence check, creation, and
//! inserts. Two backends ship with the crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteTableStore`] | SQLite file via `sqlx` (the CLI) |
//! | [`MemoryTableStore`] | Tests and dry inspection |
//!
//! Calls are awaited one at a time by the converter; a single store handle
//! is never shared between concurrent conversions.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ColumnDef, Row};

pub use memory::MemoryTableStore;
pub use sqlite::SqliteTableStore;

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Whether a table with exactly this name exists.
    async fn has_table(&self, name: &str) -> Result<bool>;

    /// Create a table. Must be a no-op when the table already exists.
    async fn create_table(&self, name: &str, columns: &[ColumnDef]) -> Result<()>;

    /// Insert all rows, returning the number inserted.
    async fn insert_many(&self, name: &str, rows: &[Row]) -> Result<u64>;

    /// Insert a single row.
    async fn insert(&self, name: &str, row: &Row) -> Result<()>;
}

/// Quote an identifier for use in SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
