//! In-memory [`TableStore`] implementation for testing.
//!
//! Tables live in a `BTreeMap` behind `std::sync::RwLock`. Inserts are
//! checked against the declared column count and `NOT NULL` constraints so
//! store-level failures can be exercised without a database file.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::TableStore;
use crate::models::{ColumnDef, Row};

struct MemoryTable {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: RwLock<BTreeMap<String, MemoryTable>>,
    create_calls: RwLock<Vec<String>>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory store lock poisoned")
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Rows of a table in insertion order, or `None` if it does not exist.
    pub fn rows(&self, name: &str) -> Option<Vec<Row>> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.get(name).map(|table| table.rows.clone()))
    }

    /// Declared columns of a table.
    pub fn columns(&self, name: &str) -> Option<Vec<ColumnDef>> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.get(name).map(|table| table.columns.clone()))
    }

    /// Every `create_table` call received, in order.
    pub fn create_calls(&self) -> Vec<String> {
        self.create_calls
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn push_row(table_name: &str, table: &mut MemoryTable, row: &Row) -> Result<()> {
        if row.len() != table.columns.len() {
            bail!(
                "table {} has {} columns but {} values were supplied",
                table_name,
                table.columns.len(),
                row.len()
            );
        }
        for (column, value) in table.columns.iter().zip(row) {
            if column.not_null && value.is_null() {
                bail!(
                    "NOT NULL constraint failed: {}.{}",
                    table_name,
                    column.name
                );
            }
        }
        table.rows.push(row.clone());
        Ok(())
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self.tables.read().map_err(poisoned)?.contains_key(name))
    }

    async fn create_table(&self, name: &str, columns: &[ColumnDef]) -> Result<()> {
        self.create_calls
            .write()
            .map_err(poisoned)?
            .push(name.to_string());
        self.tables
            .write()
            .map_err(poisoned)?
            .entry(name.to_string())
            .or_insert_with(|| MemoryTable {
                columns: columns.to_vec(),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn insert_many(&self, name: &str, rows: &[Row]) -> Result<u64> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let table = tables
            .get_mut(name)
            .ok_or_else(|| anyhow!("no such table: {}", name))?;
        for row in rows {
            Self::push_row(name, table, row)?;
        }
        Ok(rows.len() as u64)
    }

    async fn insert(&self, name: &str, row: &Row) -> Result<()> {
        self.insert_many(name, std::slice::from_ref(row)).await?;
        Ok(())
    }
}
