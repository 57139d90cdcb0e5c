//! SQLite [`TableStore`] backed by an `sqlx` pool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::SqlitePool;

use super::{quote_ident, TableStore};
use crate::models::{ColumnDef, Row, SqlValue};

pub struct SqliteTableStore {
    pool: SqlitePool,
}

impl SqliteTableStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn insert_sql(name: &str, width: usize) -> String {
    let placeholders = vec!["?"; width].join(", ");
    format!(
        "INSERT INTO {} VALUES ({})",
        quote_ident(name),
        placeholders
    )
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Blob(v) => query.bind(v.as_slice()),
    }
}

fn bind_row<'q>(sql: &'q str, row: &'q Row) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    row.iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn has_table(&self, name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn create_table(&self, name: &str, columns: &[ColumnDef]) -> Result<()> {
        let defs: Vec<String> = columns.iter().map(ToString::to_string).collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(name),
            defs.join(", ")
        );

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create table '{}'", name))?;

        Ok(())
    }

    async fn insert_many(&self, name: &str, rows: &[Row]) -> Result<u64> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let sql = insert_sql(name, first.len());

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for row in rows {
            let result = bind_row(&sql, row)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert into '{}'", name))?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn insert(&self, name: &str, row: &Row) -> Result<()> {
        let sql = insert_sql(name, row.len());
        bind_row(&sql, row)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert into '{}'", name))?;

        Ok(())
    }
}
