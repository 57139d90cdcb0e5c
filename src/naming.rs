//! Table naming.
//!
//! Table names are the section base (`cells`, `metadata`) joined with a
//! fixed, category-specific list of segments by `_`. Every caller passes its
//! own literal segment list, so two record categories can never collide.
//! The reserved segment [`KEY_VALUE_SEGMENT`] marks the generic key/value
//! fallback schema.

use anyhow::Result;

use crate::store::TableStore;

pub const SEPARATOR: &str = "_";

/// Segment naming a key/value fallback table (`cells_kv`, `metadata_kv`, `kv`).
pub const KEY_VALUE_SEGMENT: &str = "kv";

/// A notebook section that owns a family of tables.
pub trait Section {
    /// Prefix of every table this section writes.
    fn base_table_name(&self) -> &'static str;

    /// Human-readable origin of a batch, used in result reporting.
    fn log_header(&self, unit_id: Option<usize>, info_name: &str) -> String;
}

/// The `cells*` tables.
pub struct CellSection {
    source: String,
}

impl CellSection {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl Section for CellSection {
    fn base_table_name(&self) -> &'static str {
        "cells"
    }

    fn log_header(&self, unit_id: Option<usize>, info_name: &str) -> String {
        match unit_id {
            Some(id) => format!(
                "{}: {}#{}({})",
                self.source,
                self.base_table_name(),
                id,
                info_name
            ),
            None => format!("{}: {}({})", self.source, self.base_table_name(), info_name),
        }
    }
}

/// The `metadata*` tables.
pub struct MetadataSection {
    source: String,
}

impl MetadataSection {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl Section for MetadataSection {
    fn base_table_name(&self) -> &'static str {
        "metadata"
    }

    fn log_header(&self, _unit_id: Option<usize>, info_name: &str) -> String {
        format!("{}: {}({})", self.source, self.base_table_name(), info_name)
    }
}

/// A resolved table name and whether it was absent from the store when
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTable {
    pub name: String,
    pub is_new: bool,
}

pub struct TableNameAllocator<'a> {
    store: &'a dyn TableStore,
}

impl<'a> TableNameAllocator<'a> {
    pub fn new(store: &'a dyn TableStore) -> Self {
        Self { store }
    }

    /// Join `base` and `segments` with [`SEPARATOR`].
    pub fn table_name(base: &str, segments: &[&str]) -> String {
        debug_assert!(
            std::iter::once(base)
                .chain(segments.iter().copied())
                .all(is_valid_segment),
            "table name segments must be ASCII alphanumerics or '_'"
        );

        let mut name = base.to_string();
        for segment in segments {
            name.push_str(SEPARATOR);
            name.push_str(segment);
        }
        name
    }

    /// Resolve a table name and check the store for its existence.
    ///
    /// `is_new` is only informational; table creation stays idempotent on
    /// the store side.
    pub async fn resolve(&self, base: &str, segments: &[&str]) -> Result<ResolvedTable> {
        let name = Self::table_name(base, segments);
        let is_new = !self.store.has_table(&name).await?;
        Ok(ResolvedTable { name, is_new })
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
