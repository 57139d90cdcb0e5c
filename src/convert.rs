//! Notebook → tables conversion.
//!
//! [`DocumentConverter`] runs the fixed sequence: every cell in index order
//! (source, outputs, residual fields), then notebook metadata (kernelspec,
//! language_info, vendor block), then the top-level `nbformat` fields. It
//! returns the names of the tables that received rows, which callers use to
//! record provenance.
//!
//! Store errors propagate unchanged; there is no retry and no rollback of
//! batches already written.

use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::Value;

use crate::models::{Cell, Metadata, Notebook, SqlValue, VENDOR_METADATA_KEY};
use crate::naming::{CellSection, MetadataSection, KEY_VALUE_SEGMENT};
use crate::project::{kv_pairs, kv_value, to_indented_json, RowProjector, NOTEBOOK_KV_COLUMNS};
use crate::report::ResultReporter;
use crate::store::TableStore;

const CODEMIRROR_MODE_KEY: &str = "codemirror_mode";

pub struct DocumentConverter<'a> {
    source: String,
    cells: CellSection,
    metadata: MetadataSection,
    projector: RowProjector<'a>,
}

impl<'a> DocumentConverter<'a> {
    /// `source` identifies the document in reports (a path or `host/path`).
    pub fn new(
        store: &'a dyn TableStore,
        reporter: &'a dyn ResultReporter,
        source: impl Into<String>,
    ) -> Self {
        let source = source.into();
        Self {
            cells: CellSection::new(source.clone()),
            metadata: MetadataSection::new(source.clone()),
            source,
            projector: RowProjector::new(store, reporter),
        }
    }

    pub async fn convert(mut self, notebook: &Notebook) -> Result<BTreeSet<String>> {
        for (cell_id, cell) in notebook.cells.iter().enumerate() {
            self.convert_cell(cell_id, cell).await?;
        }
        self.convert_metadata(&notebook.metadata).await?;
        self.convert_notebook_kv(notebook).await?;

        Ok(self.projector.into_written_tables())
    }

    async fn convert_cell(&mut self, cell_id: usize, cell: &Cell) -> Result<()> {
        if let Some(source) = &cell.source {
            self.projector
                .project_source(&self.cells, cell_id, source)
                .await?;
        }
        if let Some(outputs) = &cell.outputs {
            for output in outputs {
                self.projector
                    .project_output(&self.cells, cell_id, output)
                    .await?;
            }
        }
        self.projector
            .project_cell_residual(&self.cells, cell_id, &cell.extra)
            .await?;
        Ok(())
    }

    async fn convert_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        if metadata.is_empty() {
            tracing::debug!(source = %self.source, "metadata not found");
            return Ok(());
        }

        if let Some(kernelspec) = &metadata.kernelspec {
            self.projector
                .project_key_values(
                    &self.metadata,
                    "kernelspec",
                    &["kernelspec"],
                    kv_pairs(kernelspec)?,
                )
                .await?;
        }

        if let Some(language_info) = &metadata.language_info {
            let mut pairs: Vec<(String, SqlValue)> = Vec::with_capacity(language_info.len());
            if let Some(Value::Object(mode)) = language_info.get(CODEMIRROR_MODE_KEY) {
                for (key, value) in mode {
                    pairs.push((format!("{}_{}", CODEMIRROR_MODE_KEY, key), kv_value(value)?));
                }
            }
            for (key, value) in language_info {
                if key == CODEMIRROR_MODE_KEY && value.is_object() {
                    continue;
                }
                pairs.push((key.clone(), kv_value(value)?));
            }
            self.projector
                .project_key_values(&self.metadata, "language_info", &["language_info"], pairs)
                .await?;
        }

        if let Some(vendor) = &metadata.vendor {
            self.projector
                .project_key_values(
                    &self.metadata,
                    VENDOR_METADATA_KEY,
                    &[KEY_VALUE_SEGMENT],
                    kv_pairs(vendor)?,
                )
                .await?;
        }

        if !metadata.extra.is_empty() {
            let leftover = to_indented_json(&Value::Object(metadata.extra.clone()))?;
            tracing::debug!(source = %self.source, "cannot convert: {}", leftover);
        }

        Ok(())
    }

    /// `nbformat` and `nbformat_minor` are always written, as NULL when absent.
    async fn convert_notebook_kv(&mut self, notebook: &Notebook) -> Result<()> {
        let mut rows = Vec::with_capacity(2);
        for (key, value) in [
            ("nbformat", &notebook.nbformat),
            ("nbformat_minor", &notebook.nbformat_minor),
        ] {
            let value = match value {
                Some(v) => kv_value(v)?,
                None => SqlValue::Null,
            };
            rows.push(vec![SqlValue::from(key), value]);
        }

        let header = format!("{}: {}", self.source, KEY_VALUE_SEGMENT);
        self.projector
            .write_batch(&header, KEY_VALUE_SEGMENT, &[], NOTEBOOK_KV_COLUMNS, rows)
            .await?;
        Ok(())
    }
}

/// Convert one notebook and return the tables that received rows.
pub async fn convert_notebook(
    store: &dyn TableStore,
    reporter: &dyn ResultReporter,
    source: &str,
    notebook: &Notebook,
) -> Result<BTreeSet<String>> {
    DocumentConverter::new(store, reporter, source)
        .convert(notebook)
        .await
}
