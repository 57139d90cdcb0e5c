//! Row projection: notebook units → typed row batches → tables.
//!
//! Every batch goes through the same path: resolve the table name (capturing
//! `is_new` before anything is created), create the table right before the
//! first row lands, insert, then report once. A batch that ends up empty
//! creates nothing and reports nothing.
//!
//! # Fixed schemas
//!
//! | Table | Columns |
//! |-------|---------|
//! | `metadata_kernelspec`, `metadata_language_info`, `metadata_kv` | key, value |
//! | `cells_source` | cell_id, line_no, text |
//! | `cells_outputs` | cell_id, type, line_no, data |
//! | `cells_outputs_kv`, `cells_kv` | cell_id, key, value |
//! | `kv` | key, value |

use std::collections::BTreeSet;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::models::{
    split_lines, ColumnDef, ColumnType, Fields, MultilineText, Output, Row, SqlValue,
};
use crate::naming::{ResolvedTable, Section, TableNameAllocator, KEY_VALUE_SEGMENT};
use crate::report::ResultReporter;
use crate::store::TableStore;

pub const METADATA_KV_COLUMNS: &[ColumnDef] = &[
    ColumnDef::not_null("key", ColumnType::Text),
    ColumnDef::not_null("value", ColumnType::Text),
];

pub const SOURCE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::not_null("cell_id", ColumnType::Integer),
    ColumnDef::not_null("line_no", ColumnType::Integer),
    ColumnDef::nullable("text", ColumnType::Text),
];

pub const OUTPUT_COLUMNS: &[ColumnDef] = &[
    ColumnDef::not_null("cell_id", ColumnType::Integer),
    ColumnDef::not_null("type", ColumnType::Text),
    ColumnDef::nullable("line_no", ColumnType::Integer),
    ColumnDef::nullable("data", ColumnType::Blob),
];

pub const CELL_KV_COLUMNS: &[ColumnDef] = &[
    ColumnDef::not_null("cell_id", ColumnType::Integer),
    ColumnDef::not_null("key", ColumnType::Text),
    ColumnDef::nullable("value", ColumnType::Text),
];

pub const NOTEBOOK_KV_COLUMNS: &[ColumnDef] = &[
    ColumnDef::not_null("key", ColumnType::Text),
    ColumnDef::nullable("value", ColumnType::Text),
];

const OUTPUTS_SEGMENT: &str = "outputs";
const OUTPUT_TEXT_TYPE: &str = "text";

/// Map a JSON scalar to a row value.
pub fn scalar_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => SqlValue::Text(n.to_string()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Key/value fallback rule: scalars are stored raw, compound values as
/// compact JSON, and empty compound values as NULL.
pub fn kv_value(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Object(map) if map.is_empty() => SqlValue::Null,
        Value::Array(items) if items.is_empty() => SqlValue::Null,
        Value::Object(_) | Value::Array(_) => SqlValue::Text(serde_json::to_string(value)?),
        scalar => scalar_value(scalar),
    })
}

/// Pretty-print with a four-space indent.
pub fn to_indented_json(value: &Value) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

/// `image/` followed by at least one character, case-sensitive.
pub fn is_image_mime(mime: &str) -> bool {
    mime.strip_prefix("image/")
        .is_some_and(|subtype| !subtype.is_empty())
}

/// A list of string fragments, as nbformat stores multi-line payloads.
fn joined_fragments(items: &[Value]) -> Option<String> {
    items
        .iter()
        .map(|item| item.as_str())
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.concat())
}

fn image_payload(payload: &Value) -> Result<Vec<u8>> {
    Ok(match payload {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Array(items) => match joined_fragments(items) {
            Some(joined) => joined.into_bytes(),
            None => serde_json::to_vec(payload)?,
        },
        other => serde_json::to_vec(other)?,
    })
}

fn text_payload(payload: &Value) -> Result<String> {
    Ok(match payload {
        Value::String(s) => s.clone(),
        Value::Array(items) => match joined_fragments(items) {
            Some(joined) => joined,
            None => to_indented_json(payload)?,
        },
        Value::Object(_) => to_indented_json(payload)?,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// A table being filled by one batch. The table is created lazily, right
/// before the first row is written.
struct TableBatch {
    table: ResolvedTable,
    columns: &'static [ColumnDef],
    created: bool,
    count: u64,
}

impl TableBatch {
    fn new(table: ResolvedTable, columns: &'static [ColumnDef]) -> Self {
        Self {
            table,
            columns,
            created: false,
            count: 0,
        }
    }

    async fn ensure_created(&mut self, store: &dyn TableStore) -> Result<()> {
        if !self.created {
            if self.table.is_new {
                store.create_table(&self.table.name, self.columns).await?;
            }
            self.created = true;
        }
        Ok(())
    }

    async fn insert(&mut self, store: &dyn TableStore, row: Row) -> Result<()> {
        self.ensure_created(store).await?;
        store.insert(&self.table.name, &row).await?;
        self.count += 1;
        Ok(())
    }

    async fn insert_many(&mut self, store: &dyn TableStore, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.ensure_created(store).await?;
        self.count += store.insert_many(&self.table.name, rows).await?;
        Ok(())
    }
}

/// Projects notebook units into tables and remembers which tables received
/// rows.
pub struct RowProjector<'a> {
    store: &'a dyn TableStore,
    names: TableNameAllocator<'a>,
    reporter: &'a dyn ResultReporter,
    written: BTreeSet<String>,
}

impl<'a> RowProjector<'a> {
    pub fn new(store: &'a dyn TableStore, reporter: &'a dyn ResultReporter) -> Self {
        Self {
            store,
            names: TableNameAllocator::new(store),
            reporter,
            written: BTreeSet::new(),
        }
    }

    /// Tables that received at least one row so far.
    pub fn written_tables(&self) -> &BTreeSet<String> {
        &self.written
    }

    pub fn into_written_tables(self) -> BTreeSet<String> {
        self.written
    }

    async fn open(
        &self,
        base: &str,
        segments: &[&str],
        columns: &'static [ColumnDef],
    ) -> Result<TableBatch> {
        let table = self.names.resolve(base, segments).await?;
        Ok(TableBatch::new(table, columns))
    }

    fn finish(&mut self, batch: TableBatch, header: &str) {
        if batch.count == 0 {
            return;
        }
        self.written.insert(batch.table.name.clone());
        self.reporter
            .logging_success(header, &batch.table.name, batch.table.is_new);
    }

    /// Write one batch of rows to `base[_segments]`. Returns the row count.
    pub async fn write_batch(
        &mut self,
        header: &str,
        base: &str,
        segments: &[&str],
        columns: &'static [ColumnDef],
        rows: Vec<Row>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut batch = self.open(base, segments, columns).await?;
        batch.insert_many(self.store, &rows).await?;
        let count = batch.count;
        self.finish(batch, header);
        Ok(count)
    }

    /// One row per source line, trailing whitespace stripped.
    pub async fn project_source(
        &mut self,
        section: &dyn Section,
        cell_id: usize,
        source: &MultilineText,
    ) -> Result<u64> {
        let rows: Vec<Row> = source
            .lines()
            .enumerate()
            .map(|(line_no, line)| {
                vec![
                    SqlValue::from(cell_id),
                    line_no.into(),
                    SqlValue::from(line.trim_end()),
                ]
            })
            .collect();

        self.write_batch(
            &section.log_header(Some(cell_id), "source"),
            section.base_table_name(),
            &["source"],
            SOURCE_COLUMNS,
            rows,
        )
        .await
    }

    /// Project one output: its text, then its mime bundle, then every
    /// remaining field into the outputs key/value table.
    pub async fn project_output(
        &mut self,
        section: &dyn Section,
        cell_id: usize,
        output: &Output,
    ) -> Result<()> {
        if let Some(text) = &output.text {
            self.project_output_text(section, cell_id, text).await?;
        }
        if let Some(data) = &output.data {
            self.project_output_data(section, cell_id, data).await?;
        }

        let rows = cell_kv_rows(cell_id, &output.extra)?;
        self.write_batch(
            &section.log_header(Some(cell_id), "outputs kv"),
            section.base_table_name(),
            &[OUTPUTS_SEGMENT, KEY_VALUE_SEGMENT],
            CELL_KV_COLUMNS,
            rows,
        )
        .await?;
        Ok(())
    }

    async fn project_output_text(
        &mut self,
        section: &dyn Section,
        cell_id: usize,
        text: &MultilineText,
    ) -> Result<u64> {
        let rows: Vec<Row> = text
            .lines()
            .enumerate()
            .map(|(line_no, line)| {
                vec![
                    SqlValue::from(cell_id),
                    OUTPUT_TEXT_TYPE.into(),
                    line_no.into(),
                    line.into(),
                ]
            })
            .collect();

        self.write_batch(
            &section.log_header(Some(cell_id), "outputs text"),
            section.base_table_name(),
            &[OUTPUTS_SEGMENT],
            OUTPUT_COLUMNS,
            rows,
        )
        .await
    }

    /// Image payloads become a single blob row at line 0; everything else is
    /// split by line, compound payloads after indented serialization.
    async fn project_output_data(
        &mut self,
        section: &dyn Section,
        cell_id: usize,
        data: &Fields,
    ) -> Result<u64> {
        let mut batch = self
            .open(section.base_table_name(), &[OUTPUTS_SEGMENT], OUTPUT_COLUMNS)
            .await?;

        for (mime, payload) in data {
            tracing::debug!(
                table = %batch.table.name,
                cell_id,
                mime = %mime,
                "projecting output data"
            );

            if is_image_mime(mime) {
                let row = vec![
                    SqlValue::from(cell_id),
                    mime.as_str().into(),
                    SqlValue::Integer(0),
                    SqlValue::from(image_payload(payload)?),
                ];
                batch.insert(self.store, row).await?;
                continue;
            }

            let text = text_payload(payload)?;
            let rows: Vec<Row> = split_lines(&text)
                .enumerate()
                .map(|(line_no, line)| {
                    vec![
                        SqlValue::from(cell_id),
                        mime.as_str().into(),
                        line_no.into(),
                        line.into(),
                    ]
                })
                .collect();
            batch.insert_many(self.store, &rows).await?;
        }

        let count = batch.count;
        self.finish(batch, &section.log_header(Some(cell_id), "outputs data"));
        Ok(count)
    }

    /// Sweep the unclaimed fields of a cell into `cells_kv`.
    pub async fn project_cell_residual(
        &mut self,
        section: &dyn Section,
        cell_id: usize,
        fields: &Fields,
    ) -> Result<u64> {
        let rows = cell_kv_rows(cell_id, fields)?;
        self.write_batch(
            &section.log_header(Some(cell_id), KEY_VALUE_SEGMENT),
            section.base_table_name(),
            &[KEY_VALUE_SEGMENT],
            CELL_KV_COLUMNS,
            rows,
        )
        .await
    }

    /// Write `(key, value)` pairs of a metadata block into
    /// `<base>_<segments>`.
    pub async fn project_key_values(
        &mut self,
        section: &dyn Section,
        info_name: &str,
        segments: &[&str],
        pairs: Vec<(String, SqlValue)>,
    ) -> Result<u64> {
        let rows: Vec<Row> = pairs
            .into_iter()
            .map(|(key, value)| vec![SqlValue::Text(key), value])
            .collect();

        self.write_batch(
            &section.log_header(None, info_name),
            section.base_table_name(),
            segments,
            METADATA_KV_COLUMNS,
            rows,
        )
        .await
    }
}

fn cell_kv_rows(cell_id: usize, fields: &Fields) -> Result<Vec<Row>> {
    fields
        .iter()
        .map(|(key, value)| -> Result<Row> {
            Ok(vec![
                SqlValue::from(cell_id),
                key.as_str().into(),
                kv_value(value)?,
            ])
        })
        .collect()
}

/// `(key, value)` pairs for a mapping under the key/value fallback rule.
pub fn kv_pairs(fields: &Fields) -> Result<Vec<(String, SqlValue)>> {
    fields
        .iter()
        .map(|(key, value)| -> Result<(String, SqlValue)> { Ok((key.clone(), kv_value(value)?)) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::CellSection;
    use crate::report::SilentReporter;
    use crate::store::MemoryTableStore;
    use serde_json::json;

    fn output(value: Value) -> Output {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn image_mime_requires_subtype() {
        assert!(is_image_mime("image/png"));
        assert!(is_image_mime("image/svg+xml"));
        assert!(!is_image_mime("image/"));
        assert!(!is_image_mime("Image/png"));
        assert!(!is_image_mime("text/plain"));
    }

    #[test]
    fn kv_value_serializes_compounds() {
        assert_eq!(kv_value(&json!({})).unwrap(), SqlValue::Null);
        assert_eq!(kv_value(&json!([])).unwrap(), SqlValue::Null);
        assert_eq!(
            kv_value(&json!({"collapsed": true})).unwrap(),
            SqlValue::Text("{\"collapsed\":true}".to_string())
        );
        assert_eq!(kv_value(&json!(3)).unwrap(), SqlValue::Integer(3));
        assert_eq!(kv_value(&json!(true)).unwrap(), SqlValue::Integer(1));
        assert_eq!(kv_value(&json!(null)).unwrap(), SqlValue::Null);
        assert_eq!(kv_value(&json!("code")).unwrap(), SqlValue::from("code"));
    }

    #[test]
    fn indented_json_uses_four_spaces() {
        assert_eq!(
            to_indented_json(&json!({"a": 1})).unwrap(),
            "{\n    \"a\": 1\n}"
        );
    }

    #[tokio::test]
    async fn source_lines_are_right_trimmed() {
        let store = MemoryTableStore::new();
        let reporter = SilentReporter::default();
        let mut projector = RowProjector::new(&store, &reporter);
        let section = CellSection::new("nb");

        let n = projector
            .project_source(&section, 0, &MultilineText::from("a\nb \n"))
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            store.rows("cells_source").unwrap(),
            vec![
                vec![SqlValue::Integer(0), SqlValue::Integer(0), "a".into()],
                vec![SqlValue::Integer(0), SqlValue::Integer(1), "b".into()],
            ]
        );
    }

    #[tokio::test]
    async fn carriage_returns_split_source_and_stream_text() {
        let store = MemoryTableStore::new();
        let reporter = SilentReporter::default();
        let mut projector = RowProjector::new(&store, &reporter);
        let section = CellSection::new("nb");

        projector
            .project_source(&section, 0, &MultilineText::from("a\rb"))
            .await
            .unwrap();
        let out = output(json!({
            "output_type": "stream",
            "name": "stderr",
            "text": "10%\r50%\r100%\n"
        }));
        projector.project_output(&section, 0, &out).await.unwrap();

        assert_eq!(
            store.rows("cells_source").unwrap(),
            vec![
                vec![SqlValue::Integer(0), SqlValue::Integer(0), "a".into()],
                vec![SqlValue::Integer(0), SqlValue::Integer(1), "b".into()],
            ]
        );
        let progress: Vec<(SqlValue, SqlValue)> = store
            .rows("cells_outputs")
            .unwrap()
            .into_iter()
            .map(|row| (row[2].clone(), row[3].clone()))
            .collect();
        assert_eq!(
            progress,
            vec![
                (SqlValue::Integer(0), "10%".into()),
                (SqlValue::Integer(1), "50%".into()),
                (SqlValue::Integer(2), "100%".into()),
            ]
        );
    }

    #[tokio::test]
    async fn outputs_table_gets_declared_schema() {
        let store = MemoryTableStore::new();
        let reporter = SilentReporter::default();
        let mut projector = RowProjector::new(&store, &reporter);

        let out = output(json!({"data": {"text/plain": "1\u{2028}2"}}));
        projector
            .project_output(&CellSection::new("nb"), 0, &out)
            .await
            .unwrap();

        assert_eq!(store.columns("cells_outputs").unwrap(), OUTPUT_COLUMNS.to_vec());
        assert_eq!(store.rows("cells_outputs").unwrap().len(), 2);
        assert!(store.columns("cells_outputs_kv").is_none());
    }

    #[tokio::test]
    async fn empty_source_creates_nothing() {
        let store = MemoryTableStore::new();
        let reporter = SilentReporter::default();
        let mut projector = RowProjector::new(&store, &reporter);

        let n = projector
            .project_source(&CellSection::new("nb"), 0, &MultilineText::default())
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(store.table_names().is_empty());
        assert!(projector.written_tables().is_empty());
        assert_eq!(reporter.counter().snapshot().success, 0);
    }

    #[tokio::test]
    async fn image_payload_is_one_blob_row() {
        let store = MemoryTableStore::new();
        let reporter = SilentReporter::default();
        let mut projector = RowProjector::new(&store, &reporter);

        let out = output(json!({
            "output_type": "display_data",
            "data": {"image/png": "iVBOR\nw0KGgo\n"},
            "metadata": {}
        }));
        projector
            .project_output(&CellSection::new("nb"), 2, &out)
            .await
            .unwrap();

        assert_eq!(
            store.rows("cells_outputs").unwrap(),
            vec![vec![
                SqlValue::Integer(2),
                "image/png".into(),
                SqlValue::Integer(0),
                SqlValue::Blob(b"iVBOR\nw0KGgo\n".to_vec()),
            ]]
        );
        assert_eq!(
            store.rows("cells_outputs_kv").unwrap(),
            vec![
                vec![SqlValue::Integer(2), "output_type".into(), "display_data".into()],
                vec![SqlValue::Integer(2), "metadata".into(), SqlValue::Null],
            ]
        );
    }

    #[tokio::test]
    async fn structured_payload_is_split_after_indenting() {
        let store = MemoryTableStore::new();
        let reporter = SilentReporter::default();
        let mut projector = RowProjector::new(&store, &reporter);

        let out = output(json!({"data": {"application/json": {"a": 1}}}));
        projector
            .project_output(&CellSection::new("nb"), 0, &out)
            .await
            .unwrap();

        let data: Vec<SqlValue> = store
            .rows("cells_outputs")
            .unwrap()
            .into_iter()
            .map(|row| row[3].clone())
            .collect();
        assert_eq!(
            data,
            vec![
                SqlValue::from("{"),
                SqlValue::from("    \"a\": 1"),
                SqlValue::from("}")
            ]
        );
        // Nothing left for the kv sweep.
        assert!(store.rows("cells_outputs_kv").is_none());
    }

    #[tokio::test]
    async fn text_is_projected_before_data() {
        let store = MemoryTableStore::new();
        let reporter = SilentReporter::default();
        let mut projector = RowProjector::new(&store, &reporter);

        let out = output(json!({
            "output_type": "stream",
            "name": "stdout",
            "text": ["hello\n", "world\n"],
            "data": {"text/plain": ["1\n", "2"]}
        }));
        projector
            .project_output(&CellSection::new("nb"), 1, &out)
            .await
            .unwrap();

        let rows = store.rows("cells_outputs").unwrap();
        let types: Vec<SqlValue> = rows.iter().map(|r| r[1].clone()).collect();
        assert_eq!(
            types,
            vec![
                SqlValue::from("text"),
                SqlValue::from("text"),
                SqlValue::from("text/plain"),
                SqlValue::from("text/plain"),
            ]
        );
        assert_eq!(rows[3][2], SqlValue::Integer(1));
        assert_eq!(rows[3][3], SqlValue::from("2"));
        // Table created once, reported as new once.
        assert_eq!(store.create_calls(), vec!["cells_outputs", "cells_outputs_kv"]);
        let snapshot = reporter.counter().snapshot();
        assert_eq!(snapshot.success, 3);
        assert_eq!(snapshot.created_tables, 2);
    }
}
