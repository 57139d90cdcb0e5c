//! Core data models used throughout nbtables.
//!
//! The notebook types mirror the on-disk `.ipynb` layout (nbformat 4). Each
//! record names the fields the converter projects into dedicated tables and
//! collects every other key into a flattened residual map, so the key/value
//! sweep at the end of a unit sees exactly the fields nobody claimed.
//!
//! The row vocabulary ([`SqlValue`], [`Row`], [`ColumnDef`]) is what flows
//! from the converter into a [`TableStore`](crate::store::TableStore).

use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Unclaimed JSON fields of a notebook unit, in document order.
pub type Fields = Map<String, Value>;

/// A multi-line text field.
///
/// nbformat allows these either as one string or as a list of fragments
/// (each usually ending in `\n`). Fragments are concatenated verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultilineText(pub String);

impl MultilineText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lines without their terminators; see [`split_lines`].
    pub fn lines(&self) -> SplitLines<'_> {
        split_lines(&self.0)
    }
}

/// Whether `c` ends a line: `\n`, `\r`, vertical tab, form feed, the
/// file/group/record separators, NEL, and the Unicode line and paragraph
/// separators.
fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Split `text` at every line break. `\r\n` counts as one break, a trailing
/// break does not yield an extra empty line, and the empty string yields
/// nothing.
pub fn split_lines(text: &str) -> SplitLines<'_> {
    SplitLines { rest: text }
}

/// Iterator returned by [`split_lines`].
#[derive(Debug, Clone)]
pub struct SplitLines<'a> {
    rest: &'a str,
}

impl<'a> Iterator for SplitLines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }

        let Some((at, brk)) = self.rest.char_indices().find(|&(_, c)| is_line_break(c)) else {
            let line = self.rest;
            self.rest = "";
            return Some(line);
        };

        let line = &self.rest[..at];
        let mut end = at + brk.len_utf8();
        if brk == '\r' && self.rest[end..].starts_with('\n') {
            end += 1;
        }
        self.rest = &self.rest[end..];
        Some(line)
    }
}

impl From<&str> for MultilineText {
    fn from(s: &str) -> Self {
        MultilineText(s.to_string())
    }
}

impl<'de> Deserialize<'de> for MultilineText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Whole(String),
            Fragments(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Whole(text) => MultilineText(text),
            Repr::Fragments(parts) => MultilineText(parts.concat()),
        })
    }
}

/// A parsed notebook document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub nbformat: Option<Value>,
    #[serde(default)]
    pub nbformat_minor: Option<Value>,
    #[serde(flatten)]
    pub extra: Fields,
}

/// One cell. Its identity is its zero-based position in [`Notebook::cells`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub source: Option<MultilineText>,
    #[serde(default)]
    pub outputs: Option<Vec<Output>>,
    /// `cell_type`, `execution_count`, `metadata`, `id`, `attachments`, ...
    #[serde(flatten)]
    pub extra: Fields,
}

/// One output attached to a cell.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Output {
    /// Stream text (`stdout` / `stderr`).
    #[serde(default)]
    pub text: Option<MultilineText>,
    /// Mime bundle: mime type -> payload.
    #[serde(default)]
    pub data: Option<Fields>,
    /// `output_type`, `name`, `execution_count`, `metadata`, `ename`, ...
    #[serde(flatten)]
    pub extra: Fields,
}

/// Key of the vendor block stored in the metadata key/value table.
pub const VENDOR_METADATA_KEY: &str = "anaconda-cloud";

/// Notebook-level metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub kernelspec: Option<Fields>,
    #[serde(default)]
    pub language_info: Option<Fields>,
    #[serde(default, rename = "anaconda-cloud")]
    pub vendor: Option<Fields>,
    #[serde(flatten)]
    pub extra: Fields,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.kernelspec.is_none()
            && self.language_info.is_none()
            && self.vendor.is_none()
            && self.extra.is_empty()
    }
}

/// A single cell value bound into an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<usize> for SqlValue {
    fn from(v: usize) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

pub type Row = Vec<SqlValue>;

/// Declared column type (SQLite affinity name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
    Blob,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        })
    }
}

/// A column definition; renders as `name TYPE [NOT NULL]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub not_null: bool,
}

impl ColumnDef {
    pub const fn nullable(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            not_null: false,
        }
    }

    pub const fn not_null(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            not_null: true,
        }
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ty)?;
        if self.not_null {
            f.write_str(" NOT NULL")?;
        }
        Ok(())
    }
}
