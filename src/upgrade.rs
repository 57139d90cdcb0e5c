//! Upgrade of nbformat 3 documents to the version 4 layout.
//!
//! Version 3 nests cells under `worksheets`, calls the code `input`, and keeps
//! output payloads under short keys (`text`, `png`, ...) next to the output
//! type. [`upgrade_v3`] rewrites the parsed JSON in place so the typed model
//! in [`crate::models`] only ever sees version 4. Keys keep their document
//! position when rewritten and move to the end when renamed.

use serde_json::{Map, Value};

use crate::models::split_lines;

pub const UPGRADED_NBFORMAT: i64 = 4;
/// Cell ids are required from 4.5 on; upgraded cells carry none.
pub const UPGRADED_NBFORMAT_MINOR: i64 = 4;

const MIME_KEYS: &[(&str, &str)] = &[
    ("text", "text/plain"),
    ("html", "text/html"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpeg", "image/jpeg"),
    ("latex", "text/latex"),
    ("json", "application/json"),
    ("javascript", "application/javascript"),
];

const JSON_MIME: &str = "application/json";

fn mime_key(key: &str) -> String {
    MIME_KEYS
        .iter()
        .find(|(short, _)| *short == key)
        .map_or(key, |(_, mime)| *mime)
        .to_string()
}

fn to_mime_keys(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().map(|(k, v)| (mime_key(&k), v)).collect()
}

/// A string or a list of string fragments, concatenated.
fn joined_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Value {
    map.entry(key).or_insert_with(|| Value::Object(Map::new()))
}

/// Rewrite a version 3 notebook as version 4.
pub fn upgrade_v3(nb: &mut Map<String, Value>) {
    let orig_nbformat = nb
        .shift_remove("orig_nbformat")
        .filter(|v| !v.is_null())
        .unwrap_or(Value::from(3));
    let orig_nbformat_minor = nb
        .shift_remove("orig_nbformat_minor")
        .filter(|v| !v.is_null())
        .unwrap_or(Value::from(0));

    if let Value::Object(metadata) = object_entry(nb, "metadata") {
        metadata.insert("orig_nbformat".to_string(), orig_nbformat);
        metadata.insert("orig_nbformat_minor".to_string(), orig_nbformat_minor);
        metadata.shift_remove("name");
        metadata.shift_remove("signature");
    }

    nb.insert("nbformat".to_string(), Value::from(UPGRADED_NBFORMAT));
    nb.insert(
        "nbformat_minor".to_string(),
        Value::from(UPGRADED_NBFORMAT_MINOR),
    );

    let mut cells = Vec::new();
    if let Some(Value::Array(worksheets)) = nb.shift_remove("worksheets") {
        for worksheet in worksheets {
            let Value::Object(mut worksheet) = worksheet else {
                continue;
            };
            if let Some(Value::Array(ws_cells)) = worksheet.shift_remove("cells") {
                cells.extend(ws_cells.into_iter().map(upgrade_cell));
            }
        }
    }
    nb.insert("cells".to_string(), Value::Array(cells));
}

fn upgrade_cell(cell: Value) -> Value {
    let Value::Object(mut cell) = cell else {
        return cell;
    };
    object_entry(&mut cell, "metadata");

    let cell_type = cell
        .get("cell_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match cell_type.as_str() {
        "code" => {
            cell.shift_remove("language");
            if let Some(collapsed) = cell.shift_remove("collapsed") {
                if let Value::Object(metadata) = object_entry(&mut cell, "metadata") {
                    metadata.insert("collapsed".to_string(), collapsed);
                }
            }
            let source = cell
                .shift_remove("input")
                .unwrap_or_else(|| Value::from(""));
            cell.insert("source".to_string(), source);
            let execution_count = cell.shift_remove("prompt_number").unwrap_or(Value::Null);
            cell.insert("execution_count".to_string(), execution_count);
            if let Some(Value::Array(outputs)) = cell.get_mut("outputs") {
                for output in outputs.iter_mut() {
                    if let Value::Object(output) = output {
                        upgrade_output(output);
                    }
                }
            }
        }
        "heading" => {
            cell.insert("cell_type".to_string(), Value::from("markdown"));
            let level = cell
                .shift_remove("level")
                .and_then(|v| v.as_u64())
                .unwrap_or(1)
                .min(6) as usize;
            let text = joined_text(cell.get("source"));
            let single_line = split_lines(&text).collect::<Vec<_>>().join(" ");
            cell.insert(
                "source".to_string(),
                Value::from(format!("{} {}", "#".repeat(level), single_line)),
            );
        }
        "html" => {
            cell.insert("cell_type".to_string(), Value::from("markdown"));
        }
        _ => {}
    }

    Value::Object(cell)
}

fn upgrade_output(output: &mut Map<String, Value>) {
    let output_type = output
        .get("output_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match output_type.as_str() {
        "pyout" | "display_data" => {
            object_entry(output, "metadata");
            if output_type == "pyout" {
                output.insert("output_type".to_string(), Value::from("execute_result"));
                let execution_count = output.shift_remove("prompt_number").unwrap_or(Value::Null);
                output.insert("execution_count".to_string(), execution_count);
            }

            let payload_keys: Vec<String> = output
                .keys()
                .filter(|k| !matches!(k.as_str(), "output_type" | "execution_count" | "metadata"))
                .cloned()
                .collect();
            let mut data = Map::new();
            for key in payload_keys {
                if let Some(value) = output.shift_remove(&key) {
                    data.insert(key, value);
                }
            }
            let mut data = to_mime_keys(data);
            let parsed_json = match data.get(JSON_MIME) {
                Some(Value::String(raw)) => serde_json::from_str::<Value>(raw).ok(),
                _ => None,
            };
            if let Some(parsed) = parsed_json {
                data.insert(JSON_MIME.to_string(), parsed);
            }
            output.insert("data".to_string(), Value::Object(data));

            if let Some(Value::Object(metadata)) = output.get_mut("metadata") {
                *metadata = to_mime_keys(std::mem::take(metadata));
            }
        }
        "pyerr" => {
            output.insert("output_type".to_string(), Value::from("error"));
        }
        "stream" => {
            let name = output
                .shift_remove("stream")
                .unwrap_or_else(|| Value::from("stdout"));
            output.insert("name".to_string(), name);
        }
        _ => {}
    }
}
