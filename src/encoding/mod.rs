//! Canonical serialization of value trees.
//!
//! Mapping keys already iterate lexicographically in the data model; the
//! writers here additionally move a `ResponseMetadata` key to the end of
//! its mapping. That ordering keeps persisted snapshots and diff output
//! easy to read (payload first, transport noise last) and has no effect on
//! equality.

use std::fmt::Write;

use serde_json::Value;

/// Key under which transport response metadata is expected.
pub const RESPONSE_METADATA_KEY: &str = "ResponseMetadata";

/// Compact canonical rendering, used as the substitution target text and
/// as the default sort key for list sorting.
pub fn to_comparable_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out, None);
    out
}

/// Pretty canonical rendering (2-space indent) for the snapshot file.
pub fn to_pretty_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out, Some(0));
    out
}

fn ordered_keys(map: &serde_json::Map<String, Value>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    if let Some(pos) = keys.iter().position(|k| *k == RESPONSE_METADATA_KEY) {
        let metadata = keys.remove(pos);
        keys.push(metadata);
    }
    keys
}

fn write_value(value: &Value, out: &mut String, indent: Option<usize>) {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push('{');
            let keys = ordered_keys(map);
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_break(out, indent.map(|n| n + 1));
                let _ = write!(out, "{}:", Value::String((*key).clone()));
                if indent.is_some() {
                    out.push(' ');
                }
                write_value(&map[*key], out, indent.map(|n| n + 1));
            }
            write_break(out, indent);
            out.push('}');
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push_str("[]");
                return;
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_break(out, indent.map(|n| n + 1));
                write_value(item, out, indent.map(|n| n + 1));
            }
            write_break(out, indent);
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

fn write_break(out: &mut String, indent: Option<usize>) {
    if let Some(level) = indent {
        out.push('\n');
        for _ in 0..level {
            out.push_str("  ");
        }
    }
}
