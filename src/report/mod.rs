//! Structural comparison of value trees and failure reporting.
//!
//! The diff walks recorded and observed trees together and collects one
//! typed entry per difference, so a failed pass can show every mismatch at
//! once. Rendering collapses list indices into recursive-descent paths:
//! positions inside lists are rarely stable enough to be worth printing,
//! the key context is what a reader needs to find the field.

use std::fmt;

use serde_json::Value;

use crate::path::Segment;

#[derive(Debug, Clone, PartialEq)]
pub enum DiffKind {
    ValueChanged { recorded: Value, observed: Value },
    TypeChanged { recorded: Value, observed: Value },
    ItemAdded { observed: Value },
    ItemRemoved { recorded: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub path: Vec<Segment>,
    pub kind: DiffKind,
}

/// All differences between a recorded and an observed tree; empty means
/// the trees are structurally equal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotDiff {
    pub entries: Vec<DiffEntry>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compares two trees structurally, collecting every difference.
pub fn diff(recorded: &Value, observed: &Value) -> SnapshotDiff {
    let mut entries = Vec::new();
    let mut path = Vec::new();
    diff_inner(recorded, observed, &mut path, &mut entries);
    SnapshotDiff { entries }
}

fn diff_inner(
    recorded: &Value,
    observed: &Value,
    path: &mut Vec<Segment>,
    out: &mut Vec<DiffEntry>,
) {
    match (recorded, observed) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, recorded_child) in a {
                path.push(Segment::Key(key.clone()));
                match b.get(key) {
                    Some(observed_child) => diff_inner(recorded_child, observed_child, path, out),
                    None => out.push(DiffEntry {
                        path: path.clone(),
                        kind: DiffKind::ItemRemoved {
                            recorded: recorded_child.clone(),
                        },
                    }),
                }
                path.pop();
            }
            for (key, observed_child) in b {
                if !a.contains_key(key) {
                    path.push(Segment::Key(key.clone()));
                    out.push(DiffEntry {
                        path: path.clone(),
                        kind: DiffKind::ItemAdded {
                            observed: observed_child.clone(),
                        },
                    });
                    path.pop();
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for index in 0..a.len().max(b.len()) {
                path.push(Segment::Index(index));
                match (a.get(index), b.get(index)) {
                    (Some(recorded_item), Some(observed_item)) => {
                        diff_inner(recorded_item, observed_item, path, out)
                    }
                    (Some(recorded_item), None) => out.push(DiffEntry {
                        path: path.clone(),
                        kind: DiffKind::ItemRemoved {
                            recorded: recorded_item.clone(),
                        },
                    }),
                    (None, Some(observed_item)) => out.push(DiffEntry {
                        path: path.clone(),
                        kind: DiffKind::ItemAdded {
                            observed: observed_item.clone(),
                        },
                    }),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        _ => {
            if type_name(recorded) != type_name(observed) {
                out.push(DiffEntry {
                    path: path.clone(),
                    kind: DiffKind::TypeChanged {
                        recorded: recorded.clone(),
                        observed: observed.clone(),
                    },
                });
            } else if recorded != observed {
                out.push(DiffEntry {
                    path: path.clone(),
                    kind: DiffKind::ValueChanged {
                        recorded: recorded.clone(),
                        observed: observed.clone(),
                    },
                });
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Display for SnapshotDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let path = format_json_path(&entry.path);
            match &entry.kind {
                DiffKind::ValueChanged { recorded, observed } => {
                    writeln!(f, "  value changed at {}: {} -> {}", path, recorded, observed)?
                }
                DiffKind::TypeChanged { recorded, observed } => writeln!(
                    f,
                    "  type changed at {}: {} ({}) -> {} ({})",
                    path,
                    recorded,
                    type_name(recorded),
                    observed,
                    type_name(observed)
                )?,
                DiffKind::ItemAdded { observed } => {
                    writeln!(f, "  item added at {}: {}", path, observed)?
                }
                DiffKind::ItemRemoved { recorded } => {
                    writeln!(f, "  item removed at {}: {}", path, recorded)?
                }
            }
        }
        Ok(())
    }
}

/// Renders a concrete path as a quoted recursive-descent expression.
///
/// List indices are never printed: keys separated by one or more indices
/// join with `..`, adjacent keys join with `.`, and indices before the
/// first key disappear into the leading `$..`.
pub fn format_json_path(path: &[Segment]) -> String {
    let mut out = String::from("$..");
    let mut emitted_key = false;
    let mut crossed_list = false;

    for segment in path {
        match segment {
            Segment::Index(_) => crossed_list = true,
            Segment::Key(key) => {
                if emitted_key {
                    out.push_str(if crossed_list { ".." } else { "." });
                }
                out.push_str(key);
                emitted_key = true;
                crossed_list = false;
            }
        }
    }
    format!("\"{}\"", out)
}
