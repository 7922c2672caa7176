//! Skip-path redaction.
//!
//! Skip paths exclude locations from comparison before the diff runs.
//! Mapping entries are deleted outright. List elements are only marked
//! with a sentinel during resolution and compacted in a single pass at the
//! end: deleting eagerly would shift the indices that later skip paths
//! into the same list refer to.

use log::{debug, warn};
use serde_json::Value;

use crate::path::{PathExpr, Segment, resolve_mut};

/// Sentinel written over skipped list elements until compaction. Distinct
/// from anything a service response could plausibly contain.
pub const SKIP_PLACEHOLDER: &str = "$__to_be_skipped__$";

/// Applies every skip path to the tree, in order.
///
/// Paths are resolved sequentially against the current state of the tree,
/// so a location removed by an earlier path is simply no longer found by a
/// later one. Invalid expressions and unresolvable locations are logged
/// and skipped; they never fail the pass.
pub fn remove_skip_paths(tree: &mut Value, skip_paths: &[String]) {
    let mut has_placeholder = false;

    for path in skip_paths {
        let expr = match PathExpr::parse(path) {
            Ok(expr) => expr,
            Err(err) => {
                warn!("skip path '{}' was not applied: {}", path, err);
                continue;
            }
        };

        let locations: Vec<Vec<Segment>> = expr.find(tree).into_iter().map(|m| m.path).collect();
        if locations.is_empty() {
            debug!("skip path '{}' matched nothing", path);
        }
        for location in &locations {
            has_placeholder |= redact_location(tree, path, location);
        }
    }

    if has_placeholder {
        compact(tree);
    }
}

/// Redacts one concrete location; returns true if a sentinel was written.
fn redact_location(tree: &mut Value, path: &str, location: &[Segment]) -> bool {
    let Some((last, parents)) = location.split_last() else {
        // A path matching the root itself has nothing to delete from.
        return false;
    };
    let Some(parent) = resolve_mut(tree, parents) else {
        debug!(
            "skip path '{}': location no longer resolvable, skipping",
            path
        );
        return false;
    };

    match (parent, last) {
        (Value::Object(map), Segment::Key(key)) => {
            // May have been deleted by an earlier path already.
            if map.remove(key).is_some() {
                debug!("skip path '{}': removed key '{}'", path, key);
            }
            false
        }
        (Value::Array(items), Segment::Index(index)) => match items.get_mut(*index) {
            Some(slot) => {
                *slot = Value::String(SKIP_PLACEHOLDER.to_string());
                true
            }
            None => false,
        },
        (Value::Array(_), Segment::Key(_)) => {
            warn!(
                "skip path '{}' was not applied as it was invalid for that snapshot",
                path
            );
            false
        }
        _ => false,
    }
}

/// Removes every sentinel element from every list. Runs at most once per
/// redaction pass, after all paths have been resolved.
fn compact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                compact(child);
            }
        }
        Value::Array(items) => {
            items.retain(|item| item.as_str() != Some(SKIP_PLACEHOLDER));
            for item in items.iter_mut() {
                compact(item);
            }
        }
        _ => {}
    }
}
