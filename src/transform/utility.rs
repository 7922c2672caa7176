//! Shorthand constructors for the common transformer setups.

use regex::Regex;
use serde_json::Value;

use crate::transform::TimestampTransformer;
use crate::transform::kinds::{
    JsonStringTransformer, KeyValueTransformer, PathTransformer, RegexTransformer,
    ReplacementFn, ResponseMetadataTransformer, SortKeyFn, SortingTransformer, TextTransformer,
};

/// Replaces the value at `key` under a reference-replacement named after
/// the hyphenated key. `{"SomeKey": "x"}` gets tokens like `<some-key:1>`.
pub fn key_value(key: &str) -> KeyValueTransformer {
    key_value_with(key, &hyphenated(key), true)
}

/// Replaces the value at `key` with the given replacement.
///
/// With `reference_replacement` every occurrence of the matched value in
/// the whole pass is rewritten and numbered; without it only the value at
/// the matching key changes.
pub fn key_value_with(
    key: &str,
    replacement: &str,
    reference_replacement: bool,
) -> KeyValueTransformer {
    let key = key.to_string();
    KeyValueTransformer::new(
        Box::new(move |k, v| (k == key && !is_empty_value(v)).then(|| v.clone())),
        replacement,
        reference_replacement,
    )
}

/// Like [`key_value_with`] but the replacement is computed from the matched
/// `(key, value)` pair.
pub fn key_value_replacement_fn(
    key: &str,
    replacement_fn: ReplacementFn,
    reference_replacement: bool,
) -> KeyValueTransformer {
    let key = key.to_string();
    KeyValueTransformer::with_replacement_fn(
        Box::new(move |k, v| (k == key && !is_empty_value(v)).then(|| v.clone())),
        replacement_fn,
        reference_replacement,
    )
}

/// Replaces values matched by a path expression.
pub fn path(expression: &str, replacement: &str, reference_replacement: bool) -> PathTransformer {
    PathTransformer::new(expression, replacement, reference_replacement)
}

/// Replaces every regex match in the serialized snapshot text.
pub fn regex(pattern: Regex, replacement: &str) -> RegexTransformer {
    RegexTransformer::new(pattern, replacement)
}

/// Replaces every occurrence of a literal text in the serialized snapshot
/// text.
pub fn text(text_value: &str, replacement: &str) -> TextTransformer {
    TextTransformer::new(text_value, replacement)
}

/// Unfolds the JSON string at `key` into a real tree.
pub fn json_string(key: &str) -> JsonStringTransformer {
    JsonStringTransformer::new(key)
}

/// Sorts the list at `key`, ordering elements by `sort_key` (or by their
/// canonical serialization when none is given).
pub fn sorting(key: &str, sort_key: Option<SortKeyFn>) -> SortingTransformer {
    SortingTransformer::new(key, sort_key)
}

/// Collapses known timestamp shapes to canonical placeholders.
pub fn timestamp() -> TimestampTransformer {
    TimestampTransformer::new()
}

/// Strips response metadata down to status code and allow-listed headers.
pub fn response_metadata() -> ResponseMetadataTransformer {
    ResponseMetadataTransformer
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// `CamelCase` to `camel-case`, the default replacement name for keys.
pub fn hyphenated(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_uppercase() {
            out.push('-');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out.trim_matches('-').to_string()
}
