//! Timestamp canonicalization.
//!
//! Services emit timestamps in a handful of fixed shapes. Each recognized
//! shape collapses to a placeholder tagged with a canonical representation
//! of the same shape, so the snapshot still documents which format the
//! service used while the actual instant no longer matters. Timestamps are
//! not reference-counted: every match of a shape maps to the same token.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::transform::{TransformContext, TransformError, Transformer};

struct TimestampMatcher {
    regex: &'static LazyLock<Regex>,
    token: &'static str,
}

// Shapes are prefix-matched in order; first match wins. The canonical
// representations all render the same reference instant.
static MILLIS_UTC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}.\d{3}Z").unwrap());
static MILLIS_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}.\d{3}\+\d{4}").unwrap());
static MICROS_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}.\d{6}\+\d{2}:\d{2}").unwrap()
});
static SECONDS_UTC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z").unwrap());

// What a serialized chrono `DateTime` looks like: RFC 3339 with
// sub-millisecond precision. Collapsed to a bare token like a direct
// date/time object rather than a representation-tagged one.
static CHRONO_RFC3339: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{7,9}(Z|\+00:00)").unwrap()
});

static MATCHERS: &[TimestampMatcher] = &[
    TimestampMatcher {
        regex: &MILLIS_UTC,
        token: "<timestamp:2022-07-13T13:48:01.000Z>",
    },
    TimestampMatcher {
        regex: &MILLIS_OFFSET,
        token: "<timestamp:2022-07-13T13:48:01.000+0000>",
    },
    TimestampMatcher {
        regex: &MICROS_OFFSET,
        token: "<timestamp:2022-07-13T13:48:01.000000+00:00>",
    },
    TimestampMatcher {
        regex: &SECONDS_UTC,
        token: "<timestamp:2022-07-13T13:48:01Z>",
    },
    TimestampMatcher {
        regex: &CHRONO_RFC3339,
        token: "<datetime>",
    },
];

/// Rewrites every string matching a known timestamp shape to that shape's
/// canonical placeholder.
#[derive(Default)]
pub struct TimestampTransformer;

impl TimestampTransformer {
    pub fn new() -> Self {
        Self
    }

    fn canonicalize(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for child in map.values_mut() {
                    self.canonicalize(child);
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.canonicalize(item);
                }
            }
            Value::String(text) => {
                if let Some(matcher) = MATCHERS.iter().find(|m| m.regex.is_match(text)) {
                    *text = matcher.token.to_string();
                }
            }
            _ => {}
        }
    }
}

impl Transformer for TimestampTransformer {
    fn transform(
        &self,
        mut tree: Value,
        _ctx: &mut TransformContext,
    ) -> Result<Value, TransformError> {
        self.canonicalize(&mut tree);
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn canonicalized(input: Value) -> Value {
        let mut ctx = TransformContext::new();
        TimestampTransformer::new().transform(input, &mut ctx).unwrap()
    }

    #[test]
    fn known_shapes_collapse_to_tagged_placeholders() {
        let input = json!({
            "function": {
                "Name": "somefn",
                "LastModified": "2023-10-09T12:49:50.000+0000",
            },
            "stack": {
                "Name": "somestack",
                "CreationTime": "2023-11-20T18:39:36.014000+00:00",
            },
            "machine": {
                "name": "statemachine",
                "creationDate": "2023-11-21T07:14:12.243000+01:00",
                "internal": "2023-11-21T07:14:12.243Z",
                "plain": "2023-11-21T07:14:12Z",
            },
        });

        let expected = json!({
            "function": {
                "Name": "somefn",
                "LastModified": "<timestamp:2022-07-13T13:48:01.000+0000>",
            },
            "stack": {
                "Name": "somestack",
                "CreationTime": "<timestamp:2022-07-13T13:48:01.000000+00:00>",
            },
            "machine": {
                "name": "statemachine",
                "creationDate": "<timestamp:2022-07-13T13:48:01.000000+00:00>",
                "internal": "<timestamp:2022-07-13T13:48:01.000Z>",
                "plain": "<timestamp:2022-07-13T13:48:01Z>",
            },
        });

        assert_eq!(canonicalized(input), expected);
    }

    #[test]
    fn chrono_datetimes_collapse_to_datetime_token() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let input = json!({"at": instant});
        assert_eq!(canonicalized(input), json!({"at": "<datetime>"}));
    }

    #[test]
    fn unrecognized_strings_are_left_alone() {
        let input = json!({"date": "13-07-2022", "note": "T13:48:01Z-ish"});
        assert_eq!(canonicalized(input.clone()), input);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let input = json!({"at": "2023-11-21T07:14:12.243Z"});
        let once = canonicalized(input);
        let twice = canonicalized(once.clone());
        assert_eq!(once, twice);
    }
}
