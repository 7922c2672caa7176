//! Snapshot session orchestration.
//!
//! A session covers one test scope: it collects named observed values,
//! runs the transformer pipeline, redacts skip paths, applies the deferred
//! substitutions over the serialized form and diffs the result per key
//! against the previously recorded state. In update mode it skips the
//! comparison and persists the transformed state as the new golden copy.

use std::fmt;
use std::fmt::Write as _;

use log::{error, warn};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

pub mod convert;
pub mod store;

use crate::encoding;
use crate::redact;
use crate::report::{self, SnapshotDiff};
use crate::transform::{
    self, KeyValueTransformer, RegexTransformer, TransformContext, TransformError, Transformer,
};
use store::SnapshotStore;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("key '{0}' used multiple times in the same test scope")]
    KeyReused(String),

    #[error("no recorded state for scope '{0}'; (re-)generate the snapshot for this test")]
    MissingRecordedState(String),

    #[error(
        "recorded state for key '{key}' missing in scope '{scope}'; \
         (re-)generate the snapshot for this test"
    )]
    MissingRecordedKey { key: String, scope: String },

    #[error("session for scope '{0}' is already finalized; register values before asserting")]
    SessionFinalized(String),

    #[error("substituted snapshot text for key '{0}' is no longer valid JSON")]
    UnparsableSubstitutionOutput(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Convert(#[from] serde_json::Error),

    #[error("snapshot comparison failed\n{}", render_failures(.results))]
    ComparisonFailed { results: Vec<SnapshotMatchResult> },
}

fn render_failures(results: &[SnapshotMatchResult]) -> String {
    let mut out = String::new();
    for result in results.iter().filter(|r| !r.is_match()) {
        let _ = write!(out, "{}", result);
    }
    out
}

/// Outcome of comparing one assertion key.
#[derive(Debug, Clone)]
pub struct SnapshotMatchResult {
    pub key: String,
    pub recorded: Value,
    pub observed: Value,
    pub diff: SnapshotDiff,
}

impl SnapshotMatchResult {
    pub fn is_match(&self) -> bool {
        self.diff.is_empty()
    }
}

impl fmt::Display for SnapshotMatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_match() {
            writeln!(f, "key '{}': no differences", self.key)
        } else {
            writeln!(f, "key '{}' differs:", self.key)?;
            write!(f, "{}", self.diff)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Record mode: persist the transformed observed state as the new
    /// golden copy instead of comparing.
    pub update: bool,
    /// Whether mismatches fail the pass.
    pub verify: bool,
    /// Additionally write the raw (pre-transform) observed state next to
    /// the snapshot file.
    pub raw: bool,
}

/// Snapshot handler for a single test scope with potentially multiple
/// assertion keys.
///
/// A session only rewrites its own scope's entry in the snapshot file; the
/// file as a whole is assumed to be written sequentially, never by two
/// sessions at once.
pub struct SnapshotSession {
    scope_key: String,
    update: bool,
    verify: bool,
    raw: bool,
    store: SnapshotStore,
    raw_store: SnapshotStore,
    transformers: Vec<(Box<dyn Transformer>, i32)>,
    recorded_state: Map<String, Value>,
    observed_state: Map<String, Value>,
    finalized: bool,
}

impl SnapshotSession {
    pub fn new(base_file_path: &str, scope_key: &str, options: SessionOptions) -> Self {
        let store = SnapshotStore::new(format!("{}.snapshot.json", base_file_path));
        let raw_store = SnapshotStore::new(format!("{}.raw.snapshot.json", base_file_path));

        let recorded_state = store.load(scope_key).unwrap_or_else(|err| {
            warn!(
                "could not load recorded state from '{}': {}",
                store.path().display(),
                err
            );
            Map::new()
        });

        Self {
            scope_key: scope_key.to_string(),
            update: options.update,
            verify: options.verify,
            raw: options.raw,
            store,
            raw_store,
            transformers: Vec::new(),
            recorded_state,
            observed_state: Map::new(),
            finalized: false,
        }
    }

    /// Replaces the recorded golden state, e.g. to seed a scope without a
    /// snapshot file.
    pub fn set_recorded_state(&mut self, recorded: Map<String, Value>) {
        self.recorded_state = recorded;
    }

    pub fn add_transformer(&mut self, transformer: impl Transformer + 'static) {
        self.add_transformer_with_priority(transformer, 0);
    }

    /// Registers a transformer at a priority; lower priorities run first
    /// and equal priorities run in registration order.
    pub fn add_transformer_with_priority(
        &mut self,
        transformer: impl Transformer + 'static,
        priority: i32,
    ) {
        self.transformers.push((Box::new(transformer), priority));
    }

    pub fn add_transformers(&mut self, transformers: Vec<Box<dyn Transformer>>, priority: i32) {
        for transformer in transformers {
            self.transformers.push((transformer, priority));
        }
    }

    /// Registers an observed value under a unique assertion key.
    pub fn match_value(&mut self, key: &str, value: Value) -> Result<(), SnapshotError> {
        if self.finalized {
            return Err(SnapshotError::SessionFinalized(self.scope_key.clone()));
        }
        if self.observed_state.contains_key(key) {
            return Err(SnapshotError::KeyReused(key.to_string()));
        }
        self.observed_state.insert(key.to_string(), value);

        // Fail fast on stale golden state; finalization checks this again
        // before comparing.
        if !self.update {
            if self.recorded_state.is_empty() {
                return Err(SnapshotError::MissingRecordedState(self.scope_key.clone()));
            }
            if !self.recorded_state.contains_key(key) {
                return Err(SnapshotError::MissingRecordedKey {
                    key: key.to_string(),
                    scope: self.scope_key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Converts any serializable value and registers it like
    /// [`match_value`](Self::match_value).
    pub fn match_serializable<T: Serialize>(
        &mut self,
        key: &str,
        value: &T,
    ) -> Result<(), SnapshotError> {
        let tree = convert::to_tree(value)?;
        self.match_value(key, tree)
    }

    /// Finalizes the pass: transforms, redacts, compares every key.
    pub fn assert_all(&mut self) -> Result<Vec<SnapshotMatchResult>, SnapshotError> {
        self.assert_with(true, &[])
    }

    /// Finalizes the pass with verification toggles.
    ///
    /// `verify_test_case == false` without skip paths disables verification
    /// for this pass entirely; with skip paths, the named locations are
    /// redacted from both sides before comparison.
    pub fn assert_with(
        &mut self,
        verify_test_case: bool,
        skip_paths: &[&str],
    ) -> Result<Vec<SnapshotMatchResult>, SnapshotError> {
        let mut results = Vec::new();

        if !self.verify {
            warn!("snapshot verification disabled");
            return Ok(results);
        }
        if !verify_test_case && skip_paths.is_empty() {
            self.verify = false;
            warn!("snapshot verification disabled for this test case");
        }
        if !skip_paths.is_empty() {
            warn!("snapshot verification disabled for paths: {:?}", skip_paths);
        }
        let skip_paths: Vec<String> = skip_paths.iter().map(|p| p.to_string()).collect();

        if self.update {
            self.observed_state = self.transform_observed(&skip_paths)?;
            self.finalized = true;
            if let Err(err) = self.store.persist(&self.scope_key, &self.observed_state) {
                error!(
                    "could not persist snapshot scope '{}': {}",
                    self.scope_key, err
                );
            }
            return Ok(results);
        }

        if self.observed_state.is_empty() {
            // No value was ever registered, so this isn't a real snapshot
            // assertion (e.g. a shared fixture that this test never used).
            return Ok(results);
        }

        if self.recorded_state.is_empty() {
            return Err(SnapshotError::MissingRecordedState(self.scope_key.clone()));
        }

        let mut recorded_all = Value::Object(std::mem::take(&mut self.recorded_state));
        redact::remove_skip_paths(&mut recorded_all, &skip_paths);
        self.recorded_state = into_object(recorded_all);

        self.observed_state = self.transform_observed(&skip_paths)?;
        self.finalized = true;

        // Every observed key must still be recorded before any value-level
        // comparison happens.
        for key in self.observed_state.keys() {
            if !self.recorded_state.contains_key(key) {
                return Err(SnapshotError::MissingRecordedKey {
                    key: key.clone(),
                    scope: self.scope_key.clone(),
                });
            }
        }

        for (key, observed) in &self.observed_state {
            let recorded = &self.recorded_state[key];
            results.push(SnapshotMatchResult {
                key: key.clone(),
                recorded: recorded.clone(),
                observed: observed.clone(),
                diff: report::diff(recorded, observed),
            });
        }

        if self.verify && results.iter().any(|result| !result.is_match()) {
            return Err(SnapshotError::ComparisonFailed { results });
        }
        Ok(results)
    }

    /// Runs the full normalization over the observed state: implicit JSON
    /// parsing, the transformer pipeline, skip-path redaction, then the
    /// deferred substitutions over each key's serialized value.
    fn transform_observed(
        &mut self,
        skip_paths: &[String],
    ) -> Result<Map<String, Value>, SnapshotError> {
        let mut all = Value::Object(std::mem::take(&mut self.observed_state));
        parse_embedded_json(&mut all);

        if self.raw {
            if let Value::Object(raw_state) = &all {
                if let Err(err) = self.raw_store.persist(&self.scope_key, raw_state) {
                    error!(
                        "could not persist raw snapshot scope '{}': {}",
                        self.scope_key, err
                    );
                }
            }
        }

        let mut ctx = TransformContext::new();
        let mut tree = transform::run_pipeline(&self.transformers, all, &mut ctx)?;

        if !self.update {
            redact::remove_skip_paths(&mut tree, skip_paths);
        }

        // Substitutions run per key so the assertion keys themselves are
        // never rewritten.
        let mut replaced = Map::new();
        for (key, value) in into_object(tree) {
            let text = ctx.apply_substitutions(encoding::to_comparable_string(&value));
            match serde_json::from_str(&text) {
                Ok(reparsed) => {
                    replaced.insert(key, reparsed);
                }
                Err(err) => {
                    error!(
                        "substituted snapshot text for key '{}' is no longer valid JSON: {}",
                        key, err
                    );
                    return Err(SnapshotError::UnparsableSubstitutionOutput(key));
                }
            }
        }
        Ok(replaced)
    }

    /// Registers a regex substitution over the serialized snapshot text.
    pub fn register_replacement(&mut self, pattern: Regex, replacement: &str) {
        self.add_transformer(RegexTransformer::new(pattern, replacement));
    }

    /// Replaces the value of every key matching `pattern` (match anchored
    /// at the start of the key).
    pub fn skip_key(&mut self, pattern: Regex, replacement: &str) {
        self.add_transformer(KeyValueTransformer::new(
            Box::new(move |k, v| matches_at_start(&pattern, k).then(|| v.clone())),
            replacement,
            false,
        ));
    }

    /// Replaces every string value matching `pattern` (match anchored at
    /// the start of the value).
    pub fn replace_value(&mut self, pattern: Regex, replacement: &str) {
        self.add_transformer(KeyValueTransformer::new(
            Box::new(move |_, v| {
                v.as_str()
                    .is_some_and(|s| matches_at_start(&pattern, s))
                    .then(|| v.clone())
            }),
            replacement,
            false,
        ));
    }
}

fn matches_at_start(pattern: &Regex, text: &str) -> bool {
    pattern.find(text).is_some_and(|m| m.start() == 0)
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Resolves string values that hold embedded JSON objects into real trees,
/// recursively. Only object payloads are parsed here; arrays and nested
/// JSON strings are the explicit JSON-string transformer's business.
/// Parse failures leave the string as it was.
fn parse_embedded_json(value: &mut Value) {
    if let Value::Object(map) = value {
        for child in map.values_mut() {
            match child {
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        if item.is_object() {
                            parse_embedded_json(item);
                        }
                    }
                }
                Value::Object(_) => parse_embedded_json(child),
                Value::String(text) if text.starts_with('{') => {
                    if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                        *child = parsed;
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> SnapshotSession {
        SnapshotSession::new(
            "",
            "A",
            SessionOptions {
                verify: true,
                ..Default::default()
            },
        )
    }

    fn seeded(recorded: Value) -> SnapshotSession {
        let mut sm = session();
        sm.set_recorded_state(into_object(recorded));
        sm
    }

    #[test]
    fn unchanged_value_passes() {
        let mut sm = seeded(json!({"key_a": {"a": 3}}));
        sm.match_value("key_a", json!({"a": 3})).unwrap();
        let results = sm.assert_all().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_match());
    }

    #[test]
    fn changed_value_fails_with_every_diff_collected() {
        let mut sm = seeded(json!({"key_a": {"a": 3}, "key_b": {"b": 1}}));
        sm.match_value("key_a", json!({"a": 5})).unwrap();
        sm.match_value("key_b", json!({"b": 2})).unwrap();

        let err = sm.assert_all().unwrap_err();
        let SnapshotError::ComparisonFailed { results } = &err else {
            panic!("expected comparison failure, got {}", err);
        };
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_match()));
        assert!(err.to_string().contains("snapshot comparison failed"));
    }

    #[test]
    fn reusing_a_key_is_a_usage_error_naming_the_key() {
        let mut sm = seeded(json!({"key_a": {"a": 3}}));
        sm.match_value("key_a", json!({"a": 3})).unwrap();
        let err = sm.match_value("key_a", json!({"a": 3})).unwrap_err();
        assert!(matches!(&err, SnapshotError::KeyReused(key) if key == "key_a"));
        assert!(err.to_string().contains("key_a"));
    }

    #[test]
    fn missing_recorded_scope_is_a_usage_error() {
        let mut sm = session();
        let err = sm.match_value("key_a", json!({"a": 3})).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingRecordedState(_)));
    }

    #[test]
    fn observed_key_absent_from_recorded_state_is_a_usage_error() {
        let mut sm = seeded(json!({"other": {}}));
        let err = sm.match_value("key_a", json!({"a": 3})).unwrap_err();
        assert!(
            matches!(&err, SnapshotError::MissingRecordedKey { key, .. } if key == "key_a")
        );
    }

    #[test]
    fn zero_match_calls_is_inapplicable_not_a_pass() {
        let mut sm = session();
        assert!(sm.assert_all().unwrap().is_empty());
    }

    #[test]
    fn match_after_finalization_is_rejected() {
        let mut sm = seeded(json!({"key_a": {"a": 3}}));
        sm.match_value("key_a", json!({"a": 3})).unwrap();
        sm.assert_all().unwrap();
        let err = sm.match_value("key_b", json!({})).unwrap_err();
        assert!(matches!(err, SnapshotError::SessionFinalized(_)));
    }

    #[test]
    fn reference_replacement_matches_recorded_tokens() {
        let mut sm = seeded(json!({"key_a": {"aaa": "<A:1>", "bbb": "<A:1> hello"}}));
        sm.add_transformer(KeyValueTransformer::new(
            Box::new(|k, v| (k == "aaa").then(|| v.clone())),
            "A",
            true,
        ));
        sm.match_value("key_a", json!({"aaa": "something", "bbb": "something hello"}))
            .unwrap();
        sm.assert_all().unwrap();
    }

    #[test]
    fn literal_key_value_replacement_applies_to_substring() {
        let mut sm = seeded(json!({
            "key_a": {"aaa": "hellA", "aab": "this is a test", "b": {"aaa": "another teA"}}
        }));
        sm.add_transformer(KeyValueTransformer::new(
            Box::new(|k, v| {
                if k != "aaa" {
                    return None;
                }
                let s = v.as_str()?;
                Some(Value::String(s[s.len() - 2..].to_string()))
            }),
            "A",
            false,
        ));
        sm.match_value(
            "key_a",
            json!({"aaa": "helloo", "aab": "this is a test", "b": {"aaa": "another test"}}),
        )
        .unwrap();
        sm.assert_all().unwrap();
    }

    #[test]
    fn skip_paths_redact_both_sides() {
        let mut sm = seeded(json!({
            "key_a": {"aaa": "hello", "aab": "this is a test", "b": {"a.aa": "another test"}}
        }));
        sm.match_value(
            "key_a",
            json!({"aaa": "hello", "aab": "this is a test-fail", "b": {"a.aa": "another test-fail"}}),
        )
        .unwrap();

        // Fails without skipping.
        assert!(matches!(
            sm.assert_all().unwrap_err(),
            SnapshotError::ComparisonFailed { .. }
        ));

        // Fails when the dotted key is not quoted: the path reads b -> a -> aa.
        assert!(matches!(
            sm.assert_with(true, &["$..aab", "$..b.a.aa"]).unwrap_err(),
            SnapshotError::ComparisonFailed { .. }
        ));

        sm.assert_with(true, &["$..aab", "$..b.'a.aa'"]).unwrap();
    }

    #[test]
    fn list_skip_paths_keep_indices_stable_across_both_sides() {
        let mut sm = seeded(json!({"aaa": {"aaa": ["item1", "item2", "item3"]}}));
        sm.match_value("aaa", json!({"aaa": ["item1", "different-value"]}))
            .unwrap();
        sm.assert_with(true, &["$..aaa[1]", "$..aaa[2]"]).unwrap();
    }

    #[test]
    fn verification_disabled_returns_no_results() {
        let mut sm = SnapshotSession::new("", "A", SessionOptions::default());
        sm.set_recorded_state(into_object(json!({"key_a": {"a": 1}})));
        sm.match_value("key_a", json!({"a": 999})).unwrap();
        assert!(sm.assert_all().unwrap().is_empty());
    }

    #[test]
    fn verify_test_case_false_suppresses_the_failure_but_keeps_results() {
        let mut sm = seeded(json!({"key_a": {"a": 1}}));
        sm.match_value("key_a", json!({"a": 999})).unwrap();
        let results = sm.assert_with(false, &[]).unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_match());
    }

    #[test]
    fn non_homogeneous_lists_compare_structurally() {
        let mut sm = seeded(json!({"key1": [{"key2": "value1"}, "value2", 3]}));
        sm.match_value("key1", json!([{"key2": "value1"}, "value2", 3]))
            .unwrap();
        sm.assert_all().unwrap();
    }

    #[test]
    fn embedded_json_objects_are_parsed_implicitly() {
        let mut sm = seeded(json!({"key_a": {"payload": {"a": "b"}}}));
        sm.match_value("key_a", json!({"payload": "{\"a\": \"b\"}"}))
            .unwrap();
        sm.assert_all().unwrap();
    }

    #[test]
    fn serializable_values_are_converted_through_serde() {
        use serde_derive::Serialize;

        #[derive(Serialize)]
        struct CustomObject {
            name: String,
            _internal: &'static str,
        }

        let mut sm = seeded(json!({"key_a": {"name": "myname"}}));
        sm.match_serializable(
            "key_a",
            &CustomObject {
                name: "myname".to_string(),
                _internal: "n/a",
            },
        )
        .unwrap();
        sm.assert_all().unwrap();
    }

    #[test]
    fn skip_key_replaces_matching_keys_literally() {
        let mut sm = seeded(json!({"key_a": {"RequestId": "<request-id>", "Name": "n"}}));
        sm.skip_key(Regex::new("RequestId").unwrap(), "<request-id>");
        sm.match_value("key_a", json!({"RequestId": "aa-bb-cc", "Name": "n"}))
            .unwrap();
        sm.assert_all().unwrap();
    }

    #[test]
    fn replace_value_replaces_matching_values_literally() {
        let mut sm = seeded(json!({"key_a": {"arn": "<arn>"}}));
        sm.replace_value(Regex::new("arn:").unwrap(), "<arn>");
        sm.match_value("key_a", json!({"arn": "arn:some:resource"}))
            .unwrap();
        sm.assert_all().unwrap();
    }
}
