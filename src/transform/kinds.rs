//! Transformer implementations.
//!
//! Each kind covers one class of non-determinism: key/value predicates and
//! path predicates for values whose location is known, regex and literal
//! text for values whose location is not, JSON-string unfolding for
//! stringified payloads, list sorting for order-unstable sequences, and
//! response-metadata simplification for transport noise.

use log::{debug, warn};
use regex::Regex;
use serde_json::{Map, Value};

use crate::encoding::{self, RESPONSE_METADATA_KEY};
use crate::path::PathExpr;
use crate::transform::{
    register_reference_replacement, Substitution, TransformContext, TransformError, Transformer,
};

/// Matcher for [`KeyValueTransformer`]: returns the raw portion to replace,
/// or `None` when the pair does not match.
pub type MatchFn = Box<dyn Fn(&str, &Value) -> Option<Value>>;

/// Computes the replacement (or replacement name, in reference mode) for a
/// matched `(key, value)` pair.
pub type ReplacementFn = Box<dyn Fn(&str, &Value) -> String>;

/// Replaces values matched by a `(key, value)` predicate anywhere in the
/// tree.
///
/// In reference mode the matched raw value is registered on the context and
/// rewritten everywhere after serialization; in literal mode only the
/// matched location changes, and a string value is rewritten by substring
/// so matchers may target a fragment of it.
pub struct KeyValueTransformer {
    match_fn: MatchFn,
    replacement_fn: ReplacementFn,
    reference_replacement: bool,
}

impl KeyValueTransformer {
    pub fn new(match_fn: MatchFn, replacement: &str, reference_replacement: bool) -> Self {
        let replacement = replacement.to_string();
        Self {
            match_fn,
            replacement_fn: Box::new(move |_, _| replacement.clone()),
            reference_replacement,
        }
    }

    pub fn with_replacement_fn(
        match_fn: MatchFn,
        replacement_fn: ReplacementFn,
        reference_replacement: bool,
    ) -> Self {
        Self {
            match_fn,
            replacement_fn,
            reference_replacement,
        }
    }

    fn transform_object(
        &self,
        map: &mut Map<String, Value>,
        ctx: &mut TransformContext,
    ) -> Result<(), TransformError> {
        for (key, value) in map.iter_mut() {
            if let Some(matched) = (self.match_fn)(key, value) {
                let replacement = (self.replacement_fn)(key, value);
                if self.reference_replacement {
                    register_reference_replacement(ctx, &matched, &replacement)?;
                } else if let (Value::String(current), Value::String(matched_text)) =
                    (&*value, &matched)
                {
                    debug!(
                        "replacing '{}' within value at key '{}' with '{}'",
                        matched_text, key, replacement
                    );
                    *value = Value::String(current.replace(matched_text, &replacement));
                } else {
                    debug!("replacing value at key '{}' with '{}'", key, replacement);
                    *value = Value::String(replacement);
                }
            } else if let Value::Array(items) = value {
                for item in items.iter_mut() {
                    if let Value::Object(inner) = item {
                        self.transform_object(inner, ctx)?;
                    }
                }
            } else if let Value::Object(inner) = value {
                self.transform_object(inner, ctx)?;
            }
        }
        Ok(())
    }
}

impl Transformer for KeyValueTransformer {
    fn transform(
        &self,
        mut tree: Value,
        ctx: &mut TransformContext,
    ) -> Result<Value, TransformError> {
        if let Value::Object(map) = &mut tree {
            self.transform_object(map, ctx)?;
        }
        Ok(tree)
    }
}

/// Replaces values addressed by a path expression.
pub struct PathTransformer {
    expression: String,
    replacement: String,
    reference_replacement: bool,
}

impl PathTransformer {
    pub fn new(expression: &str, replacement: &str, reference_replacement: bool) -> Self {
        Self {
            expression: expression.to_string(),
            replacement: replacement.to_string(),
            reference_replacement,
        }
    }
}

impl Transformer for PathTransformer {
    fn transform(
        &self,
        mut tree: Value,
        ctx: &mut TransformContext,
    ) -> Result<Value, TransformError> {
        let expr = PathExpr::parse(&self.expression)?;

        if self.reference_replacement {
            let matches = expr.find(&tree);
            if matches.is_empty() {
                debug!("no match for path '{}'", expr);
            }
            for m in &matches {
                register_reference_replacement(ctx, m.value, &self.replacement)?;
            }
        } else {
            let updated = expr.update(&mut tree, &Value::String(self.replacement.clone()));
            if updated > 0 {
                debug!(
                    "replacing {} match(es) of path '{}' with '{}'",
                    updated, expr, self.replacement
                );
            } else {
                debug!("no match for path '{}'", expr);
            }
        }
        Ok(tree)
    }
}

/// Registers a regex substitution over the serialized snapshot text.
pub struct RegexTransformer {
    regex: Regex,
    replacement: String,
}

impl RegexTransformer {
    pub fn new(regex: Regex, replacement: &str) -> Self {
        Self {
            regex,
            replacement: replacement.to_string(),
        }
    }
}

impl Transformer for RegexTransformer {
    fn transform(
        &self,
        tree: Value,
        ctx: &mut TransformContext,
    ) -> Result<Value, TransformError> {
        debug!(
            "registering regex pattern '{}' with replacement '{}'",
            self.regex, self.replacement
        );
        ctx.register_substitution(Substitution::Pattern {
            regex: self.regex.clone(),
            replacement: self.replacement.clone(),
        });
        Ok(tree)
    }
}

/// Registers a literal text substitution over the serialized snapshot text.
///
/// Useful when the text contains characters that would need escaping in a
/// regex, like `+` or `(`.
pub struct TextTransformer {
    text: String,
    replacement: String,
}

impl TextTransformer {
    pub fn new(text: &str, replacement: &str) -> Self {
        Self {
            text: text.to_string(),
            replacement: replacement.to_string(),
        }
    }
}

impl Transformer for TextTransformer {
    fn transform(
        &self,
        tree: Value,
        ctx: &mut TransformContext,
    ) -> Result<Value, TransformError> {
        debug!(
            "registering text pattern '{}' with replacement '{}'",
            self.text, self.replacement
        );
        ctx.register_substitution(Substitution::Literal {
            needle: self.text.clone(),
            replacement: self.replacement.clone(),
        });
        Ok(tree)
    }
}

/// Parses the JSON string found at a configured key, then keeps parsing any
/// nested string values that look like JSON themselves.
///
/// Malformed JSON is left exactly as it was; unfolding is best-effort and
/// never an error.
pub struct JsonStringTransformer {
    key: String,
}

impl JsonStringTransformer {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }

    fn transform_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if key == &self.key {
                        self.unfold_at_key(key, child);
                    } else {
                        self.transform_value(child);
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.transform_value(item);
                }
            }
            _ => {}
        }
    }

    fn unfold_at_key(&self, key: &str, child: &mut Value) {
        if let Value::String(text) = &*child {
            if looks_like_json(text) {
                match serde_json::from_str::<Value>(text) {
                    Ok(mut parsed) => {
                        debug!("replacing string value of '{}' with parsed JSON", key);
                        unfold_nested(&mut parsed);
                        *child = parsed;
                    }
                    Err(err) => {
                        warn!(
                            "value at key '{}' is not valid JSON and won't be unfolded: {}",
                            key, err
                        );
                    }
                }
                return;
            }
        }
        self.transform_value(child);
    }
}

impl Transformer for JsonStringTransformer {
    fn transform(
        &self,
        mut tree: Value,
        _ctx: &mut TransformContext,
    ) -> Result<Value, TransformError> {
        self.transform_value(&mut tree);
        Ok(tree)
    }
}

fn looks_like_json(text: &str) -> bool {
    matches!(text.trim_start().chars().next(), Some('{' | '['))
}

/// Best-effort unfolding of every string in an already-parsed payload.
///
/// Unlike the keyed entry point this visits all strings, since inside an
/// unfolded payload there is no configured key to be explicit about.
fn unfold_nested(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                unfold_nested(child);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                unfold_nested(item);
            }
        }
        Value::String(text) if looks_like_json(text) => {
            match serde_json::from_str::<Value>(text) {
                Ok(mut parsed) => {
                    unfold_nested(&mut parsed);
                    *value = parsed;
                }
                Err(err) => {
                    debug!("nested value is not valid JSON and won't be unfolded: {}", err);
                }
            }
        }
        _ => {}
    }
}

/// Key function used to order the elements of a sorted list.
pub type SortKeyFn = Box<dyn Fn(&Value) -> String>;

/// Sorts the list found at a configured key, recursing into every other
/// branch on the way.
///
/// Finding anything other than a list at the key is a usage error.
pub struct SortingTransformer {
    key: String,
    sort_key: Option<SortKeyFn>,
}

impl SortingTransformer {
    pub fn new(key: &str, sort_key: Option<SortKeyFn>) -> Self {
        Self {
            key: key.to_string(),
            sort_key,
        }
    }

    fn transform_value(&self, value: &mut Value) -> Result<(), TransformError> {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if key == &self.key {
                        let Value::Array(items) = child else {
                            return Err(TransformError::SortTargetNotAList(key.clone()));
                        };
                        for item in items.iter_mut() {
                            self.transform_value(item)?;
                        }
                        items.sort_by_cached_key(|item| match &self.sort_key {
                            Some(sort_key) => sort_key(item),
                            None => encoding::to_comparable_string(item),
                        });
                    } else {
                        self.transform_value(child)?;
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.transform_value(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Transformer for SortingTransformer {
    fn transform(
        &self,
        mut tree: Value,
        _ctx: &mut TransformContext,
    ) -> Result<Value, TransformError> {
        self.transform_value(&mut tree)?;
        Ok(tree)
    }
}

const COLLECTED_HEADERS: &[&str] = &["content_type"];

/// Strips response metadata down to the status code and an allow-list of
/// headers, at every nesting depth.
pub struct ResponseMetadataTransformer;

impl ResponseMetadataTransformer {
    fn transform_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if key == RESPONSE_METADATA_KEY {
                        *child = simplify_metadata(child);
                    } else {
                        self.transform_value(child);
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.transform_value(item);
                }
            }
            _ => {}
        }
    }
}

impl Transformer for ResponseMetadataTransformer {
    fn transform(
        &self,
        mut tree: Value,
        _ctx: &mut TransformContext,
    ) -> Result<Value, TransformError> {
        self.transform_value(&mut tree);
        Ok(tree)
    }
}

fn simplify_metadata(metadata: &Value) -> Value {
    let mut headers = Map::new();
    if let Some(Value::Object(all_headers)) = metadata.get("HTTPHeaders") {
        for name in COLLECTED_HEADERS {
            if let Some(value) = all_headers.get(*name) {
                if !value.is_null() {
                    headers.insert((*name).to_string(), value.clone());
                }
            }
        }
    }

    let mut simplified = Map::new();
    simplified.insert("HTTPHeaders".to_string(), Value::Object(headers));
    if let Some(status) = metadata.get("HTTPStatusCode") {
        if !status.is_null() {
            simplified.insert("HTTPStatusCode".to_string(), status.clone());
        }
    }
    Value::Object(simplified)
}

/// Closure-backed transformer for one-off tree rewrites.
pub type GenericFn = Box<dyn Fn(Value, &mut TransformContext) -> Result<Value, TransformError>>;

pub struct GenericTransformer {
    transform_fn: GenericFn,
}

impl GenericTransformer {
    pub fn new(transform_fn: GenericFn) -> Self {
        Self { transform_fn }
    }
}

impl Transformer for GenericTransformer {
    fn transform(
        &self,
        tree: Value,
        ctx: &mut TransformContext,
    ) -> Result<Value, TransformError> {
        (self.transform_fn)(tree, ctx)
    }
}
