//! Normalization pipeline for observed snapshot trees.
//!
//! A [`Transformer`] rewrites the non-deterministic parts of an observed
//! value tree into a comparison-stable form. A transformer either mutates
//! the tree directly or leaves it untouched and registers a deferred
//! [`Substitution`] on the [`TransformContext`]; deferred substitutions run
//! against the serialized text of the tree once all transformers have
//! finished. The text-level pass is what makes reference replacement catch
//! every occurrence of a value, including occurrences embedded inside
//! larger strings.

use std::collections::{HashMap, HashSet};

use log::{debug, error};
use regex::Regex;
use serde_json::Value;

pub mod kinds;
pub mod timestamp;
pub mod utility;

pub use kinds::{
    GenericTransformer, JsonStringTransformer, KeyValueTransformer, PathTransformer,
    RegexTransformer, ResponseMetadataTransformer, SortingTransformer, TextTransformer,
};
pub use timestamp::TimestampTransformer;

use crate::path::PathError;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(
        "reference value `{value}` is not a string; reference replacements are only \
         supported for strings, use a literal replacement for `{replacement}` instead"
    )]
    NonStringReference { value: String, replacement: String },

    #[error("sorting transformer expects a list at key '{0}'")]
    SortTargetNotAList(String),

    #[error(transparent)]
    Path(#[from] PathError),
}

/// A unit of normalization over the observed value tree.
///
/// Transformers take the tree by value and hand it back; none of them may
/// retain a reference across calls. State that has to outlive a single
/// `transform` call belongs on the [`TransformContext`].
pub trait Transformer {
    fn transform(&self, tree: Value, ctx: &mut TransformContext)
    -> Result<Value, TransformError>;
}

/// A deferred text-level rewrite, replayed after the tree is serialized.
#[derive(Debug, Clone)]
pub enum Substitution {
    /// Replace every occurrence of a literal needle.
    Literal { needle: String, replacement: String },
    /// Replace every match of a regex pattern.
    Pattern { regex: Regex, replacement: String },
}

impl Substitution {
    pub fn apply(&self, text: &str) -> String {
        match self {
            Substitution::Literal {
                needle,
                replacement,
            } => {
                if text.contains(needle.as_str()) {
                    debug!("replacing '{}' in snapshot with '{}'", needle, replacement);
                } else {
                    debug!("no occurrence of '{}' in snapshot", needle);
                }
                text.replace(needle.as_str(), replacement)
            }
            Substitution::Pattern { regex, replacement } => {
                let result = regex.replace_all(text, replacement.as_str());
                if result != text {
                    debug!(
                        "replacing regex '{}' in snapshot with '{}'",
                        regex, replacement
                    );
                } else {
                    debug!("no match for regex '{}' in snapshot", regex);
                }
                result.into_owned()
            }
        }
    }
}

/// Mutable state shared by all transformers within one assertion pass.
///
/// A context is created by the session right before the pipeline runs and
/// discarded once the serialized substitutions have been applied. It is
/// never reused across passes, so replacement token numbering restarts at 1
/// for every pass.
#[derive(Debug, Default)]
pub struct TransformContext {
    scoped_tokens: HashMap<String, usize>,
    replacements: Vec<Substitution>,
    seen_references: HashSet<String>,
}

impl TransformContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next enumeration value for a replacement name.
    ///
    /// Counters are independent per name and start at 1; within one context
    /// lifetime the returned values for a given name are strictly
    /// increasing.
    pub fn next_token(&mut self, name: &str) -> usize {
        let counter = self.scoped_tokens.entry(name.to_string()).or_insert(1);
        let current = *counter;
        *counter += 1;
        current
    }

    pub fn register_substitution(&mut self, substitution: Substitution) {
        self.replacements.push(substitution);
    }

    pub fn substitutions(&self) -> &[Substitution] {
        &self.replacements
    }

    /// Replays every registered substitution against `text` in registration
    /// order. The order is part of the contract: overlapping needles resolve
    /// in favor of whichever substitution was registered first.
    pub fn apply_substitutions(&self, text: String) -> String {
        self.replacements
            .iter()
            .fold(text, |acc, substitution| substitution.apply(&acc))
    }
}

/// Registers a reference replacement for `raw` under the given name.
///
/// The first registration for a distinct raw string mints a `<name:N>`
/// token and appends a replace-all substitution for it. Registering the
/// same raw string again is a no-op: the substitution recorded for the
/// first occurrence already rewrites every occurrence in the serialized
/// text, so later tree positions holding the same value need no token of
/// their own.
pub fn register_reference_replacement(
    ctx: &mut TransformContext,
    raw: &Value,
    name: &str,
) -> Result<(), TransformError> {
    let Value::String(raw) = raw else {
        let err = TransformError::NonStringReference {
            value: raw.to_string(),
            replacement: name.to_string(),
        };
        error!("{}", err);
        return Err(err);
    };

    // Escape embedded quotes so the needle matches the JSON-encoded text.
    let needle = if raw.contains('"') {
        raw.replace('"', "\\\"")
    } else {
        raw.clone()
    };

    if ctx.seen_references.contains(&needle) {
        return Ok(());
    }

    let token = format!("<{}:{}>", name, ctx.next_token(name));
    ctx.seen_references.insert(needle.clone());
    debug!("registering reference replacement '{}' -> '{}'", needle, token);
    ctx.register_substitution(Substitution::Literal {
        needle,
        replacement: token,
    });
    Ok(())
}

/// Runs `transformers` over `tree` in ascending priority order.
///
/// The sort is stable: transformers registered at the same priority keep
/// their registration order.
pub fn run_pipeline(
    transformers: &[(Box<dyn Transformer>, i32)],
    mut tree: Value,
    ctx: &mut TransformContext,
) -> Result<Value, TransformError> {
    let mut order: Vec<usize> = (0..transformers.len()).collect();
    order.sort_by_key(|&i| transformers[i].1);

    for i in order {
        tree = transformers[i].0.transform(tree, ctx)?;
    }
    Ok(tree)
}
