//! Path expressions over value trees.
//!
//! A small JSONPath-flavored language used to address locations inside an
//! observed tree: `$` for the root, `..name` for recursive descent, `.name`
//! for child access, `name[0]` and `name.0` for list indices, quoted
//! segments (`'a.aa'`) for keys containing path-special characters, and `*`
//! for all children of a node. Every match carries the full concrete path
//! from the root, so callers can re-resolve or mutate the exact location
//! later without guessing parents.

use serde_json::Value;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("invalid path expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
}

/// One concrete step from a node to a child: a mapping key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => write!(f, "{}", k),
            Segment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Selector {
    Key(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone)]
struct Step {
    selector: Selector,
    recursive: bool,
}

/// A parsed path expression.
#[derive(Debug, Clone)]
pub struct PathExpr {
    steps: Vec<Step>,
    raw: String,
}

/// A matched location: the value plus its full concrete path from the root.
#[derive(Debug)]
pub struct PathMatch<'a> {
    pub path: Vec<Segment>,
    pub value: &'a Value,
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl PathExpr {
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        let invalid = |reason: &str| PathError::Invalid {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = expr.strip_prefix('$').unwrap_or(expr);
        let mut steps = Vec::new();
        let mut recursive = false;

        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix("..") {
                rest = stripped;
                recursive = true;
                if rest.is_empty() {
                    return Err(invalid("trailing '..'"));
                }
                continue;
            }
            if let Some(stripped) = rest.strip_prefix('.') {
                rest = stripped;
                if rest.is_empty() {
                    return Err(invalid("trailing '.'"));
                }
                continue;
            }

            let selector = if let Some(stripped) = rest.strip_prefix('[') {
                let end = stripped
                    .find(']')
                    .ok_or_else(|| invalid("unterminated '['"))?;
                let inner = &stripped[..end];
                rest = &stripped[end + 1..];
                parse_bracket_selector(inner).ok_or_else(|| invalid("bad bracket selector"))?
            } else if rest.starts_with('\'') || rest.starts_with('"') {
                let quote = rest.as_bytes()[0] as char;
                let body = &rest[1..];
                let end = body
                    .find(quote)
                    .ok_or_else(|| invalid("unterminated quote"))?;
                let name = body[..end].to_string();
                rest = &body[end + 1..];
                Selector::Key(name)
            } else {
                let end = rest.find(['.', '[']).unwrap_or(rest.len());
                let token = &rest[..end];
                rest = &rest[end..];
                if token.is_empty() {
                    return Err(invalid("empty segment"));
                }
                bare_selector(token)
            };

            steps.push(Step {
                selector,
                recursive,
            });
            recursive = false;
        }

        Ok(PathExpr {
            steps,
            raw: expr.to_string(),
        })
    }

    /// Finds every location the expression matches, in document order.
    pub fn find<'a>(&self, root: &'a Value) -> Vec<PathMatch<'a>> {
        let mut current: Vec<(Vec<Segment>, &Value)> = vec![(Vec::new(), root)];

        for step in &self.steps {
            let mut next: Vec<(Vec<Segment>, &Value)> = Vec::new();
            for (path, node) in current {
                if step.recursive {
                    let mut candidates = Vec::new();
                    descend(&path, node, &mut candidates);
                    for (cpath, cnode) in candidates {
                        apply_selector(&step.selector, &cpath, cnode, &mut next);
                    }
                } else {
                    apply_selector(&step.selector, &path, node, &mut next);
                }
            }
            current = next;
        }

        // Recursive steps can reach the same concrete location through
        // several descent routes; report each location once.
        let mut seen = std::collections::HashSet::new();
        current
            .into_iter()
            .filter(|(path, _)| seen.insert(path.clone()))
            .map(|(path, value)| PathMatch { path, value })
            .collect()
    }

    /// Overwrites every matched location with `replacement`, returning the
    /// number of locations updated.
    pub fn update(&self, root: &mut Value, replacement: &Value) -> usize {
        let paths: Vec<Vec<Segment>> = self.find(root).into_iter().map(|m| m.path).collect();
        let mut updated = 0;
        for path in &paths {
            if let Some(slot) = resolve_mut(root, path) {
                *slot = replacement.clone();
                updated += 1;
            }
        }
        updated
    }
}

fn parse_bracket_selector(inner: &str) -> Option<Selector> {
    let inner = inner.trim();
    if inner == "*" {
        return Some(Selector::Wildcard);
    }
    if (inner.starts_with('\'') && inner.ends_with('\'') && inner.len() >= 2)
        || (inner.starts_with('"') && inner.ends_with('"') && inner.len() >= 2)
    {
        return Some(Selector::Key(inner[1..inner.len() - 1].to_string()));
    }
    inner.parse::<usize>().ok().map(Selector::Index)
}

fn bare_selector(token: &str) -> Selector {
    if token == "*" {
        Selector::Wildcard
    } else if let Ok(index) = token.parse::<usize>() {
        Selector::Index(index)
    } else {
        Selector::Key(token.to_string())
    }
}

/// Pre-order enumeration of `node` and all of its descendants.
fn descend<'a>(path: &[Segment], node: &'a Value, out: &mut Vec<(Vec<Segment>, &'a Value)>) {
    out.push((path.to_vec(), node));
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                let mut child_path = path.to_vec();
                child_path.push(Segment::Key(key.clone()));
                descend(&child_path, child, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let mut child_path = path.to_vec();
                child_path.push(Segment::Index(index));
                descend(&child_path, child, out);
            }
        }
        _ => {}
    }
}

fn apply_selector<'a>(
    selector: &Selector,
    path: &[Segment],
    node: &'a Value,
    out: &mut Vec<(Vec<Segment>, &'a Value)>,
) {
    let mut push = |segment: Segment, value: &'a Value| {
        let mut child_path = path.to_vec();
        child_path.push(segment);
        out.push((child_path, value));
    };

    match (selector, node) {
        (Selector::Key(key), Value::Object(map)) => {
            if let Some(value) = map.get(key) {
                push(Segment::Key(key.clone()), value);
            }
        }
        (Selector::Index(index), Value::Array(items)) => {
            if let Some(value) = items.get(*index) {
                push(Segment::Index(*index), value);
            }
        }
        // A numeric segment can also name a mapping key spelled with the
        // same digits.
        (Selector::Index(index), Value::Object(map)) => {
            let key = index.to_string();
            if let Some(value) = map.get(&key) {
                push(Segment::Key(key), value);
            }
        }
        (Selector::Wildcard, Value::Object(map)) => {
            for (key, value) in map {
                push(Segment::Key(key.clone()), value);
            }
        }
        (Selector::Wildcard, Value::Array(items)) => {
            for (index, value) in items.iter().enumerate() {
                push(Segment::Index(index), value);
            }
        }
        _ => {}
    }
}

/// Follows a concrete path from the root.
pub fn resolve<'a>(root: &'a Value, path: &[Segment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Follows a concrete path from the root, mutably.
pub fn resolve_mut<'a>(root: &'a mut Value, path: &[Segment]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
            (Segment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(current)
}
