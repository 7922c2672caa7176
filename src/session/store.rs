//! Snapshot file persistence.
//!
//! One JSON file holds every scope of a test module. Each scope maps to an
//! entry carrying the recording date and the recorded content. Writes are
//! read-modify-write over the whole file: the current scope's entry is
//! merged in and every other scope is preserved untouched.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;
use serde_json::{Map, Value};

use crate::encoding;

const RECORDED_DATE_KEY: &str = "recorded-date";
const RECORDED_CONTENT_KEY: &str = "recorded-content";
const RECORDED_DATE_FORMAT: &str = "%d-%m-%Y, %H:%M:%S";

pub struct SnapshotStore {
    file_path: PathBuf,
}

impl SnapshotStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Loads the recorded content for a scope. A missing file or scope is
    /// an empty recorded state, not an error; whether that is acceptable
    /// is decided by the session.
    pub fn load(&self, scope_key: &str) -> anyhow::Result<Map<String, Value>> {
        if !self.file_path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.file_path)?;
        if content.is_empty() {
            return Ok(Map::new());
        }
        let full: Value = serde_json::from_str(&content)?;
        match full.get(scope_key).and_then(|scope| scope.get(RECORDED_CONTENT_KEY)) {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Ok(Map::new()),
        }
    }

    /// Replaces the scope's entry and rewrites the file, stamping the
    /// current date.
    pub fn persist(&self, scope_key: &str, content: &Map<String, Value>) -> anyhow::Result<()> {
        let mut full: Map<String, Value> = match fs::read_to_string(&self.file_path) {
            Ok(text) if !text.trim().is_empty() => serde_json::from_str(&text)?,
            _ => Map::new(),
        };

        let mut entry = Map::new();
        entry.insert(
            RECORDED_DATE_KEY.to_string(),
            Value::String(Utc::now().format(RECORDED_DATE_FORMAT).to_string()),
        );
        entry.insert(
            RECORDED_CONTENT_KEY.to_string(),
            Value::Object(content.clone()),
        );
        full.insert(scope_key.to_string(), Value::Object(entry));

        // Trailing newline keeps the file stable under end-of-file fixers.
        let rendered = format!("{}\n", encoding::to_pretty_string(&Value::Object(full)));
        fs::write(&self.file_path, rendered)?;
        debug!(
            "persisted snapshot scope '{}' to '{}'",
            scope_key,
            self.file_path.display()
        );
        Ok(())
    }
}
