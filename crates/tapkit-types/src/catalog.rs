//! Stream catalog types.
//!
//! A [`Catalog`] is the set of [`Stream`]s a tap syncs in one run. Each
//! stream carries its JSON schema, key properties, replication strategy and
//! selection state. The catalog is immutable for the duration of a sync.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::TapError;
use crate::schema::{JsonType, StreamSchema};

/// How a stream is replicated between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    /// Re-extract the whole dataset every run.
    #[default]
    #[serde(alias = "full_table")]
    FullTable,
    /// Extract records newer than the last bookmark.
    #[serde(alias = "incremental")]
    Incremental,
    /// Follow a change log; bookmarked like incremental streams.
    #[serde(alias = "log_based")]
    LogBased,
}

impl ReplicationMethod {
    /// Whether the stream keeps a replication-key bookmark.
    #[must_use]
    pub fn tracks_bookmark(self) -> bool {
        !matches!(self, Self::FullTable)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullTable => "FULL_TABLE",
            Self::Incremental => "INCREMENTAL",
            Self::LogBased => "LOG_BASED",
        }
    }
}

impl std::fmt::Display for ReplicationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering declared for a plain-string replication key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrdering {
    /// Order derived from the property type; plain strings are rejected.
    #[default]
    Natural,
    /// Plain strings compare byte-wise.
    Lexicographic,
}

fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_natural(ordering: &KeyOrdering) -> bool {
    *ordering == KeyOrdering::Natural
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_true(value: &bool) -> bool {
    *value
}

/// A stream declared in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Stream name, unique within a run.
    #[serde(rename = "stream", alias = "name")]
    pub name: String,
    pub schema: StreamSchema,
    #[serde(default)]
    pub key_properties: Vec<String>,
    #[serde(default)]
    pub replication_method: ReplicationMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    #[serde(default, skip_serializing_if = "is_natural")]
    pub replication_key_ordering: KeyOrdering,
    /// Source delivers records in ascending replication-key order.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub is_sorted: bool,
    #[serde(default = "default_true")]
    pub selected: bool,
    /// Property-level selection (`None` = every property).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_properties: Option<Vec<String>>,
}

impl Stream {
    /// Full-table, selected stream with no key properties.
    pub fn new(name: impl Into<String>, schema: StreamSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            key_properties: Vec::new(),
            replication_method: ReplicationMethod::FullTable,
            replication_key: None,
            replication_key_ordering: KeyOrdering::Natural,
            is_sorted: true,
            selected: true,
            selected_properties: None,
        }
    }

    #[must_use]
    pub fn with_key_properties<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_properties = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Switch to incremental replication on `replication_key`.
    #[must_use]
    pub fn incremental(mut self, replication_key: impl Into<String>) -> Self {
        self.replication_method = ReplicationMethod::Incremental;
        self.replication_key = Some(replication_key.into());
        self
    }

    /// Whether `property` survives property-level selection.
    ///
    /// Key properties and the replication key are always selected.
    #[must_use]
    pub fn is_property_selected(&self, property: &str) -> bool {
        match &self.selected_properties {
            None => true,
            Some(selected) => {
                selected.iter().any(|p| p == property)
                    || self.key_properties.iter().any(|k| k == property)
                    || self.replication_key.as_deref() == Some(property)
            }
        }
    }

    /// Properties a loader should treat as bookmark columns.
    #[must_use]
    pub fn bookmark_properties(&self) -> Vec<String> {
        if self.replication_method.tracks_bookmark() {
            self.replication_key.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.name.trim().is_empty() {
            errors.push("stream with empty name".to_string());
        }
        if !self.selected {
            return;
        }
        for key in &self.key_properties {
            if !self.schema.contains(key) {
                errors.push(format!(
                    "stream '{}': key property '{key}' is not in the schema",
                    self.name
                ));
            }
        }
        if let Some(selected) = &self.selected_properties {
            for property in selected {
                if !self.schema.contains(property) {
                    errors.push(format!(
                        "stream '{}': selected property '{property}' is not in the schema",
                        self.name
                    ));
                }
            }
        }
        if !self.replication_method.tracks_bookmark() {
            return;
        }
        match self.replication_key.as_deref().map(str::trim) {
            None | Some("") => errors.push(format!(
                "stream '{}': {} replication requires a replication_key",
                self.name, self.replication_method
            )),
            Some(key) => match self.schema.property(key) {
                None => errors.push(format!(
                    "stream '{}': replication_key '{key}' is not in the schema",
                    self.name
                )),
                Some(prop) => {
                    let is_plain_string = prop
                        .types
                        .as_ref()
                        .is_some_and(|t| t.non_null() == [JsonType::String])
                        && !prop.is_temporal();
                    if is_plain_string && self.replication_key_ordering == KeyOrdering::Natural {
                        errors.push(format!(
                            "stream '{}': string replication_key '{key}' needs a date-time format \
                             or replication_key_ordering: lexicographic",
                            self.name
                        ));
                    }
                }
            },
        }
    }
}

/// Collection of streams synced in one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<Stream>,
}

impl Catalog {
    #[must_use]
    pub fn new(streams: Vec<Stream>) -> Self {
        Self { streams }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.name == name)
    }

    /// Selected streams in catalog order.
    pub fn selected(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter(|s| s.selected)
    }

    /// Check catalog invariants, reporting every violation at once.
    ///
    /// # Errors
    ///
    /// Returns a config [`TapError`] listing duplicate stream names, key or
    /// selected properties missing from schemas, and bookmarked streams
    /// without a usable replication key.
    pub fn validate(&self) -> Result<(), TapError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for stream in &self.streams {
            if !seen.insert(stream.name.as_str()) {
                errors.push(format!("duplicate stream name '{}'", stream.name));
            }
            stream.collect_errors(&mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TapError::config(
                "INVALID_CATALOG",
                format!("catalog validation failed:\n  - {}", errors.join("\n  - ")),
            ))
        }
    }
}
