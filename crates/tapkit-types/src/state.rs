//! Sync state and state backend model types.
//!
//! [`SyncState`] is the resumable position of every stream, emitted in STATE
//! messages and persisted between runs. The remaining types are used by
//! `StateBackend` implementations and kept here so the engine and state
//! crates can share them without circular dependencies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque tap identifier (the `tap` name of a tap definition).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TapId(String);

impl TapId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for TapId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Bookmarks
// ---------------------------------------------------------------------------

/// Persisted position of one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    /// Greatest committed replication-key value, in its JSON form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key_value: Option<serde_json::Value>,
    /// Table version of a full-table stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Whether the full-table extraction for `version` finished.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub complete: bool,
}

impl StreamState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replication_key_value.is_none() && self.version.is_none() && !self.complete
    }
}

/// Resumable position of every stream: `{"bookmarks": {stream: {...}}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub bookmarks: BTreeMap<String, StreamState>,
}

impl SyncState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamState> {
        self.bookmarks.get(name)
    }

    /// Mutable entry for `name`, created empty on first access.
    pub fn stream_mut(&mut self, name: &str) -> &mut StreamState {
        self.bookmarks.entry(name.to_string()).or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bookmarks.values().all(StreamState::is_empty)
    }
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Terminal status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate statistics for a finished sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub records_extracted: u64,
    pub records_emitted: u64,
    pub records_rejected: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Rejected records
// ---------------------------------------------------------------------------

/// Record skipped for a data-integrity violation, kept for dead-lettering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub stream: String,
    /// JSON-serialized raw record.
    pub record_json: String,
    pub error_message: String,
    pub error_category: ErrorCategory,
    /// ISO-8601 UTC timestamp.
    pub rejected_at: String,
}
