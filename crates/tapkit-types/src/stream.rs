//! Run-wide sync policies and limits.
//!
//! These are plain values read from the tap definition and handed to the
//! engine. They never change during a run.

use serde::{Deserialize, Serialize};

// ── Policies ────────────────────────────────────────────────────────

/// What to do with record properties the schema does not declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPropertyPolicy {
    /// Remove the property from the emitted record.
    #[default]
    Drop,
    /// Keep the property, warn once per property and count it.
    Report,
}

/// What the run does after a stream fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFailurePolicy {
    /// Stop the run; remaining streams stay pending.
    #[default]
    Abort,
    /// Move on to the next stream.
    Continue,
}

/// Combined record and stream failure policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicies {
    #[serde(default)]
    pub unknown_properties: UnknownPropertyPolicy,
    #[serde(default)]
    pub on_stream_failure: StreamFailurePolicy,
}

// ── Limits ──────────────────────────────────────────────────────────

/// Checkpoint cadence and pagination ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLimits {
    /// Emit STATE after this many accepted records (0 = only on completion).
    pub checkpoint_interval_records: u64,
    /// Stop paginating a stream after this many pages.
    pub max_pages: u64,
}

impl SyncLimits {
    pub const DEFAULT_CHECKPOINT_INTERVAL_RECORDS: u64 = 1000;
    pub const DEFAULT_MAX_PAGES: u64 = 10_000;
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            checkpoint_interval_records: Self::DEFAULT_CHECKPOINT_INTERVAL_RECORDS,
            max_pages: Self::DEFAULT_MAX_PAGES,
        }
    }
}
