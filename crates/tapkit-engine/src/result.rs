//! Sync run result types.

use std::time::Duration;

use tapkit_types::error::TapError;
use tapkit_types::state::{RejectedRecord, RunStats, RunStatus, SyncState};

use crate::errors::SyncError;
use crate::orchestrator::StreamPhase;

/// Outcome and counters of one stream.
#[derive(Debug, Clone)]
pub struct StreamSyncResult {
    pub stream: String,
    /// Final phase reached.
    pub phase: StreamPhase,
    /// Every phase entered, in order, starting with `Pending`.
    pub history: Vec<StreamPhase>,
    pub records_extracted: u64,
    pub records_emitted: u64,
    pub records_rejected: u64,
    /// Records strictly below the starting bookmark, not re-emitted.
    pub records_skipped: u64,
    pub unknown_properties: u64,
    pub pages_fetched: u64,
    pub retry_delays: Vec<Duration>,
    pub checkpoints: u64,
    pub error: Option<TapError>,
    pub duration_secs: f64,
}

impl StreamSyncResult {
    pub(crate) fn pending(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            phase: StreamPhase::Pending,
            history: vec![StreamPhase::Pending],
            records_extracted: 0,
            records_emitted: 0,
            records_rejected: 0,
            records_skipped: 0,
            unknown_properties: 0,
            pages_fetched: 0,
            retry_delays: Vec::new(),
            checkpoints: 0,
            error: None,
            duration_secs: 0.0,
        }
    }
}

/// Result of a sync run.
#[derive(Debug)]
pub struct SyncResult {
    pub status: RunStatus,
    /// Streams in catalog order; streams never reached stay `Pending`.
    pub streams: Vec<StreamSyncResult>,
    /// State after the last checkpoint.
    pub final_state: SyncState,
    pub rejected: Vec<RejectedRecord>,
    /// First error that failed the run.
    pub error: Option<SyncError>,
    pub duration_secs: f64,
}

impl SyncResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamSyncResult> {
        self.streams.iter().find(|s| s.stream == name)
    }

    /// Aggregate counters for run history.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        RunStats {
            records_extracted: self.streams.iter().map(|s| s.records_extracted).sum(),
            records_emitted: self.streams.iter().map(|s| s.records_emitted).sum(),
            records_rejected: self.streams.iter().map(|s| s.records_rejected).sum(),
            error_message: self.error.as_ref().map(ToString::to_string),
        }
    }
}
