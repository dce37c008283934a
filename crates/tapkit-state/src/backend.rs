//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for sync state, run
//! history, and rejected records. Model types live in
//! [`tapkit_types::state`].

use tapkit_types::state::{RejectedRecord, RunStats, RunStatus, SyncState, TapId};

use crate::error;

/// Storage contract for tap state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Read the last committed state of a tap.
    ///
    /// Returns `Ok(None)` when nothing has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn load_state(&self, tap: &TapId) -> error::Result<Option<SyncState>>;

    /// Replace the committed state of a tap.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn save_state(&self, tap: &TapId, state: &SyncState) -> error::Result<()>;

    /// Begin a new sync run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, tap: &TapId) -> error::Result<i64>;

    /// Finalize a sync run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// Persist rejected records. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_rejected_records(
        &self,
        tap: &TapId,
        run_id: i64,
        records: &[RejectedRecord],
    ) -> error::Result<u64>;
}
