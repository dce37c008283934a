//! Rejected-record persistence helper used by the orchestrator.

use tapkit_state::StateBackend;
use tapkit_types::state::{RejectedRecord, TapId};

/// Persist rejected records to the state backend.
///
/// Failures are logged and never fail the run.
pub(crate) fn persist_rejected_records(
    state_backend: &dyn StateBackend,
    tap: &TapId,
    run_id: i64,
    records: &[RejectedRecord],
) {
    if records.is_empty() {
        return;
    }

    let rejected_count = records.len();

    match state_backend.insert_rejected_records(tap, run_id, records) {
        Ok(inserted) => {
            tracing::info!(
                tap = tap.as_str(),
                rejected_records = inserted,
                "Persisted rejected records to state backend"
            );
        }
        Err(e) => {
            tracing::error!(
                tap = tap.as_str(),
                rejected_count,
                error = %e,
                "Failed to persist rejected records"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapkit_state::{JsonFileStateBackend, SqliteStateBackend};
    use tapkit_types::error::ErrorCategory;

    fn rejected(stream: &str) -> RejectedRecord {
        RejectedRecord {
            stream: stream.to_string(),
            record_json: r#"{"name":"x"}"#.to_string(),
            error_message: "key property 'id' is missing or null".to_string(),
            error_category: ErrorCategory::DataIntegrity,
            rejected_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn persists_into_run() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileStateBackend::new(dir.path().join("state.json"));
        let tap = TapId::new("demo");
        let run_id = backend.start_run(&tap).unwrap();
        persist_rejected_records(&backend, &tap, run_id, &[rejected("users"), rejected("users")]);
        let raw = std::fs::read_to_string(dir.path().join("state.json.rejected.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn unknown_run_is_logged_not_raised() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        persist_rejected_records(&backend, &TapId::new("demo"), 999, &[rejected("users")]);
    }
}
