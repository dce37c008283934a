//! State-file implementation of [`StateBackend`].
//!
//! Holds the state of a single tap in one JSON document. Writes go to a
//! sibling temp file that is renamed over the target, so a crash never
//! leaves a truncated state file. Rejected records are appended as JSON
//! lines to `<state file>.rejected.jsonl`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use tapkit_types::state::{RejectedRecord, RunStats, RunStatus, SyncState, TapId};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// JSON state document on disk.
pub struct JsonFileStateBackend {
    path: PathBuf,
    next_run_id: AtomicI64,
    write_lock: Mutex<()>,
}

impl JsonFileStateBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            next_run_id: AtomicI64::new(1),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rejected_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".rejected.jsonl");
        PathBuf::from(name)
    }

    /// Read a state document from `path`. An absent or empty file is an empty state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] on read failure or [`StateError::Json`]
    /// when the document is not a state document.
    pub fn read(path: &Path) -> error::Result<SyncState> {
        match fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => Ok(SyncState::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncState::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateBackend for JsonFileStateBackend {
    fn load_state(&self, _tap: &TapId) -> error::Result<Option<SyncState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Self::read(&self.path).map(Some)
    }

    fn save_state(&self, _tap: &TapId, state: &SyncState) -> error::Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| StateError::LockPoisoned)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, state)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn start_run(&self, _tap: &TapId) -> error::Result<i64> {
        Ok(self.next_run_id.fetch_add(1, Ordering::SeqCst))
    }

    fn complete_run(&self, _run_id: i64, _status: RunStatus, _stats: &RunStats) -> error::Result<()> {
        // Run history needs the SQLite backend.
        Ok(())
    }

    fn insert_rejected_records(
        &self,
        _tap: &TapId,
        _run_id: i64,
        records: &[RejectedRecord],
    ) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().map_err(|_| StateError::LockPoisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.rejected_path())?;
        for record in records {
            serde_json::to_writer(&mut file, record)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        Ok(records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tapkit_types::error::ErrorCategory;

    #[test]
    fn missing_file_is_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileStateBackend::new(dir.path().join("state.json"));
        assert!(backend.load_state(&TapId::new("t")).unwrap().is_none());
        assert!(JsonFileStateBackend::read(backend.path()).unwrap().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileStateBackend::new(dir.path().join("out").join("state.json"));
        let mut state = SyncState::new();
        state.stream_mut("users").replication_key_value = Some(json!(42));

        backend.save_state(&TapId::new("t"), &state).unwrap();
        assert_eq!(backend.load_state(&TapId::new("t")).unwrap(), Some(state));
        assert!(!dir.path().join("out").join("state.json.tmp").exists());
    }

    #[test]
    fn invalid_document_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            JsonFileStateBackend::read(&path),
            Err(StateError::Json(_))
        ));
    }

    #[test]
    fn rejected_records_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileStateBackend::new(dir.path().join("state.json"));
        let record = RejectedRecord {
            stream: "users".into(),
            record_json: r#"{"name":"x"}"#.into(),
            error_message: "missing primary key 'id'".into(),
            error_category: ErrorCategory::DataIntegrity,
            rejected_at: "2026-01-01T00:00:00Z".into(),
        };
        let run = backend.start_run(&TapId::new("t")).unwrap();
        backend
            .insert_rejected_records(&TapId::new("t"), run, &[record.clone(), record])
            .unwrap();

        let raw = fs::read_to_string(dir.path().join("state.json.rejected.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }
}
