//! Bookmark tracking across all streams of a run.
//!
//! [`BookmarkTracker`] is the only state shared between streams. It owns the
//! committed [`SyncState`] behind an `RwLock`; every mutation completes under
//! the write lock, so [`BookmarkTracker::snapshot`] never sees a half-applied
//! update.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::{Map, Value};
use tapkit_types::bookmark::{BookmarkKind, BookmarkValue};
use tapkit_types::catalog::{KeyOrdering, Stream};
use tapkit_types::error::TapError;
use tapkit_types::schema::JsonType;
use tapkit_types::state::SyncState;

#[derive(Debug, Clone)]
struct TrackedStream {
    key: String,
    kind: BookmarkKind,
    /// Bookmark the run started from.
    start: Option<BookmarkValue>,
    /// Greatest position seen so far, never below `start`.
    max: Option<BookmarkValue>,
    /// Sorted streams commit each advance; unsorted ones only on finalize.
    sorted: bool,
}

#[derive(Debug)]
struct TrackerState {
    committed: SyncState,
    streams: HashMap<String, TrackedStream>,
    last_version: i64,
}

/// Shared, cloneable handle to the run's bookmark state.
#[derive(Debug, Clone)]
pub struct BookmarkTracker {
    inner: Arc<RwLock<TrackerState>>,
}

impl BookmarkTracker {
    /// Tracker seeded from the state a previous run left behind.
    #[must_use]
    pub fn new(initial: SyncState) -> Self {
        let last_version = initial
            .bookmarks
            .values()
            .filter_map(|s| s.version)
            .max()
            .unwrap_or(0);
        Self {
            inner: Arc::new(RwLock::new(TrackerState {
                committed: initial,
                streams: HashMap::new(),
                last_version,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a bookmarked stream. Full-table streams are ignored.
    ///
    /// # Errors
    ///
    /// Returns an ordering [`TapError`] when the replication key has no
    /// usable ordering or the stored bookmark cannot be read.
    pub fn register(&self, stream: &Stream) -> Result<(), TapError> {
        if !stream.replication_method.tracks_bookmark() {
            return Ok(());
        }
        let (key, kind) = resolve_kind(stream)?;

        let mut guard = self.write();
        let entry = guard.committed.stream_mut(&stream.name);
        if entry.replication_key.as_deref().is_some_and(|k| k != key) {
            tracing::warn!(
                stream = stream.name,
                previous_key = entry.replication_key.as_deref().unwrap_or_default(),
                replication_key = key,
                "Replication key changed, discarding stored bookmark"
            );
            entry.replication_key_value = None;
        }
        entry.replication_key = Some(key.clone());

        let start = match &entry.replication_key_value {
            Some(value) => BookmarkValue::from_json(kind, value).map_err(|reason| {
                TapError::ordering(
                    "UNREADABLE_BOOKMARK",
                    format!("stream '{}': stored bookmark unusable: {reason}", stream.name),
                )
            })?,
            None => None,
        };
        if let Some(start) = &start {
            tracing::info!(stream = stream.name, bookmark = %start, "Resuming from bookmark");
        }
        guard.streams.insert(
            stream.name.clone(),
            TrackedStream {
                key,
                kind,
                max: start.clone(),
                start,
                sorted: stream.is_sorted,
            },
        );
        Ok(())
    }

    /// Ordering kind resolved for a registered stream.
    #[must_use]
    pub fn kind(&self, stream: &str) -> Option<BookmarkKind> {
        self.read().streams.get(stream).map(|t| t.kind)
    }

    /// Bookmark the stream's first request is filtered by.
    #[must_use]
    pub fn starting_bookmark(&self, stream: &str) -> Option<Value> {
        self.read()
            .streams
            .get(stream)
            .and_then(|t| t.start.as_ref())
            .map(BookmarkValue::to_json)
    }

    /// Fold an accepted record into the stream's maximum.
    ///
    /// Returns whether the maximum moved. Null or absent key values are ignored.
    ///
    /// # Errors
    ///
    /// Returns an ordering [`TapError`] when the value cannot be read in the
    /// stream's kind or cannot be compared to the current maximum.
    pub fn advance(&self, stream: &str, record: &Map<String, Value>) -> Result<bool, TapError> {
        let mut guard = self.write();
        let TrackerState {
            committed, streams, ..
        } = &mut *guard;
        let Some(tracked) = streams.get_mut(stream) else {
            return Ok(false);
        };
        let Some(value) = read_key(stream, tracked, record)? else {
            return Ok(false);
        };
        let greater = match &tracked.max {
            None => true,
            Some(max) => {
                let ordering = value.compare(max).ok_or_else(|| {
                    TapError::ordering(
                        "INCOMPARABLE_BOOKMARK",
                        format!("stream '{stream}': cannot compare {value} with bookmark {max}"),
                    )
                })?;
                ordering == Ordering::Greater
            }
        };
        if !greater {
            return Ok(false);
        }
        if tracked.sorted {
            committed.stream_mut(stream).replication_key_value = Some(value.to_json());
        }
        tracked.max = Some(value);
        Ok(true)
    }

    /// Whether a record sits strictly below the bookmark the run started from.
    #[must_use]
    pub fn is_covered(&self, stream: &str, record: &Map<String, Value>) -> bool {
        let guard = self.read();
        let Some(tracked) = guard.streams.get(stream) else {
            return false;
        };
        let Some(start) = &tracked.start else {
            return false;
        };
        match read_key(stream, tracked, record) {
            Ok(Some(value)) => value.compare(start) == Some(Ordering::Less),
            _ => false,
        }
    }

    /// Publish an unsorted stream's maximum once the stream completes.
    pub fn finalize(&self, stream: &str) {
        let mut guard = self.write();
        let TrackerState {
            committed, streams, ..
        } = &mut *guard;
        if let Some(max) = streams.get(stream).and_then(|t| t.max.as_ref()) {
            committed.stream_mut(stream).replication_key_value = Some(max.to_json());
        }
    }

    /// Consistent copy of the committed state.
    #[must_use]
    pub fn snapshot(&self) -> SyncState {
        self.read().committed.clone()
    }

    /// Version a previous run left for a full-table stream.
    #[must_use]
    pub fn prior_version(&self, stream: &str) -> Option<i64> {
        self.read().committed.stream(stream).and_then(|s| s.version)
    }

    /// Allocate a new table version and mark the stream incomplete.
    ///
    /// Versions are milliseconds since the epoch and strictly increasing
    /// within a tracker, even when the clock stalls.
    ///
    /// # Errors
    ///
    /// Returns an ordering [`TapError`] when the stored versions leave no
    /// room for a greater one.
    pub fn begin_full_table(&self, stream: &str) -> Result<i64, TapError> {
        let mut guard = self.write();
        let next = guard.last_version.checked_add(1).ok_or_else(|| {
            TapError::ordering(
                "VERSION_OVERFLOW",
                format!(
                    "stream '{stream}': stored table version {} cannot be incremented",
                    guard.last_version
                ),
            )
        })?;
        let version = Utc::now().timestamp_millis().max(next);
        guard.last_version = version;
        let entry = guard.committed.stream_mut(stream);
        entry.version = Some(version);
        entry.complete = false;
        Ok(version)
    }

    pub fn complete_full_table(&self, stream: &str) {
        self.write().committed.stream_mut(stream).complete = true;
    }
}

fn read_key(
    stream: &str,
    tracked: &TrackedStream,
    record: &Map<String, Value>,
) -> Result<Option<BookmarkValue>, TapError> {
    let Some(raw) = record.get(&tracked.key) else {
        return Ok(None);
    };
    BookmarkValue::from_json(tracked.kind, raw).map_err(|reason| {
        TapError::ordering(
            "UNREADABLE_BOOKMARK",
            format!("stream '{stream}': replication key '{}': {reason}", tracked.key),
        )
    })
}

/// Replication key and the ordering its declared type implies.
fn resolve_kind(stream: &Stream) -> Result<(String, BookmarkKind), TapError> {
    let Some(key) = stream.replication_key.clone().filter(|k| !k.trim().is_empty()) else {
        return Err(TapError::config(
            "MISSING_REPLICATION_KEY",
            format!(
                "stream '{}': {} replication requires a replication_key",
                stream.name, stream.replication_method
            ),
        ));
    };
    let Some(prop) = stream.schema.property(&key) else {
        return Err(TapError::config(
            "UNKNOWN_REPLICATION_KEY",
            format!("stream '{}': replication_key '{key}' is not in the schema", stream.name),
        ));
    };
    if prop.is_temporal() {
        return Ok((key, BookmarkKind::Timestamp));
    }
    let types = prop.types.as_ref().map(|t| t.non_null()).unwrap_or_default();
    let kind = match types.as_slice() {
        [JsonType::Integer] => BookmarkKind::Integer,
        [JsonType::Number] | [JsonType::Integer, JsonType::Number] | [JsonType::Number, JsonType::Integer] => {
            BookmarkKind::Number
        }
        [JsonType::String] if stream.replication_key_ordering == KeyOrdering::Lexicographic => {
            BookmarkKind::Lexicographic
        }
        [JsonType::String] => {
            return Err(TapError::ordering(
                "AMBIGUOUS_STRING_KEY",
                format!(
                    "stream '{}': string replication_key '{key}' has no date-time format \
                     and no lexicographic ordering declared",
                    stream.name
                ),
            ))
        }
        _ => {
            return Err(TapError::ordering(
                "UNSUPPORTED_KEY_TYPE",
                format!(
                    "stream '{}': replication_key '{key}' has no orderable type",
                    stream.name
                ),
            ))
        }
    };
    Ok((key, kind))
}
