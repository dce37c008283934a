//! Sync orchestrator: drives every selected stream through its lifecycle,
//! emits messages in protocol order and checkpoints bookmark state.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use tapkit_state::StateBackend;
use tapkit_types::catalog::{Catalog, ReplicationMethod, Stream};
use tapkit_types::error::TapError;
use tapkit_types::message::Message;
use tapkit_types::state::{RejectedRecord, RunStatus, SyncState, TapId};
use tapkit_types::stream::{StreamFailurePolicy, SyncLimits, SyncPolicies};
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::batch::{BatchConfig, BatchWriter};
use crate::bookmark::BookmarkTracker;
use crate::emitter::MessageEmitter;
use crate::errors::SyncError;
use crate::http::HttpTransport;
use crate::reconcile::Reconciler;
use crate::result::{StreamSyncResult, SyncResult};
use crate::retry::RetryPolicy;
use crate::source::{RecordSource, StreamEndpoint};

// ── Stream lifecycle ────────────────────────────────────────────────

/// Lifecycle phase of one stream within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamPhase {
    Pending,
    SchemaEmitted,
    Syncing,
    Checkpointing,
    Completed,
    Failed,
    Cancelled,
}

impl StreamPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SchemaEmitted => "schema_emitted",
            Self::Syncing => "syncing",
            Self::Checkpointing => "checkpointing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether `self -> next` is a legal lifecycle step.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::SchemaEmitted | Self::Failed)
                | (Self::SchemaEmitted, Self::Syncing)
                | (
                    Self::Syncing,
                    Self::Checkpointing | Self::Completed | Self::Failed | Self::Cancelled
                )
                | (Self::Checkpointing, Self::Syncing)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Options ─────────────────────────────────────────────────────────

/// Run-wide knobs resolved from the tap definition.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub limits: SyncLimits,
    pub policies: SyncPolicies,
    /// Emit ACTIVATE_VERSION around full-table streams.
    pub activate_version: bool,
    /// Write records to files and emit BATCH messages instead of RECORDs.
    pub batch: Option<BatchConfig>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            limits: SyncLimits::default(),
            policies: SyncPolicies::default(),
            activate_version: true,
            batch: None,
        }
    }
}

// ── Per-stream run context ──────────────────────────────────────────

struct StreamRun {
    result: StreamSyncResult,
    /// Accepted records since the last STATE.
    since_checkpoint: u64,
    version: Option<i64>,
    batch: Option<BatchWriter>,
}

impl StreamRun {
    fn new(stream: &str) -> Self {
        Self {
            result: StreamSyncResult::pending(stream),
            since_checkpoint: 0,
            version: None,
            batch: None,
        }
    }

    fn phase(&self) -> StreamPhase {
        self.result.phase
    }

    fn transition(&mut self, next: StreamPhase) -> Result<(), TapError> {
        let current = self.result.phase;
        if !current.can_transition_to(next) {
            return Err(TapError::internal(
                "ILLEGAL_TRANSITION",
                format!(
                    "stream '{}': illegal phase transition {current} -> {next}",
                    self.result.stream
                ),
            ));
        }
        tracing::debug!(stream = self.result.stream, from = %current, to = %next, "Stream phase");
        self.result.phase = next;
        self.result.history.push(next);
        Ok(())
    }

    fn absorb_source(&mut self, source: &RecordSource) {
        let stats = source.stats();
        self.result.pages_fetched = stats.pages_fetched;
        self.result.records_extracted = stats.records_extracted;
        self.result.retry_delays.clone_from(&stats.retry_delays);
    }
}

fn infrastructure(context: &str, err: impl std::fmt::Display) -> SyncError {
    SyncError::Infrastructure(anyhow::anyhow!("{context}: {err}"))
}

// ── Orchestrator ────────────────────────────────────────────────────

/// Runs a catalog's selected streams, sequentially and in catalog order.
pub struct SyncOrchestrator {
    catalog: Catalog,
    endpoints: HashMap<String, Arc<dyn StreamEndpoint>>,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn Authenticator>,
    retry: RetryPolicy,
    options: SyncOptions,
    persistence: Option<(TapId, Arc<dyn StateBackend>)>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        catalog: Catalog,
        endpoints: HashMap<String, Arc<dyn StreamEndpoint>>,
        transport: Arc<dyn HttpTransport>,
        auth: Arc<dyn Authenticator>,
        retry: RetryPolicy,
        options: SyncOptions,
    ) -> Self {
        Self {
            catalog,
            endpoints,
            transport,
            auth,
            retry,
            options,
            persistence: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Persist every checkpoint, rejected records and run history.
    #[must_use]
    pub fn with_state_backend(mut self, tap: TapId, backend: Arc<dyn StateBackend>) -> Self {
        self.persistence = Some((tap, backend));
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Sync every selected stream, resuming from `initial`.
    ///
    /// Never returns early with an error: the outcome, including the first
    /// run-failing error, is reported in the [`SyncResult`].
    pub async fn run<W: Write>(
        &self,
        initial: SyncState,
        emitter: &mut MessageEmitter<W>,
    ) -> SyncResult {
        let start = Instant::now();
        let selected: Vec<&Stream> = self.catalog.selected().collect();
        tracing::info!(streams = selected.len(), "Starting sync run");

        let tracker = BookmarkTracker::new(initial);
        let mut streams = Vec::with_capacity(selected.len());
        let mut rejected = Vec::new();

        let run_id = match self.start_run().await {
            Ok(run_id) => run_id,
            Err(err) => {
                tracing::error!(error = %err, "Could not record run start");
                return SyncResult {
                    status: RunStatus::Failed,
                    streams: selected
                        .iter()
                        .map(|s| StreamSyncResult::pending(s.name.clone()))
                        .collect(),
                    final_state: tracker.snapshot(),
                    rejected,
                    error: Some(err),
                    duration_secs: start.elapsed().as_secs_f64(),
                };
            }
        };

        let mut first_error: Option<SyncError> = None;
        let mut status = RunStatus::Completed;
        for stream in &selected {
            let (result, outcome) = self.sync_stream(stream, &tracker, emitter, &mut rejected).await;
            streams.push(result);
            let Err(err) = outcome else {
                continue;
            };
            match err {
                SyncError::Cancelled => {
                    status = RunStatus::Cancelled;
                    first_error.get_or_insert(SyncError::Cancelled);
                    break;
                }
                err if err.is_stream_scoped()
                    && self.options.policies.on_stream_failure == StreamFailurePolicy::Continue =>
                {
                    tracing::warn!(stream = stream.name, "Stream failed, continuing with next stream");
                    status = RunStatus::Failed;
                    first_error.get_or_insert(err);
                }
                err => {
                    status = RunStatus::Failed;
                    first_error.get_or_insert(err);
                    break;
                }
            }
        }
        for stream in selected.iter().skip(streams.len()) {
            streams.push(StreamSyncResult::pending(stream.name.clone()));
        }

        let mut result = SyncResult {
            status,
            streams,
            final_state: tracker.snapshot(),
            rejected,
            error: first_error,
            duration_secs: 0.0,
        };
        self.finish_run(run_id, &mut result).await;
        result.duration_secs = start.elapsed().as_secs_f64();

        tracing::info!(
            status = result.status.as_str(),
            records_emitted = result.stats().records_emitted,
            records_rejected = result.rejected.len(),
            duration_secs = result.duration_secs,
            "Sync run finished"
        );
        result
    }

    async fn start_run(&self) -> Result<Option<i64>, SyncError> {
        let Some((tap, backend)) = self.persistence.clone() else {
            return Ok(None);
        };
        let run_id = tokio::task::spawn_blocking(move || backend.start_run(&tap))
            .await
            .map_err(|e| infrastructure("start_run task panicked", e))?
            .map_err(|e| SyncError::Infrastructure(e.into()))?;
        Ok(Some(run_id))
    }

    async fn finish_run(&self, run_id: Option<i64>, result: &mut SyncResult) {
        let (Some(run_id), Some((tap, backend))) = (run_id, self.persistence.clone()) else {
            return;
        };
        let rejected = result.rejected.clone();
        let stats = result.stats();
        let status = result.status;
        let outcome = tokio::task::spawn_blocking(move || {
            crate::dlq::persist_rejected_records(backend.as_ref(), &tap, run_id, &rejected);
            backend.complete_run(run_id, status, &stats)
        })
        .await
        .map_err(|e| infrastructure("complete_run task panicked", e))
        .and_then(|r| r.map_err(|e| SyncError::Infrastructure(e.into())));
        if let Err(err) = outcome {
            tracing::error!(run_id, error = %err, "Failed to record run completion");
            if result.error.is_none() {
                result.status = RunStatus::Failed;
                result.error = Some(err);
            }
        }
    }

    async fn sync_stream<W: Write>(
        &self,
        stream: &Stream,
        tracker: &BookmarkTracker,
        emitter: &mut MessageEmitter<W>,
        rejected: &mut Vec<RejectedRecord>,
    ) -> (StreamSyncResult, Result<(), SyncError>) {
        let started = Instant::now();
        tracing::info!(
            stream = stream.name,
            replication_method = stream.replication_method.as_str(),
            "Starting stream"
        );
        let mut run = StreamRun::new(&stream.name);
        let outcome = match self.drive_stream(stream, tracker, emitter, &mut run, rejected).await {
            Ok(()) => {
                tracing::info!(
                    stream = stream.name,
                    records_emitted = run.result.records_emitted,
                    records_rejected = run.result.records_rejected,
                    records_skipped = run.result.records_skipped,
                    pages = run.result.pages_fetched,
                    "Stream completed"
                );
                Ok(())
            }
            Err(err) => Err(self.fail_stream(&mut run, tracker, emitter, err).await),
        };
        run.result.duration_secs = started.elapsed().as_secs_f64();
        (run.result, outcome)
    }

    async fn drive_stream<W: Write>(
        &self,
        stream: &Stream,
        tracker: &BookmarkTracker,
        emitter: &mut MessageEmitter<W>,
        run: &mut StreamRun,
        rejected: &mut Vec<RejectedRecord>,
    ) -> Result<(), SyncError> {
        emitter.emit(Message::schema(stream)).map_err(SyncError::Emit)?;
        run.transition(StreamPhase::SchemaEmitted)?;
        run.transition(StreamPhase::Syncing)?;

        tracker.register(stream)?;
        let endpoint = self.endpoints.get(&stream.name).cloned().ok_or_else(|| {
            TapError::config(
                "UNKNOWN_STREAM",
                format!("no endpoint is configured for stream '{}'", stream.name),
            )
        })?;
        if let Some(config) = &self.options.batch {
            run.batch = Some(
                BatchWriter::new(config, &stream.name)
                    .map_err(|e| infrastructure("creating batch directory", e))?,
            );
        }

        if stream.replication_method == ReplicationMethod::FullTable && self.options.activate_version {
            let prior = tracker.prior_version(&stream.name);
            let version = tracker.begin_full_table(&stream.name)?;
            if prior.is_none() {
                emitter
                    .emit(Message::activate_version(&stream.name, version))
                    .map_err(SyncError::Emit)?;
            }
            run.version = Some(version);
        }

        let bookmark = tracker.starting_bookmark(&stream.name);
        let mut source = RecordSource::new(
            stream,
            endpoint,
            self.transport.clone(),
            self.auth.clone(),
            self.retry.clone(),
            bookmark.as_ref(),
        )
        .with_max_pages(self.options.limits.max_pages);
        let mut reconciler = Reconciler::new(stream, self.options.policies.unknown_properties);

        let pumped = self
            .pump(stream, tracker, emitter, run, &mut source, &mut reconciler, rejected)
            .await;
        run.absorb_source(&source);
        let discrepancies = reconciler.stats();
        run.result.unknown_properties = discrepancies.unknown_dropped + discrepancies.unknown_reported;
        pumped?;

        self.flush_batch(run, emitter)?;
        if let Some(version) = run.version {
            emitter
                .emit(Message::activate_version(&stream.name, version))
                .map_err(SyncError::Emit)?;
            tracker.complete_full_table(&stream.name);
        }
        tracker.finalize(&stream.name);
        self.checkpoint(run, tracker, emitter).await?;
        run.transition(StreamPhase::Completed)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump<W: Write>(
        &self,
        stream: &Stream,
        tracker: &BookmarkTracker,
        emitter: &mut MessageEmitter<W>,
        run: &mut StreamRun,
        source: &mut RecordSource,
        reconciler: &mut Reconciler<'_>,
        rejected: &mut Vec<RejectedRecord>,
    ) -> Result<(), SyncError> {
        let interval = self.options.limits.checkpoint_interval_records;
        loop {
            if source.at_page_boundary() && self.cancel.is_cancelled() {
                tracing::warn!(stream = stream.name, "Cancellation requested, stopping at page boundary");
                return Err(SyncError::Cancelled);
            }
            let Some(raw) = source.next_record().await? else {
                return Ok(());
            };
            if tracker.is_covered(&stream.name, &raw) {
                run.result.records_skipped += 1;
                continue;
            }

            let record = match reconciler.reconcile(raw.clone()) {
                Ok(record) => record,
                Err(err) if err.is_record_scoped() => {
                    tracing::warn!(
                        stream = stream.name,
                        code = %err.code,
                        error = %err.message,
                        "Skipping record"
                    );
                    run.result.records_rejected += 1;
                    rejected.push(RejectedRecord {
                        stream: stream.name.clone(),
                        record_json: serde_json::Value::Object(raw).to_string(),
                        error_message: err.to_string(),
                        error_category: err.category,
                        rejected_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                    });
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            self.write_record(run, emitter, &stream.name, record.clone())?;
            tracker.advance(&stream.name, &record)?;
            run.result.records_emitted += 1;
            run.since_checkpoint += 1;
            if interval > 0 && run.since_checkpoint >= interval {
                self.checkpoint(run, tracker, emitter).await?;
            }
        }
    }

    fn write_record<W: Write>(
        &self,
        run: &mut StreamRun,
        emitter: &mut MessageEmitter<W>,
        stream: &str,
        record: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SyncError> {
        match run.batch.as_mut() {
            Some(writer) => {
                let full = writer
                    .write(&record)
                    .map_err(|e| infrastructure("writing batch file", e))?;
                if let Some(batch) = full {
                    emitter.emit(Message::Batch(batch)).map_err(SyncError::Emit)?;
                }
            }
            None => {
                emitter
                    .emit(Message::record(stream, record, run.version))
                    .map_err(SyncError::Emit)?;
            }
        }
        Ok(())
    }

    fn flush_batch<W: Write>(
        &self,
        run: &mut StreamRun,
        emitter: &mut MessageEmitter<W>,
    ) -> Result<(), SyncError> {
        let Some(writer) = run.batch.as_mut() else {
            return Ok(());
        };
        let closed = writer
            .flush()
            .map_err(|e| infrastructure("closing batch file", e))?;
        if let Some(batch) = closed {
            emitter.emit(Message::Batch(batch)).map_err(SyncError::Emit)?;
        }
        Ok(())
    }

    /// Emit (and persist) a STATE with the full multi-stream snapshot.
    async fn checkpoint<W: Write>(
        &self,
        run: &mut StreamRun,
        tracker: &BookmarkTracker,
        emitter: &mut MessageEmitter<W>,
    ) -> Result<(), SyncError> {
        run.transition(StreamPhase::Checkpointing)?;
        let outcome = self.write_checkpoint(run, tracker, emitter).await;
        run.transition(StreamPhase::Syncing)?;
        outcome
    }

    async fn write_checkpoint<W: Write>(
        &self,
        run: &mut StreamRun,
        tracker: &BookmarkTracker,
        emitter: &mut MessageEmitter<W>,
    ) -> Result<(), SyncError> {
        self.flush_batch(run, emitter)?;
        let snapshot = tracker.snapshot();
        emitter
            .emit(Message::state(snapshot.clone()))
            .map_err(SyncError::Emit)?;
        // Once on the wire the STATE counts, even if persisting it fails.
        let records_since_checkpoint = std::mem::take(&mut run.since_checkpoint);
        run.result.checkpoints += 1;

        if let Some((tap, backend)) = self.persistence.clone() {
            tokio::task::spawn_blocking(move || backend.save_state(&tap, &snapshot))
                .await
                .map_err(|e| infrastructure("save_state task panicked", e))?
                .map_err(|e| SyncError::Infrastructure(e.into()))?;
        }

        tracing::info!(
            stream = run.result.stream,
            records_since_checkpoint,
            checkpoints = run.result.checkpoints,
            "Checkpoint emitted"
        );
        Ok(())
    }

    /// Flush the last known-good checkpoint and move the stream to its
    /// terminal phase.
    async fn fail_stream<W: Write>(
        &self,
        run: &mut StreamRun,
        tracker: &BookmarkTracker,
        emitter: &mut MessageEmitter<W>,
        err: SyncError,
    ) -> SyncError {
        let sink_broken = matches!(err, SyncError::Emit(_));
        if run.since_checkpoint > 0 && !sink_broken && run.phase() == StreamPhase::Syncing {
            if let Err(cp_err) = self.checkpoint(run, tracker, emitter).await {
                tracing::error!(
                    stream = run.result.stream,
                    error = %cp_err,
                    "Failed to flush checkpoint after stream failure"
                );
            }
        }

        let terminal = match err {
            SyncError::Cancelled => StreamPhase::Cancelled,
            _ => StreamPhase::Failed,
        };
        if let Err(transition_err) = run.transition(terminal) {
            tracing::error!(stream = run.result.stream, error = %transition_err, "Could not finalize stream phase");
        }
        run.result.error = err.as_tap_error().cloned();

        match &err {
            SyncError::Cancelled => {
                tracing::warn!(stream = run.result.stream, "Stream cancelled");
            }
            SyncError::Tap(tap_err) => {
                tracing::error!(
                    stream = run.result.stream,
                    category = %tap_err.category,
                    code = %tap_err.code,
                    status = tap_err.status,
                    error = %tap_err.message,
                    "Stream failed"
                );
            }
            other => {
                tracing::error!(stream = run.result.stream, error = %other, "Stream failed");
            }
        }
        err
    }
}
