//! End-to-end sync scenarios against a scripted in-memory API.
//!
//! Each test builds a tap from YAML, swaps in [`ScriptedApi`] as transport
//! and checks the emitted message sequence and the run result.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tapkit_engine::config::{parse_tap_str, validate_tap};
use tapkit_engine::http::{HttpRequest, HttpResponse, HttpTransport};
use tapkit_engine::{MessageEmitter, StreamPhase, SyncResult, Tap};
use tapkit_types::error::{ErrorCategory, TapError};
use tapkit_types::message::{Message, MessageKind};
use tapkit_state::{StateBackend, StateError};
use tapkit_types::state::{RejectedRecord, RunStats, RunStatus, StreamState, SyncState, TapId};
use tokio_util::sync::CancellationToken;

// ── Scripted API ────────────────────────────────────────────────────

type Route = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Routes by URL path; faults are served once each, before the route, for
/// a given `path?page=` key.
#[derive(Default)]
struct ScriptedApi {
    routes: HashMap<String, Route>,
    faults: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    cancel_on: Option<(String, CancellationToken)>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn request_key(request: &HttpRequest) -> String {
    let path = request.url.trim_start_matches("https://api.test");
    let page = request.query.get("page").map_or("", String::as_str);
    format!("{path}?page={page}")
}

impl ScriptedApi {
    fn route(mut self, path: &str, route: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> Self {
        self.routes.insert(format!("https://api.test{path}"), Box::new(route));
        self
    }

    fn fault(self, key: &str, response: HttpResponse) -> Self {
        self.faults
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(response);
        self
    }

    fn cancel_when_serving(mut self, key: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((key.to_string(), token));
        self
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedApi {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TapError> {
        self.requests.lock().unwrap().push(request.clone());
        let key = request_key(request);
        if let Some(fault) = self
            .faults
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Ok(fault);
        }
        if let Some((cancel_key, token)) = &self.cancel_on {
            if *cancel_key == key {
                token.cancel();
            }
        }
        match self.routes.get(&request.url) {
            Some(route) => Ok(route(request)),
            None => Ok(HttpResponse::new(404, "not found")),
        }
    }
}

fn page_of(request: &HttpRequest) -> u64 {
    request
        .query
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1)
}

fn user(id: u64) -> Value {
    json!({
        "id": id,
        "name": format!("user-{id}"),
        "updated_at": format!("2024-01-01T00:00:{id:02}Z"),
    })
}

/// Three full pages of ten users, then an empty page.
fn users_page(page: u64) -> Vec<Value> {
    if (1..=3).contains(&page) {
        ((page - 1) * 10 + 1..=page * 10).map(user).collect()
    } else {
        Vec::new()
    }
}

fn users_api() -> ScriptedApi {
    ScriptedApi::default().route("/users", |req| {
        HttpResponse::json_ok(&Value::Array(users_page(page_of(req))))
    })
}

// ── Tap definitions ─────────────────────────────────────────────────

const USERS_STREAM: &str = r#"
  - name: users
    path: /users
    pagination: { kind: page_number, page_size: 10 }
    replication_method: INCREMENTAL
    replication_key: updated_at
    bookmark_param: since
    primary_keys: [id]
    schema:
      type: object
      properties:
        id: { type: integer }
        name: { type: [string, "null"] }
        updated_at: { type: string, format: date-time }
"#;

fn tap_yaml(sync: &str, streams: &str) -> String {
    format!(
        r#"
version: "1.0"
tap: scripted
api:
  url_base: https://api.test
  auth: {{ kind: bearer, token: t0k3n }}
retry: {{ max_attempts: 5, base_delay_ms: 1, factor: 2.0, max_delay_ms: 5 }}
sync:
{sync}
streams:
{streams}
"#
    )
}

fn users_tap(sync: &str) -> String {
    tap_yaml(sync, USERS_STREAM)
}

struct Outcome {
    result: SyncResult,
    messages: Vec<Message>,
}

impl Outcome {
    fn of_kind(&self, kind: MessageKind) -> Vec<&Message> {
        self.messages.iter().filter(|m| m.kind() == kind).collect()
    }

    fn record_ids(&self, stream: &str) -> Vec<u64> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::Record(r) if r.stream == stream => r.record["id"].as_u64(),
                _ => None,
            })
            .collect()
    }

    fn last_state(&self) -> SyncState {
        self.messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::State(s) => Some(s.value.clone()),
                _ => None,
            })
            .expect("at least one STATE")
    }
}

async fn run_tap(
    yaml: &str,
    api: Arc<ScriptedApi>,
    initial: SyncState,
    cancel: Option<CancellationToken>,
) -> Outcome {
    let config = parse_tap_str(yaml).expect("tap YAML parses");
    validate_tap(&config).expect("tap YAML is valid");
    let tap = Tap::with_transport(config, api);
    let catalog = tap.discover().await.expect("discovery succeeds");
    let mut orchestrator = tap.orchestrator(catalog);
    if let Some(token) = cancel {
        orchestrator = orchestrator.with_cancellation(token);
    }
    let mut emitter = MessageEmitter::new(Vec::new());
    let result = orchestrator.run(initial, &mut emitter).await;
    let output = String::from_utf8(emitter.into_inner()).unwrap();
    let messages = output
        .lines()
        .map(|line| serde_json::from_str(line).expect("every line is a message"))
        .collect();
    Outcome { result, messages }
}

fn bookmark_of(state: &SyncState, stream: &str) -> Option<Value> {
    state.stream(stream).and_then(|s| s.replication_key_value.clone())
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn schema_precedes_records_and_state_tracks_max() {
    let api = Arc::new(users_api());
    let out = run_tap(&users_tap("  checkpoint_interval_records: 1000"), api.clone(), SyncState::new(), None).await;

    assert!(out.result.is_success(), "{:?}", out.result.error);
    assert!(matches!(out.messages[0], Message::Schema(ref s) if s.stream == "users"));
    assert_eq!(out.record_ids("users"), (1..=30).collect::<Vec<_>>());
    assert!(matches!(out.messages.last(), Some(Message::State(_))));
    assert_eq!(
        bookmark_of(&out.last_state(), "users"),
        Some(json!("2024-01-01T00:00:30Z"))
    );

    let stream = out.result.stream("users").unwrap();
    assert_eq!(stream.phase, StreamPhase::Completed);
    assert_eq!(stream.records_emitted, 30);
    assert_eq!(stream.pages_fetched, 4);
    assert_eq!(
        stream.history,
        vec![
            StreamPhase::Pending,
            StreamPhase::SchemaEmitted,
            StreamPhase::Syncing,
            StreamPhase::Checkpointing,
            StreamPhase::Syncing,
            StreamPhase::Completed,
        ]
    );

    // Discovery declared a schema, so only the sync itself hit the API.
    let requests = api.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests
        .iter()
        .all(|r| r.headers.get("Authorization").map(String::as_str) == Some("Bearer t0k3n")));
    assert!(!requests[0].query.contains_key("since"));
}

#[tokio::test]
async fn record_missing_primary_key_is_rejected_and_skipped() {
    let api = ScriptedApi::default().route("/users", |req| {
        let mut page = users_page(page_of(req));
        if let Some(Value::Object(record)) = page.get_mut(2) {
            record.remove("id");
        }
        HttpResponse::json_ok(&Value::Array(page))
    });
    let out = run_tap(&users_tap("  checkpoint_interval_records: 1000"), Arc::new(api), SyncState::new(), None).await;

    assert!(out.result.is_success());
    let stream = out.result.stream("users").unwrap();
    // The third record of every page lacks its key.
    assert_eq!(stream.records_rejected, 3);
    assert_eq!(stream.records_emitted, 27);
    assert_eq!(out.result.rejected.len(), 3);
    let rejected = &out.result.rejected[0];
    assert_eq!(rejected.stream, "users");
    assert_eq!(rejected.error_category, ErrorCategory::DataIntegrity);
    assert!(rejected.error_message.contains("MISSING_PRIMARY_KEY"));
    assert!(!out.record_ids("users").contains(&3));
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let api = users_api()
        .fault("/users?page=2", HttpResponse::new(503, "unavailable"))
        .fault("/users?page=2", HttpResponse::new(503, "unavailable"));
    let api = Arc::new(api);
    let out = run_tap(&users_tap("  checkpoint_interval_records: 1000"), api.clone(), SyncState::new(), None).await;

    let stream = out.result.stream("users").unwrap();
    assert_eq!(stream.phase, StreamPhase::Completed);
    assert_eq!(stream.records_emitted, 30);
    assert_eq!(
        stream.retry_delays,
        vec![Duration::from_millis(1), Duration::from_millis(2)]
    );
    assert_eq!(api.requests().len(), 6);
    assert_eq!(out.record_ids("users"), (1..=30).collect::<Vec<_>>());
}

#[tokio::test]
async fn authorization_failure_fails_stream_without_retry() {
    let api = users_api().fault("/users?page=1", HttpResponse::new(403, "forbidden"));
    let api = Arc::new(api);
    let out = run_tap(&users_tap("  checkpoint_interval_records: 1000"), api.clone(), SyncState::new(), None).await;

    assert_eq!(out.result.status, RunStatus::Failed);
    let stream = out.result.stream("users").unwrap();
    assert_eq!(stream.phase, StreamPhase::Failed);
    assert_eq!(stream.records_emitted, 0);
    let err = stream.error.as_ref().unwrap();
    assert_eq!(err.category, ErrorCategory::Authorization);
    assert_eq!(err.status, Some(403));

    let requests = api.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("Authorization").map(String::as_str),
        Some("Bearer t0k3n")
    );
    assert!(out.of_kind(MessageKind::Record).is_empty());
    assert!(out.of_kind(MessageKind::State).is_empty());
    assert_eq!(out.of_kind(MessageKind::Schema).len(), 1);
}

#[tokio::test]
async fn repeated_next_page_token_stops_pagination() {
    let streams = r#"
  - name: events
    path: /events
    pagination: { kind: header_token, header: X-Next-Page, param: page }
    primary_keys: [id]
"#;
    let api = ScriptedApi::default().route("/events", |req| {
        let (offset, next) = match req.query.get("page").map(String::as_str) {
            None => (0, "b"),
            Some("b") => (5, "c"),
            // Points back at an already fetched page.
            _ => (10, "b"),
        };
        let records: Vec<Value> = (offset + 1..=offset + 5).map(|id| json!({"id": id})).collect();
        HttpResponse::json_ok(&Value::Array(records)).with_header("X-Next-Page", next)
    });
    let api = Arc::new(api);
    let out = run_tap(
        &tap_yaml("  activate_version: false", streams),
        api.clone(),
        SyncState::new(),
        None,
    )
    .await;

    assert!(out.result.is_success());
    // One request during discovery sampling, three during the sync.
    assert_eq!(api.requests().len(), 4);
    let stream = out.result.stream("events").unwrap();
    assert_eq!(stream.pages_fetched, 3);
    assert_eq!(out.record_ids("events"), (1..=15).collect::<Vec<_>>());
}

#[tokio::test]
async fn resumes_from_bookmark_without_reemitting_older_records() {
    let mut initial = SyncState::new();
    initial.bookmarks.insert(
        "users".to_string(),
        StreamState {
            replication_key: Some("updated_at".to_string()),
            replication_key_value: Some(json!("2024-01-01T00:00:15Z")),
            ..StreamState::default()
        },
    );
    let api = Arc::new(users_api());
    let out = run_tap(&users_tap("  checkpoint_interval_records: 1000"), api.clone(), initial, None).await;

    assert!(out.result.is_success());
    assert_eq!(out.record_ids("users"), (15..=30).collect::<Vec<_>>());
    let stream = out.result.stream("users").unwrap();
    assert_eq!(stream.records_skipped, 14);
    assert_eq!(stream.records_emitted, 16);
    assert_eq!(
        api.requests()[0].query.get("since").map(String::as_str),
        Some("2024-01-01T00:00:15Z")
    );
    assert_eq!(
        bookmark_of(&out.last_state(), "users"),
        Some(json!("2024-01-01T00:00:30Z"))
    );
}

#[tokio::test]
async fn state_is_emitted_every_checkpoint_interval() {
    let out = run_tap(&users_tap("  checkpoint_interval_records: 10"), Arc::new(users_api()), SyncState::new(), None).await;

    let stream = out.result.stream("users").unwrap();
    assert_eq!(stream.checkpoints, 4);
    assert_eq!(out.of_kind(MessageKind::State).len(), 4);

    // Each interval STATE follows the tenth record of its batch and carries
    // that record's bookmark.
    let mut seen = 0;
    for message in &out.messages {
        match message {
            Message::Record(_) => seen += 1,
            Message::State(state) if seen < 30 => {
                assert_eq!(seen % 10, 0);
                assert_eq!(
                    bookmark_of(&state.value, "users"),
                    Some(json!(format!("2024-01-01T00:00:{seen:02}Z")))
                );
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn cancellation_stops_at_page_boundary_with_checkpoint() {
    let token = CancellationToken::new();
    let api = users_api().cancel_when_serving("/users?page=2", token.clone());
    let out = run_tap(
        &users_tap("  checkpoint_interval_records: 1000"),
        Arc::new(api),
        SyncState::new(),
        Some(token),
    )
    .await;

    assert_eq!(out.result.status, RunStatus::Cancelled);
    let stream = out.result.stream("users").unwrap();
    assert_eq!(stream.phase, StreamPhase::Cancelled);
    // Page two was already in flight and is drained before stopping.
    assert_eq!(out.record_ids("users"), (1..=20).collect::<Vec<_>>());
    assert_eq!(
        bookmark_of(&out.last_state(), "users"),
        Some(json!("2024-01-01T00:00:20Z"))
    );
}

#[tokio::test]
async fn exhausted_retries_flush_last_good_checkpoint() {
    let mut api = users_api();
    for _ in 0..5 {
        api = api.fault("/users?page=2", HttpResponse::new(503, "unavailable"));
    }
    let api = Arc::new(api);
    let out = run_tap(&users_tap("  checkpoint_interval_records: 1000"), api.clone(), SyncState::new(), None).await;

    assert_eq!(out.result.status, RunStatus::Failed);
    let stream = out.result.stream("users").unwrap();
    assert_eq!(stream.phase, StreamPhase::Failed);
    assert_eq!(stream.records_emitted, 10);
    assert_eq!(stream.error.as_ref().unwrap().code, "RETRIES_EXHAUSTED");
    assert_eq!(api.requests().len(), 6);

    assert_eq!(out.record_ids("users"), (1..=10).collect::<Vec<_>>());
    assert_eq!(out.of_kind(MessageKind::State).len(), 1);
    assert!(matches!(out.messages.last(), Some(Message::State(_))));
    assert_eq!(
        bookmark_of(&out.last_state(), "users"),
        Some(json!("2024-01-01T00:00:10Z"))
    );
}

/// Accepts runs but refuses every state write.
#[derive(Default)]
struct ReadOnlyStore {
    saves: Mutex<u32>,
}

impl StateBackend for ReadOnlyStore {
    fn load_state(&self, _tap: &TapId) -> tapkit_state::error::Result<Option<SyncState>> {
        Ok(None)
    }

    fn save_state(&self, _tap: &TapId, _state: &SyncState) -> tapkit_state::error::Result<()> {
        *self.saves.lock().unwrap() += 1;
        Err(StateError::Io(std::io::Error::other("read-only file system")))
    }

    fn start_run(&self, _tap: &TapId) -> tapkit_state::error::Result<i64> {
        Ok(1)
    }

    fn complete_run(&self, _run_id: i64, _status: RunStatus, _stats: &RunStats) -> tapkit_state::error::Result<()> {
        Ok(())
    }

    fn insert_rejected_records(
        &self,
        _tap: &TapId,
        _run_id: i64,
        records: &[RejectedRecord],
    ) -> tapkit_state::error::Result<u64> {
        Ok(records.len() as u64)
    }
}

#[tokio::test]
async fn failed_state_save_is_not_emitted_twice() {
    let config = parse_tap_str(&users_tap("  checkpoint_interval_records: 10")).unwrap();
    let tap = Tap::with_transport(config, Arc::new(users_api()));
    let catalog = tap.discover().await.unwrap();
    let store = Arc::new(ReadOnlyStore::default());

    let mut emitter = MessageEmitter::new(Vec::new());
    let result = tap
        .orchestrator(catalog)
        .with_state_backend(TapId::new("scripted"), store.clone())
        .run(SyncState::new(), &mut emitter)
        .await;
    let output = String::from_utf8(emitter.into_inner()).unwrap();
    let states = output
        .lines()
        .filter(|line| serde_json::from_str::<Message>(line).unwrap().kind() == MessageKind::State)
        .count();

    assert_eq!(result.status, RunStatus::Failed);
    let stream = result.stream("users").unwrap();
    assert_eq!(stream.phase, StreamPhase::Failed);
    assert_eq!(stream.records_emitted, 10);
    assert_eq!(stream.checkpoints, 1);
    assert_eq!(states, 1);
    assert_eq!(*store.saves.lock().unwrap(), 1);
}

const BROKEN_STREAM: &str = r#"
  - name: broken
    path: /broken
    pagination: { kind: single }
    schema: { type: object, properties: { id: { type: integer } } }
"#;

#[tokio::test]
async fn continue_policy_keeps_syncing_after_stream_failure() {
    let streams = format!("{BROKEN_STREAM}{USERS_STREAM}");
    let yaml = tap_yaml("  on_stream_failure: continue", &streams);
    let out = run_tap(&yaml, Arc::new(users_api()), SyncState::new(), None).await;

    assert_eq!(out.result.status, RunStatus::Failed);
    let broken = out.result.stream("broken").unwrap();
    assert_eq!(broken.phase, StreamPhase::Failed);
    assert_eq!(broken.error.as_ref().unwrap().category, ErrorCategory::TerminalRequest);
    assert_eq!(out.result.stream("users").unwrap().phase, StreamPhase::Completed);
    assert_eq!(out.record_ids("users").len(), 30);
}

#[tokio::test]
async fn abort_policy_leaves_remaining_streams_pending() {
    let streams = format!("{BROKEN_STREAM}{USERS_STREAM}");
    let yaml = tap_yaml("  on_stream_failure: abort", &streams);
    let out = run_tap(&yaml, Arc::new(users_api()), SyncState::new(), None).await;

    assert_eq!(out.result.status, RunStatus::Failed);
    assert_eq!(out.result.stream("users").unwrap().phase, StreamPhase::Pending);
    assert!(out.record_ids("users").is_empty());
    assert!(!out
        .messages
        .iter()
        .any(|m| m.stream() == Some("users")));
}

#[tokio::test]
async fn full_table_stream_is_wrapped_in_activate_version() {
    let streams = r#"
  - name: users
    path: /users
    pagination: { kind: page_number, page_size: 10 }
    primary_keys: [id]
"#;
    let out = run_tap(&tap_yaml("  activate_version: true", streams), Arc::new(users_api()), SyncState::new(), None).await;

    assert!(out.result.is_success());
    let kinds: Vec<MessageKind> = out.messages.iter().map(Message::kind).collect();
    assert_eq!(kinds[0], MessageKind::Schema);
    assert_eq!(kinds[1], MessageKind::ActivateVersion);
    assert_eq!(kinds[kinds.len() - 2], MessageKind::ActivateVersion);

    let versions: Vec<i64> = out
        .messages
        .iter()
        .filter_map(|m| match m {
            Message::ActivateVersion(a) => Some(a.version),
            _ => None,
        })
        .collect();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0], versions[1]);
    assert!(out.messages.iter().all(|m| match m {
        Message::Record(r) => r.version == Some(versions[0]),
        _ => true,
    }));

    let state = out.last_state();
    let users = state.stream("users").unwrap();
    assert_eq!(users.version, Some(versions[0]));
    assert!(users.complete);
}

#[tokio::test]
async fn batch_mode_writes_files_instead_of_records() {
    let dir = tempfile::tempdir().unwrap();
    let sync = format!(
        "  batch: {{ root: {}, records_per_file: 12 }}",
        dir.path().display()
    );
    let out = run_tap(&users_tap(&sync), Arc::new(users_api()), SyncState::new(), None).await;

    assert!(out.result.is_success());
    assert!(out.of_kind(MessageKind::Record).is_empty());
    let batches = out.of_kind(MessageKind::Batch);
    assert_eq!(batches.len(), 3);

    let mut lines = 0;
    for message in batches {
        let Message::Batch(batch) = message else {
            unreachable!()
        };
        assert_eq!(batch.stream, "users");
        assert_eq!(batch.encoding.format, "jsonl");
        for url in &batch.manifest {
            let path = url.strip_prefix("file://").unwrap();
            lines += std::fs::read_to_string(path).unwrap().lines().count();
        }
    }
    assert_eq!(lines, 30);
    assert_eq!(out.result.stream("users").unwrap().records_emitted, 30);
}
