use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use tapkit_engine::config::{parse_catalog, parse_tap, validate_tap};
use tapkit_engine::{MessageEmitter, SyncOrchestrator, SyncResult, Tap};
use tapkit_state::{JsonFileStateBackend, SqliteStateBackend, StateBackend};
use tapkit_types::state::{SyncState, TapId};

use crate::SyncArgs;

/// A validated tap with its catalog and starting state, ready to run.
pub struct PreparedSync {
    pub orchestrator: SyncOrchestrator,
    pub initial: SyncState,
    pub cancel: CancellationToken,
}

/// Parse and validate, resolve the catalog, then the starting state.
pub async fn prepare(args: &SyncArgs) -> Result<PreparedSync> {
    let config = parse_tap(&args.tap)
        .with_context(|| format!("Failed to parse tap: {}", args.tap.display()))?;
    validate_tap(&config)?;

    let tap = Tap::from_config(config)?;
    let supplied = args.catalog.as_deref().map(parse_catalog).transpose()?;
    let catalog = tap.resolve_catalog(supplied).await?;
    catalog.validate()?;

    tracing::info!(
        tap = tap.name(),
        streams = catalog.selected().count(),
        "Tap validated"
    );

    let tap_id = TapId::new(tap.name());
    let cancel = CancellationToken::new();
    let mut orchestrator = tap.orchestrator(catalog).with_cancellation(cancel.clone());
    let mut initial = SyncState::new();

    if let Some(path) = &args.state {
        initial = JsonFileStateBackend::read(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
    }
    if let Some(path) = &args.state_db {
        let backend = open_state_db(path)?;
        if let Some(saved) = backend.load_state(&tap_id)? {
            initial = saved;
        }
        orchestrator = orchestrator.with_state_backend(tap_id, backend);
    }

    Ok(PreparedSync {
        orchestrator,
        initial,
        cancel,
    })
}

fn open_state_db(path: &Path) -> Result<Arc<dyn StateBackend>> {
    let backend = SqliteStateBackend::open(path)
        .with_context(|| format!("Failed to open state database: {}", path.display()))?;
    Ok(Arc::new(backend))
}

/// Cancel the run on Ctrl-C; the orchestrator stops at the next page boundary.
pub fn cancel_on_ctrl_c(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current page");
            cancel.cancel();
        }
    });
}

pub fn print_summary(result: &SyncResult) {
    let stats = result.stats();
    eprintln!("Sync finished: {}", result.status);
    for stream in &result.streams {
        eprintln!(
            "  {:24} {:10} emitted={} rejected={} skipped={} pages={}",
            stream.stream,
            stream.phase.as_str(),
            stream.records_emitted,
            stream.records_rejected,
            stream.records_skipped,
            stream.pages_fetched,
        );
    }
    eprintln!("  Records extracted: {}", stats.records_extracted);
    eprintln!("  Records emitted:   {}", stats.records_emitted);
    eprintln!("  Records rejected:  {}", stats.records_rejected);
    eprintln!("  Duration:          {:.2}s", result.duration_secs);
}

/// Execute the `sync` command: run the tap, writing messages to stdout.
pub async fn execute(args: &SyncArgs) -> Result<()> {
    let prepared = prepare(args).await?;
    cancel_on_ctrl_c(&prepared.cancel);

    let mut emitter = MessageEmitter::new(std::io::stdout());
    let result = prepared
        .orchestrator
        .run(prepared.initial, &mut emitter)
        .await;
    emitter.sink_mut().flush()?;

    print_summary(&result);
    match result.error {
        None => Ok(()),
        Some(err) => Err(anyhow::Error::new(err).context(format!("Sync {}", result.status))),
    }
}
