//! Stream synchronization engine for paginated-API taps.
//!
//! Fetches pages from HTTP endpoints, reconciles records against the
//! catalog schema, tracks replication bookmarks and emits Singer-style
//! messages with periodic STATE checkpoints.

pub mod auth;
pub mod batch;
pub mod bookmark;
pub mod config;
pub mod discovery;
pub(crate) mod dlq;
pub mod emitter;
pub mod errors;
pub mod http;
pub mod orchestrator;
pub mod pagination;
pub mod reconcile;
pub mod result;
pub mod retry;
pub mod source;
pub mod tap;

// Re-export public API for convenience
pub use emitter::{Mapper, MessageEmitter};
pub use errors::SyncError;
pub use orchestrator::{StreamPhase, SyncOptions, SyncOrchestrator};
pub use result::{StreamSyncResult, SyncResult};
pub use tap::Tap;
