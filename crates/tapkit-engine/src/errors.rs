//! Sync error model.

use tapkit_types::error::{ErrorCategory, TapError};

// ---------------------------------------------------------------------------
// SyncError: what can stop a stream or a run
// ---------------------------------------------------------------------------

/// Error raised while syncing a stream.
///
/// `Tap` wraps a typed [`TapError`] from the remote API, the reconciler or
/// the bookmark tracker; it fails the stream and the run continues or
/// aborts according to the stream failure policy.
///
/// `Emit`, `Cancelled` and `Infrastructure` always end the run.
#[derive(Debug)]
pub enum SyncError {
    /// Typed tap error (stream-fatal).
    Tap(TapError),
    /// Writing to the output channel failed.
    Emit(std::io::Error),
    /// The caller cancelled the run.
    Cancelled,
    /// Infrastructure error (state backend, batch files, task join).
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tap(e) => write!(f, "{e}"),
            Self::Emit(e) => write!(f, "failed to write message: {e}"),
            Self::Cancelled => f.write_str("sync cancelled"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tap(e) => Some(e),
            Self::Emit(e) => Some(e),
            Self::Cancelled | Self::Infrastructure(_) => None,
        }
    }
}

impl From<TapError> for SyncError {
    fn from(e: TapError) -> Self {
        Self::Tap(e)
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl SyncError {
    /// Returns the typed tap error if this is a `Tap` variant.
    #[must_use]
    pub fn as_tap_error(&self) -> Option<&TapError> {
        match self {
            Self::Tap(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        self.as_tap_error().map(|e| e.category)
    }

    /// Whether the failure is confined to one stream.
    ///
    /// Only these honour `on_stream_failure: continue`.
    #[must_use]
    pub fn is_stream_scoped(&self) -> bool {
        matches!(self, Self::Tap(_))
    }
}
