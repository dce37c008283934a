//! Structured error model for tap operations.
//!
//! [`TapError`] carries classification, retry metadata, and optional
//! diagnostic details. Construct via category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a tap error.
///
/// Determines retry behavior and what the engine does with the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network failure or 5xx response (retryable).
    Transient,
    /// 429 response (retryable, may carry `Retry-After`).
    RateLimit,
    /// 401/403 response.
    Authorization,
    /// Any other 4xx response.
    TerminalRequest,
    /// A single record violates its schema or key constraints.
    DataIntegrity,
    /// Bookmark values cannot be ordered.
    Ordering,
    /// Invalid tap definition or catalog.
    Config,
    /// Engine bug or malformed response body.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::RateLimit => "rate_limit",
            Self::Authorization => "authorization",
            Self::TerminalRequest => "terminal_request",
            Self::DataIntegrity => "data_integrity",
            Self::Ordering => "ordering",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// What an error invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// The whole stream stops.
    Stream,
    /// One HTTP exchange failed; the caller decides whether to retry.
    Request,
    /// One record is skipped.
    Record,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stream => "stream",
            Self::Request => "request",
            Self::Record => "record",
        };
        f.write_str(s)
    }
}

/// Structured tap error with retry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct TapError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    /// Stable SCREAMING_SNAKE_CASE code.
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// HTTP status that produced the error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TapError {
    fn build(
        category: ErrorCategory,
        scope: ErrorScope,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            scope,
            code: code.into(),
            message: message.into(),
            retryable,
            status: None,
            retry_after_ms: None,
            details: None,
        }
    }

    /// Network-level or server-side failure (retryable).
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(ErrorCategory::Transient, ErrorScope::Request, true, code, message)
    }

    /// Throttled by the remote API (retryable).
    pub fn rate_limit(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::build(ErrorCategory::RateLimit, ErrorScope::Request, true, code, message);
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Credentials rejected (never retried).
    pub fn authorization(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(ErrorCategory::Authorization, ErrorScope::Stream, false, code, message)
    }

    /// Request rejected by the API (never retried).
    pub fn terminal_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(ErrorCategory::TerminalRequest, ErrorScope::Stream, false, code, message)
    }

    /// Record-level violation; the record is skipped.
    pub fn data_integrity(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(ErrorCategory::DataIntegrity, ErrorScope::Record, false, code, message)
    }

    /// Replication-key values cannot be compared.
    pub fn ordering(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(ErrorCategory::Ordering, ErrorScope::Stream, false, code, message)
    }

    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(ErrorCategory::Config, ErrorScope::Stream, false, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(ErrorCategory::Internal, ErrorScope::Stream, false, code, message)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the default scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    /// Only record-scoped errors let the stream continue.
    #[must_use]
    pub fn is_record_scoped(&self) -> bool {
        self.scope == ErrorScope::Record
    }
}
