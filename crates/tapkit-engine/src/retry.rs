//! Retry policy for HTTP exchanges.
//!
//! [`RetryPolicy`] is a plain value passed to the call site. Every attempt
//! of one logical request shares a [`RetryState`], which records the delays
//! actually slept so callers can report them.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tapkit_types::error::TapError;

use crate::http::HttpResponse;

/// Exponential backoff with a ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Attempt bookkeeping for a single logical request.
#[derive(Debug, Default)]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<TapError>,
    /// Delays slept before each retry, in order.
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based).
    ///
    /// `Retry-After` hints win over the computed backoff. Both are capped
    /// at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, err: &TapError, attempt: u32) -> Duration {
        if let Some(ms) = err.retry_after_ms {
            return Duration::from_millis(ms).min(self.max_delay);
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled_ms = self.base_delay.as_millis() as f64 * self.factor.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let max_ms = self.max_delay.as_millis() as f64;
        if !scaled_ms.is_finite() || scaled_ms >= max_ms {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay_ms = scaled_ms.max(0.0).round() as u64;
        Duration::from_millis(delay_ms)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Backoff sleeps are never interrupted. Exhaustion is reported as a
    /// non-retryable `RETRIES_EXHAUSTED` transient error.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the exhaustion error.
    pub async fn execute<T, F, Fut>(&self, state: &mut RetryState, mut op: F) -> Result<T, TapError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TapError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        loop {
            state.attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.retryable {
                return Err(err);
            }
            if state.attempt >= max_attempts {
                tracing::error!(
                    attempts = state.attempt,
                    category = %err.category,
                    code = %err.code,
                    "Max retries exhausted"
                );
                return Err(exhausted(&err, state.attempt));
            }

            let delay = self.delay_for(&err, state.attempt);
            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = delay.as_millis() as u64;
            tracing::warn!(
                attempt = state.attempt,
                max_attempts,
                delay_ms,
                category = %err.category,
                code = %err.code,
                status = err.status,
                "Retryable request failure, will retry"
            );
            state.delays.push(delay);
            state.last_error = Some(err);
            tokio::time::sleep(delay).await;
        }
    }
}

fn exhausted(last: &TapError, attempts: u32) -> TapError {
    let mut err = TapError::transient(
        "RETRIES_EXHAUSTED",
        format!("gave up after {attempts} attempts: {last}"),
    )
    .with_details(serde_json::json!({
        "attempts": attempts,
        "last_code": last.code,
    }));
    err.retryable = false;
    err.scope = tapkit_types::error::ErrorScope::Stream;
    err.status = last.status;
    err
}

/// Map a response status to the error it represents, if any.
///
/// 5xx is transient, 429 is a rate limit (honouring `Retry-After`),
/// 401/403 is an authorization failure and any other 4xx is terminal.
#[must_use]
pub fn classify_status(response: &HttpResponse) -> Option<TapError> {
    let status = response.status;
    let code = format!("HTTP_{status}");
    let message = format!("HTTP {status}: {}", body_excerpt(&response.body));
    let err = match status {
        429 => TapError::rate_limit(
            code,
            message,
            response.header("retry-after").and_then(parse_retry_after),
        ),
        401 | 403 => TapError::authorization(code, message),
        400..=499 => TapError::terminal_request(code, message),
        500..=599 => TapError::transient(code, message),
        _ => return None,
    };
    Some(err.with_status(status))
}

/// `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs.saturating_mul(1000));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let wait = at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(u64::try_from(wait).unwrap_or(0))
}

fn body_excerpt(body: &[u8]) -> String {
    const MAX_CHARS: usize = 200;
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.chars().count() > MAX_CHARS {
        format!("{}...", text.chars().take(MAX_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}
