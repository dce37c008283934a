//! Authenticator seam.
//!
//! An [`Authenticator`] hands out the credential headers for one request.
//! It is called before every request and its result is never cached, so an
//! implementation that refreshes tokens sees every call.

use std::collections::BTreeMap;
use std::sync::Arc;

use tapkit_types::error::TapError;

use crate::config::types::AuthConfig;

pub trait Authenticator: Send + Sync {
    /// Headers to merge into the next request.
    ///
    /// # Errors
    ///
    /// Returns an authorization [`TapError`] when credentials cannot be
    /// produced; the stream fails without sending the request.
    fn headers(&self) -> Result<BTreeMap<String, String>, TapError>;
}

/// Sends no credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn headers(&self) -> Result<BTreeMap<String, String>, TapError> {
        Ok(BTreeMap::new())
    }
}

/// Fixed header set.
#[derive(Clone, Default)]
pub struct StaticHeaders(BTreeMap<String, String>);

impl StaticHeaders {
    #[must_use]
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        Self(headers)
    }
}

impl std::fmt::Debug for StaticHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl Authenticator for StaticHeaders {
    fn headers(&self) -> Result<BTreeMap<String, String>, TapError> {
        Ok(self.0.clone())
    }
}

/// `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

impl Authenticator for BearerToken {
    fn headers(&self) -> Result<BTreeMap<String, String>, TapError> {
        if self.token.trim().is_empty() {
            return Err(TapError::authorization(
                "MISSING_CREDENTIALS",
                "bearer token is empty",
            ));
        }
        Ok(BTreeMap::from([(
            "Authorization".to_string(),
            format!("Bearer {}", self.token),
        )]))
    }
}

/// API key sent in a named header.
#[derive(Clone)]
pub struct ApiKey {
    header: String,
    value: String,
}

impl ApiKey {
    pub fn new(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey({}: ***)", self.header)
    }
}

impl Authenticator for ApiKey {
    fn headers(&self) -> Result<BTreeMap<String, String>, TapError> {
        if self.value.trim().is_empty() {
            return Err(TapError::authorization(
                "MISSING_CREDENTIALS",
                format!("api key for header '{}' is empty", self.header),
            ));
        }
        Ok(BTreeMap::from([(self.header.clone(), self.value.clone())]))
    }
}

/// Build the authenticator declared in a tap definition.
#[must_use]
pub fn from_config(config: &AuthConfig) -> Arc<dyn Authenticator> {
    match config {
        AuthConfig::None => Arc::new(NoAuth),
        AuthConfig::Headers { headers } => Arc::new(StaticHeaders::new(headers.clone())),
        AuthConfig::Bearer { token } => Arc::new(BearerToken::new(token.clone())),
        AuthConfig::ApiKey { header, value } => Arc::new(ApiKey::new(header.clone(), value.clone())),
    }
}
