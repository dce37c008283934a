//! HTTP transport seam.
//!
//! The engine talks to remote APIs only through [`HttpTransport`]. The
//! production implementation wraps one pooled `reqwest::Client` per run;
//! tests substitute a scripted transport.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tapkit_types::error::TapError;

use crate::pagination::PageParams;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// One outgoing request. Headers are assembled fresh for every request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Absolute URL without query string.
    pub url: String,
    pub query: PageParams,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            query: PageParams::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

/// A completed exchange. Header names are stored lowercase.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// JSON response with status 200.
    #[must_use]
    pub fn json_ok(body: &serde_json::Value) -> Self {
        Self::new(200, body.to_string())
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON. An empty body is `null`.
    ///
    /// # Errors
    ///
    /// Returns an internal [`TapError`] when the body is not valid JSON.
    pub fn json(&self) -> Result<serde_json::Value, TapError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&self.body).map_err(|e| {
            TapError::internal("MALFORMED_BODY", format!("response body is not JSON: {e}"))
                .with_status(self.status)
        })
    }
}

/// Executes HTTP exchanges.
///
/// Only network-level failures are errors. Every status code, including
/// 4xx and 5xx, comes back as a response for the retry policy to classify.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TapError>;
}

/// `reqwest`-backed transport holding the run's connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a pooled client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns a config [`TapError`] if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, TapError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tapkit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TapError::config("HTTP_CLIENT", format!("http client build failed: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TapError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, &request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            let message = format!("{} {}: {e}", request.method.as_str(), request.url);
            if e.is_builder() {
                TapError::config("INVALID_REQUEST", message)
            } else {
                TapError::transient("NETWORK_ERROR", message)
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TapError::transient("NETWORK_ERROR", format!("reading response body: {e}")))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_lookup_ignores_case() {
        let resp = HttpResponse::new(200, "").with_header("X-Next-Page", "3");
        assert_eq!(resp.header("x-next-page"), Some("3"));
        assert_eq!(resp.header("X-NEXT-PAGE"), Some("3"));
    }

    #[test]
    fn empty_body_is_null() {
        assert_eq!(HttpResponse::new(204, "  ").json().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn malformed_body_is_internal_error() {
        let err = HttpResponse::new(200, "<html>").json().unwrap_err();
        assert_eq!(err.code, "MALFORMED_BODY");
        assert_eq!(err.status, Some(200));
    }

    #[test]
    fn json_ok_roundtrips() {
        let resp = HttpResponse::json_ok(&json!([{"id": 1}]));
        assert!(resp.is_success());
        assert_eq!(resp.json().unwrap(), json!([{"id": 1}]));
    }

    #[test]
    fn method_serializes_uppercase() {
        let m: HttpMethod = serde_json::from_str("\"POST\"").unwrap();
        assert_eq!(m, HttpMethod::Post);
    }
}
