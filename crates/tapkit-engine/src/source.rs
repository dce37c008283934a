//! Record source: paginated extraction for one stream.
//!
//! A [`RecordSource`] drives a [`StreamEndpoint`] page by page. Every page
//! request goes through the authenticator, the retry policy and the shared
//! transport; records are buffered one page at a time and handed out lazily.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};
use tapkit_types::catalog::Stream;
use tapkit_types::error::{ErrorCategory, TapError};
use tapkit_types::stream::SyncLimits;

use crate::auth::Authenticator;
use crate::http::{HttpMethod, HttpRequest, HttpTransport};
use crate::pagination::{lookup_path, HeaderToken, Page, PageParams, Paginator};
use crate::retry::{classify_status, RetryPolicy, RetryState};

/// A JSON object record as extracted from a response.
pub type RawRecord = Map<String, Value>;

/// One page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page index within the stream.
    pub number: u64,
    /// Pagination and bookmark-filter query parameters.
    pub params: PageParams,
}

/// Capability interface of a stream's remote endpoint.
pub trait StreamEndpoint: Send + Sync {
    /// Query parameters of the first page, filtered by `bookmark` when resuming.
    fn initial_params(&self, bookmark: Option<&Value>) -> PageParams;

    /// Assemble the request for `page`. Credentials are added by the caller.
    ///
    /// # Errors
    ///
    /// Returns a config [`TapError`] when the request cannot be built.
    fn build_request(&self, page: &PageRequest) -> Result<HttpRequest, TapError>;

    /// Records carried by a parsed response body.
    ///
    /// # Errors
    ///
    /// Returns an internal [`TapError`] for bodies that hold non-object records.
    fn extract_records(&self, body: &Value) -> Result<Vec<RawRecord>, TapError>;

    /// Parameters of the page after `page`, or `None` at the end.
    fn next_page(&self, page: &Page<'_>, current: &PageParams) -> Option<PageParams>;
}

// ── REST endpoint ───────────────────────────────────────────────────

static PATH_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid path param regex"));

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_path_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Configured JSON-over-HTTP endpoint.
#[derive(Clone)]
pub struct RestEndpoint {
    url_base: String,
    path: String,
    path_params: BTreeMap<String, String>,
    query: PageParams,
    headers: BTreeMap<String, String>,
    method: HttpMethod,
    payload: Option<Value>,
    records_path: Option<String>,
    bookmark_param: Option<String>,
    paginator: Arc<dyn Paginator>,
}

impl std::fmt::Debug for RestEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestEndpoint")
            .field("url_base", &self.url_base)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("records_path", &self.records_path)
            .field("bookmark_param", &self.bookmark_param)
            .finish_non_exhaustive()
    }
}

impl RestEndpoint {
    /// GET endpoint with header-token pagination.
    pub fn new(url_base: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            url_base: url_base.into(),
            path: path.into(),
            path_params: BTreeMap::new(),
            query: PageParams::new(),
            headers: BTreeMap::new(),
            method: HttpMethod::Get,
            payload: None,
            records_path: None,
            bookmark_param: None,
            paginator: Arc::new(HeaderToken::default()),
        }
    }

    #[must_use]
    pub fn with_path_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.path_params = params;
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: PageParams) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_records_path(mut self, path: Option<String>) -> Self {
        self.records_path = path.filter(|p| !p.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_bookmark_param(mut self, param: Option<String>) -> Self {
        self.bookmark_param = param;
        self
    }

    #[must_use]
    pub fn with_paginator(mut self, paginator: Arc<dyn Paginator>) -> Self {
        self.paginator = paginator;
        self
    }

    /// Absolute URL with `{name}` placeholders filled from the path params.
    ///
    /// # Errors
    ///
    /// Returns a config [`TapError`] naming every placeholder without a value.
    pub fn url(&self) -> Result<String, TapError> {
        let mut missing = Vec::new();
        let path = PATH_PARAM_RE.replace_all(&self.path, |caps: &regex::Captures<'_>| {
            match self.path_params.get(&caps[1]) {
                Some(value) => encode_path_value(value),
                None => {
                    missing.push(caps[1].to_string());
                    String::new()
                }
            }
        });
        if !missing.is_empty() {
            return Err(TapError::config(
                "MISSING_PATH_PARAM",
                format!("path '{}' needs value(s) for: {}", self.path, missing.join(", ")),
            ));
        }
        let base = self.url_base.trim_end_matches('/');
        if path.is_empty() {
            return Ok(base.to_string());
        }
        let path = path.trim_start_matches('/');
        Ok(format!("{base}/{path}"))
    }
}

impl StreamEndpoint for RestEndpoint {
    fn initial_params(&self, bookmark: Option<&Value>) -> PageParams {
        let mut params = self.paginator.initial();
        if let (Some(param), Some(value)) = (&self.bookmark_param, bookmark.and_then(query_value)) {
            params.insert(param.clone(), value);
        }
        params
    }

    fn build_request(&self, page: &PageRequest) -> Result<HttpRequest, TapError> {
        let mut query = self.query.clone();
        query.extend(page.params.clone());
        Ok(HttpRequest {
            method: self.method,
            url: self.url()?,
            query,
            headers: self.headers.clone(),
            body: self.payload.clone(),
        })
    }

    fn extract_records(&self, body: &Value) -> Result<Vec<RawRecord>, TapError> {
        let selected = match &self.records_path {
            Some(path) => match lookup_path(body, path) {
                Some(value) => value,
                None => return Ok(Vec::new()),
            },
            None => body,
        };
        match selected {
            Value::Null => Ok(Vec::new()),
            Value::Object(record) => Ok(vec![record.clone()]),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Object(record) => Ok(record.clone()),
                    other => Err(TapError::internal(
                        "NON_OBJECT_RECORD",
                        format!("record {i} is not a JSON object: {other}"),
                    )),
                })
                .collect(),
            other => Err(TapError::internal(
                "NON_OBJECT_RECORD",
                format!("response records are not objects: {other}"),
            )),
        }
    }

    fn next_page(&self, page: &Page<'_>, current: &PageParams) -> Option<PageParams> {
        self.paginator.next(page, current)
    }
}

// ── Record source ───────────────────────────────────────────────────

/// Counters reported by a [`RecordSource`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceStats {
    pub pages_fetched: u64,
    pub records_extracted: u64,
    /// Backoff delays slept across all pages.
    pub retry_delays: Vec<Duration>,
}

/// Lazily paginated record stream.
pub struct RecordSource {
    stream: String,
    endpoint: Arc<dyn StreamEndpoint>,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn Authenticator>,
    retry: RetryPolicy,
    max_pages: u64,
    next_params: Option<PageParams>,
    visited: HashSet<PageParams>,
    buffer: VecDeque<RawRecord>,
    stats: SourceStats,
}

impl RecordSource {
    /// Source starting at page one, filtered by `bookmark` for bookmarked streams.
    pub fn new(
        stream: &Stream,
        endpoint: Arc<dyn StreamEndpoint>,
        transport: Arc<dyn HttpTransport>,
        auth: Arc<dyn Authenticator>,
        retry: RetryPolicy,
        bookmark: Option<&Value>,
    ) -> Self {
        let bookmark = bookmark.filter(|_| stream.replication_method.tracks_bookmark());
        let first = endpoint.initial_params(bookmark);
        Self {
            stream: stream.name.clone(),
            endpoint,
            transport,
            auth,
            retry,
            max_pages: SyncLimits::DEFAULT_MAX_PAGES,
            next_params: Some(first),
            visited: HashSet::new(),
            buffer: VecDeque::new(),
            stats: SourceStats::default(),
        }
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Next record, fetching the next page when the buffer is drained.
    ///
    /// # Errors
    ///
    /// Returns the page's [`TapError`]; the source is exhausted afterwards.
    pub async fn next_record(&mut self) -> Result<Option<RawRecord>, TapError> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            match self.next_page().await? {
                Some(records) => self.buffer.extend(records),
                None => return Ok(None),
            }
        }
    }

    /// Whether the current page has been fully handed out.
    #[must_use]
    pub fn at_page_boundary(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }

    /// Fetch the next page, bypassing the record buffer.
    ///
    /// # Errors
    ///
    /// Returns the page's [`TapError`]; the source is exhausted afterwards.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RawRecord>>, TapError> {
        let Some(params) = self.next_params.take() else {
            return Ok(None);
        };
        if self.stats.pages_fetched >= self.max_pages {
            tracing::warn!(
                stream = self.stream,
                max_pages = self.max_pages,
                "Page ceiling reached, stopping pagination"
            );
            return Ok(None);
        }
        if !self.visited.insert(params.clone()) {
            tracing::warn!(
                stream = self.stream,
                ?params,
                "Next page repeats an already fetched request, stopping pagination"
            );
            return Ok(None);
        }

        let request = PageRequest {
            number: self.stats.pages_fetched + 1,
            params,
        };
        let mut retry_state = RetryState::default();
        let endpoint = &self.endpoint;
        let transport = &self.transport;
        let auth = &self.auth;
        let page_request = &request;
        let outcome = self
            .retry
            .execute(&mut retry_state, move || async move {
                let mut http = endpoint.build_request(page_request)?;
                http.headers.extend(auth.headers()?);
                let response = transport.send(&http).await?;
                match classify_status(&response) {
                    Some(err) => Err(err),
                    None => Ok(response),
                }
            })
            .await;
        self.stats.retry_delays.extend(retry_state.delays);

        let response = outcome.map_err(|err| {
            if err.category == ErrorCategory::Authorization {
                tracing::error!(
                    stream = self.stream,
                    page = request.number,
                    code = %err.code,
                    "Authorization failure, skipping remaining pages"
                );
            }
            err
        })?;
        let body = response.json()?;
        let records = self.endpoint.extract_records(&body)?;

        let page = Page {
            response: &response,
            body: &body,
            record_count: records.len(),
        };
        self.next_params = self.endpoint.next_page(&page, &request.params);
        self.stats.pages_fetched += 1;
        self.stats.records_extracted += records.len() as u64;
        tracing::debug!(
            stream = self.stream,
            page = request.number,
            records = records.len(),
            has_next = self.next_params.is_some(),
            "Fetched page"
        );
        Ok(Some(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> RestEndpoint {
        RestEndpoint::new("https://api.example.com/v1/", "/repos/{owner}/{repo}/issues")
            .with_path_params(BTreeMap::from([
                ("owner".to_string(), "acme".to_string()),
                ("repo".to_string(), "tools/cli".to_string()),
            ]))
    }

    #[test]
    fn url_fills_and_encodes_path_params() {
        assert_eq!(
            endpoint().url().unwrap(),
            "https://api.example.com/v1/repos/acme/tools%2Fcli/issues"
        );
    }

    #[test]
    fn url_reports_all_missing_params() {
        let err = RestEndpoint::new("https://x", "/{a}/{b}").url().unwrap_err();
        assert_eq!(err.code, "MISSING_PATH_PARAM");
        assert!(err.message.contains("a, b"));
    }

    #[test]
    fn page_params_override_static_query() {
        let ep = endpoint()
            .with_query(PageParams::from([
                ("per_page".to_string(), "100".to_string()),
                ("page".to_string(), "0".to_string()),
            ]))
            .with_headers(BTreeMap::from([("Accept".to_string(), "application/json".to_string())]));
        let request = ep
            .build_request(&PageRequest {
                number: 2,
                params: PageParams::from([("page".to_string(), "2".to_string())]),
            })
            .unwrap();
        assert_eq!(request.query["page"], "2");
        assert_eq!(request.query["per_page"], "100");
        assert_eq!(request.headers["Accept"], "application/json");
    }

    #[test]
    fn bookmark_goes_into_first_page_params() {
        let ep = endpoint().with_bookmark_param(Some("since".into()));
        let params = ep.initial_params(Some(&json!("2024-01-01T00:00:00Z")));
        assert_eq!(params["since"], "2024-01-01T00:00:00Z");
        assert_eq!(ep.initial_params(Some(&json!(17)))["since"], "17");
        assert!(ep.initial_params(None).is_empty());
    }

    #[test]
    fn extract_records_shapes() {
        let ep = endpoint().with_records_path(Some("data.items".into()));
        let body = json!({"data": {"items": [{"id": 1}, {"id": 2}]}});
        assert_eq!(ep.extract_records(&body).unwrap().len(), 2);
        assert!(ep.extract_records(&json!({"data": {}})).unwrap().is_empty());

        let plain = endpoint();
        assert_eq!(plain.extract_records(&json!({"id": 1})).unwrap().len(), 1);
        assert!(plain.extract_records(&Value::Null).unwrap().is_empty());
        let err = plain.extract_records(&json!([1, 2])).unwrap_err();
        assert_eq!(err.code, "NON_OBJECT_RECORD");
    }
}
