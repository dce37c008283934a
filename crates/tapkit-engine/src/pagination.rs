//! Pagination cursors.
//!
//! A [`Paginator`] looks at the page just fetched and decides the query
//! parameters of the next request, or `None` when the stream is exhausted.
//! Paginators are stateless; loop protection lives in the record source.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::HttpResponse;

/// Query parameters of one page request.
pub type PageParams = BTreeMap<String, String>;

/// The page a paginator decides from.
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    pub response: &'a HttpResponse,
    /// Parsed body (`null` when empty).
    pub body: &'a Value,
    /// Records extracted from this page.
    pub record_count: usize,
}

pub trait Paginator: Send + Sync {
    /// Parameters of the first request.
    fn initial(&self) -> PageParams {
        PageParams::new()
    }

    /// Parameters of the request following `page`, derived from `current`.
    fn next(&self, page: &Page<'_>, current: &PageParams) -> Option<PageParams>;
}

fn with_param(current: &PageParams, param: &str, value: String) -> PageParams {
    let mut next = current.clone();
    next.insert(param.to_string(), value);
    next
}

/// Resolve a dotted path (`meta.next`, `data.0.id`) inside a JSON value.
#[must_use]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn token_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Strategies ──────────────────────────────────────────────────────

fn default_next_header() -> String {
    "X-Next-Page".to_string()
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_start_page() -> u64 {
    1
}

/// Next token read from a response header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderToken {
    #[serde(default = "default_next_header")]
    pub header: String,
    #[serde(default = "default_page_param")]
    pub param: String,
}

impl Default for HeaderToken {
    fn default() -> Self {
        Self {
            header: default_next_header(),
            param: default_page_param(),
        }
    }
}

impl Paginator for HeaderToken {
    fn next(&self, page: &Page<'_>, current: &PageParams) -> Option<PageParams> {
        let token = page.response.header(&self.header)?.trim();
        if token.is_empty() {
            return None;
        }
        Some(with_param(current, &self.param, token.to_string()))
    }
}

/// Next token or offset read from a dotted field of the JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyField {
    pub path: String,
    #[serde(default = "default_page_param")]
    pub param: String,
}

impl Paginator for BodyField {
    fn next(&self, page: &Page<'_>, current: &PageParams) -> Option<PageParams> {
        let token = lookup_path(page.body, &self.path).and_then(token_from_value)?;
        Some(with_param(current, &self.param, token))
    }
}

/// Incrementing page-number parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageNumber {
    #[serde(default = "default_page_param")]
    pub param: String,
    #[serde(default = "default_start_page")]
    pub start: u64,
    /// A page shorter than this is the last one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

impl Default for PageNumber {
    fn default() -> Self {
        Self {
            param: default_page_param(),
            start: default_start_page(),
            page_size: None,
        }
    }
}

impl Paginator for PageNumber {
    fn initial(&self) -> PageParams {
        PageParams::from([(self.param.clone(), self.start.to_string())])
    }

    fn next(&self, page: &Page<'_>, current: &PageParams) -> Option<PageParams> {
        if page.record_count == 0 || self.page_size.is_some_and(|size| page.record_count < size) {
            return None;
        }
        let number = current
            .get(&self.param)
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(self.start);
        Some(with_param(current, &self.param, (number + 1).to_string()))
    }
}

/// Endpoint that returns everything in one response.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePage;

impl Paginator for SinglePage {
    fn next(&self, _page: &Page<'_>, _current: &PageParams) -> Option<PageParams> {
        None
    }
}

/// Pagination strategy as declared in a tap definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaginationConfig {
    HeaderToken(HeaderToken),
    BodyField(BodyField),
    PageNumber(PageNumber),
    Single,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self::HeaderToken(HeaderToken::default())
    }
}

impl PaginationConfig {
    #[must_use]
    pub fn build(&self) -> Arc<dyn Paginator> {
        match self {
            Self::HeaderToken(p) => Arc::new(p.clone()),
            Self::BodyField(p) => Arc::new(p.clone()),
            Self::PageNumber(p) => Arc::new(p.clone()),
            Self::Single => Arc::new(SinglePage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page<'a>(response: &'a HttpResponse, body: &'a Value, record_count: usize) -> Page<'a> {
        Page {
            response,
            body,
            record_count,
        }
    }

    #[test]
    fn header_token_advances_and_stops() {
        let p = HeaderToken::default();
        let current = PageParams::from([("since".to_string(), "2024".to_string())]);

        let with_token = HttpResponse::new(200, "").with_header("X-Next-Page", "abc");
        let next = p.next(&page(&with_token, &Value::Null, 10), &current).unwrap();
        assert_eq!(next["page"], "abc");
        assert_eq!(next["since"], "2024");

        let empty = HttpResponse::new(200, "").with_header("X-Next-Page", " ");
        assert!(p.next(&page(&empty, &Value::Null, 10), &current).is_none());
        let absent = HttpResponse::new(200, "");
        assert!(p.next(&page(&absent, &Value::Null, 10), &current).is_none());
    }

    #[test]
    fn body_field_reads_dotted_path() {
        let p = BodyField {
            path: "meta.next_cursor".into(),
            param: "cursor".into(),
        };
        let resp = HttpResponse::new(200, "");
        let body = json!({"meta": {"next_cursor": "c2"}, "data": []});
        let next = p.next(&page(&resp, &body, 0), &PageParams::new()).unwrap();
        assert_eq!(next["cursor"], "c2");

        for terminal in [json!({"meta": {"next_cursor": null}}), json!({"meta": {"next_cursor": ""}}), json!({})] {
            assert!(p.next(&page(&resp, &terminal, 5), &PageParams::new()).is_none());
        }
    }

    #[test]
    fn body_field_accepts_numeric_offsets() {
        let p = BodyField {
            path: "next_offset".into(),
            param: "offset".into(),
        };
        let resp = HttpResponse::new(200, "");
        let body = json!({"next_offset": 200});
        assert_eq!(p.next(&page(&resp, &body, 100), &PageParams::new()).unwrap()["offset"], "200");
    }

    #[test]
    fn page_number_increments_until_short_page() {
        let p = PageNumber {
            page_size: Some(2),
            ..PageNumber::default()
        };
        let resp = HttpResponse::new(200, "");
        let first = p.initial();
        assert_eq!(first["page"], "1");

        let second = p.next(&page(&resp, &Value::Null, 2), &first).unwrap();
        assert_eq!(second["page"], "2");
        assert!(p.next(&page(&resp, &Value::Null, 1), &second).is_none());
        assert!(PageNumber::default()
            .next(&page(&resp, &Value::Null, 0), &second)
            .is_none());
    }

    #[test]
    fn lookup_path_walks_objects_and_arrays() {
        let body = json!({"a": {"b": [{"c": 1}]}});
        assert_eq!(lookup_path(&body, "a.b.0.c"), Some(&json!(1)));
        assert_eq!(lookup_path(&body, "a.x"), None);
        assert_eq!(lookup_path(&body, ""), Some(&body));
    }

    #[test]
    fn config_defaults_to_header_token() {
        let cfg: PaginationConfig = serde_json::from_value(json!({"kind": "header_token"})).unwrap();
        assert_eq!(cfg, PaginationConfig::default());
        let cfg: PaginationConfig =
            serde_json::from_value(json!({"kind": "page_number", "page_size": 50})).unwrap();
        assert!(matches!(cfg, PaginationConfig::PageNumber(PageNumber { start: 1, page_size: Some(50), .. })));
    }
}
