//! Typed bookmark values for incremental sync position tracking.
//!
//! A bookmark marks the greatest replication-key value a stream has
//! committed so that the next run can resume from it. In state documents the
//! value is plain JSON; the engine converts it into a [`BookmarkValue`] of the
//! kind resolved from the stream schema before comparing.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How bookmark values of a stream are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookmarkKind {
    Integer,
    Number,
    /// RFC 3339 timestamps (or plain dates), compared as instants.
    Timestamp,
    /// Plain strings compared byte-wise.
    Lexicographic,
}

impl fmt::Display for BookmarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Timestamp => "timestamp",
            Self::Lexicographic => "lexicographic",
        };
        f.write_str(s)
    }
}

/// Typed replication-key position.
#[derive(Debug, Clone, PartialEq)]
pub enum BookmarkValue {
    Integer(i64),
    Number(f64),
    Timestamp(DateTime<Utc>),
    String(String),
}

impl BookmarkValue {
    #[must_use]
    pub fn kind(&self) -> BookmarkKind {
        match self {
            Self::Integer(_) => BookmarkKind::Integer,
            Self::Number(_) => BookmarkKind::Number,
            Self::Timestamp(_) => BookmarkKind::Timestamp,
            Self::String(_) => BookmarkKind::Lexicographic,
        }
    }

    /// Read a JSON value as a bookmark of `kind`. `null` yields `None`.
    ///
    /// # Errors
    ///
    /// Returns a description when the value cannot be read as `kind`.
    pub fn from_json(kind: BookmarkKind, value: &Value) -> Result<Option<Self>, String> {
        if value.is_null() {
            return Ok(None);
        }
        let parsed = match kind {
            BookmarkKind::Integer => match value {
                Value::Number(n) => n.as_i64().map(Self::Integer),
                Value::String(s) => s.trim().parse::<i64>().ok().map(Self::Integer),
                _ => None,
            },
            BookmarkKind::Number => match value {
                Value::Number(n) => n.as_f64().map(Self::Number),
                Value::String(s) => s.trim().parse::<f64>().ok().map(Self::Number),
                _ => None,
            },
            BookmarkKind::Timestamp => value.as_str().and_then(parse_timestamp).map(Self::Timestamp),
            BookmarkKind::Lexicographic => value.as_str().map(|s| Self::String(s.to_string())),
        };
        parsed
            .map(Some)
            .ok_or_else(|| format!("value {value} cannot be read as a {kind} bookmark"))
    }

    /// JSON form written into state documents.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer(v) => Value::from(*v),
            Self::Number(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
            Self::Timestamp(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    /// Compare two positions. `None` when the kinds are incompatible.
    ///
    /// Integers and numbers compare numerically with each other.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::Integer(a), Self::Number(b)) => (*a as f64).partial_cmp(b),
            (Self::Number(a), Self::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for BookmarkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::Timestamp(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Parse RFC 3339, a zone-less ISO datetime (read as UTC), or a plain date.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
