//! Record reconciliation against the catalog schema.
//!
//! The reconciler never mutates the stream schema. It handles unknown
//! properties, coerces scalars toward declared types where the conversion is
//! unambiguous, projects selected properties and enforces key presence.

use std::collections::HashSet;

use serde_json::{Map, Number, Value};
use tapkit_types::catalog::Stream;
use tapkit_types::error::TapError;
use tapkit_types::schema::{JsonType, PropertySchema};
use tapkit_types::stream::UnknownPropertyPolicy;

/// Discrepancy counters for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub unknown_dropped: u64,
    pub unknown_reported: u64,
    pub coerced: u64,
}

pub struct Reconciler<'a> {
    stream: &'a Stream,
    policy: UnknownPropertyPolicy,
    warned: HashSet<String>,
    stats: ReconcileStats,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(stream: &'a Stream, policy: UnknownPropertyPolicy) -> Self {
        Self {
            stream,
            policy,
            warned: HashSet::new(),
            stats: ReconcileStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Reconcile one raw record into its emitted form.
    ///
    /// # Errors
    ///
    /// Returns a record-scoped data-integrity [`TapError`] when a value cannot
    /// be coerced to its declared type or a key property is missing or null.
    pub fn reconcile(&mut self, raw: Map<String, Value>) -> Result<Map<String, Value>, TapError> {
        let mut out = Map::with_capacity(raw.len());
        for (name, value) in raw {
            let Some(prop) = self.stream.schema.property(&name) else {
                self.unknown_property(&name);
                if self.policy == UnknownPropertyPolicy::Report {
                    out.insert(name, value);
                }
                continue;
            };
            if !self.stream.is_property_selected(&name) {
                continue;
            }
            let value = self.conform(&name, prop, value)?;
            out.insert(name, value);
        }

        for key in &self.stream.key_properties {
            if out.get(key).map_or(true, Value::is_null) {
                return Err(TapError::data_integrity(
                    "MISSING_PRIMARY_KEY",
                    format!(
                        "stream '{}': key property '{key}' is missing or null",
                        self.stream.name
                    ),
                ));
            }
        }
        Ok(out)
    }

    fn unknown_property(&mut self, name: &str) {
        match self.policy {
            UnknownPropertyPolicy::Drop => {
                self.stats.unknown_dropped += 1;
                tracing::debug!(
                    stream = self.stream.name,
                    property = name,
                    "Dropping property not in schema"
                );
            }
            UnknownPropertyPolicy::Report => {
                self.stats.unknown_reported += 1;
                if self.warned.insert(name.to_string()) {
                    tracing::warn!(
                        stream = self.stream.name,
                        property = name,
                        "Record property not declared in schema"
                    );
                }
            }
        }
    }

    fn conform(&mut self, name: &str, prop: &PropertySchema, value: Value) -> Result<Value, TapError> {
        let actual = JsonType::of(&value);
        if actual == JsonType::Null || prop.allows(actual) {
            return Ok(value);
        }
        let targets = prop.types.as_ref().map(|t| t.non_null()).unwrap_or_default();
        match targets.into_iter().find_map(|target| coerce(&value, target)) {
            Some(coerced) => {
                self.stats.coerced += 1;
                Ok(coerced)
            }
            None => Err(TapError::data_integrity(
                "TYPE_MISMATCH",
                format!(
                    "stream '{}': property '{name}' is {} and cannot be read as declared type",
                    self.stream.name,
                    actual.as_str()
                ),
            )
            .with_details(serde_json::json!({ "property": name, "value": value }))),
        }
    }
}

/// Unambiguous scalar conversion of `value` into `target`.
fn coerce(value: &Value, target: JsonType) -> Option<Value> {
    match (value, target) {
        (Value::String(s), JsonType::Integer) => s.trim().parse::<i64>().ok().map(Value::from),
        (Value::String(s), JsonType::Number) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Some(Value::from(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
        }
        (Value::String(s), JsonType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (Value::Number(n), JsonType::Integer) => {
            let f = n.as_f64()?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let whole = f as i64;
            #[allow(clippy::cast_precision_loss)]
            let exact = f.fract() == 0.0 && whole as f64 == f;
            exact.then(|| Value::from(whole))
        }
        _ => None,
    }
}
