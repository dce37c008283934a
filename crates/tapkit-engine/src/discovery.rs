//! Catalog discovery from a tap definition.
//!
//! Streams that declare a schema use it as is. The others are sampled: the
//! first page is fetched and a schema is inferred from its records.

use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;
use serde_json::{Map, Value};
use tapkit_types::catalog::{Catalog, Stream};
use tapkit_types::schema::{JsonType, PropertySchema, StreamSchema, TypeSet};

use crate::config::types::StreamConfig;

#[derive(Default)]
struct Observed {
    types: BTreeSet<JsonType>,
    seen: usize,
    strings: usize,
    timestamps: usize,
}

/// Infer an object schema from sampled records.
///
/// Types are unioned per property. A property missing from some records, or
/// null in any, is nullable. Strings that all parse as RFC 3339 timestamps
/// are tagged `format: date-time`.
#[must_use]
pub fn infer_schema(records: &[Map<String, Value>]) -> StreamSchema {
    let mut observed: BTreeMap<String, Observed> = BTreeMap::new();
    for record in records {
        for (name, value) in record {
            let entry = observed.entry(name.clone()).or_default();
            entry.seen += 1;
            entry.types.insert(JsonType::of(value));
            if let Value::String(s) = value {
                entry.strings += 1;
                if DateTime::parse_from_rfc3339(s).is_ok() {
                    entry.timestamps += 1;
                }
            }
        }
    }

    observed
        .into_iter()
        .map(|(name, mut obs)| {
            if obs.seen < records.len() {
                obs.types.insert(JsonType::Null);
            }
            if obs.types.contains(&JsonType::Number) {
                obs.types.remove(&JsonType::Integer);
            }
            let temporal = obs.strings > 0 && obs.strings == obs.timestamps;
            let mut prop = PropertySchema {
                types: Some(TypeSet::from_types(obs.types)),
                ..PropertySchema::default()
            };
            if temporal {
                prop.format = Some("date-time".to_string());
            }
            (name, prop)
        })
        .collect()
}

/// Catalog entry for a configured stream with the given schema.
#[must_use]
pub fn stream_from_config(config: &StreamConfig, schema: StreamSchema) -> Stream {
    Stream {
        name: config.name.clone(),
        schema,
        key_properties: config.primary_keys.clone(),
        replication_method: config.replication_method,
        replication_key: config.replication_key.clone(),
        replication_key_ordering: config.replication_key_ordering,
        is_sorted: config.is_sorted,
        selected: config.selected,
        selected_properties: config.selected_properties.clone(),
    }
}

/// Overlay a supplied catalog document onto the configured catalog.
///
/// Supplied streams replace their configured counterparts (selection and
/// schema included); configured streams the document omits are deselected.
/// Streams the configuration does not know are dropped with a warning since
/// they have no endpoint.
#[must_use]
pub fn apply_catalog_overrides(configured: Catalog, supplied: Catalog) -> Catalog {
    for stream in &supplied.streams {
        if configured.get(&stream.name).is_none() {
            tracing::warn!(stream = stream.name, "Catalog stream has no configured endpoint, ignoring");
        }
    }
    let streams = configured
        .streams
        .into_iter()
        .map(|stream| match supplied.get(&stream.name) {
            Some(override_stream) => override_stream.clone(),
            None => Stream {
                selected: false,
                ..stream
            },
        })
        .collect();
    Catalog::new(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: Value) -> Vec<Map<String, Value>> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn infers_unioned_nullable_types() {
        let schema = infer_schema(&records(json!([
            {"id": 1, "score": 1, "name": "a", "created": "2024-01-01T00:00:00Z"},
            {"id": 2, "score": 1.5, "name": null, "created": "2024-01-02T10:00:00+02:00"},
            {"id": 3, "score": 2, "tags": ["x"]}
        ])));
        let types = |name: &str| schema.property(name).unwrap().types.clone().unwrap();
        assert_eq!(types("id"), TypeSet::Single(JsonType::Integer));
        assert_eq!(types("score"), TypeSet::Single(JsonType::Number));
        assert_eq!(types("name"), TypeSet::Many(vec![JsonType::Null, JsonType::String]));
        assert_eq!(types("tags"), TypeSet::Many(vec![JsonType::Null, JsonType::Array]));
        assert!(schema.property("created").unwrap().is_temporal());
        assert!(!schema.property("name").unwrap().is_temporal());
    }

    #[test]
    fn empty_sample_infers_empty_schema() {
        assert!(infer_schema(&[]).properties.is_empty());
    }

    #[test]
    fn catalog_overrides_replace_and_deselect() {
        let users = Stream::new("users", StreamSchema::default());
        let orders = Stream::new("orders", StreamSchema::default());
        let configured = Catalog::new(vec![users.clone(), orders]);

        let mut supplied_users = users;
        supplied_users.selected_properties = Some(vec!["id".into()]);
        let supplied = Catalog::new(vec![
            supplied_users,
            Stream::new("ghost", StreamSchema::default()),
        ]);

        let merged = apply_catalog_overrides(configured, supplied);
        assert_eq!(merged.streams.len(), 2);
        assert!(merged.get("users").unwrap().selected_properties.is_some());
        assert!(!merged.get("orders").unwrap().selected);
        assert!(merged.get("ghost").is_none());
    }
}
