//! Semantic validation for parsed tap definitions.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;

use crate::config::types::{StreamConfig, TapConfig};
use crate::pagination::PaginationConfig;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

fn validate_stream(stream: &StreamConfig, errors: &mut Vec<String>) {
    let context = format!("Stream '{}'", stream.name);

    if stream.replication_method.tracks_bookmark()
        && stream
            .replication_key
            .as_deref()
            .map_or(true, |k| k.trim().is_empty())
    {
        errors.push(format!(
            "{context} uses {} replication but has no replication_key",
            stream.replication_method
        ));
    }

    for cap in PLACEHOLDER_RE.captures_iter(&stream.path) {
        if !stream.path_params.contains_key(&cap[1]) {
            errors.push(format!(
                "{context}: path placeholder '{{{}}}' has no path_params entry",
                &cap[1]
            ));
        }
    }

    match &stream.pagination {
        PaginationConfig::PageNumber(p) if p.page_size == Some(0) => {
            errors.push(format!("{context}: pagination page_size must be at least 1"));
        }
        PaginationConfig::BodyField(p) if p.path.trim().is_empty() => {
            errors.push(format!("{context}: body_field pagination needs a path"));
        }
        _ => {}
    }

    if let Some(schema) = &stream.schema {
        for key in &stream.primary_keys {
            if !schema.contains(key) {
                errors.push(format!("{context}: primary key '{key}' is not in the schema"));
            }
        }
    }
}

/// Validate a parsed tap definition.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the tap definition.
pub fn validate_tap(config: &TapConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported tap version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.tap.trim().is_empty() {
        errors.push("Tap name must not be empty".to_string());
    }

    let url_base = config.api.url_base.trim();
    if !(url_base.starts_with("http://") || url_base.starts_with("https://")) {
        errors.push(format!(
            "api.url_base must be an http(s) URL, got '{}'",
            config.api.url_base
        ));
    }
    if config.api.timeout_seconds == 0 {
        errors.push("api.timeout_seconds must be > 0".to_string());
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if !config.retry.factor.is_finite() || config.retry.factor < 1.0 {
        errors.push("retry.factor must be a finite number >= 1.0".to_string());
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push("retry.base_delay_ms must not exceed retry.max_delay_ms".to_string());
    }

    if config.sync.max_pages == 0 {
        errors.push("sync.max_pages must be at least 1".to_string());
    }
    if let Some(batch) = &config.sync.batch {
        if batch.records_per_file == 0 {
            errors.push("sync.batch.records_per_file must be at least 1".to_string());
        }
    }

    if config.streams.is_empty() {
        errors.push("Tap must define at least one stream".to_string());
    }

    let mut seen = HashSet::new();
    for (i, stream) in config.streams.iter().enumerate() {
        if stream.name.trim().is_empty() {
            errors.push(format!("Stream {i} has an empty name"));
            continue;
        }
        if !seen.insert(stream.name.as_str()) {
            errors.push(format!("Stream '{}' is defined more than once", stream.name));
        }
        validate_stream(stream, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Tap validation failed:\n  - {}", errors.join("\n  - "));
    }
}
