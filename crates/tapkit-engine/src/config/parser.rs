//! Tap YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tapkit_types::catalog::Catalog;

use crate::config::types::TapConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        missing.dedup();
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a tap YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_tap_str(yaml_str: &str) -> Result<TapConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: TapConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse tap YAML")?;
    Ok(config)
}

/// Parse a tap YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_tap(path: &Path) -> Result<TapConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tap file: {}", path.display()))?;
    parse_tap_str(&content)
}

/// Read a JSON catalog document.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a catalog.
pub fn parse_catalog(path: &Path) -> Result<Catalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog JSON: {}", path.display()))
}
