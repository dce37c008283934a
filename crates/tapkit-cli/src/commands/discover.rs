use std::path::Path;

use anyhow::{Context, Result};

use tapkit_engine::config::{parse_tap, validate_tap};
use tapkit_engine::Tap;

/// Execute the `discover` command: print the catalog JSON to stdout.
pub async fn execute(tap_path: &Path) -> Result<()> {
    let config = parse_tap(tap_path)
        .with_context(|| format!("Failed to parse tap: {}", tap_path.display()))?;
    validate_tap(&config)?;

    let tap = Tap::from_config(config)?;
    let catalog = tap.discover().await?;

    for stream in &catalog.streams {
        eprintln!(
            "Stream: {} ({}, {} properties{})",
            stream.name,
            stream.replication_method,
            stream.schema.properties.len(),
            if stream.key_properties.is_empty() {
                String::new()
            } else {
                format!(", key: {}", stream.key_properties.join(", "))
            }
        );
    }
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}
