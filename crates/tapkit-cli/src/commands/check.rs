use std::path::Path;

use anyhow::{Context, Result};

use tapkit_engine::config::{parse_tap, validate_tap};
use tapkit_engine::Tap;

/// Execute the `check` command: validate the tap definition and reach every stream.
pub async fn execute(tap_path: &Path) -> Result<()> {
    let config = parse_tap(tap_path)
        .with_context(|| format!("Failed to parse tap: {}", tap_path.display()))?;

    validate_tap(&config)?;
    println!("Tap definition:    OK");

    let tap = Tap::from_config(config)?;
    let catalog = match tap.discover().await {
        Ok(catalog) => catalog,
        Err(err) => {
            println!("Discovery:         FAILED");
            println!("  {err}");
            anyhow::bail!("One or more checks failed");
        }
    };
    println!("Discovery:         OK ({} streams)", catalog.streams.len());

    if let Err(err) = catalog.validate() {
        println!("Catalog:           FAILED");
        println!("  {}", err.message);
        anyhow::bail!("One or more checks failed");
    }
    println!("Catalog:           OK");
    println!("\nAll checks passed.");
    Ok(())
}
