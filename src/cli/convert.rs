//! Convert command implementation
//!
//! Stand-alone conversion: no raw copy, no flow pointer, no commit.

use anyhow::{Context, Result};
use std::path::Path;

use crate::adapter::{AdapterRegistry, ConvertOptions, SavedRecord};
use crate::config::Config;
use crate::model::Platform;

pub fn run(
    config: &Config,
    source: &Path,
    platform: Platform,
    output_dir: &Path,
    options: &ConvertOptions,
) -> Result<()> {
    let registry = AdapterRegistry::new(config);
    let adapter = registry.get(platform)?;

    // Claude Code transcripts hold exactly one session
    if platform == Platform::ClaudeCode {
        let saved = adapter
            .convert_and_save(source, output_dir, options)
            .with_context(|| format!("Failed to convert {}", source.display()))?;
        print_saved(&saved);
        return Ok(());
    }

    let conversions = adapter
        .convert_file(source, options)
        .with_context(|| format!("Failed to convert {}", source.display()))?;

    let total = conversions.len();
    let mut written = 0;
    for conversion in conversions {
        match conversion.and_then(|record| SavedRecord::write(&record, output_dir)) {
            Ok(saved) => {
                written += 1;
                print_saved(&saved);
            }
            Err(e) => println!("✗ {e}"),
        }
    }

    if total > 1 {
        println!();
        println!("Converted: {written}/{total}");
    }
    if written == 0 {
        anyhow::bail!("no conversations converted from {}", source.display());
    }
    Ok(())
}

fn print_saved(saved: &SavedRecord) {
    println!("✓ {} [{}]", saved.title, saved.short_id());
    println!("  {}", saved.path.display());
}
