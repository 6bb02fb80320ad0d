//! Export command implementation

use anyhow::{bail, Result};
use std::path::Path;

use crate::export::{export_markdown, resolve_inputs};

pub fn run(patterns: &[String], output: &Path, root: Option<&Path>) -> Result<()> {
    let inputs = resolve_inputs(patterns, root)?;
    if inputs.is_empty() {
        bail!("no records matched {}", patterns.join(" "));
    }

    if inputs.len() > 1 && !output.is_dir() {
        std::fs::create_dir_all(output)?;
    }

    let mut exported = 0;
    for input in &inputs {
        match export_markdown(input, output) {
            Ok(md) => {
                exported += 1;
                println!("✓ {} → {}", md.title, md.path.display());
            }
            Err(e) => println!("✗ {}: {}", input.display(), e),
        }
    }

    println!();
    println!("Exported: {}/{}", exported, inputs.len());
    if exported < inputs.len() {
        bail!("{} export(s) failed", inputs.len() - exported);
    }
    Ok(())
}
