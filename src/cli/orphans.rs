//! Orphans command implementation

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::import::find_orphans;
use crate::model::Platform;

use super::import::ImportArgs;

pub fn run(config: &Config, root: Option<String>, source: Option<&Path>, import: bool) -> Result<()> {
    let archive_root = config.resolve_root(root.as_deref());
    let source_dir = match source {
        Some(dir) => dir.to_path_buf(),
        None => config
            .adapter_path(Platform::ClaudeCode)
            .context("No Claude Code projects directory configured; pass --source")?,
    };

    let layout = crate::archive::ArchiveLayout::new(&archive_root);
    let orphans = find_orphans(&layout, &source_dir)
        .with_context(|| format!("Failed to scan {}", source_dir.display()))?;

    if orphans.is_empty() {
        println!("No orphaned sessions under {}", source_dir.display());
        return Ok(());
    }

    for path in &orphans {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        println!("{:>8.1}K  {}", size as f64 / 1024.0, path.display());
    }
    println!();
    println!("{} orphaned session(s)", orphans.len());

    if !import {
        return Ok(());
    }

    println!();
    super::import::run(
        config,
        ImportArgs {
            sources: orphans,
            platform: Platform::ClaudeCode,
            root,
            tags: vec![],
            summary: None,
            working_directory: None,
            fidelity: None,
            no_commit: false,
        },
    )
}
