//! Index command implementation

use anyhow::{Context, Result};
use std::path::Path;

use crate::index::write_index;
use crate::model::FlowState;

pub fn run(roots: &[std::path::PathBuf], output: &Path) -> Result<()> {
    for root in roots {
        println!("Indexing {}", root.display());
    }

    let index = write_index(roots, output)
        .with_context(|| format!("Failed to write index to {}", output.display()))?;
    let summary = &index.summary;

    println!();
    println!("Total sessions: {}", summary.total_sessions);
    println!("By repository:");
    for repo in &index.repositories {
        println!("  {:<30} {}", repo.name, repo.session_count);
    }
    println!("By state:");
    for state in FlowState::ALL {
        println!(
            "  {:<30} {}",
            state,
            summary.by_state.get(&state).copied().unwrap_or(0)
        );
    }
    println!("By platform:");
    for (platform, count) in &summary.by_platform {
        println!("  {:<30} {}", platform, count);
    }
    println!();
    println!("Index written to {}", output.display());
    Ok(())
}
