//! Query command implementation

use anyhow::{Context, Result};
use std::path::Path;

use crate::index::{IndexEntry, IndexQuery, SessionIndex};

pub fn run(index_path: &Path, query: &IndexQuery, format: &str) -> Result<()> {
    let index = SessionIndex::load(index_path).with_context(|| {
        format!(
            "Failed to load session index {} (run 'rcm index' first)",
            index_path.display()
        )
    })?;
    let sessions = query.apply(&index);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&sessions)?),
        "list" => {
            for s in &sessions {
                println!("{} | {}", s.short_id, s.title);
                println!(
                    "   {} | {} | {}",
                    s.repository,
                    s.flow_state,
                    super::date_part(&s.created_at)
                );
                if !s.tags.is_empty() {
                    println!("   Tags: {}", s.tags.join(", "));
                }
                println!();
            }
        }
        _ => print_table(&sessions),
    }
    Ok(())
}

fn print_table(sessions: &[&IndexEntry]) {
    if sessions.is_empty() {
        println!("No sessions found matching query.");
        return;
    }

    println!(
        "{:<10} {:<11} {:<11} {:<12} {:<18} {:>5} {}",
        "ID", "Created", "State", "Platform", "Repository", "Msgs", "Title"
    );
    println!("{}", "-".repeat(110));

    for s in sessions {
        println!(
            "{:<10} {:<11} {:<11} {:<12} {:<18} {:>5} {}",
            s.short_id,
            super::date_part(&s.created_at),
            s.flow_state,
            s.platform,
            super::truncate_title(&s.repository, 18),
            s.message_count,
            super::truncate_title(&s.title, 40),
        );
    }

    println!();
    println!("Found {} session(s)", sessions.len());
}
