//! Flow command implementations

use anyhow::Result;

use crate::flow::{FlowEngine, TransitionRequest};
use crate::model::FlowState;

pub fn promote(engine: &FlowEngine, session: &str, request: TransitionRequest) -> Result<()> {
    if !request.dry_run {
        engine.ensure_repository()?;
    }

    let outcome = engine.transition(session, &request)?;
    let filename = outcome
        .to_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if outcome.dry_run {
        println!("[dry run] {} → {}", outcome.from, outcome.to);
        println!("  Would move: {}", outcome.from_path.display());
        println!("          to: {}", outcome.to_path.display());
        println!("  Would commit: rcm(flow): {}", outcome.commit_message);
        return Ok(());
    }

    println!("✓ {filename}: {} → {}", outcome.from, outcome.to);
    println!("  New location: {}", outcome.to_path.display());
    if let Some(commit) = &outcome.commit {
        println!("  Git: {commit}");
    }
    Ok(())
}

pub fn list(engine: &FlowEngine, state: FlowState, long: bool) -> Result<()> {
    let summaries = engine.list(state)?;

    if summaries.is_empty() {
        println!("No sessions in {state}.");
        return Ok(());
    }

    println!(
        "{:<10} {:<11} {:>8} {:<5} {}",
        "ID", "Created", "Size", "Score", "Title"
    );
    println!("{}", "-".repeat(80));

    for s in &summaries {
        let score = s
            .quality_score
            .map(|q| q.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<11} {:>7.1}K {:<5} {}",
            crate::model::short_id(&s.id),
            super::date_part(&s.created_at),
            s.size as f64 / 1024.0,
            score,
            super::truncate_title(&s.title, 45),
        );
        if long {
            if !s.tags.is_empty() {
                println!("{:<10} tags: {}", "", s.tags.join(", "));
            }
            println!("{:<10} file: {}", "", s.filename);
        }
    }

    println!();
    println!("{} session(s) in {state}", summaries.len());
    Ok(())
}

pub fn status(engine: &FlowEngine, session: &str) -> Result<()> {
    let status = engine.status(session)?;
    let record = &status.record;
    let metadata = &record.session.metadata;

    println!("Title:         {}", metadata.title);
    println!("Session ID:    {}", record.session.id);
    println!("Current state: {}", status.state);
    println!("Platform:      {}", record.session.source.platform);
    println!("Created:       {}", record.session.created_at);
    println!("Messages:      {}", record.messages.len());
    println!("Size:          {:.1} KB", status.size as f64 / 1024.0);
    if !metadata.tags.is_empty() {
        println!("Tags:          {}", metadata.tags.join(", "));
    }
    if let Some(score) = record.session.flow_state.quality_score {
        println!("Quality score: {score}");
    }
    println!("Pointer:       {}", status.pointer.display());
    println!("Canonical:     {}", status.canonical.display());

    let next: Vec<&str> = status.state.allowed_targets().iter().map(|s| s.as_str()).collect();
    println!("Next states:   {}", next.join(", "));
    Ok(())
}
