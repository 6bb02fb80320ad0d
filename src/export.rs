//! Markdown export for RAG ingestion and reading
//!
//! Output is YAML front matter with the record's identifying metadata followed
//! by a readable transcript. Thinking and tool output are folded into
//! `<details>` blocks so the conversation itself stays scannable.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::adapter::parse_timestamp;
use crate::archive::write_atomic;
use crate::error::{RcmError, Result};
use crate::model::{CanonicalRecord, FidelityLevel, FlowState, Message, Platform, Role};

#[derive(Serialize)]
struct FrontMatter<'a> {
    session_id: &'a str,
    canonical_version: &'a str,
    platform: Platform,
    platform_session_id: &'a str,
    created_at: &'a str,
    updated_at: &'a str,
    title: &'a str,
    tags: &'a [String],
    participants: &'a [String],
    flow_state: FlowState,
    quality_score: Option<u32>,
    working_directory: &'a str,
    fidelity: FidelityLevel,
}

#[derive(Debug, Clone)]
pub struct ExportedMarkdown {
    pub path: PathBuf,
    pub title: String,
    pub id: String,
}

pub fn render_markdown(record: &CanonicalRecord) -> Result<String> {
    let session = &record.session;
    let metadata = &session.metadata;

    let front = FrontMatter {
        session_id: &session.id,
        canonical_version: &session.canonical_version,
        platform: session.source.platform,
        platform_session_id: &session.source.session_id,
        created_at: &session.created_at,
        updated_at: &session.updated_at,
        title: &metadata.title,
        tags: &metadata.tags,
        participants: &metadata.participants,
        flow_state: session.flow_state.current,
        quality_score: session.flow_state.quality_score,
        working_directory: &metadata.working_directory,
        fidelity: record.fidelity.level,
    };

    let mut out = vec![];
    out.push("---".to_string());
    out.push(serde_yaml::to_string(&front)?.trim_end().to_string());
    out.push("---".to_string());
    out.push(String::new());

    out.push(format!("# {}", metadata.title));
    out.push(String::new());

    if !metadata.summary.is_empty() {
        out.push("## Summary".to_string());
        out.push(String::new());
        out.push(metadata.summary.clone());
        out.push(String::new());
    }

    out.push("## Session Information".to_string());
    out.push(String::new());
    out.push(format!("- **Platform:** {}", session.source.platform));
    out.push(format!("- **Created:** {}", human_timestamp(&session.created_at)));
    out.push(format!("- **Messages:** {}", record.messages.len()));
    out.push(format!("- **Participants:** {}", metadata.participants.join(", ")));
    if !metadata.tags.is_empty() {
        let tags: Vec<String> = metadata.tags.iter().map(|t| format!("`{t}`")).collect();
        out.push(format!("- **Tags:** {}", tags.join(", ")));
    }
    if !metadata.working_directory.is_empty() {
        out.push(format!(
            "- **Working Directory:** `{}`",
            metadata.working_directory
        ));
    }
    if !metadata.git_context.branch.is_empty() {
        out.push(format!("- **Git Branch:** `{}`", metadata.git_context.branch));
    }
    out.push(String::new());

    out.push("## Conversation".to_string());
    out.push(String::new());
    let total = record.messages.len();
    for (i, message) in record.messages.iter().enumerate() {
        render_message(&mut out, message, i + 1, total);
    }

    out.push("---".to_string());
    out.push(String::new());
    out.push("*This session was archived using RCM (Runtime Context Management)*".to_string());
    out.push(format!(
        "*Session ID: `{}` | Flow State: `{}` | Fidelity: `{}`*",
        session.id,
        session.flow_state.current,
        record.fidelity.level
    ));
    out.push(String::new());

    Ok(out.join("\n"))
}

fn render_message(out: &mut Vec<String>, message: &Message, number: usize, total: usize) {
    out.push(format!("### Message {number}/{total}"));
    out.push(format!(
        "{} • {}",
        role_label(message.role, message.model.as_deref()),
        human_timestamp(&message.timestamp)
    ));
    out.push(String::new());

    if let Some(thinking) = &message.thinking {
        out.push("<details>".to_string());
        out.push("<summary>💭 Extended Thinking</summary>".to_string());
        out.push(String::new());
        out.push("```thinking".to_string());
        out.push(thinking.trim().to_string());
        out.push("```".to_string());
        out.push("</details>".to_string());
        out.push(String::new());
    }

    if let Some(content) = message.content.as_deref().filter(|c| !c.trim().is_empty()) {
        out.push(content.trim().to_string());
        out.push(String::new());
    }

    if !message.tool_uses.is_empty() {
        out.push("#### 🔧 Tool Uses".to_string());
        out.push(String::new());
        for (i, tool) in message.tool_uses.iter().enumerate() {
            out.push(format!("**{}. {}**", i + 1, tool.tool_name));
            out.push(String::new());
            out.push("```json".to_string());
            out.push(
                serde_json::to_string_pretty(&tool.tool_input)
                    .unwrap_or_else(|_| tool.tool_input.to_string()),
            );
            out.push("```".to_string());
            out.push(String::new());
            if let Some(output) = &tool.tool_output {
                out.push("<details>".to_string());
                out.push("<summary>Output</summary>".to_string());
                out.push(String::new());
                out.push("```".to_string());
                out.push(output.clone());
                out.push("```".to_string());
                out.push("</details>".to_string());
                out.push(String::new());
            }
        }
    }

    if let Some(usage) = &message.usage {
        let mut line = format!(
            "<sub>Tokens: {} (in: {}, out: {}",
            group_thousands(usage.input_tokens + usage.output_tokens),
            group_thousands(usage.input_tokens),
            group_thousands(usage.output_tokens)
        );
        if usage.cache_read_tokens > 0 {
            line.push_str(&format!(", cached: {}", group_thousands(usage.cache_read_tokens)));
        }
        line.push_str(")</sub>");
        out.push(line);
        out.push(String::new());
    }

    out.push("---".to_string());
    out.push(String::new());
}

fn role_label(role: Role, model: Option<&str>) -> String {
    match (role, model) {
        (Role::User, _) => "👤 **User**".to_string(),
        (Role::Assistant, Some(model)) => format!("🤖 **Assistant** ({model})"),
        (Role::Assistant, None) => "🤖 **Assistant**".to_string(),
        (Role::System, _) => "⚙️ **System**".to_string(),
        (Role::Tool, _) => "🔧 **Tool**".to_string(),
    }
}

/// `2026-02-01 09:00:00 UTC`, or the raw value when it does not parse
fn human_timestamp(ts: &str) -> String {
    parse_timestamp(ts)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

/// Render the record at `yaml_path`. `output` may be a directory (the file
/// is named after the record) or a file path (`.md` appended when missing).
pub fn export_markdown(yaml_path: &Path, output: &Path) -> Result<ExportedMarkdown> {
    let record = CanonicalRecord::load(yaml_path)?;

    let path = if output.is_dir() {
        let stem = yaml_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("session");
        output.join(format!("{stem}.md"))
    } else if output.extension().and_then(|e| e.to_str()) == Some("md") {
        output.to_path_buf()
    } else {
        PathBuf::from(format!("{}.md", output.display()))
    };

    write_atomic(&path, &render_markdown(&record)?)?;
    tracing::debug!(input = %yaml_path.display(), output = %path.display(), "exported markdown");

    Ok(ExportedMarkdown {
        path,
        title: record.session.metadata.title,
        id: record.session.id,
    })
}

/// Expand glob patterns (relative ones against `root`) into record files
pub fn resolve_inputs(patterns: &[String], root: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut inputs = vec![];
    for pattern in patterns {
        let full = match root {
            Some(root) if Path::new(pattern).is_relative() => {
                root.join(pattern).to_string_lossy().into_owned()
            }
            _ => pattern.clone(),
        };

        let paths = glob::glob(&full).map_err(|e| RcmError::Parse {
            platform: "glob".to_string(),
            path: pattern.clone(),
            message: e.to_string(),
        })?;
        let before = inputs.len();
        inputs.extend(
            paths
                .filter_map(|p| p.ok())
                .filter(|p| p.is_file() && crate::archive::is_record_file(p)),
        );
        if inputs.len() == before {
            tracing::warn!(%pattern, "pattern matched no records");
        }
    }
    inputs.sort();
    inputs.dedup();
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures::sample_record;
    use crate::archive::ArchiveLayout;
    use crate::model::{ToolUse, Usage};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn renders_front_matter_and_conversation() {
        let mut record = sample_record("Fix the bug", "2026-02-01T09:00:00Z");
        record.session.metadata.tags = vec!["rust".to_string()];
        record.session.metadata.summary = "Found the panic".to_string();

        let mut reply = Message::new(
            "m2".to_string(),
            "2026-02-01T09:00:05Z".to_string(),
            Role::Assistant,
            Some("Searching.".to_string()),
        );
        reply.model = Some("claude-sonnet-4".to_string());
        reply.thinking = Some("grep first".to_string());
        reply.tool_uses = vec![ToolUse {
            tool_name: "Grep".to_string(),
            tool_input: json!({"pattern": "panic"}),
            tool_output: Some("src/main.rs:10".to_string()),
        }];
        reply.usage = Some(Usage {
            input_tokens: 1200,
            output_tokens: 34,
            cache_read_tokens: 5000,
            cache_write_tokens: 0,
        });
        record.messages.push(reply);

        let md = render_markdown(&record).unwrap();
        assert!(md.starts_with("---\n"));
        assert!(md.contains(&format!("session_id: {}", record.session.id)));
        assert!(md.contains("flow_state: hypothesis"));
        assert!(md.contains("# Fix the bug\n"));
        assert!(md.contains("## Summary\n\nFound the panic"));
        assert!(md.contains("- **Tags:** `rust`"));
        assert!(md.contains("### Message 2/2"));
        assert!(md.contains("🤖 **Assistant** (claude-sonnet-4) • 2026-02-01 09:00:05 UTC"));
        assert!(md.contains("```thinking\ngrep first\n```"));
        assert!(md.contains("**1. Grep**"));
        assert!(md.contains("\"pattern\": \"panic\""));
        assert!(md.contains("<sub>Tokens: 1,234 (in: 1,200, out: 34, cached: 5,000)</sub>"));
        assert!(md.contains("Fidelity: `standard`"));
    }

    #[test]
    fn exports_globbed_records_into_directory() {
        let tmp = TempDir::new().unwrap();
        let layout = ArchiveLayout::new(tmp.path());
        let first = layout
            .save(&sample_record("First", "2026-01-01T00:00:00Z"))
            .unwrap();
        layout
            .save(&sample_record("Second", "2026-02-01T00:00:00Z"))
            .unwrap();

        let inputs =
            resolve_inputs(&["archive/canonical/*/*/*.yaml".to_string()], Some(tmp.path())).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0], first);

        let out_dir = tmp.path().join("md");
        std::fs::create_dir_all(&out_dir).unwrap();
        let exported = export_markdown(&first, &out_dir).unwrap();
        assert_eq!(exported.title, "First");
        assert_eq!(exported.path.extension().unwrap(), "md");
        assert!(std::fs::read_to_string(&exported.path)
            .unwrap()
            .contains("# First"));

        let named = export_markdown(&first, &tmp.path().join("single")).unwrap();
        assert_eq!(named.path, tmp.path().join("single.md"));
    }
}
