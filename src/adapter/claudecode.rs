//! Claude Code adapter
//!
//! Converts Claude Code CLI transcripts into canonical records.
//! Data format: JSONL files in ~/.claude/projects/<project_hash>/<session_id>.jsonl
//! Entry types: user, assistant, system, progress, file-history-snapshot,
//! summary, custom-title. Only user/assistant/system become messages.

use serde_json::Value;
use std::collections::HashMap;

use super::{
    empty_transcript, extract_git_remote, new_id, normalize_timestamp, now_timestamp, str_field,
    truncate_chars, ConvertOptions, Conversion, RawOrigin, SessionAdapter,
};
use crate::error::{RcmError, Result};
use crate::model::{
    CanonicalRecord, Fidelity, FlowStatus, GitContext, Message, Metadata, Platform, Role,
    Session, Source, ToolUse, Usage, CANONICAL_VERSION,
};

const UNTITLED: &str = "Untitled Session";
const TITLE_CHARS: usize = 60;

pub struct ClaudeCodeAdapter;

impl ClaudeCodeAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionAdapter for ClaudeCodeAdapter {
    fn platform(&self) -> Platform {
        Platform::ClaudeCode
    }

    fn description(&self) -> &str {
        "Claude Code CLI transcripts (JSONL)"
    }

    fn convert_all(
        &self,
        raw: &str,
        origin: &RawOrigin,
        options: &ConvertOptions,
    ) -> Result<Vec<Conversion>> {
        let (entries, skipped) = parse_entries(raw);

        if entries.is_empty() {
            if skipped > 0 {
                return Err(RcmError::Parse {
                    platform: Platform::ClaudeCode.to_string(),
                    path: origin.path.display().to_string(),
                    message: format!("none of {skipped} lines is valid JSON"),
                });
            }
            return Err(empty_transcript(Platform::ClaudeCode, origin));
        }

        let record = build_record(&entries, skipped, origin, options)?;
        Ok(vec![Ok(record)])
    }
}

/// Parse JSONL lines, skipping malformed ones. Returns entries and the skip count.
fn parse_entries(raw: &str) -> (Vec<Value>, usize) {
    let mut entries = vec![];
    let mut skipped = 0;

    for (line_number, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(json) => entries.push(json),
            Err(e) => {
                skipped += 1;
                tracing::warn!(
                    line = line_number + 1,
                    error = %e,
                    preview = %truncate_chars(line, 100),
                    "skipping invalid JSON line"
                );
            }
        }
    }

    (entries, skipped)
}

fn entry_type(entry: &Value) -> Option<&str> {
    entry.get("type").and_then(|v| v.as_str())
}

fn build_record(
    entries: &[Value],
    skipped: usize,
    origin: &RawOrigin,
    options: &ConvertOptions,
) -> Result<CanonicalRecord> {
    let mut converter = MessageConverter::default();
    for entry in entries {
        converter.push(entry);
    }
    let MessageConverter {
        messages,
        model_counts,
        models_in_order,
        seen,
        ..
    } = converter;

    if messages.is_empty() {
        return Err(empty_transcript(Platform::ClaudeCode, origin));
    }

    // Primary model: most frequently used, earliest on ties
    let primary_model = models_in_order
        .iter()
        .max_by_key(|model| {
            let first_seen = models_in_order.iter().position(|m| m == *model);
            (model_counts.get(*model).copied().unwrap_or(0), std::cmp::Reverse(first_seen))
        })
        .cloned();

    let mut participants = vec!["user".to_string()];
    participants.extend(models_in_order.iter().cloned());

    let working_directory = options
        .working_directory
        .clone()
        .or_else(|| entries.iter().find_map(|e| str_field(e, "cwd")).map(String::from))
        .unwrap_or_default();

    let git_context = GitContext {
        branch: entries
            .iter()
            .find_map(|e| str_field(e, "gitBranch"))
            .unwrap_or_default()
            .to_string(),
        repo: if working_directory.is_empty() {
            String::new()
        } else {
            extract_git_remote(&working_directory).unwrap_or_default()
        },
        commit_hash: String::new(),
    };

    let session_id = entries
        .iter()
        .find_map(|e| str_field(e, "sessionId"))
        .map(String::from)
        .unwrap_or_else(|| origin.stem());

    let summary_entry = entries
        .iter()
        .filter(|e| entry_type(e) == Some("summary"))
        .find_map(|e| str_field(e, "summary"));

    let mut notes = vec![];
    if skipped > 0 {
        notes.push(format!("skipped {skipped} malformed line(s)"));
    }
    if seen.orphan_tool_results > 0 {
        notes.push(format!(
            "{} tool result(s) had no matching tool use",
            seen.orphan_tool_results
        ));
    }

    let created_at = messages
        .first()
        .map(|m| m.timestamp.clone())
        .unwrap_or_else(now_timestamp);
    let updated_at = messages
        .last()
        .map(|m| m.timestamp.clone())
        .unwrap_or_else(now_timestamp);

    Ok(CanonicalRecord {
        session: Session {
            id: new_id(),
            canonical_version: CANONICAL_VERSION.to_string(),
            created_at,
            updated_at,
            source: Source {
                platform: Platform::ClaudeCode,
                platform_version: options
                    .platform_version
                    .clone()
                    .or(primary_model)
                    .unwrap_or_else(|| "unknown".to_string()),
                session_id,
                export_method: "jsonl".to_string(),
            },
            metadata: Metadata {
                title: generate_title(entries),
                summary: options
                    .summary
                    .clone()
                    .or_else(|| summary_entry.map(String::from))
                    .unwrap_or_default(),
                tags: options.tags.clone(),
                participants,
                working_directory,
                git_context,
                model: None,
                conversation_id: None,
            },
            flow_state: FlowStatus::default(),
        },
        messages,
        fidelity: Fidelity {
            level: options.fidelity,
            preserved_fields: seen.preserved_fields(),
            notes,
        },
    })
}

/// Title resolution: custom-title → summary → first user line → "Untitled Session"
fn generate_title(entries: &[Value]) -> String {
    let custom = entries
        .iter()
        .filter(|e| entry_type(e) == Some("custom-title"))
        .find_map(|e| str_field(e, "customTitle"));
    if let Some(title) = custom {
        return title.to_string();
    }

    let summary = entries
        .iter()
        .filter(|e| entry_type(e) == Some("summary"))
        .find_map(|e| str_field(e, "summary"));
    if let Some(title) = summary {
        return title.to_string();
    }

    let first_user_text = entries
        .iter()
        .find(|e| entry_type(e) == Some("user"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(user_text);

    first_user_text
        .map(|text| {
            let first_line = text.lines().next().unwrap_or("");
            truncate_chars(first_line, TITLE_CHARS).trim().to_string()
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string())
}

/// Text of a user message: plain string, `{role, content}` object, or text blocks
fn user_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => content
            .get("content")
            .and_then(|c| c.as_str())
            .map(String::from),
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n\n"))
        }
        _ => None,
    }
}

/// Tool result payload: a string or a list of text blocks
fn tool_result_text(block: &Value) -> Option<String> {
    match block.get("content")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}

/// Which optional fields were actually carried into the record
#[derive(Default)]
struct SeenFields {
    thinking: bool,
    tool_uses: bool,
    tool_outputs: bool,
    usage: bool,
    parent_id: bool,
    orphan_tool_results: usize,
}

impl SeenFields {
    fn preserved_fields(&self) -> Vec<String> {
        [
            (self.thinking, "thinking"),
            (self.tool_uses, "tool_uses"),
            (self.tool_outputs, "tool_outputs"),
            (self.usage, "usage_metrics"),
            (self.parent_id, "parent_id"),
        ]
        .into_iter()
        .filter(|(seen, _)| *seen)
        .map(|(_, name)| name.to_string())
        .collect()
    }
}

#[derive(Default)]
struct MessageConverter {
    messages: Vec<Message>,
    /// tool_use id → (message index, tool index)
    tool_index: HashMap<String, (usize, usize)>,
    model_counts: HashMap<String, usize>,
    models_in_order: Vec<String>,
    seen: SeenFields,
}

impl MessageConverter {
    fn push(&mut self, entry: &Value) {
        let role = match entry_type(entry) {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            Some("system") => Role::System,
            _ => return,
        };

        let mut message = Message::new(
            str_field(entry, "uuid")
                .map(String::from)
                .unwrap_or_else(new_id),
            normalize_timestamp(entry.get("timestamp")),
            role,
            None,
        );
        message.parent_id = str_field(entry, "parentUuid").map(String::from);
        if message.parent_id.is_some() {
            self.seen.parent_id = true;
        }

        let body = entry.get("message");
        match role {
            Role::User => {
                let content = body.and_then(|m| m.get("content"));
                if self.attach_tool_results(content) && content.and_then(user_text).is_none() {
                    // Tool-result carrier with no text of its own
                    return;
                }
                message.content = content.and_then(user_text);
            }
            Role::Assistant => {
                if let Some(body) = body {
                    self.fill_assistant(&mut message, body);
                }
            }
            _ => {
                message.content = str_field(entry, "content")
                    .or_else(|| body.and_then(|m| str_field(m, "content")))
                    .or_else(|| str_field(entry, "text"))
                    .map(String::from);
            }
        }

        self.messages.push(message);
    }

    fn fill_assistant(&mut self, message: &mut Message, body: &Value) {
        if let Some(model) = str_field(body, "model") {
            message.model = Some(model.to_string());
            let count = self.model_counts.entry(model.to_string()).or_insert(0);
            if *count == 0 {
                self.models_in_order.push(model.to_string());
            }
            *count += 1;
        }

        let mut texts: Vec<String> = vec![];
        match body.get("content") {
            Some(Value::String(s)) => texts.push(s.clone()),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    match block.get("type").and_then(|t| t.as_str()) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                texts.push(text.to_string());
                            }
                        }
                        Some("thinking") => {
                            // At most one thinking block per message
                            if message.thinking.is_none() {
                                if let Some(thinking) =
                                    block.get("thinking").and_then(|t| t.as_str())
                                {
                                    message.thinking = Some(thinking.to_string());
                                    self.seen.thinking = true;
                                }
                            }
                        }
                        Some("tool_use") => {
                            let tool_name = block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or("unknown")
                                .to_string();
                            if let Some(id) = block.get("id").and_then(|v| v.as_str()) {
                                self.tool_index.insert(
                                    id.to_string(),
                                    (self.messages.len(), message.tool_uses.len()),
                                );
                            }
                            message.tool_uses.push(ToolUse {
                                tool_name,
                                tool_input: block.get("input").cloned().unwrap_or(Value::Null),
                                tool_output: None,
                            });
                            self.seen.tool_uses = true;
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        message.content = (!texts.is_empty()).then(|| texts.join("\n\n"));

        // Usage counters default to zero so totals stay computable
        if let Some(usage) = body.get("usage") {
            let counter = |key: &str| usage.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
            message.usage = Some(Usage {
                input_tokens: counter("input_tokens"),
                output_tokens: counter("output_tokens"),
                cache_read_tokens: counter("cache_read_input_tokens"),
                cache_write_tokens: counter("cache_creation_input_tokens"),
            });
            self.seen.usage = true;
        }
    }

    /// Route tool_result blocks to the tool uses they answer.
    /// Returns true when the content held at least one tool result.
    fn attach_tool_results(&mut self, content: Option<&Value>) -> bool {
        let Some(Value::Array(blocks)) = content else {
            return false;
        };

        let mut found = false;
        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) != Some("tool_result") {
                continue;
            }
            found = true;
            let target = block
                .get("tool_use_id")
                .and_then(|v| v.as_str())
                .and_then(|id| self.tool_index.get(id).copied());
            match target {
                Some((msg_idx, tool_idx)) => {
                    if let Some(tool) = self
                        .messages
                        .get_mut(msg_idx)
                        .and_then(|m| m.tool_uses.get_mut(tool_idx))
                    {
                        tool.tool_output = tool_result_text(block);
                        self.seen.tool_outputs = true;
                    }
                }
                None => self.seen.orphan_tool_results += 1,
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FlowState;
    use serde_json::json;

    fn lines(entries: &[Value]) -> String {
        entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn convert(raw: &str) -> Result<CanonicalRecord> {
        let adapter = ClaudeCodeAdapter::new();
        let mut out = adapter.convert_all(
            raw,
            &RawOrigin::new("/tmp/55fc0e3d-f168.jsonl"),
            &ConvertOptions::default(),
        )?;
        out.remove(0)
    }

    #[test]
    fn convert_and_save_names_the_file_after_the_session() {
        let tmp = tempfile::TempDir::new().unwrap();
        let raw_path = tmp.path().join("0a1b2c3d.jsonl");
        let raw = lines(&[
            json!({"type": "user", "uuid": "u1", "sessionId": "sess-9",
                   "timestamp": "2026-02-01T10:00:00.000Z",
                   "message": {"role": "user", "content": "Fix the bug"}}),
            json!({"type": "assistant", "uuid": "a1", "parentUuid": "u1",
                   "timestamp": "2026-02-01T10:00:05.000Z",
                   "message": {"content": [{"type": "text", "text": "Done."}]}}),
        ]);
        std::fs::write(&raw_path, raw).unwrap();
        let out_dir = tmp.path().join("out");

        let saved = ClaudeCodeAdapter::new()
            .convert_and_save(&raw_path, &out_dir, &ConvertOptions::default())
            .unwrap();

        assert_eq!(saved.title, "Fix the bug");
        assert_eq!(saved.path.parent().unwrap(), out_dir);
        assert_eq!(
            saved.path.file_name().unwrap().to_str().unwrap(),
            format!("2026-02-01_fix-the-bug_{}.yaml", saved.short_id())
        );
        let stored = CanonicalRecord::load(&saved.path).unwrap();
        assert_eq!(stored.session.id, saved.id);
        assert_eq!(stored.session.source.session_id, "sess-9");
        assert_eq!(stored.messages.len(), 2);
    }

    #[test]
    fn fix_the_bug_scenario() {
        let raw = lines(&[
            json!({"type": "user", "uuid": "u1", "sessionId": "sess-1",
                   "timestamp": "2026-02-01T10:00:00.000Z", "cwd": "/nonexistent/project",
                   "gitBranch": "main",
                   "message": {"role": "user", "content": "Fix the bug"}}),
            json!({"type": "assistant", "uuid": "a1", "parentUuid": "u1",
                   "timestamp": "2026-02-01T10:00:05.000Z",
                   "message": {"model": "claude-sonnet-4", "content": [
                       {"type": "thinking", "thinking": "Search first."},
                       {"type": "text", "text": "Let me look."},
                       {"type": "tool_use", "id": "t1", "name": "grep", "input": {"pattern": "panic"}}
                   ], "usage": {"input_tokens": 12, "output_tokens": 30}}}),
        ]);

        let record = convert(&raw).unwrap();
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[1].tool_uses[0].tool_name, "grep");
        assert_eq!(record.messages[1].tool_uses[0].tool_input, json!({"pattern": "panic"}));
        assert_eq!(record.session.flow_state.current, FlowState::Hypothesis);
        assert_eq!(record.session.metadata.title, "Fix the bug");
        assert_eq!(record.session.source.session_id, "sess-1");
        assert_eq!(record.session.source.platform_version, "claude-sonnet-4");
        assert_eq!(record.session.created_at, "2026-02-01T10:00:00.000Z");
        assert_eq!(record.session.updated_at, "2026-02-01T10:00:05.000Z");
        assert_eq!(record.session.metadata.participants, vec!["user", "claude-sonnet-4"]);
        assert_eq!(record.session.metadata.working_directory, "/nonexistent/project");
        assert_eq!(record.session.metadata.git_context.branch, "main");
        assert_ne!(record.session.id, "sess-1");
        assert_eq!(record.messages[1].thinking.as_deref(), Some("Search first."));
        assert_eq!(record.messages[1].content.as_deref(), Some("Let me look."));

        let usage = record.messages[1].usage.unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.cache_read_tokens, 0);
        assert_eq!(usage.cache_write_tokens, 0);
    }

    #[test]
    fn title_prefers_custom_title_then_summary() {
        let user = json!({"type": "user", "message": {"content": "hello there\nsecond line"}});
        let summary = json!({"type": "summary", "summary": "Refactor parser"});
        let custom = json!({"type": "custom-title", "customTitle": "My session"});

        let record = convert(&lines(&[user.clone(), summary.clone(), custom])).unwrap();
        assert_eq!(record.title(), "My session");
        assert_eq!(record.session.metadata.summary, "Refactor parser");

        let record = convert(&lines(&[user.clone(), summary])).unwrap();
        assert_eq!(record.title(), "Refactor parser");

        let record = convert(&lines(&[user])).unwrap();
        assert_eq!(record.title(), "hello there");

        let long = json!({"type": "user", "message": {"content": "x".repeat(80)}});
        assert_eq!(convert(&lines(&[long])).unwrap().title().len(), 60);

        let empty = json!({"type": "assistant", "message": {"content": [{"type": "text", "text": "hi"}]}});
        assert_eq!(convert(&lines(&[empty])).unwrap().title(), "Untitled Session");
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let raw = format!(
            "{}\n{{not json\n\n{}",
            json!({"type": "user", "message": {"content": "one"}}),
            json!({"type": "progress", "data": {}}),
        );
        let record = convert(&raw).unwrap();
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.fidelity.notes, vec!["skipped 1 malformed line(s)"]);
    }

    #[test]
    fn entirely_invalid_input_is_a_parse_error() {
        assert!(matches!(convert("garbage\nmore garbage"), Err(RcmError::Parse { .. })));
        assert!(matches!(convert(""), Err(RcmError::EmptyTranscript { .. })));
        let only_progress = lines(&[json!({"type": "file-history-snapshot"})]);
        assert!(matches!(convert(&only_progress), Err(RcmError::EmptyTranscript { .. })));
    }

    #[test]
    fn text_blocks_join_with_blank_line_and_tool_results_fill_outputs() {
        let raw = lines(&[
            json!({"type": "user", "message": {"content": "list files"}}),
            json!({"type": "assistant", "message": {"content": [
                {"type": "text", "text": "First."},
                {"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {"command": "ls"}},
                {"type": "text", "text": "Second."}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "Cargo.toml\nsrc"}
            ]}}),
            json!({"type": "assistant", "message": {"content": [{"type": "tool_use", "name": "Read", "input": {}}]}}),
        ]);
        let record = convert(&raw).unwrap();
        assert_eq!(record.messages.len(), 3);
        assert_eq!(record.messages[1].content.as_deref(), Some("First.\n\nSecond."));
        assert_eq!(
            record.messages[1].tool_uses[0].tool_output.as_deref(),
            Some("Cargo.toml\nsrc")
        );
        // tool-call-only assistant turn keeps null content
        assert_eq!(record.messages[2].content, None);
        assert!(record
            .fidelity
            .preserved_fields
            .contains(&"tool_outputs".to_string()));
        assert!(record.messages[1].usage.is_none());
    }

    #[test]
    fn conversions_never_reuse_ids() {
        let raw = lines(&[json!({"type": "user", "message": {"content": "again"}})]);
        let a = convert(&raw).unwrap();
        let b = convert(&raw).unwrap();
        assert_ne!(a.session.id, b.session.id);
    }
}
