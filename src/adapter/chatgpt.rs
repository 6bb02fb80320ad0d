//! ChatGPT adapter
//!
//! Converts the official OpenAI export (`conversations.json`) into canonical
//! records, one per conversation.
//! Data format: array of conversations, each with a `mapping` of
//!   node-id → {message, parent, children}
//!
//! The mapping is a tree: edited or regenerated turns appear as sibling
//! children. Only the first-child path from the root is archived.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use super::{
    conversations_of, empty_transcript, new_id, normalize_timestamp, parse_json,
    title_from_messages, ConvertOptions, Conversion, RawOrigin, SessionAdapter,
};
use crate::error::{RcmError, Result};
use crate::model::{
    CanonicalRecord, Fidelity, FidelityLevel, FlowStatus, Message, Metadata, Platform, Role,
    Session, Source, CANONICAL_VERSION,
};

const UNTITLED: &str = "Untitled ChatGPT Session";
const TITLE_CHARS: usize = 100;

pub struct ChatGptAdapter;

// ChatGPT export structures
#[derive(Debug, Deserialize)]
struct Conversation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    create_time: Option<Value>,
    #[serde(default)]
    update_time: Option<Value>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    default_model_slug: Option<String>,
    #[serde(default)]
    mapping: Map<String, Value>,
}

struct Node {
    message: Option<NodeMessage>,
    parent: Option<String>,
    children: Vec<String>,
}

impl Node {
    /// Links are read apart from the message body, so a malformed message
    /// never cuts the chain below it.
    fn read(id: &str, value: &Value) -> Self {
        let parent = value
            .get("parent")
            .and_then(Value::as_str)
            .map(str::to_string);
        let children = value
            .get("children")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let message = match value.get("message") {
            None | Some(Value::Null) => None,
            Some(body) => NodeMessage::deserialize(body)
                .map_err(|e| {
                    tracing::warn!(node = %id, error = %e, "unreadable message body, skipping turn");
                })
                .ok(),
        };
        Self {
            message,
            parent,
            children,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    create_time: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Author {
    #[serde(default)]
    role: Option<String>,
}

/// A message on the first-child path, before canonicalization
struct PathMessage<'a> {
    node_parent: Option<&'a str>,
    message: &'a NodeMessage,
    role: Role,
    content: Option<String>,
}

impl ChatGptAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChatGptAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionAdapter for ChatGptAdapter {
    fn platform(&self) -> Platform {
        Platform::ChatGpt
    }

    fn description(&self) -> &str {
        "ChatGPT official export (conversations.json)"
    }

    fn convert_all(
        &self,
        raw: &str,
        origin: &RawOrigin,
        options: &ConvertOptions,
    ) -> Result<Vec<Conversion>> {
        let document = parse_json(raw, Platform::ChatGpt, origin)?;
        let conversations = conversations_of(document);
        if conversations.is_empty() {
            return Err(empty_transcript(Platform::ChatGpt, origin));
        }

        Ok(conversations
            .into_iter()
            .map(|value| {
                let conversation: Conversation =
                    serde_json::from_value(value).map_err(|e| RcmError::Parse {
                        platform: Platform::ChatGpt.to_string(),
                        path: origin.path.display().to_string(),
                        message: e.to_string(),
                    })?;
                convert_conversation(conversation, origin, options)
            })
            .collect())
    }
}

fn convert_conversation(
    conversation: Conversation,
    origin: &RawOrigin,
    options: &ConvertOptions,
) -> Result<CanonicalRecord> {
    let nodes: Vec<(String, Node)> = conversation
        .mapping
        .iter()
        .map(|(id, value)| (id.clone(), Node::read(id, value)))
        .collect();

    let path = linearize(&nodes);
    if path.is_empty() {
        return Err(empty_transcript(Platform::ChatGpt, origin));
    }

    let conversation_created = conversation
        .create_time
        .as_ref()
        .filter(|v| !v.is_null())
        .map(|v| normalize_timestamp(Some(v)));

    let full = options.fidelity == FidelityLevel::Full;
    let mut preserved = PreservedFields::default();
    let messages: Vec<Message> = path
        .iter()
        .map(|pm| {
            let timestamp = match pm.message.create_time.as_ref().filter(|v| !v.is_null()) {
                Some(ts) => normalize_timestamp(Some(ts)),
                None => conversation_created
                    .clone()
                    .unwrap_or_else(|| normalize_timestamp(None)),
            };
            let mut message = Message::new(new_id(), timestamp, pm.role, pm.content.clone());
            let metadata = pm.message.metadata.as_ref();
            message.model = metadata
                .and_then(|m| m.get("model_slug"))
                .and_then(|v| v.as_str())
                .map(String::from);
            preserved.model |= message.model.is_some();

            if full {
                message.finish_details = metadata
                    .and_then(|m| m.get("finish_details"))
                    .filter(|v| !v.is_null())
                    .cloned();
                preserved.finish_details |= message.finish_details.is_some();
                message.original_id = pm.message.id.clone();
                message.original_parent_id = pm.node_parent.map(String::from);
                preserved.original_ids = true;
            }
            message
        })
        .collect();

    let model = messages
        .iter()
        .find(|m| m.role == Role::Assistant)
        .and_then(|m| m.model.clone())
        .or(conversation.default_model_slug)
        .or(conversation.model)
        .unwrap_or_else(|| "unknown".to_string());

    let created_at = conversation_created.unwrap_or_else(|| messages[0].timestamp.clone());
    let updated_at = match conversation.update_time.as_ref().filter(|v| !v.is_null()) {
        Some(ts) => normalize_timestamp(Some(ts)),
        None => messages[messages.len() - 1].timestamp.clone(),
    };

    let session_id = conversation
        .id
        .or(conversation.conversation_id)
        .unwrap_or_else(|| origin.stem());

    let title = conversation
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| title_from_messages(&messages, TITLE_CHARS, UNTITLED));

    let branch_points = nodes.iter().filter(|(_, n)| n.children.len() > 1).count();
    let mut notes = vec![];
    if branch_points > 0 {
        notes.push(format!(
            "discarded alternate branches at {branch_points} node(s)"
        ));
    }

    Ok(CanonicalRecord {
        session: Session {
            id: new_id(),
            canonical_version: CANONICAL_VERSION.to_string(),
            created_at,
            updated_at,
            source: Source {
                platform: Platform::ChatGpt,
                platform_version: options.platform_version.clone().unwrap_or(model.clone()),
                session_id: session_id.clone(),
                export_method: "official".to_string(),
            },
            metadata: Metadata {
                title,
                summary: options.summary.clone().unwrap_or_default(),
                tags: options.tags.clone(),
                participants: vec!["user".to_string(), "assistant".to_string()],
                working_directory: options.working_directory.clone().unwrap_or_default(),
                git_context: Default::default(),
                model: Some(model),
                conversation_id: Some(session_id),
            },
            flow_state: FlowStatus::default(),
        },
        messages,
        fidelity: Fidelity {
            level: options.fidelity,
            preserved_fields: preserved.names(),
            notes,
        },
    })
}

/// Walk the first-child path from the root.
///
/// The root is the first node (in export order) without a parent, or the
/// first node at all. System messages and empty non-assistant messages are
/// dropped but their children are still followed.
fn linearize(nodes: &[(String, Node)]) -> Vec<PathMessage<'_>> {
    let by_id: HashMap<&str, &Node> = nodes.iter().map(|(id, n)| (id.as_str(), n)).collect();

    let root = nodes
        .iter()
        .find(|(_, n)| n.parent.as_deref().map_or(true, str::is_empty))
        .or_else(|| nodes.first())
        .map(|(id, _)| id.as_str());

    let mut path = vec![];
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = root;

    while let Some(id) = current {
        if !visited.insert(id) {
            tracing::warn!(node = %id, "cycle in conversation mapping, stopping walk");
            break;
        }
        let Some(node) = by_id.get(id) else {
            break;
        };
        current = node.children.first().map(String::as_str);

        let Some(message) = node.message.as_ref() else {
            continue;
        };
        let role = message
            .author
            .as_ref()
            .and_then(|a| a.role.as_deref())
            .map(Role::from_platform)
            .unwrap_or_default();
        if role == Role::System {
            continue;
        }

        let content = extract_content(message);
        if content.is_none() && role != Role::Assistant {
            continue;
        }

        path.push(PathMessage {
            node_parent: node.parent.as_deref(),
            message,
            role,
            content,
        });
    }

    path
}

/// Join string parts with a blank line; `text` payloads count too
fn extract_content(message: &NodeMessage) -> Option<String> {
    let content = message.content.as_ref()?;

    if let Some(parts) = content.get("parts").and_then(|p| p.as_array()) {
        let texts: Vec<&str> = parts
            .iter()
            .filter_map(|p| p.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        if !texts.is_empty() {
            return Some(texts.join("\n\n"));
        }
    }

    content
        .get("text")
        .and_then(|t| t.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[derive(Default)]
struct PreservedFields {
    model: bool,
    finish_details: bool,
    original_ids: bool,
}

impl PreservedFields {
    fn names(&self) -> Vec<String> {
        [
            (self.model, "model"),
            (self.finish_details, "finish_details"),
            (self.original_ids, "original_ids"),
        ]
        .into_iter()
        .filter(|(kept, _)| *kept)
        .map(|(_, name)| name.to_string())
        .collect()
    }
}
