//! Gemini adapter
//!
//! Converts a Google Takeout Gemini activity export into canonical records.
//! Data format: array of conversations or `{conversations: [...]}`, each with
//! a `turns` list of {userQuery, geminiResponse | response, timestamp}.

use serde_json::Value;

use super::{
    conversations_of, empty_transcript, new_id, normalize_timestamp, parse_json, str_field,
    title_from_messages, ConvertOptions, Conversion, RawOrigin, SessionAdapter,
};
use crate::error::Result;
use crate::model::{
    CanonicalRecord, Citation, Fidelity, FidelityLevel, FlowStatus, Image, Message, Metadata,
    Platform, Role, Session, Source, WebSearch, CANONICAL_VERSION,
};

const UNTITLED: &str = "Untitled Gemini Session";
const DEFAULT_MODEL: &str = "gemini-pro";

pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionAdapter for GeminiAdapter {
    fn platform(&self) -> Platform {
        Platform::Gemini
    }

    fn description(&self) -> &str {
        "Gemini activity export (Google Takeout)"
    }

    fn convert_all(
        &self,
        raw: &str,
        origin: &RawOrigin,
        options: &ConvertOptions,
    ) -> Result<Vec<Conversion>> {
        let document = parse_json(raw, Platform::Gemini, origin)?;
        let conversations = conversations_of(document);
        if conversations.is_empty() {
            return Err(empty_transcript(Platform::Gemini, origin));
        }

        Ok(conversations
            .iter()
            .map(|conversation| convert_conversation(conversation, origin, options))
            .collect())
    }
}

fn convert_conversation(
    conversation: &Value,
    origin: &RawOrigin,
    options: &ConvertOptions,
) -> Result<CanonicalRecord> {
    let full = options.fidelity == FidelityLevel::Full;
    let mut messages = vec![];
    let mut notes = vec![];

    let turns = conversation
        .get("turns")
        .and_then(|t| t.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for (turn_no, turn) in turns.iter().enumerate() {
        let timestamp =
            normalize_timestamp(turn.get("timestamp").or_else(|| turn.get("createTime")));

        if let Some(query) = turn.get("userQuery").filter(|q| !q.is_null()) {
            let mut message = Message::new(
                new_id(),
                timestamp.clone(),
                Role::User,
                user_content(query),
            );
            message.images = images(query, &["images", "image"], false);
            if full {
                message.original_id = str_field(turn, "turnId").map(String::from);
            }
            messages.push(message);
        }

        let response = turn
            .get("geminiResponse")
            .or_else(|| turn.get("response"))
            .filter(|r| !r.is_null());
        if let Some(response) = response {
            let content = response_content(response);
            if content.is_none() {
                tracing::warn!(turn = turn_no, "gemini response has no readable text");
                notes.push(format!("turn {turn_no}: response content unavailable"));
            }
            let mut message = Message::new(new_id(), timestamp, Role::Assistant, content);
            message.citations = citations(response);
            message.web_search = web_search(response);
            message.images = images(response, &["images", "inlineData"], true);
            messages.push(message);
        }
    }

    if messages.is_empty() {
        return Err(empty_transcript(Platform::Gemini, origin));
    }

    let created_at = match conversation
        .get("createTime")
        .or_else(|| conversation.get("create_time"))
    {
        Some(ts) if !ts.is_null() => normalize_timestamp(Some(ts)),
        _ => messages[0].timestamp.clone(),
    };
    let updated_at = match conversation
        .get("updateTime")
        .or_else(|| conversation.get("update_time"))
    {
        Some(ts) if !ts.is_null() => normalize_timestamp(Some(ts)),
        _ => messages[messages.len() - 1].timestamp.clone(),
    };

    let model = str_field(conversation, "model")
        .unwrap_or(DEFAULT_MODEL)
        .to_string();
    let conversation_id = str_field(conversation, "conversationId")
        .or_else(|| str_field(conversation, "id"))
        .map(String::from)
        .unwrap_or_else(|| origin.stem());
    let title = str_field(conversation, "title")
        .map(String::from)
        .unwrap_or_else(|| title_from_messages(&messages, 100, UNTITLED));

    let mut preserved_fields = vec!["citations".to_string(), "web_search".to_string()];
    if full {
        preserved_fields.push("images".to_string());
        preserved_fields.push("metadata".to_string());
    }

    Ok(CanonicalRecord {
        session: Session {
            id: new_id(),
            canonical_version: CANONICAL_VERSION.to_string(),
            created_at,
            updated_at,
            source: Source {
                platform: Platform::Gemini,
                platform_version: options.platform_version.clone().unwrap_or(model.clone()),
                session_id: conversation_id.clone(),
                export_method: "google-takeout".to_string(),
            },
            metadata: Metadata {
                title,
                summary: options.summary.clone().unwrap_or_default(),
                tags: options.tags.clone(),
                participants: vec!["user".to_string(), "assistant".to_string()],
                working_directory: options.working_directory.clone().unwrap_or_default(),
                git_context: Default::default(),
                model: Some(model),
                conversation_id: Some(conversation_id),
            },
            flow_state: FlowStatus::default(),
        },
        messages,
        fidelity: Fidelity {
            level: options.fidelity,
            preserved_fields,
            notes,
        },
    })
}

fn user_content(query: &Value) -> Option<String> {
    if let Some(text) = query.as_str() {
        return Some(text.to_string()).filter(|t| !t.is_empty());
    }
    str_field(query, "text")
        .or_else(|| str_field(query, "prompt"))
        .map(String::from)
}

/// Plain string, then `text`, then a string `content`, then candidate parts
fn response_content(response: &Value) -> Option<String> {
    if let Some(text) = response.as_str() {
        return Some(text.to_string()).filter(|t| !t.is_empty());
    }
    if let Some(text) = str_field(response, "text").or_else(|| str_field(response, "content")) {
        return Some(text.to_string());
    }

    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let texts: Vec<&str> = parts.iter().filter_map(|p| str_field(p, "text")).collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n\n"))
    }
}

fn citations(response: &Value) -> Option<Vec<Citation>> {
    let sources = response
        .get("citations")
        .or_else(|| response.get("citationMetadata")?.get("citationSources"))?
        .as_array()?;

    let citations: Vec<Citation> = sources
        .iter()
        .map(|c| Citation {
            source: str_field(c, "source")
                .or_else(|| str_field(c, "uri"))
                .or_else(|| str_field(c, "url"))
                .map(String::from),
            title: str_field(c, "title").map(String::from),
            start_index: c.get("startIndex").and_then(|v| v.as_u64()),
            end_index: c.get("endIndex").and_then(|v| v.as_u64()),
        })
        .collect();

    (!citations.is_empty()).then_some(citations)
}

fn web_search(response: &Value) -> Option<WebSearch> {
    let search = response
        .get("webSearch")
        .or_else(|| response.get("grounding"))
        .filter(|s| s.is_object())?;

    Some(WebSearch {
        query: str_field(search, "query")
            .or_else(|| str_field(search, "searchQuery"))
            .map(String::from),
        results: search
            .get("results")
            .or_else(|| search.get("groundingChunks"))
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default(),
    })
}

/// `keys[0]` holds a list of images, `keys[1]` a single image
fn images(value: &Value, keys: &[&str; 2], with_data: bool) -> Option<Vec<Image>> {
    let list: Vec<&Value> = match value.get(keys[0]).and_then(|v| v.as_array()) {
        Some(items) => items.iter().collect(),
        None => value.get(keys[1]).filter(|v| v.is_object()).into_iter().collect(),
    };

    let images: Vec<Image> = list
        .into_iter()
        .map(|img| Image {
            url: str_field(img, "url")
                .or_else(|| str_field(img, "uri"))
                .map(String::from),
            mime_type: str_field(img, "mimeType")
                .or_else(|| str_field(img, "type"))
                .map(String::from),
            alt_text: str_field(img, "altText")
                .or_else(|| str_field(img, "description"))
                .map(String::from),
            data: if with_data {
                str_field(img, "data").map(String::from)
            } else {
                None
            },
        })
        .collect();

    (!images.is_empty()).then_some(images)
}
