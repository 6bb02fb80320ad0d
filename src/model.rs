//! Canonical session schema
//!
//! Every adapter produces a [`CanonicalRecord`]; the archive writer, the flow
//! engine and the indexer only ever read and write this shape. Documents are
//! YAML with three top-level keys (`session`, `messages`, `fidelity`) in that
//! order. Missing fields deserialize to their defaults so partial exports still
//! yield a usable record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{RcmError, Result};

pub const CANONICAL_VERSION: &str = "1.0";

/// One archived chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub fidelity: Fidelity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_canonical_version")]
    pub canonical_version: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub flow_state: FlowStatus,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: String::new(),
            canonical_version: default_canonical_version(),
            created_at: String::new(),
            updated_at: String::new(),
            source: Source::default(),
            metadata: Metadata::default(),
            flow_state: FlowStatus::default(),
        }
    }
}

/// Provenance of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub platform_version: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub export_method: String,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            platform_version: String::new(),
            session_id: String::new(),
            export_method: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub git_context: GitContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitContext {
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub commit_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStatus {
    #[serde(default)]
    pub current: FlowState,
    #[serde(default)]
    pub quality_score: Option<u32>,
}

/// A single turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search: Option<WebSearch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<Image>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_parent_id: Option<String>,
}

impl Message {
    /// Bare message with every optional field empty.
    pub fn new(id: String, timestamp: String, role: Role, content: Option<String>) -> Self {
        Self {
            id,
            parent_id: None,
            timestamp,
            role,
            content,
            model: None,
            thinking: None,
            tool_uses: vec![],
            usage: None,
            citations: None,
            web_search: None,
            images: None,
            finish_details: None,
            original_id: None,
            original_parent_id: None,
        }
    }
}

/// Absent roles read as model-side turns, same as unknown ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Map a platform's author role onto the canonical set.
    /// Unrecognized authors are model-side turns.
    pub fn from_platform(role: &str) -> Self {
        match role {
            "user" | "human" => Role::User,
            "system" => Role::System,
            "tool" | "function" => Role::Tool,
            _ => Role::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_output: Option<String>,
}

/// Token counters. Absent source counters are stored as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSearch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub results: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fidelity {
    #[serde(default)]
    pub level: FidelityLevel,
    #[serde(default)]
    pub preserved_fields: Vec<String>,
    /// Partial-data warnings raised during conversion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FidelityLevel {
    #[default]
    Standard,
    Full,
}

impl FidelityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FidelityLevel::Standard => "standard",
            FidelityLevel::Full => "full",
        }
    }
}

impl fmt::Display for FidelityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FidelityLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" => Ok(FidelityLevel::Standard),
            "full" => Ok(FidelityLevel::Full),
            other => Err(format!("unknown fidelity level: {other}")),
        }
    }
}

/// Source platform of a transcript.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Platform {
    #[default]
    #[serde(rename = "claude-code")]
    ClaudeCode,
    #[serde(rename = "chatgpt")]
    ChatGpt,
    #[serde(rename = "gemini")]
    Gemini,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::ClaudeCode, Platform::ChatGpt, Platform::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::ClaudeCode => "claude-code",
            Platform::ChatGpt => "chatgpt",
            Platform::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = RcmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "claude-code" | "claudecode" | "claude" => Ok(Platform::ClaudeCode),
            "chatgpt" | "openai" => Ok(Platform::ChatGpt),
            "gemini" | "bard" => Ok(Platform::Gemini),
            _ => Err(RcmError::UnknownPlatform(s.to_string())),
        }
    }
}

/// Curation lifecycle state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    #[default]
    Hypothesis,
    Codified,
    Validated,
    Promoted,
}

impl FlowState {
    /// Lifecycle order.
    pub const ALL: [FlowState; 4] = [
        FlowState::Hypothesis,
        FlowState::Codified,
        FlowState::Validated,
        FlowState::Promoted,
    ];

    /// Lookup order when resolving a pointer; the most mature state wins.
    pub const RESOLUTION_ORDER: [FlowState; 4] = [
        FlowState::Promoted,
        FlowState::Validated,
        FlowState::Codified,
        FlowState::Hypothesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Hypothesis => "hypothesis",
            FlowState::Codified => "codified",
            FlowState::Validated => "validated",
            FlowState::Promoted => "promoted",
        }
    }

    /// States reachable in one step from `self`.
    pub fn allowed_targets(&self) -> &'static [FlowState] {
        match self {
            FlowState::Hypothesis => &[FlowState::Codified],
            FlowState::Codified => &[FlowState::Validated, FlowState::Hypothesis],
            FlowState::Validated => &[FlowState::Promoted, FlowState::Codified],
            FlowState::Promoted => &[FlowState::Validated],
        }
    }

    pub fn can_transition_to(&self, target: FlowState) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FlowState {
    type Err = RcmError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        FlowState::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| RcmError::UnknownState(s.to_string()))
    }
}

fn default_canonical_version() -> String {
    CANONICAL_VERSION.to_string()
}

impl CanonicalRecord {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Read a record from disk. Pointers are followed like any other path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RcmError::io(path, e))?;
        Self::from_yaml_str(&content)
    }

    pub fn title(&self) -> &str {
        &self.session.metadata.title
    }

    /// First 8 characters of the record id.
    pub fn short_id(&self) -> &str {
        short_id(&self.session.id)
    }
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
