//! Platform adapters and registry
//!
//! An adapter turns one platform's raw export into canonical records. Adapters
//! are pure with respect to the archive: they read the raw text and return
//! records, leaving placement and flow state to the archive writer and the
//! flow engine.
//!
//! Adapters:
//! - ClaudeCode: NDJSON transcript, one session per file
//! - ChatGPT: official `conversations.json` export, tree-shaped mappings
//! - Gemini: Google Takeout activity export, turn-based

mod chatgpt;
mod claudecode;
mod gemini;

pub use chatgpt::ChatGptAdapter;
pub use claudecode::ClaudeCodeAdapter;
pub use gemini::GeminiAdapter;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::archive;
use crate::config::Config;
use crate::error::{RcmError, Result};
use crate::model::{CanonicalRecord, FidelityLevel, Message, Platform, Role};

/// Caller-supplied conversion settings
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub working_directory: Option<String>,
    /// Overrides the model detected from the transcript
    pub platform_version: Option<String>,
    pub fidelity: FidelityLevel,
}

impl ConvertOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tags: config.import.default_tags.clone(),
            fidelity: config.import.fidelity,
            ..Default::default()
        }
    }
}

/// Where a raw export came from
#[derive(Debug, Clone)]
pub struct RawOrigin {
    pub path: PathBuf,
}

impl RawOrigin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File name without extension; the fallback platform session id
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }
}

/// Result of `convert_and_save`
#[derive(Debug, Clone)]
pub struct SavedRecord {
    pub path: PathBuf,
    pub id: String,
    pub title: String,
}

impl SavedRecord {
    /// Write `<date>_<slug>_<short-id>.yaml` into `output_dir`
    pub fn write(record: &CanonicalRecord, output_dir: &Path) -> Result<Self> {
        let path = archive::write_record_into(record, output_dir)?;
        Ok(Self {
            path,
            id: record.session.id.clone(),
            title: record.title().to_string(),
        })
    }

    pub fn short_id(&self) -> &str {
        crate::model::short_id(&self.id)
    }
}

/// One conversion per conversation found in an export
pub type Conversion = Result<CanonicalRecord>;

/// Platform adapter trait
pub trait SessionAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Convert raw export text. Fails as a whole only when the text is not
    /// valid syntax for the platform; individual conversations that cannot be
    /// converted come back as `Err` entries.
    fn convert_all(
        &self,
        raw: &str,
        origin: &RawOrigin,
        options: &ConvertOptions,
    ) -> Result<Vec<Conversion>>;

    /// Read and convert every conversation in a raw export file
    fn convert_file(&self, raw_path: &Path, options: &ConvertOptions) -> Result<Vec<Conversion>> {
        let raw = std::fs::read_to_string(raw_path).map_err(|e| RcmError::io(raw_path, e))?;
        self.convert_all(&raw, &RawOrigin::new(raw_path), options)
    }

    /// Convert a raw export holding a single conversation (the first one
    /// that converts, for multi-conversation exports)
    fn convert(&self, raw_path: &Path, options: &ConvertOptions) -> Result<CanonicalRecord> {
        let mut first_error = None;
        for conversion in self.convert_file(raw_path, options)? {
            match conversion {
                Ok(record) => return Ok(record),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| RcmError::EmptyTranscript {
            platform: self.platform().to_string(),
            path: raw_path.display().to_string(),
        }))
    }

    /// Convert and write `<date>_<slug>_<short-id>.yaml` into `output_dir`
    fn convert_and_save(
        &self,
        raw_path: &Path,
        output_dir: &Path,
        options: &ConvertOptions,
    ) -> Result<SavedRecord> {
        let record = self.convert(raw_path, options)?;
        SavedRecord::write(&record, output_dir)
    }
}

/// Registry of enabled adapters
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn SessionAdapter>>,
}

impl AdapterRegistry {
    pub fn new(config: &Config) -> Self {
        let mut registry = Self { adapters: vec![] };

        if config.is_adapter_enabled(Platform::ClaudeCode) {
            registry.register(Box::new(ClaudeCodeAdapter::new()));
        }
        if config.is_adapter_enabled(Platform::ChatGpt) {
            registry.register(Box::new(ChatGptAdapter::new()));
        }
        if config.is_adapter_enabled(Platform::Gemini) {
            registry.register(Box::new(GeminiAdapter::new()));
        }

        registry
    }

    pub fn register(&mut self, adapter: Box<dyn SessionAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn all(&self) -> Vec<&dyn SessionAdapter> {
        self.adapters.iter().map(|a| a.as_ref()).collect()
    }

    pub fn get(&self, platform: Platform) -> Result<&dyn SessionAdapter> {
        self.adapters
            .iter()
            .find(|a| a.platform() == platform)
            .map(|a| a.as_ref())
            .ok_or_else(|| RcmError::AdapterDisabled(platform.to_string()))
    }
}

// ============================================
// SHARED CONVERSION HELPERS
// ============================================

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Normalize a source timestamp to ISO-8601.
///
/// ISO-8601 strings pass through untouched, numbers (and numeric strings) are
/// epoch seconds, and anything else falls back to the current time.
pub fn normalize_timestamp(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => {
            let s = s.trim();
            if is_iso8601(s) {
                return s.to_string();
            }
            if let Ok(secs) = s.parse::<f64>() {
                if let Some(ts) = from_epoch_seconds(secs) {
                    return format_timestamp(ts);
                }
            }
            match parse_timestamp(s) {
                Some(ts) => format_timestamp(ts),
                None => {
                    tracing::warn!(value = %s, "unparseable timestamp, using current time");
                    now_timestamp()
                }
            }
        }
        Some(Value::Number(n)) => match n.as_f64().and_then(from_epoch_seconds) {
            Some(ts) => format_timestamp(ts),
            None => {
                tracing::warn!(value = %n, "epoch timestamp out of range, using current time");
                now_timestamp()
            }
        },
        Some(Value::Null) | None => now_timestamp(),
        Some(other) => {
            tracing::warn!(value = %other, "unsupported timestamp shape, using current time");
            now_timestamp()
        }
    }
}

/// Lenient parse used for partitioning and sorting
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn is_iso8601(s: &str) -> bool {
    s.contains('T') && parse_timestamp(s).is_some()
}

fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt((secs * 1000.0).round() as i64).single()
}

/// First `max` characters of `text`
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Title from the first user message: first `max` characters, `...` when cut
pub(crate) fn title_from_messages(messages: &[Message], max: usize, fallback: &str) -> String {
    let first_user = messages
        .iter()
        .find(|m| m.role == Role::User)
        .and_then(|m| m.content.as_deref())
        .filter(|c| !c.trim().is_empty());

    match first_user {
        Some(content) => {
            let truncated = truncate_chars(content, max);
            if truncated.chars().count() < content.chars().count() {
                format!("{truncated}...")
            } else {
                truncated
            }
        }
        None => fallback.to_string(),
    }
}

/// Parse an export as one JSON document
pub(crate) fn parse_json(raw: &str, platform: Platform, origin: &RawOrigin) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| RcmError::Parse {
        platform: platform.to_string(),
        path: origin.display(),
        message: e.to_string(),
    })
}

pub(crate) fn empty_transcript(platform: Platform, origin: &RawOrigin) -> RcmError {
    RcmError::EmptyTranscript {
        platform: platform.to_string(),
        path: origin.display(),
    }
}

/// Split an export into conversations: a bare array, an object holding
/// `conversations`, or a single conversation object
pub(crate) fn conversations_of(document: Value) -> Vec<Value> {
    match document {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("conversations") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                map.insert("conversations".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        _ => vec![],
    }
}

/// String field, ignoring empty strings
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Extract git remote from project directory if available
pub(crate) fn extract_git_remote(project_path: &str) -> Option<String> {
    let git_config = PathBuf::from(project_path).join(".git/config");
    let content = std::fs::read_to_string(&git_config).ok()?;

    // Simple parsing: find [remote "origin"] section and url line
    let mut in_origin = false;
    for line in content.lines() {
        if line.contains("[remote \"origin\"]") {
            in_origin = true;
        } else if in_origin && line.trim().starts_with("url = ") {
            return Some(line.trim().strip_prefix("url = ")?.to_string());
        } else if line.starts_with('[') {
            in_origin = false;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn iso_strings_pass_through_untouched() {
        let ts = json!("2026-02-01T09:30:00.123456Z");
        assert_eq!(normalize_timestamp(Some(&ts)), "2026-02-01T09:30:00.123456Z");
    }

    #[test]
    fn epoch_seconds_are_scaled_to_millis() {
        let ts = json!(1_700_000_000.5);
        assert_eq!(normalize_timestamp(Some(&ts)), "2023-11-14T22:13:20.500Z");
        let ts = json!("1700000000");
        assert_eq!(normalize_timestamp(Some(&ts)), "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn unparseable_timestamps_fall_back_to_now() {
        let before = Utc::now() - chrono::Duration::seconds(1);
        let normalized = normalize_timestamp(Some(&json!("next tuesday")));
        let parsed = parse_timestamp(&normalized).unwrap();
        assert!(parsed >= before);
        assert!(parse_timestamp(&normalize_timestamp(None)).is_some());
    }

    #[test]
    fn date_only_strings_become_midnight() {
        assert_eq!(
            normalize_timestamp(Some(&json!("2025-12-31"))),
            "2025-12-31T00:00:00.000Z"
        );
    }

    #[test]
    fn title_truncates_on_characters() {
        let msg = Message::new(
            "1".into(),
            now_timestamp(),
            Role::User,
            Some("é".repeat(120)),
        );
        let title = title_from_messages(&[msg], 100, "Untitled");
        assert_eq!(title.chars().count(), 103);
        assert!(title.ends_with("..."));
        assert_eq!(title_from_messages(&[], 100, "Untitled"), "Untitled");
    }

    #[test]
    fn conversations_accepts_each_export_shape() {
        assert_eq!(conversations_of(json!([{"a": 1}, {"b": 2}])).len(), 2);
        assert_eq!(conversations_of(json!({"conversations": [{"a": 1}]})).len(), 1);
        assert_eq!(conversations_of(json!({"turns": []})).len(), 1);
        assert!(conversations_of(json!("nope")).is_empty());
    }

    #[test]
    fn registry_respects_disabled_adapters() {
        let mut config = Config::default();
        config.adapters.insert(
            "gemini".to_string(),
            crate::config::AdapterConfig {
                enabled: false,
                status: None,
                base_path: None,
            },
        );
        let registry = AdapterRegistry::new(&config);
        assert_eq!(registry.all().len(), 2);
        assert!(registry.get(Platform::ClaudeCode).is_ok());
        assert!(matches!(
            registry.get(Platform::Gemini),
            Err(RcmError::AdapterDisabled(_))
        ));
    }
}
