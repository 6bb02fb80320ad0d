//! Session index
//!
//! Flattens the canonical records of one or more archive roots into a single
//! JSON manifest that consumers can search without reading YAML. The indexer
//! is read-only: a record that fails to load is logged and left out.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::adapter::parse_timestamp;
use crate::archive::{write_atomic, ArchiveLayout};
use crate::error::{RcmError, Result};
use crate::model::{CanonicalRecord, FlowState, Platform};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub short_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub platform: Platform,
    pub platform_session_id: String,
    pub tags: Vec<String>,
    pub flow_state: FlowState,
    pub quality_score: Option<u32>,
    pub message_count: usize,
    pub repository: String,
    pub canonical_path: PathBuf,
    pub working_directory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub name: String,
    pub path: PathBuf,
    pub session_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub total_sessions: usize,
    pub by_repo: BTreeMap<String, usize>,
    pub by_state: BTreeMap<FlowState, usize>,
    pub by_platform: BTreeMap<Platform, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIndex {
    pub generated_at: String,
    pub repositories: Vec<RepositorySummary>,
    pub summary: IndexSummary,
    pub sessions: Vec<IndexEntry>,
}

/// Walk every root and index its canonical records, newest first
pub fn build_index(roots: &[PathBuf]) -> SessionIndex {
    let mut summary = IndexSummary {
        by_state: FlowState::ALL.iter().map(|s| (*s, 0)).collect(),
        ..Default::default()
    };
    let mut repositories = vec![];
    let mut sessions = vec![];

    for root in roots {
        let layout = ArchiveLayout::new(root);
        let name = repository_name(root);

        if !layout.canonical_dir().exists() {
            tracing::warn!(root = %root.display(), "no canonical archive under root");
        }

        let mut count = 0;
        for path in layout.canonical_files() {
            match index_record(&layout, &name, &path) {
                Ok(entry) => {
                    count += 1;
                    *summary.by_state.entry(entry.flow_state).or_default() += 1;
                    *summary.by_platform.entry(entry.platform).or_default() += 1;
                    sessions.push(entry);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping record");
                }
            }
        }

        tracing::debug!(repository = %name, sessions = count, "indexed root");
        summary.by_repo.insert(name.clone(), count);
        repositories.push(RepositorySummary {
            name,
            path: root.clone(),
            session_count: count,
        });
    }

    summary.total_sessions = sessions.len();
    sessions.sort_by(|a, b| newest_first(&a.created_at, &b.created_at));

    SessionIndex {
        generated_at: Utc::now().to_rfc3339(),
        repositories,
        summary,
        sessions,
    }
}

fn index_record(layout: &ArchiveLayout, repository: &str, path: &Path) -> Result<IndexEntry> {
    let record = CanonicalRecord::load(path)?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    Ok(IndexEntry {
        short_id: record.short_id().to_string(),
        flow_state: state_of(layout, filename),
        message_count: record.messages.len(),
        repository: repository.to_string(),
        canonical_path: path.to_path_buf(),
        id: record.session.id,
        title: record.session.metadata.title,
        created_at: record.session.created_at,
        updated_at: record.session.updated_at,
        platform: record.session.source.platform,
        platform_session_id: record.session.source.session_id,
        tags: record.session.metadata.tags,
        quality_score: record.session.flow_state.quality_score,
        working_directory: record.session.metadata.working_directory,
    })
}

/// State of the first directory holding a pointer; `hypothesis` when none does
fn state_of(layout: &ArchiveLayout, filename: &str) -> FlowState {
    FlowState::RESOLUTION_ORDER
        .into_iter()
        .find(|state| {
            layout
                .pointer_path(*state, filename)
                .symlink_metadata()
                .is_ok()
        })
        .unwrap_or_default()
}

fn repository_name(root: &Path) -> String {
    root.file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .unwrap_or_else(|| root.display().to_string())
}

fn newest_first(a: &str, b: &str) -> std::cmp::Ordering {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => b.cmp(&a),
        _ => b.cmp(a),
    }
}

impl SessionIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RcmError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Pretty JSON, written atomically
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, &json)?;
        tracing::info!(path = %path.display(), sessions = self.sessions.len(), "wrote session index");
        Ok(())
    }
}

/// Build and write in one step
pub fn write_index(roots: &[PathBuf], output: &Path) -> Result<SessionIndex> {
    let index = build_index(roots);
    index.write(output)?;
    Ok(index)
}

/// Filters over a loaded index. Empty filters match everything.
#[derive(Debug, Clone, Default)]
pub struct IndexQuery {
    /// Case-insensitive substring of the title or any tag
    pub search: Option<String>,
    /// Any of these, matched as case-insensitive substrings of a tag
    pub tags: Vec<String>,
    pub repository: Option<String>,
    pub state: Option<FlowState>,
    pub platform: Option<Platform>,
    /// Keep only the first N results
    pub recent: Option<usize>,
}

impl IndexQuery {
    pub fn apply<'a>(&self, index: &'a SessionIndex) -> Vec<&'a IndexEntry> {
        let search = self.search.as_ref().map(|s| s.to_lowercase());
        let tags: Vec<String> = self.tags.iter().map(|t| t.trim().to_lowercase()).collect();

        let matches = index.sessions.iter().filter(|entry| {
            let entry_tags: Vec<String> = entry.tags.iter().map(|t| t.to_lowercase()).collect();

            if let Some(query) = &search {
                let in_title = entry.title.to_lowercase().contains(query.as_str());
                let in_tags = entry_tags.iter().any(|t| t.contains(query.as_str()));
                if !in_title && !in_tags {
                    return false;
                }
            }
            if !tags.is_empty()
                && !tags
                    .iter()
                    .any(|wanted| entry_tags.iter().any(|t| t.contains(wanted.as_str())))
            {
                return false;
            }
            if self.repository.as_ref().is_some_and(|r| &entry.repository != r) {
                return false;
            }
            if self.state.is_some_and(|s| entry.flow_state != s) {
                return false;
            }
            if self.platform.is_some_and(|p| entry.platform != p) {
                return false;
            }
            true
        });

        match self.recent {
            Some(n) => matches.take(n).collect(),
            None => matches.collect(),
        }
    }
}
