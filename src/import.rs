//! Import pipeline
//!
//! raw copy → adapter → canonical record → hypothesis pointer → commit.
//! Conversations that fail inside one export are reported next to the ones
//! that succeed; batches keep going past files that fail entirely.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::adapter::{AdapterRegistry, ConvertOptions};
use crate::archive::ArchiveLayout;
use crate::error::{RcmError, Result};
use crate::flow::{CommitCategory, CommitOutcome, FlowEngine};
use crate::model::Platform;

#[derive(Debug, Clone)]
pub struct ImportedRecord {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub canonical: PathBuf,
    pub pointer: PathBuf,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub platform: Platform,
    pub raw: PathBuf,
    pub records: Vec<ImportedRecord>,
    /// Conversations in the export that could not be archived
    pub failures: Vec<RcmError>,
    /// `None` when auto-commit is off or the commit failed
    pub commit: Option<CommitOutcome>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub imported: Vec<(PathBuf, ImportOutcome)>,
    pub failed: Vec<(PathBuf, RcmError)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.imported.len()
    }

    pub fn total(&self) -> usize {
        self.imported.len() + self.failed.len()
    }
}

pub struct Importer<'a> {
    registry: &'a AdapterRegistry,
    engine: &'a FlowEngine,
    options: ConvertOptions,
    auto_commit: bool,
}

impl<'a> Importer<'a> {
    pub fn new(registry: &'a AdapterRegistry, engine: &'a FlowEngine, options: ConvertOptions) -> Self {
        Self {
            registry,
            engine,
            options,
            auto_commit: true,
        }
    }

    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.auto_commit = enabled;
        self
    }

    fn layout(&self) -> &ArchiveLayout {
        self.engine.layout()
    }

    /// Import one raw export
    pub fn import_file(&self, source: &Path, platform: Platform) -> Result<ImportOutcome> {
        if !source.is_file() {
            return Err(RcmError::io(source, std::io::ErrorKind::NotFound.into()));
        }
        let adapter = self.registry.get(platform)?;

        let raw = self.layout().archive_raw(source, platform)?;
        let conversions = adapter.convert_file(&raw, &self.options)?;

        let mut records = vec![];
        let mut failures = vec![];
        for conversion in conversions {
            let saved = conversion.and_then(|record| {
                let canonical = self.layout().save(&record)?;
                let pointer = self.engine.enter(&canonical)?;
                Ok(ImportedRecord {
                    id: record.session.id.clone(),
                    title: record.title().to_string(),
                    message_count: record.messages.len(),
                    canonical,
                    pointer,
                })
            });
            match saved {
                Ok(imported) => records.push(imported),
                Err(e) => {
                    tracing::warn!(source = %source.display(), error = %e, "conversation not imported");
                    failures.push(e);
                }
            }
        }

        if records.is_empty() {
            return Err(failures
                .into_iter()
                .next()
                .unwrap_or_else(|| RcmError::EmptyTranscript {
                    platform: platform.to_string(),
                    path: source.display().to_string(),
                }));
        }

        let commit = if self.auto_commit {
            self.commit(platform, &raw, &records)
        } else {
            None
        };

        Ok(ImportOutcome {
            platform,
            raw,
            records,
            failures,
            commit,
        })
    }

    /// Import several exports of one platform, continuing past failures
    pub fn import_batch(&self, sources: &[PathBuf], platform: Platform) -> BatchReport {
        let mut report = BatchReport::default();
        for source in sources {
            match self.import_file(source, platform) {
                Ok(outcome) => report.imported.push((source.clone(), outcome)),
                Err(e) => {
                    tracing::warn!(source = %source.display(), error = %e, "import failed");
                    report.failed.push((source.clone(), e));
                }
            }
        }
        report
    }

    /// A failed commit leaves the files archived; it is reported, not fatal
    fn commit(&self, platform: Platform, raw: &Path, records: &[ImportedRecord]) -> Option<CommitOutcome> {
        let message = match records {
            [single] => format!(
                "Import {platform} session {}",
                crate::model::short_id(&single.id)
            ),
            _ => format!("Import {} {platform} sessions", records.len()),
        };

        let mut paths = vec![raw.to_path_buf()];
        for record in records {
            paths.push(record.canonical.clone());
            paths.push(record.pointer.clone());
        }

        match self.engine.commit(CommitCategory::Import, &message, &paths) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(error = %e, "import commit failed");
                None
            }
        }
    }
}

/// Claude Code transcripts under `source_dir` with no raw copy in the archive.
/// Subagent transcripts are not sessions of their own and are ignored.
pub fn find_orphans(layout: &ArchiveLayout, source_dir: &Path) -> Result<Vec<PathBuf>> {
    if !source_dir.is_dir() {
        return Err(RcmError::io(source_dir, std::io::ErrorKind::NotFound.into()));
    }

    let raw_dir = layout.raw_dir(Platform::ClaudeCode);
    let imported: HashSet<String> = match std::fs::read_dir(&raw_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect(),
        Err(_) => {
            tracing::debug!(dir = %raw_dir.display(), "no raw archive yet");
            HashSet::new()
        }
    };

    let mut orphans: Vec<PathBuf> = WalkDir::new(source_dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != "subagents")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("jsonl"))
        .filter(|e| {
            e.file_name()
                .to_str()
                .map_or(true, |name| !imported.contains(name))
        })
        .map(|e| e.into_path())
        .collect();
    orphans.sort();
    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::flow::vcs::tests::{git_available, test_git};
    use crate::flow::{PlainFs, VersionControl};
    use crate::model::FlowState;
    use serde_json::json;
    use tempfile::TempDir;

    fn transcript(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let lines = [
            json!({"type": "user", "uuid": "u1", "sessionId": "s1", "timestamp": "2026-02-01T09:00:00Z",
                   "message": {"role": "user", "content": "Fix the bug"}}),
            json!({"type": "assistant", "uuid": "a1", "parentUuid": "u1", "timestamp": "2026-02-01T09:00:05Z",
                   "message": {"model": "claude-sonnet-4", "content": [{"type": "text", "text": "Looking."}]}}),
        ];
        let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
        std::fs::write(&path, body).unwrap();
        path
    }

    fn engine(root: &Path, vcs: Box<dyn VersionControl>) -> FlowEngine {
        let engine = FlowEngine::new(ArchiveLayout::new(root), vcs);
        engine.layout().ensure().unwrap();
        engine
    }

    #[test]
    fn imports_claude_transcript_into_hypothesis() {
        let tmp = TempDir::new().unwrap();
        let source = transcript(tmp.path(), "s1.jsonl");
        let registry = AdapterRegistry::new(&Config::default());
        let engine = engine(&tmp.path().join("knowledge"), Box::new(PlainFs));

        let outcome = Importer::new(&registry, &engine, ConvertOptions::default())
            .import_file(&source, Platform::ClaudeCode)
            .unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.commit, Some(CommitOutcome::Skipped));
        let record = &outcome.records[0];
        assert_eq!(record.title, "Fix the bug");
        assert_eq!(record.message_count, 2);
        assert!(record.canonical.to_string_lossy().contains("2026/02"));
        assert!(record.pointer.starts_with(engine.layout().flow_dir(FlowState::Hypothesis)));
        assert!(outcome.raw.exists());
        assert_eq!(
            engine.locate(crate::model::short_id(&record.id), None).unwrap().state,
            FlowState::Hypothesis
        );
    }

    #[test]
    fn reimporting_from_the_raw_archive_keeps_the_export() {
        let tmp = TempDir::new().unwrap();
        let registry = AdapterRegistry::new(&Config::default());
        let engine = engine(&tmp.path().join("knowledge"), Box::new(PlainFs));
        let raw = transcript(&engine.layout().raw_dir(Platform::ClaudeCode), "s.jsonl");
        let before = std::fs::read(&raw).unwrap();

        let outcome = Importer::new(&registry, &engine, ConvertOptions::default())
            .import_file(&raw, Platform::ClaudeCode)
            .unwrap();

        assert_eq!(outcome.raw, raw);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].message_count, 2);
        assert_eq!(std::fs::read(&raw).unwrap(), before);
    }

    #[test]
    fn failing_conversations_are_reported_alongside_successes() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("conversations.json");
        let export = json!([
            {"id": "empty", "mapping": {}},
            {"id": "ok", "title": "Works", "mapping": {
                "n": {"message": {"author": {"role": "user"}, "content": {"parts": ["hello"]}}, "children": []}
            }}
        ]);
        std::fs::write(&source, export.to_string()).unwrap();

        let registry = AdapterRegistry::new(&Config::default());
        let engine = engine(&tmp.path().join("knowledge"), Box::new(PlainFs));
        let outcome = Importer::new(&registry, &engine, ConvertOptions::default())
            .auto_commit(false)
            .import_file(&source, Platform::ChatGpt)
            .unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].title, "Works");
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.commit.is_none());
    }

    #[test]
    fn batch_continues_past_failures() {
        let tmp = TempDir::new().unwrap();
        let good = transcript(tmp.path(), "good.jsonl");
        let bad = tmp.path().join("bad.jsonl");
        std::fs::write(&bad, "not json at all\n").unwrap();
        let missing = tmp.path().join("missing.jsonl");

        let registry = AdapterRegistry::new(&Config::default());
        let engine = engine(&tmp.path().join("knowledge"), Box::new(PlainFs));
        let report = Importer::new(&registry, &engine, ConvertOptions::default())
            .import_batch(&[bad, good.clone(), missing], Platform::ClaudeCode);

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.total(), 3);
        assert_eq!(report.imported[0].0, good);
        assert!(matches!(report.failed[0].1, RcmError::Parse { .. }));
        assert!(matches!(report.failed[1].1, RcmError::Io { .. }));
    }

    #[test]
    fn orphans_skip_imported_and_subagent_transcripts() {
        let tmp = TempDir::new().unwrap();
        let projects = tmp.path().join("projects");
        let project = projects.join("-home-dev-app");
        std::fs::create_dir_all(project.join("subagents")).unwrap();
        let imported = transcript(&project, "imported.jsonl");
        transcript(&project, "pending.jsonl");
        transcript(&project.join("subagents"), "agent.jsonl");
        std::fs::write(project.join("notes.txt"), "x").unwrap();

        let registry = AdapterRegistry::new(&Config::default());
        let engine = engine(&tmp.path().join("knowledge"), Box::new(PlainFs));
        Importer::new(&registry, &engine, ConvertOptions::default())
            .import_file(&imported, Platform::ClaudeCode)
            .unwrap();

        let orphans = find_orphans(engine.layout(), &projects).unwrap();
        assert_eq!(orphans, vec![project.join("pending.jsonl")]);
    }

    #[test]
    fn git_import_commits_everything_it_wrote() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let source = transcript(tmp.path(), "s1.jsonl");
        let root = tmp.path().join("knowledge");
        std::fs::create_dir_all(&root).unwrap();
        let git = test_git(&root);
        git.ensure_repository().unwrap();

        let registry = AdapterRegistry::new(&Config::default());
        let engine = engine(&root, Box::new(git));
        let outcome = Importer::new(&registry, &engine, ConvertOptions::default())
            .import_file(&source, Platform::ClaudeCode)
            .unwrap();

        assert!(matches!(outcome.commit, Some(CommitOutcome::Created(_))));
        assert!(engine.is_clean().unwrap());
    }
}
