//! Flow state transitions
//!
//! A record's lifecycle state is the directory under `flows/` that holds its
//! pointer, mirrored by `session.flow_state.current` inside the record. The
//! engine is the only writer of either, and changes both together:
//!
//! 1. resolve the pointer (promoted → validated → codified → hypothesis)
//! 2. validate the edge
//! 3. move the pointer
//! 4. rewrite the embedded state
//! 5. stage and commit `rcm(flow): <from> → <to> [<short-id>]`
//!
//! A failure in 4 or 5 restores the record and moves the pointer back.

mod rewrite;
pub mod vcs;

pub use vcs::{CommitCategory, CommitOutcome, GitCli, PlainFs, VersionControl};

use std::path::{Path, PathBuf};

use crate::archive::{is_record_file, write_atomic, ArchiveLayout};
use crate::error::{RcmError, Result};
use crate::model::{short_id, CanonicalRecord, FlowState};
use rewrite::StateUpdate;

/// A state-pointer found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerMatch {
    pub state: FlowState,
    pub path: PathBuf,
    pub filename: String,
}

impl PointerMatch {
    /// Short id embedded in `<date>_<slug>_<short-id>.yaml`
    pub fn short_id(&self) -> &str {
        filename_short_id(&self.filename)
    }
}

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    /// Restrict the lookup to this state
    pub from: Option<FlowState>,
    pub to: FlowState,
    pub quality_score: Option<u32>,
    pub tags: Vec<String>,
    pub dry_run: bool,
}

impl TransitionRequest {
    pub fn to(to: FlowState) -> Self {
        Self {
            from: None,
            to,
            quality_score: None,
            tags: vec![],
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub from_path: PathBuf,
    pub to_path: PathBuf,
    pub commit_message: String,
    /// `None` on dry runs
    pub commit: Option<CommitOutcome>,
    pub dry_run: bool,
}

/// One line of `flow list`
#[derive(Debug, Clone)]
pub struct PointerSummary {
    pub filename: String,
    pub path: PathBuf,
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub created_at: String,
    pub quality_score: Option<u32>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct RecordStatus {
    pub state: FlowState,
    pub pointer: PathBuf,
    pub canonical: PathBuf,
    pub size: u64,
    pub record: CanonicalRecord,
}

pub struct FlowEngine {
    layout: ArchiveLayout,
    vcs: Box<dyn VersionControl>,
}

impl FlowEngine {
    pub fn new(layout: ArchiveLayout, vcs: Box<dyn VersionControl>) -> Self {
        Self { layout, vcs }
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    /// Initialize the backing repository if needed
    pub fn ensure_repository(&self) -> Result<()> {
        self.vcs.ensure_repository()
    }

    pub fn is_clean(&self) -> Result<bool> {
        self.vcs.is_clean()
    }

    /// Create the initial `hypothesis` pointer for a newly archived record.
    /// A record that already has a pointer keeps it.
    pub fn enter(&self, canonical_path: &Path) -> Result<PathBuf> {
        let filename = file_name(canonical_path)?;

        for state in FlowState::RESOLUTION_ORDER {
            let existing = self.layout.pointer_path(state, &filename);
            if existing.symlink_metadata().is_ok() {
                tracing::warn!(pointer = %existing.display(), "record already has a pointer");
                return Ok(existing);
            }
        }

        let pointer = self.layout.pointer_path(FlowState::Hypothesis, &filename);
        let dir = self.layout.flow_dir(FlowState::Hypothesis);
        std::fs::create_dir_all(&dir).map_err(|e| RcmError::io(&dir, e))?;
        create_pointer(&self.layout, canonical_path, &pointer)?;
        tracing::debug!(pointer = %pointer.display(), "entered hypothesis");
        Ok(pointer)
    }

    /// Find the pointer for `query`: a filename prefix or substring, or a
    /// record id whose first 8 characters match a filename's short id
    pub fn locate(&self, query: &str, state: Option<FlowState>) -> Result<PointerMatch> {
        let query = query.trim();
        let states: Vec<FlowState> = match state {
            Some(s) => vec![s],
            None => FlowState::RESOLUTION_ORDER.to_vec(),
        };

        let mut found: Vec<PointerMatch> = vec![];
        for candidate in states {
            for (filename, path) in self.pointers(candidate)? {
                if self.matches(query, &filename, &path) {
                    found.push(PointerMatch {
                        state: candidate,
                        path,
                        filename,
                    });
                }
            }
        }

        let mut found = found.into_iter();
        let Some(first) = found.next() else {
            return Err(RcmError::RecordNotFound {
                query: query.to_string(),
                state,
            });
        };

        for other in found {
            if other.filename == first.filename {
                tracing::warn!(
                    filename = %first.filename,
                    using = %first.state,
                    also_in = %other.state,
                    "record has pointers in more than one state"
                );
            } else {
                tracing::warn!(
                    query = %query,
                    using = %first.filename,
                    ignored = %other.filename,
                    "query matches more than one record"
                );
            }
        }

        Ok(first)
    }

    /// Move a record between lifecycle states
    pub fn transition(&self, query: &str, request: &TransitionRequest) -> Result<TransitionOutcome> {
        let pointer = self.locate(query, request.from)?;
        let from = pointer.state;
        let to = request.to;

        if !from.can_transition_to(to) {
            return Err(RcmError::InvalidTransition {
                from,
                to,
                allowed: from.allowed_targets().to_vec(),
            });
        }

        let from_path = pointer.path.clone();
        let to_path = self.layout.pointer_path(to, &pointer.filename);
        let commit_message = format!("{from} → {to} [{}]", pointer.short_id());

        if request.dry_run {
            return Ok(TransitionOutcome {
                from,
                to,
                from_path,
                to_path,
                commit_message,
                commit: None,
                dry_run: true,
            });
        }

        // Snapshot before anything moves
        let canonical = self.canonical_for(&from_path)?;
        let is_copy = !is_symlink(&from_path);
        let original = read(&canonical)?;
        let original_copy = if is_copy && canonical != from_path {
            Some(read(&from_path)?)
        } else {
            None
        };

        self.vcs.move_path(&from_path, &to_path)?;

        // A copy pointer with no archived original is its own record
        let canonical = if canonical == from_path {
            to_path.clone()
        } else {
            canonical
        };
        let mut written: Vec<(PathBuf, String)> = vec![(canonical.clone(), original)];
        if let Some(copy) = original_copy {
            written.push((to_path.clone(), copy));
        }

        let update = StateUpdate {
            state: to,
            quality_score: request.quality_score.map(|q| q.min(100)),
            tags: &request.tags,
        };

        let result = self
            .rewrite_all(&written, &update)
            .and_then(|_| {
                self.vcs
                    .stage(&[from_path.clone(), to_path.clone(), canonical.clone()])
            })
            .and_then(|_| self.vcs.commit(CommitCategory::Flow, &commit_message));

        match result {
            Ok(commit) => {
                tracing::info!(%from, %to, file = %pointer.filename, %commit, "flow transition");
                Ok(TransitionOutcome {
                    from,
                    to,
                    from_path,
                    to_path,
                    commit_message,
                    commit: Some(commit),
                    dry_run: false,
                })
            }
            Err(e) => {
                self.roll_back(&from_path, &to_path, &written, &canonical);
                Err(e)
            }
        }
    }

    /// Pointers in one state, newest record first
    pub fn list(&self, state: FlowState) -> Result<Vec<PointerSummary>> {
        let mut summaries = vec![];
        for (filename, path) in self.pointers(state)? {
            let record = match CanonicalRecord::load(&path) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                    continue;
                }
            };
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            summaries.push(PointerSummary {
                filename,
                path,
                id: record.session.id,
                title: record.session.metadata.title,
                tags: record.session.metadata.tags,
                created_at: record.session.created_at,
                quality_score: record.session.flow_state.quality_score,
                size,
            });
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    pub fn status(&self, query: &str) -> Result<RecordStatus> {
        let pointer = self.locate(query, None)?;
        let canonical = self.canonical_for(&pointer.path)?;
        let record = CanonicalRecord::load(&canonical)?;
        let size = std::fs::metadata(&canonical).map(|m| m.len()).unwrap_or(0);
        Ok(RecordStatus {
            state: pointer.state,
            pointer: pointer.path,
            canonical,
            size,
            record,
        })
    }

    /// Stage `paths` and commit them under `category`
    pub fn commit(
        &self,
        category: CommitCategory,
        message: &str,
        paths: &[PathBuf],
    ) -> Result<CommitOutcome> {
        self.vcs.stage(paths)?;
        self.vcs.commit(category, message)
    }

    /// `(filename, path)` of every pointer in a state directory, sorted
    fn pointers(&self, state: FlowState) -> Result<Vec<(String, PathBuf)>> {
        let dir = self.layout.flow_dir(state);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| RcmError::io(&dir, e))?;
        let mut pointers: Vec<(String, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let filename = e.file_name().to_str()?.to_string();
                let path = e.path();
                (!filename.starts_with('.') && is_record_file(&path)).then_some((filename, path))
            })
            .collect();
        pointers.sort();
        Ok(pointers)
    }

    fn matches(&self, query: &str, filename: &str, path: &Path) -> bool {
        if query.is_empty() {
            return false;
        }
        if filename.starts_with(query) || filename.contains(query) {
            return true;
        }

        // Full or long ids: short id from the filename, rest from the record
        if query.chars().count() > 8 && filename_short_id(filename) == short_id(query) {
            return match CanonicalRecord::load(path) {
                Ok(record) => record.session.id.starts_with(query),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot verify record id");
                    false
                }
            };
        }
        false
    }

    /// The archived file a pointer stands for
    fn canonical_for(&self, pointer: &Path) -> Result<PathBuf> {
        if is_symlink(pointer) {
            return std::fs::canonicalize(pointer).map_err(|e| RcmError::io(pointer, e));
        }

        // Copy pointer: the canonical file carries the same name
        let filename = file_name(pointer)?;
        Ok(self
            .layout
            .canonical_files()
            .into_iter()
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(filename.as_str()))
            .unwrap_or_else(|| pointer.to_path_buf()))
    }

    fn rewrite_all(&self, targets: &[(PathBuf, String)], update: &StateUpdate<'_>) -> Result<()> {
        for (path, original) in targets {
            let updated = rewrite::apply(original, update)?;
            write_atomic(path, &updated)?;
        }
        Ok(())
    }

    /// Best effort: restore record bytes, then put the pointer back
    fn roll_back(&self, from: &Path, to: &Path, snapshots: &[(PathBuf, String)], canonical: &Path) {
        tracing::warn!(from = %from.display(), to = %to.display(), "rolling back flow transition");

        for (path, original) in snapshots {
            if let Err(e) = write_atomic(path, original) {
                tracing::error!(path = %path.display(), error = %e, "failed to restore record");
            }
        }
        if let Err(e) = self.vcs.move_path(to, from) {
            tracing::error!(error = %e, "failed to move pointer back");
            return;
        }
        if let Err(e) = self
            .vcs
            .stage(&[from.to_path_buf(), to.to_path_buf(), canonical.to_path_buf()])
        {
            tracing::error!(error = %e, "failed to re-stage restored paths");
        }
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .ok_or_else(|| RcmError::io(path, std::io::ErrorKind::InvalidInput.into()))
}

fn filename_short_id(filename: &str) -> &str {
    let stem = filename
        .strip_suffix(".yaml")
        .or_else(|| filename.strip_suffix(".yml"))
        .unwrap_or(filename);
    stem.rsplit('_').next().unwrap_or(stem)
}

fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| RcmError::io(path, e))
}

/// Relative symlink so pointers survive the archive root moving;
/// every state directory sits at the same depth
#[cfg(unix)]
fn create_pointer(layout: &ArchiveLayout, canonical: &Path, pointer: &Path) -> Result<()> {
    let target = match canonical.strip_prefix(layout.root()) {
        Ok(rel) => Path::new("..").join("..").join(rel),
        Err(_) => std::fs::canonicalize(canonical).map_err(|e| RcmError::io(canonical, e))?,
    };
    std::os::unix::fs::symlink(&target, pointer).map_err(|e| RcmError::io(pointer, e))
}

#[cfg(not(unix))]
fn create_pointer(_layout: &ArchiveLayout, canonical: &Path, pointer: &Path) -> Result<()> {
    std::fs::copy(canonical, pointer)
        .map(|_| ())
        .map_err(|e| RcmError::io(pointer, e))
}

#[cfg(test)]
mod tests {
    use super::vcs::tests::{git_available, test_git};
    use super::*;
    use crate::archive::fixtures::sample_record;
    use tempfile::TempDir;

    fn setup(vcs: Box<dyn VersionControl>, tmp: &TempDir) -> FlowEngine {
        let layout = ArchiveLayout::new(tmp.path());
        layout.ensure().unwrap();
        FlowEngine::new(layout, vcs)
    }

    fn archive(engine: &FlowEngine, title: &str) -> (CanonicalRecord, PathBuf) {
        let record = sample_record(title, "2026-02-03T10:00:00Z");
        let canonical = engine.layout().save(&record).unwrap();
        engine.enter(&canonical).unwrap();
        (record, canonical)
    }

    fn state_of(path: &Path) -> FlowState {
        CanonicalRecord::load(path).unwrap().session.flow_state.current
    }

    /// Every file under the root, with contents
    fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files: Vec<_> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .map(|e| {
                let path = e.path().to_path_buf();
                let bytes = std::fs::read(&path).unwrap_or_default();
                (path, bytes)
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn enter_creates_hypothesis_pointer() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(Box::new(PlainFs), &tmp);
        let (record, canonical) = archive(&engine, "Fix the bug");

        let found = engine.locate(record.short_id(), None).unwrap();
        assert_eq!(found.state, FlowState::Hypothesis);
        assert_eq!(found.short_id(), record.short_id());
        assert_eq!(
            CanonicalRecord::load(&found.path).unwrap(),
            CanonicalRecord::load(&canonical).unwrap()
        );

        // Entering twice keeps the single pointer
        assert_eq!(engine.enter(&canonical).unwrap(), found.path);
    }

    #[test]
    fn forward_transitions_move_pointer_and_state() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(Box::new(PlainFs), &tmp);
        let (record, canonical) = archive(&engine, "Walkthrough");

        engine
            .transition(record.short_id(), &TransitionRequest::to(FlowState::Codified))
            .unwrap();
        let mut request = TransitionRequest::to(FlowState::Validated);
        request.quality_score = Some(90);
        request.tags = vec!["reviewed".to_string()];
        let outcome = engine.transition(record.short_id(), &request).unwrap();

        assert_eq!(outcome.from, FlowState::Codified);
        assert_eq!(outcome.commit, Some(CommitOutcome::Skipped));
        assert_eq!(
            outcome.commit_message,
            format!("codified → validated [{}]", record.short_id())
        );
        assert!(outcome.from_path.symlink_metadata().is_err());
        assert!(outcome.to_path.starts_with(engine.layout().flow_dir(FlowState::Validated)));

        let stored = CanonicalRecord::load(&canonical).unwrap();
        assert_eq!(stored.session.flow_state.current, FlowState::Validated);
        assert_eq!(stored.session.flow_state.quality_score, Some(90));
        assert_eq!(stored.session.metadata.tags, vec!["reviewed"]);
        assert_eq!(stored.session.id, record.session.id);
        assert_eq!(state_of(&outcome.to_path), FlowState::Validated);
    }

    #[test]
    fn invalid_edges_leave_archive_untouched() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(Box::new(PlainFs), &tmp);
        let (record, _) = archive(&engine, "Skipping ahead");
        let before = snapshot(tmp.path());

        let err = engine
            .transition(record.short_id(), &TransitionRequest::to(FlowState::Promoted))
            .unwrap_err();
        match err {
            RcmError::InvalidTransition { from, to, allowed } => {
                assert_eq!(from, FlowState::Hypothesis);
                assert_eq!(to, FlowState::Promoted);
                assert_eq!(allowed, vec![FlowState::Codified]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(snapshot(tmp.path()), before);
    }

    #[test]
    fn unknown_record_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(Box::new(PlainFs), &tmp);
        archive(&engine, "Present");
        let before = snapshot(tmp.path());

        let err = engine
            .transition("deadbeef", &TransitionRequest::to(FlowState::Codified))
            .unwrap_err();
        assert!(matches!(err, RcmError::RecordNotFound { state: None, .. }));

        let mut request = TransitionRequest::to(FlowState::Promoted);
        request.from = Some(FlowState::Validated);
        let err = engine.transition("present", &request).unwrap_err();
        assert!(matches!(
            err,
            RcmError::RecordNotFound {
                state: Some(FlowState::Validated),
                ..
            }
        ));
        assert_eq!(snapshot(tmp.path()), before);
    }

    #[test]
    fn dry_run_validates_without_moving() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(Box::new(PlainFs), &tmp);
        let (record, _) = archive(&engine, "Dry");
        let before = snapshot(tmp.path());

        let mut request = TransitionRequest::to(FlowState::Codified);
        request.dry_run = true;
        let outcome = engine.transition(record.short_id(), &request).unwrap();
        assert!(outcome.dry_run);
        assert!(outcome.commit.is_none());
        assert_eq!(snapshot(tmp.path()), before);
    }

    #[test]
    fn full_ids_and_filename_fragments_resolve() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(Box::new(PlainFs), &tmp);
        let (record, _) = archive(&engine, "Partial match");

        assert!(engine.locate(&record.session.id, None).is_ok());
        assert!(engine.locate("2026-02-03_partial", None).is_ok());
        assert!(engine.locate("partial-match", None).is_ok());

        // Same short id, different tail
        let mut wrong = record.session.id.clone();
        wrong.replace_range(9.., "ffff-ffff-ffff-ffffffffffff");
        assert!(matches!(
            engine.locate(&wrong, None),
            Err(RcmError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn list_and_status_report_records() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(Box::new(PlainFs), &tmp);
        let (first, _) = archive(&engine, "First");
        archive(&engine, "Second");
        engine
            .transition(first.short_id(), &TransitionRequest::to(FlowState::Codified))
            .unwrap();

        assert_eq!(engine.list(FlowState::Hypothesis).unwrap().len(), 1);
        let codified = engine.list(FlowState::Codified).unwrap();
        assert_eq!(codified.len(), 1);
        assert_eq!(codified[0].title, "First");

        let status = engine.status(first.short_id()).unwrap();
        assert_eq!(status.state, FlowState::Codified);
        assert_eq!(status.record.session.flow_state.current, FlowState::Codified);
        assert!(status.canonical.starts_with(
            std::fs::canonicalize(engine.layout().canonical_dir()).unwrap()
        ));
    }

    /// Moves like `PlainFs` but refuses every commit
    struct FailingCommit;

    impl VersionControl for FailingCommit {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn ensure_repository(&self) -> Result<()> {
            Ok(())
        }

        fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
            PlainFs.move_path(from, to)
        }

        fn stage(&self, _paths: &[PathBuf]) -> Result<()> {
            Ok(())
        }

        fn commit(&self, _category: CommitCategory, _message: &str) -> Result<CommitOutcome> {
            Err(RcmError::vcs("commit", "boom"))
        }

        fn is_clean(&self) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn failed_commit_rolls_the_transition_back() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(Box::new(FailingCommit), &tmp);
        let (record, canonical) = archive(&engine, "Rollback");
        let before = std::fs::read(&canonical).unwrap();
        let filename = file_name(&canonical).unwrap();

        let mut request = TransitionRequest::to(FlowState::Codified);
        request.quality_score = Some(70);
        request.tags = vec!["new-tag".to_string()];
        let err = engine.transition(record.short_id(), &request).unwrap_err();
        assert!(matches!(err, RcmError::VersionControl { .. }));

        let layout = engine.layout();
        let hypothesis = layout.pointer_path(FlowState::Hypothesis, &filename);
        let codified = layout.pointer_path(FlowState::Codified, &filename);
        assert!(hypothesis.symlink_metadata().is_ok());
        assert!(codified.symlink_metadata().is_err());
        assert_eq!(std::fs::read(&canonical).unwrap(), before);
        assert_eq!(state_of(&canonical), FlowState::Hypothesis);
        assert_eq!(
            engine.locate(record.short_id(), None).unwrap().state,
            FlowState::Hypothesis
        );
    }

    #[test]
    fn engine_exposes_repository_checks() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(Box::new(PlainFs), &tmp);
        engine.ensure_repository().unwrap();
        assert!(engine.is_clean().unwrap());
    }

    #[test]
    fn git_transition_commits_and_rejects_bad_move() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let git = test_git(tmp.path());
        git.ensure_repository().unwrap();
        let engine = setup(Box::new(git), &tmp);
        let (record, canonical) = archive(&engine, "Versioned");
        let pointer = engine.locate(record.short_id(), None).unwrap().path;
        engine
            .commit(CommitCategory::Import, "seed", &[canonical.clone(), pointer])
            .unwrap();

        let outcome = engine
            .transition(record.short_id(), &TransitionRequest::to(FlowState::Codified))
            .unwrap();
        assert!(matches!(outcome.commit, Some(CommitOutcome::Created(_))));
        assert!(engine.is_clean().unwrap());
        assert_eq!(state_of(&canonical), FlowState::Codified);

        // Nothing left to record
        assert_eq!(
            engine.commit(CommitCategory::Flow, "noop", &[canonical]).unwrap(),
            CommitOutcome::NothingToCommit
        );
    }
}
