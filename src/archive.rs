//! Archive layout and canonical record writer
//!
//! ```text
//! <root>/archive/canonical/<year>/<month>/<date>_<slug>_<short-id>.yaml
//! <root>/archive/raw/<platform>/<original-filename>
//! <root>/flows/<state>/<canonical filename>
//! ```
//!
//! Canonical files are permanent: once written they are only ever rewritten
//! in place by the flow engine.

use chrono::{Datelike, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::adapter::parse_timestamp;
use crate::error::{RcmError, Result};
use crate::model::{CanonicalRecord, FlowState, Platform};

const SLUG_MAX_CHARS: usize = 50;

/// Paths of one archive root
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn canonical_dir(&self) -> PathBuf {
        self.root.join("archive").join("canonical")
    }

    pub fn raw_dir(&self, platform: Platform) -> PathBuf {
        self.root.join("archive").join("raw").join(platform.as_str())
    }

    pub fn flows_dir(&self) -> PathBuf {
        self.root.join("flows")
    }

    pub fn flow_dir(&self, state: FlowState) -> PathBuf {
        self.flows_dir().join(state.as_str())
    }

    pub fn pointer_path(&self, state: FlowState, filename: &str) -> PathBuf {
        self.flow_dir(state).join(filename)
    }

    /// Create the canonical, raw and flow directories
    pub fn ensure(&self) -> Result<()> {
        let mut dirs = vec![self.canonical_dir()];
        dirs.extend(Platform::ALL.iter().map(|p| self.raw_dir(*p)));
        dirs.extend(FlowState::ALL.iter().map(|s| self.flow_dir(*s)));
        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|e| RcmError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Write a record under `canonical/<year>/<month>/`
    pub fn save(&self, record: &CanonicalRecord) -> Result<PathBuf> {
        save(record, &self.canonical_dir())
    }

    /// Keep a verbatim copy of a raw export under `raw/<platform>/`
    pub fn archive_raw(&self, source: &Path, platform: Platform) -> Result<PathBuf> {
        let dir = self.raw_dir(platform);
        std::fs::create_dir_all(&dir).map_err(|e| RcmError::io(&dir, e))?;

        let filename = source
            .file_name()
            .ok_or_else(|| RcmError::io(source, std::io::ErrorKind::InvalidInput.into()))?;
        let target = dir.join(filename);
        if same_file(source, &target) {
            tracing::debug!(path = %target.display(), "raw export already archived in place");
            return Ok(target);
        }
        std::fs::copy(source, &target).map_err(|e| RcmError::io(source, e))?;
        tracing::debug!(source = %source.display(), target = %target.display(), "archived raw export");
        Ok(target)
    }

    /// All canonical records, sorted by path
    pub fn canonical_files(&self) -> Vec<PathBuf> {
        let canonical = self.canonical_dir();
        if !canonical.exists() {
            return vec![];
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&canonical)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_record_file(p))
            .collect();
        files.sort();
        files
    }
}

/// Write `record` to `archive_root/<year>/<MM>/<filename>`
pub fn save(record: &CanonicalRecord, archive_root: &Path) -> Result<PathBuf> {
    let (year, month) = partition(record);
    let dir = archive_root.join(format!("{year:04}")).join(format!("{month:02}"));
    write_record_into(record, &dir)
}

/// Write `record` to `dir/<filename>`, refusing to overwrite
pub fn write_record_into(record: &CanonicalRecord, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| RcmError::io(dir, e))?;

    let path = dir.join(canonical_filename(record));
    if path.exists() {
        return Err(RcmError::AlreadyArchived(path));
    }

    write_atomic(&path, &record.to_yaml_string()?)?;
    tracing::info!(path = %path.display(), id = %record.session.id, "saved canonical record");
    Ok(path)
}

/// `<YYYY-MM-DD>_<slug>_<short-id>.yaml`
pub fn canonical_filename(record: &CanonicalRecord) -> String {
    let date = match parse_timestamp(&record.session.created_at) {
        Some(ts) => ts.format("%Y-%m-%d").to_string(),
        None => Utc::now().format("%Y-%m-%d").to_string(),
    };
    format!(
        "{date}_{}_{}.yaml",
        slugify(record.title()),
        record.short_id()
    )
}

/// Lowercase ASCII alphanumerics; every other run becomes one dash
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug: String = slug.trim_matches('-').chars().take(SLUG_MAX_CHARS).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// Year and month the record is filed under
fn partition(record: &CanonicalRecord) -> (i32, u32) {
    let ts = parse_timestamp(&record.session.created_at).unwrap_or_else(|| {
        tracing::warn!(
            created_at = %record.session.created_at,
            "unparseable created_at, filing under the current month"
        );
        Utc::now()
    });
    (ts.year(), ts.month())
}

pub(crate) fn is_record_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Copying a file onto itself truncates it
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Write through a temp sibling and rename over the target
pub(crate) fn write_atomic(path: &Path, payload: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RcmError::io(parent, e))?;
    }

    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!(".{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };

    std::fs::write(&temp_path, payload).map_err(|e| RcmError::io(&temp_path, e))?;
    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        RcmError::io(path, e)
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample_record;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fix the bug!"), "fix-the-bug");
        assert_eq!(slugify("  --Hello,   World--  "), "hello-world");
        assert_eq!(slugify("日本語"), "untitled");
        assert_eq!(slugify(""), "untitled");
        let long = slugify(&"word ".repeat(30));
        assert!(long.len() <= 50);
        assert!(!long.ends_with('-'));
    }

    #[test]
    fn save_partitions_by_creation_month() {
        let tmp = TempDir::new().unwrap();
        let layout = ArchiveLayout::new(tmp.path());
        let record = sample_record("Fix the bug", "2026-02-03T10:00:00Z");

        let path = layout.save(&record).unwrap();
        let expected = layout
            .canonical_dir()
            .join("2026")
            .join("02")
            .join(format!("2026-02-03_fix-the-bug_{}.yaml", record.short_id()));
        assert_eq!(path, expected);

        let reloaded = CanonicalRecord::load(&path).unwrap();
        assert_eq!(reloaded, record);
        assert_eq!(layout.canonical_files(), vec![path]);
    }

    #[test]
    fn save_refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        let layout = ArchiveLayout::new(tmp.path());
        let record = sample_record("Once", "2026-02-03T10:00:00Z");

        let path = layout.save(&record).unwrap();
        let original = std::fs::read_to_string(&path).unwrap();

        let mut changed = record.clone();
        changed.session.metadata.summary = "changed".to_string();
        assert!(matches!(
            layout.save(&changed),
            Err(RcmError::AlreadyArchived(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn raw_exports_are_copied_verbatim() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("session.jsonl");
        std::fs::write(&source, "{\"type\":\"user\"}\n").unwrap();

        let layout = ArchiveLayout::new(tmp.path().join("root"));
        let copy = layout.archive_raw(&source, Platform::ClaudeCode).unwrap();
        assert_eq!(copy, layout.raw_dir(Platform::ClaudeCode).join("session.jsonl"));
        assert_eq!(
            std::fs::read(&copy).unwrap(),
            std::fs::read(&source).unwrap()
        );
    }

    #[test]
    fn archiving_from_the_raw_dir_keeps_the_file() {
        let tmp = TempDir::new().unwrap();
        let layout = ArchiveLayout::new(tmp.path());
        let raw = layout.raw_dir(Platform::ClaudeCode).join("session.jsonl");
        std::fs::create_dir_all(raw.parent().unwrap()).unwrap();
        std::fs::write(&raw, "{\"type\":\"user\"}\n").unwrap();

        let copy = layout.archive_raw(&raw, Platform::ClaudeCode).unwrap();
        assert_eq!(copy, raw);
        assert_eq!(std::fs::read_to_string(&raw).unwrap(), "{\"type\":\"user\"}\n");
    }
}
