//! Version-control backends for the flow engine
//!
//! The engine only needs to move a path, stage paths and commit. `GitCli`
//! shells out to `git` in the archive root; `PlainFs` renames on disk and
//! records nothing, for archives that are not repositories.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::config::{VcsBackend, VcsConfig};
use crate::error::{RcmError, Result};

/// Commit subject prefix: `rcm(<category>): ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitCategory {
    Flow,
    Import,
    Convert,
    Promote,
    Export,
}

impl CommitCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitCategory::Flow => "flow",
            CommitCategory::Import => "import",
            CommitCategory::Convert => "convert",
            CommitCategory::Promote => "promote",
            CommitCategory::Export => "export",
        }
    }

    pub fn subject(&self, message: &str) -> String {
        format!("rcm({}): {message}", self.as_str())
    }
}

impl fmt::Display for CommitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A commit was recorded; holds its abbreviated hash
    Created(String),
    /// Nothing was staged
    NothingToCommit,
    /// The backend does not record history
    Skipped,
}

impl fmt::Display for CommitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOutcome::Created(hash) => write!(f, "committed {hash}"),
            CommitOutcome::NothingToCommit => f.write_str("nothing to commit"),
            CommitOutcome::Skipped => f.write_str("commit skipped"),
        }
    }
}

pub trait VersionControl {
    fn name(&self) -> &'static str;

    /// Initialize the repository if needed
    fn ensure_repository(&self) -> Result<()>;

    /// Rename a tracked or untracked path, creating the destination directory
    fn move_path(&self, from: &Path, to: &Path) -> Result<()>;

    fn stage(&self, paths: &[PathBuf]) -> Result<()>;

    /// Commit staged changes. An empty index is success, not an error.
    fn commit(&self, category: CommitCategory, message: &str) -> Result<CommitOutcome>;

    fn is_clean(&self) -> Result<bool>;
}

/// Select the backend named in configuration
pub fn from_config(config: &VcsConfig, root: &Path) -> Box<dyn VersionControl> {
    match config.backend {
        VcsBackend::Git => {
            let mut git = GitCli::new(root);
            if let (Some(name), Some(email)) = (&config.author_name, &config.author_email) {
                git = git.with_identity(name, email);
            }
            Box::new(git)
        }
        VcsBackend::None => Box::new(PlainFs),
    }
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent).map_err(|e| RcmError::io(parent, e)),
        None => Ok(()),
    }
}

// ============================================
// GIT
// ============================================

/// `git` subprocess backend rooted at the archive root
pub struct GitCli {
    repo: PathBuf,
    identity: Option<(String, String)>,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            identity: None,
        }
    }

    /// Commit as this author instead of the ambient git identity
    pub fn with_identity(mut self, name: &str, email: &str) -> Self {
        self.identity = Some((name.to_string(), email.to_string()));
        self
    }

    fn git(&self, operation: &'static str, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo);
        if let Some((name, email)) = &self.identity {
            cmd.arg("-c")
                .arg(format!("user.name={name}"))
                .arg("-c")
                .arg(format!("user.email={email}"));
        }
        tracing::debug!(repo = %self.repo.display(), ?args, "git");
        cmd.args(args)
            .output()
            .map_err(|e| RcmError::vcs(operation, format!("failed to execute git: {e}")))
    }

    fn git_checked(&self, operation: &'static str, args: &[&str]) -> Result<Output> {
        let output = self.git(operation, args)?;
        if !output.status.success() {
            return Err(RcmError::vcs(operation, stderr_of(&output)));
        }
        Ok(output)
    }

    /// Path relative to the repository when it lives inside it
    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.repo).unwrap_or(path)
    }

    fn is_tracked(&self, path: &Path) -> Result<bool> {
        let rel = self.relative(path).to_string_lossy().into_owned();
        let output = self.git("git ls-files", &["ls-files", "--error-unmatch", "--", &rel])?;
        Ok(output.status.success())
    }
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    }
}

impl VersionControl for GitCli {
    fn name(&self) -> &'static str {
        "git"
    }

    fn ensure_repository(&self) -> Result<()> {
        std::fs::create_dir_all(&self.repo).map_err(|e| RcmError::io(&self.repo, e))?;
        let probe = self.git("git rev-parse", &["rev-parse", "--is-inside-work-tree"])?;
        if probe.status.success() {
            return Ok(());
        }
        self.git_checked("git init", &["init", "--quiet"])?;
        tracing::info!(repo = %self.repo.display(), "initialized git repository");
        Ok(())
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        create_parent(to)?;

        let move_error = |message: String| RcmError::VersionControl {
            operation: "git mv",
            from: Some(from.to_path_buf()),
            to: Some(to.to_path_buf()),
            message,
        };

        // Pointers created since the last commit are unknown to git
        if !self.is_tracked(from)? {
            return std::fs::rename(from, to).map_err(|e| move_error(e.to_string()));
        }

        let src = self.relative(from).to_string_lossy().into_owned();
        let dst = self.relative(to).to_string_lossy().into_owned();
        let output = self.git("git mv", &["mv", "--", &src, &dst])?;
        if !output.status.success() {
            return Err(move_error(stderr_of(&output)));
        }
        Ok(())
    }

    fn stage(&self, paths: &[PathBuf]) -> Result<()> {
        // Sources of `git mv` are already staged and no longer on disk
        let rel: Vec<String> = paths
            .iter()
            .filter(|p| p.symlink_metadata().is_ok())
            .map(|p| self.relative(p).to_string_lossy().into_owned())
            .collect();
        if rel.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(rel.iter().map(String::as_str));
        self.git_checked("git add", &args)?;
        Ok(())
    }

    fn commit(&self, category: CommitCategory, message: &str) -> Result<CommitOutcome> {
        let staged = self.git("git diff", &["diff", "--cached", "--quiet"])?;
        if staged.status.success() {
            tracing::debug!("nothing staged, skipping commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        let subject = category.subject(message);
        let output = self.git("git commit", &["commit", "--quiet", "-m", &subject])?;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("nothing to commit") {
                return Ok(CommitOutcome::NothingToCommit);
            }
            return Err(RcmError::vcs("git commit", stderr_of(&output)));
        }

        let head = self.git_checked("git rev-parse", &["rev-parse", "--short", "HEAD"])?;
        let hash = String::from_utf8_lossy(&head.stdout).trim().to_string();
        tracing::info!(%hash, %subject, "committed");
        Ok(CommitOutcome::Created(hash))
    }

    fn is_clean(&self) -> Result<bool> {
        let output = self.git_checked("git status", &["status", "--porcelain"])?;
        Ok(output.stdout.iter().all(u8::is_ascii_whitespace))
    }
}

// ============================================
// PLAIN FILESYSTEM
// ============================================

/// Renames on disk, keeps no history
pub struct PlainFs;

impl VersionControl for PlainFs {
    fn name(&self) -> &'static str {
        "none"
    }

    fn ensure_repository(&self) -> Result<()> {
        Ok(())
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        create_parent(to)?;
        std::fs::rename(from, to).map_err(|e| RcmError::VersionControl {
            operation: "rename",
            from: Some(from.to_path_buf()),
            to: Some(to.to_path_buf()),
            message: e.to_string(),
        })
    }

    fn stage(&self, _paths: &[PathBuf]) -> Result<()> {
        Ok(())
    }

    fn commit(&self, _category: CommitCategory, _message: &str) -> Result<CommitOutcome> {
        Ok(CommitOutcome::Skipped)
    }

    fn is_clean(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub(crate) fn test_git(root: &Path) -> GitCli {
        GitCli::new(root).with_identity("RCM Test", "rcm@example.invalid")
    }

    #[test]
    fn commit_subjects_carry_category() {
        assert_eq!(
            CommitCategory::Flow.subject("codified → validated [abcd1234]"),
            "rcm(flow): codified → validated [abcd1234]"
        );
        assert_eq!(CommitCategory::Import.to_string(), "import");
    }

    #[test]
    fn plain_fs_moves_and_skips_commits() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("a/one.yaml");
        let to = tmp.path().join("b/nested/one.yaml");
        std::fs::create_dir_all(from.parent().unwrap()).unwrap();
        std::fs::write(&from, "x").unwrap();

        PlainFs.move_path(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "x");
        assert_eq!(
            PlainFs.commit(CommitCategory::Flow, "m").unwrap(),
            CommitOutcome::Skipped
        );

        let err = PlainFs.move_path(&from, &to).unwrap_err();
        assert!(matches!(err, RcmError::VersionControl { .. }));
    }

    #[test]
    fn git_second_commit_without_changes_succeeds() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let git = test_git(tmp.path());
        git.ensure_repository().unwrap();

        let file = tmp.path().join("record.yaml");
        std::fs::write(&file, "session: {}\n").unwrap();
        git.stage(&[file.clone()]).unwrap();
        assert!(matches!(
            git.commit(CommitCategory::Import, "first").unwrap(),
            CommitOutcome::Created(_)
        ));
        assert!(git.is_clean().unwrap());

        git.stage(&[file]).unwrap();
        assert_eq!(
            git.commit(CommitCategory::Import, "again").unwrap(),
            CommitOutcome::NothingToCommit
        );
    }

    #[test]
    fn git_moves_tracked_and_untracked_paths() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let git = test_git(tmp.path());
        git.ensure_repository().unwrap();

        let tracked = tmp.path().join("flows/hypothesis/a.yaml");
        std::fs::create_dir_all(tracked.parent().unwrap()).unwrap();
        std::fs::write(&tracked, "a").unwrap();
        git.stage(&[tracked.clone()]).unwrap();
        git.commit(CommitCategory::Flow, "seed").unwrap();

        let moved = tmp.path().join("flows/codified/a.yaml");
        git.move_path(&tracked, &moved).unwrap();
        assert!(moved.exists() && !tracked.exists());

        let loose = tmp.path().join("flows/hypothesis/b.yaml");
        std::fs::write(&loose, "b").unwrap();
        let loose_moved = tmp.path().join("flows/codified/b.yaml");
        git.move_path(&loose, &loose_moved).unwrap();
        assert!(loose_moved.exists());
    }
}
