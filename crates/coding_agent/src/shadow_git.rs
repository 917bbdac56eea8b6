//! File-layer snapshots kept in a shadow git repository per conversation.
//!
//! The shadow repository lives outside the workspace and never touches the
//! project's own `.git`; every command passes `--git-dir` and `--work-tree`
//! explicitly. The project's ignore rules do not apply to snapshots: ignored
//! files are captured and restored like any other file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use session_store::sanitize_key;
use thiserror::Error;
use tracing::debug;

const MAX_DIFF_CHARS: usize = 4000;
const COMMITTER_NAME: &str = "coding-agent";
const COMMITTER_EMAIL: &str = "coding-agent@localhost";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("git {args} failed ({status}): {stderr}")]
    Git {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("docker {args} failed ({status}): {stderr}")]
    Docker {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    Launch {
        program: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("system snapshot unavailable: {reason}")]
    Unavailable { reason: String },
}

impl SnapshotError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Result of staging the whole work tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staged {
    /// Nothing changed since `head`.
    Unchanged { head: String },
    Changed { diff: String },
}

/// Versioned snapshots of the workspace, one history per conversation.
pub trait SnapshotStore: Send + Sync {
    fn stage_all(&self, history: &str) -> Result<Staged, SnapshotError>;

    /// Commits the staged tree and returns the new commit hash.
    fn commit(&self, history: &str, message: &str) -> Result<String, SnapshotError>;

    /// Makes the work tree match `hash`, deleting untracked files.
    fn restore(&self, history: &str, hash: &str) -> Result<(), SnapshotError>;
}

#[derive(Debug, Clone)]
pub struct ShadowGit {
    repos_root: PathBuf,
    work_tree: PathBuf,
}

impl ShadowGit {
    #[must_use]
    pub fn new(repos_root: impl Into<PathBuf>, work_tree: impl Into<PathBuf>) -> Self {
        Self {
            repos_root: repos_root.into(),
            work_tree: work_tree.into(),
        }
    }

    #[must_use]
    pub fn git_dir(&self, history: &str) -> PathBuf {
        self.repos_root.join(sanitize_key(history))
    }

    fn ensure_repo(&self, history: &str) -> Result<PathBuf, SnapshotError> {
        let git_dir = self.git_dir(history);
        if git_dir.join("HEAD").is_file() {
            return Ok(git_dir);
        }

        fs::create_dir_all(&git_dir)
            .map_err(|source| SnapshotError::io("creating shadow repository", &git_dir, source))?;
        let mut command = Command::new("git");
        command.arg("init").arg("--bare").arg("--quiet").arg(&git_dir);
        let output = run_logged(command, "init --bare")?;
        if !output.status.success() {
            return Err(git_failure("init --bare", &output));
        }
        Ok(git_dir)
    }

    fn git(&self, git_dir: &Path, args: &[&str]) -> Result<Output, SnapshotError> {
        let mut command = Command::new("git");
        command
            .arg("--git-dir")
            .arg(git_dir)
            .arg("--work-tree")
            .arg(&self.work_tree)
            .arg("-c")
            .arg("core.excludesFile=")
            .args(args)
            .current_dir(&self.work_tree);
        run_logged(command, &args.join(" "))
    }

    fn git_checked(&self, git_dir: &Path, args: &[&str]) -> Result<String, SnapshotError> {
        let output = self.git(git_dir, args)?;
        if !output.status.success() {
            return Err(git_failure(&args.join(" "), &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn head(&self, git_dir: &Path) -> Result<Option<String>, SnapshotError> {
        let output = self.git(git_dir, &["rev-parse", "--verify", "--quiet", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}

impl SnapshotStore for ShadowGit {
    fn stage_all(&self, history: &str) -> Result<Staged, SnapshotError> {
        let git_dir = self.ensure_repo(history)?;
        self.git_checked(&git_dir, &["add", "-A", "--force", "."])?;

        if let Some(head) = self.head(&git_dir)? {
            let output = self.git(&git_dir, &["diff-index", "--quiet", "--cached", "HEAD"])?;
            match output.status.code() {
                Some(0) => return Ok(Staged::Unchanged { head }),
                Some(1) => {}
                _ => return Err(git_failure("diff-index --quiet --cached HEAD", &output)),
            }
        }

        let diff = self.git_checked(&git_dir, &["diff", "--cached"])?;
        Ok(Staged::Changed {
            diff: truncate_diff(diff),
        })
    }

    fn commit(&self, history: &str, message: &str) -> Result<String, SnapshotError> {
        let git_dir = self.ensure_repo(history)?;
        let name = format!("user.name={COMMITTER_NAME}");
        let email = format!("user.email={COMMITTER_EMAIL}");
        self.git_checked(
            &git_dir,
            &[
                "-c",
                name.as_str(),
                "-c",
                email.as_str(),
                "-c",
                "commit.gpgsign=false",
                "commit",
                "--quiet",
                "--no-verify",
                "--allow-empty",
                "-m",
                message,
            ],
        )?;
        self.git_checked(&git_dir, &["rev-parse", "HEAD"])
    }

    fn restore(&self, history: &str, hash: &str) -> Result<(), SnapshotError> {
        let git_dir = self.ensure_repo(history)?;
        self.git_checked(&git_dir, &["checkout", "--quiet", "-f", hash])?;
        self.git_checked(&git_dir, &["clean", "-fdxq"])?;
        Ok(())
    }
}

fn run_logged(mut command: Command, label: &str) -> Result<Output, SnapshotError> {
    debug!(args = label, "running git");
    command.output().map_err(|source| SnapshotError::Launch {
        program: "git",
        source,
    })
}

fn git_failure(args: &str, output: &Output) -> SnapshotError {
    SnapshotError::Git {
        args: args.to_string(),
        status: crate::executor::format_exit_status(output.status),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn truncate_diff(diff: String) -> String {
    match diff.char_indices().nth(MAX_DIFF_CHARS) {
        Some((cutoff, _)) => format!("{}\n... (truncated)", &diff[..cutoff]),
        None => diff,
    }
}
