//! The Git operations the virtual branch engine depends on.
//!
//! The engine never touches the object database directly; everything goes
//! through [`GitService`]. [`GitCli`] shells out to the `git` binary, tests
//! substitute an in-memory fake.

mod cli;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use cli::GitCli;

/// Errors from Git service calls.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    Failed { command: String, stderr: String },
}

impl GitError {
    /// The message git printed, or the spawn error text.
    pub fn message(&self) -> String {
        match self {
            Self::Spawn { source, .. } => source.to_string(),
            Self::Failed { stderr, .. } => stderr.clone(),
        }
    }
}

/// Primitive Git capabilities consumed by the branch manager and watcher.
pub trait GitService: Send + Sync {
    /// True iff the working tree and index have no uncommitted changes.
    fn is_clean(&self) -> Result<bool, GitError>;

    /// Unified diff of every uncommitted change against `HEAD`, binary
    /// content included.
    fn get_diff(&self) -> Result<String, GitError>;

    /// Run an arbitrary git subcommand with inherited stdio.
    fn run_interactive(&self, args: &[&str]) -> Result<(), GitError>;

    /// Apply a patch file with a three-way merge, optionally in reverse.
    fn apply_patch(&self, patch: &Path, reverse: bool) -> Result<(), GitError> {
        let patch = patch.to_string_lossy();
        let mut args = vec!["apply", "--3way"];
        if reverse {
            args.push("--reverse");
        }
        args.push(&patch);
        self.run_interactive(&args)
    }

    /// Check whether a patch applies to the working tree without touching it.
    fn check_patch(&self, patch: &Path, reverse: bool) -> Result<(), GitError> {
        let patch = patch.to_string_lossy();
        let mut args = vec!["apply", "--check"];
        if reverse {
            args.push("--reverse");
        }
        args.push(&patch);
        self.run_interactive(&args)
    }

    /// Reset index and working tree to `reference` without moving history.
    fn reset(&self, reference: &str) -> Result<(), GitError>;

    /// Create a real branch at `HEAD` and check it out, carrying the working tree.
    fn create_branch(&self, name: &str) -> Result<(), GitError>;

    /// Stage every change, including untracked files.
    fn stage_all(&self) -> Result<(), GitError>;

    fn commit(&self, message: &str, allow_empty: bool, signoff: bool) -> Result<(), GitError>;

    /// Whether `path` (repository-relative) is known to the index.
    fn is_tracked(&self, path: &Path) -> Result<bool, GitError>;

    /// Diff of a tracked path's on-disk content against `HEAD`.
    fn diff_path(&self, path: &Path) -> Result<String, GitError>;

    /// Diff of an untracked path as a full-file addition against an empty file.
    fn diff_new_file(&self, path: &Path) -> Result<String, GitError>;

    /// Short name of the checked-out branch.
    fn current_branch(&self) -> Result<String, GitError>;

    /// Absolute path of the git metadata directory.
    fn git_dir(&self) -> Result<PathBuf, GitError>;

    /// Absolute path of the working tree root.
    fn root(&self) -> &Path;
}
