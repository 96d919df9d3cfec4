//! [`GitService`] backed by the `git` binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::debug;

use super::{GitError, GitService};

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// Runs git commands inside one working tree.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    /// Use `root` as the working tree. The path is not validated until the first call.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locate the enclosing repository of `dir` via `git rev-parse --show-toplevel`.
    pub fn discover(dir: &Path) -> Result<Self, GitError> {
        let git = Self::new(dir);
        let top = git.output_ok(&["rev-parse", "--show-toplevel"])?;
        Ok(Self::new(top.trim()))
    }

    fn describe(args: &[&str]) -> String {
        format!("git {}", args.join(" "))
    }

    fn output(&self, args: &[&str]) -> Result<Output, GitError> {
        let start = std::time::Instant::now();
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| GitError::Spawn {
                command: Self::describe(args),
                source,
            })?;
        debug!(
            command = %Self::describe(args),
            status = %output.status,
            elapsed_ms = start.elapsed().as_millis(),
            "git command finished"
        );
        Ok(output)
    }

    /// Run and require a zero exit status, returning stdout.
    fn output_ok(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(Self::failure(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn failure(args: &[&str], output: &Output) -> GitError {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = if stderr.trim().is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr.trim().to_string()
        };
        GitError::Failed {
            command: Self::describe(args),
            stderr,
        }
    }
}

impl GitService for GitCli {
    fn is_clean(&self) -> Result<bool, GitError> {
        let status = self.output_ok(&["status", "--porcelain"])?;
        Ok(status.trim().is_empty())
    }

    fn get_diff(&self) -> Result<String, GitError> {
        self.output_ok(&["diff", "--binary", "HEAD"])
    }

    fn run_interactive(&self, args: &[&str]) -> Result<(), GitError> {
        let status = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .status()
            .map_err(|source| GitError::Spawn {
                command: Self::describe(args),
                source,
            })?;
        if !status.success() {
            return Err(GitError::Failed {
                command: Self::describe(args),
                stderr: format!("exited with {status}"),
            });
        }
        Ok(())
    }

    // Captures stderr instead of inheriting it so conflicts can be reported verbatim.
    fn apply_patch(&self, patch: &Path, reverse: bool) -> Result<(), GitError> {
        let patch = patch.to_string_lossy();
        let mut args = vec!["apply", "--3way"];
        if reverse {
            args.push("--reverse");
        }
        args.push(&patch);
        self.output_ok(&args).map(drop)
    }

    fn check_patch(&self, patch: &Path, reverse: bool) -> Result<(), GitError> {
        let patch = patch.to_string_lossy();
        let mut args = vec!["apply", "--check"];
        if reverse {
            args.push("--reverse");
        }
        args.push(&patch);
        self.output_ok(&args).map(drop)
    }

    fn reset(&self, reference: &str) -> Result<(), GitError> {
        self.output_ok(&["reset", "--hard", "--quiet", reference])
            .map(drop)
    }

    fn create_branch(&self, name: &str) -> Result<(), GitError> {
        self.output_ok(&["checkout", "-b", name]).map(drop)
    }

    fn stage_all(&self) -> Result<(), GitError> {
        self.output_ok(&["add", "--all"]).map(drop)
    }

    fn commit(&self, message: &str, allow_empty: bool, signoff: bool) -> Result<(), GitError> {
        let mut args = vec!["commit", "--quiet", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        if signoff {
            args.push("--signoff");
        }
        self.output_ok(&args).map(drop)
    }

    fn is_tracked(&self, path: &Path) -> Result<bool, GitError> {
        let path = path.to_string_lossy();
        let output = self.output(&["ls-files", "--error-unmatch", "--", &path])?;
        Ok(output.status.success())
    }

    fn diff_path(&self, path: &Path) -> Result<String, GitError> {
        let path = path.to_string_lossy();
        self.output_ok(&["diff", "--binary", "HEAD", "--", &path])
    }

    fn diff_new_file(&self, path: &Path) -> Result<String, GitError> {
        let path = path.to_string_lossy();
        let args = ["diff", "--binary", "--no-index", "--", NULL_DEVICE, &path];
        let output = self.output(&args)?;
        // --no-index exits 1 when the inputs differ, which is the expected case.
        match output.status.code() {
            Some(0 | 1) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            _ => Err(Self::failure(&args, &output)),
        }
    }

    fn current_branch(&self) -> Result<String, GitError> {
        let name = self.output_ok(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(name.trim().to_string())
    }

    fn git_dir(&self) -> Result<PathBuf, GitError> {
        let dir = self.output_ok(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(dir.trim()))
    }

    fn root(&self) -> &Path {
        &self.root
    }
}
