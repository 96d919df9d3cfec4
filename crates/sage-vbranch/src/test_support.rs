//! In-memory [`GitService`] for manager and watcher tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::git::{GitError, GitService};

#[derive(Debug, Default)]
struct FakeState {
    clean: bool,
    diff: String,
    /// `(marker, message)`: apply fails for patches containing `marker`.
    apply_failure: Option<(String, String)>,
    failing_commands: HashSet<String>,
    applied: Vec<(String, bool)>,
    calls: Vec<String>,
    tracked: HashSet<PathBuf>,
    path_diffs: HashMap<PathBuf, String>,
}

/// Records every call; the working tree is reduced to a clean flag and a diff.
#[derive(Debug)]
pub struct FakeGit {
    root: PathBuf,
    state: Mutex<FakeState>,
}

impl FakeGit {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            state: Mutex::new(FakeState {
                clean: true,
                ..FakeState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: impl Into<String>) -> Result<(), GitError> {
        let call = call.into();
        let mut state = self.state();
        let name = call.split_whitespace().next().unwrap_or_default().to_string();
        state.calls.push(call.clone());
        if state.failing_commands.contains(&name) {
            return Err(GitError::Failed {
                command: call,
                stderr: format!("fatal: {name} failed"),
            });
        }
        Ok(())
    }

    pub fn set_dirty(&self, diff: &str) {
        let mut state = self.state();
        state.clean = false;
        state.diff = diff.to_string();
    }

    pub fn fail_apply_containing(&self, marker: &str, message: &str) {
        self.state().apply_failure = Some((marker.to_string(), message.to_string()));
    }

    pub fn clear_apply_failure(&self) {
        self.state().apply_failure = None;
    }

    pub fn fail_command(&self, name: &str) {
        self.state().failing_commands.insert(name.to_string());
    }

    pub fn track(&self, path: &str, diff: &str) {
        let mut state = self.state();
        state.tracked.insert(PathBuf::from(path));
        state.path_diffs.insert(PathBuf::from(path), diff.to_string());
    }

    pub fn untracked_diff(&self, path: &str, diff: &str) {
        self.state()
            .path_diffs
            .insert(PathBuf::from(path), diff.to_string());
    }

    /// Patches handed to `apply_patch`, with their reverse flag.
    pub fn applied(&self) -> Vec<(String, bool)> {
        self.state().applied.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

impl GitService for FakeGit {
    fn is_clean(&self) -> Result<bool, GitError> {
        self.record("is_clean")?;
        Ok(self.state().clean)
    }

    fn get_diff(&self) -> Result<String, GitError> {
        self.record("get_diff")?;
        Ok(self.state().diff.clone())
    }

    fn run_interactive(&self, args: &[&str]) -> Result<(), GitError> {
        self.record(format!("run {}", args.join(" ")))
    }

    fn apply_patch(&self, patch: &Path, reverse: bool) -> Result<(), GitError> {
        self.record(format!("apply reverse={reverse}"))?;
        let contents = std::fs::read_to_string(patch).map_err(|source| GitError::Spawn {
            command: "apply".into(),
            source,
        })?;
        let mut state = self.state();
        if let Some((marker, message)) = &state.apply_failure {
            if contents.contains(marker.as_str()) {
                return Err(GitError::Failed {
                    command: "git apply --3way".into(),
                    stderr: message.clone(),
                });
            }
        }
        state.applied.push((contents, reverse));
        Ok(())
    }

    fn check_patch(&self, _patch: &Path, reverse: bool) -> Result<(), GitError> {
        self.record(format!("check reverse={reverse}"))
    }

    fn reset(&self, reference: &str) -> Result<(), GitError> {
        self.record(format!("reset {reference}"))?;
        let mut state = self.state();
        state.clean = true;
        state.diff.clear();
        Ok(())
    }

    fn create_branch(&self, name: &str) -> Result<(), GitError> {
        self.record(format!("create_branch {name}"))
    }

    fn stage_all(&self) -> Result<(), GitError> {
        self.record("stage_all")
    }

    fn commit(&self, message: &str, allow_empty: bool, signoff: bool) -> Result<(), GitError> {
        self.record(format!(
            "commit allow_empty={allow_empty} signoff={signoff} {message}"
        ))
    }

    fn is_tracked(&self, path: &Path) -> Result<bool, GitError> {
        Ok(self.state().tracked.contains(path))
    }

    fn diff_path(&self, path: &Path) -> Result<String, GitError> {
        self.record(format!("diff_path {}", path.display()))?;
        Ok(self.state().path_diffs.get(path).cloned().unwrap_or_default())
    }

    fn diff_new_file(&self, path: &Path) -> Result<String, GitError> {
        self.record(format!("diff_new_file {}", path.display()))?;
        Ok(self.state().path_diffs.get(path).cloned().unwrap_or_default())
    }

    fn current_branch(&self) -> Result<String, GitError> {
        Ok("main".to_string())
    }

    fn git_dir(&self) -> Result<PathBuf, GitError> {
        Ok(self.root.join(".git"))
    }

    fn root(&self) -> &Path {
        &self.root
    }
}
