//! Branch manager: virtual branch lifecycle against the working tree.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use sage_core::config::MaterializeConfig;

use super::error::BranchError;
use super::patch::{PatchFile, build_patch};
use super::store::{StateStore, StoreLock};
use super::types::{BranchMap, Change, VirtualBranch};
use crate::git::{GitError, GitService};

/// Virtual branch operations. [`BranchManager`] is the implementation; the
/// watcher and the CLI only see this trait.
pub trait BranchOps: Send + Sync {
    fn create_virtual_branch(
        &self,
        name: &str,
        base_branch: &str,
    ) -> Result<VirtualBranch, BranchError>;

    /// All branches in name order.
    fn list_virtual_branches(&self) -> Result<Vec<VirtualBranch>, BranchError>;

    fn get_virtual_branch(&self, name: &str) -> Result<VirtualBranch, BranchError>;

    fn get_active_branch(&self) -> Result<VirtualBranch, BranchError>;

    /// Make `name` the branch reflected in the working tree.
    fn apply_virtual_branch(&self, name: &str) -> Result<(), BranchError>;

    /// Take `name`'s changes out of the working tree.
    fn unapply_virtual_branch(&self, name: &str) -> Result<(), BranchError>;

    /// Record `change`, replacing any entry for the same path.
    fn add_change(&self, branch: &str, change: Change) -> Result<(), BranchError>;

    /// Record the change produced by `capture` only if `branch` is the
    /// active branch. `capture` runs under the manager lock, so no switch can
    /// rewrite the working tree while it reads it. Returns `NotActive` when
    /// another branch owns the tree, `Ok(false)` when `capture` had nothing.
    fn record_active_change(
        &self,
        branch: &str,
        capture: &mut dyn FnMut() -> Result<Option<Change>, GitError>,
    ) -> Result<bool, BranchError>;

    fn remove_change(&self, branch: &str, path: &str) -> Result<(), BranchError>;

    /// Move the changes for `paths` from one branch to another. Paths `from`
    /// does not have are skipped; returns how many were moved.
    fn move_changes(&self, from: &str, to: &str, paths: &[String]) -> Result<usize, BranchError>;

    /// Turn `name` into a real branch with one commit and forget the virtual branch.
    fn materialize_branch(&self, name: &str) -> Result<(), BranchError>;

    fn has_stashed_changes(&self, name: &str) -> Result<bool, BranchError>;

    fn pop_stashed_changes(&self, name: &str) -> Result<(), BranchError>;

    fn drop_stashed_changes(&self, name: &str) -> Result<(), BranchError>;
}

/// Options for materialized commits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerOptions {
    pub signoff: bool,
    pub allow_empty: bool,
}

impl From<&MaterializeConfig> for ManagerOptions {
    fn from(config: &MaterializeConfig) -> Self {
        Self {
            signoff: config.signoff,
            allow_empty: config.allow_empty,
        }
    }
}

/// Validate a virtual branch name: alphanumeric, hyphens, underscores, slashes, dots.
/// Rejects path traversal (`..`), leading dashes, and control characters.
pub fn validate_name(name: &str) -> Result<(), BranchError> {
    if name.is_empty() {
        return Err(BranchError::InvalidName("name cannot be empty".into()));
    }
    if name.starts_with('-') {
        return Err(BranchError::InvalidName(
            "name cannot start with a dash".into(),
        ));
    }
    if name.contains("..") {
        return Err(BranchError::InvalidName(
            "name cannot contain '..'".into(),
        ));
    }
    if name.ends_with('/') || name.ends_with(".lock") {
        return Err(BranchError::InvalidName(format!(
            "name cannot end with '/' or '.lock': {name}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(BranchError::InvalidName(format!(
            "name contains invalid characters: {name}"
        )));
    }
    Ok(())
}

/// Manages virtual branches of one repository.
///
/// Every operation holds `op_lock` and the store's file lock for its whole
/// read-modify-write: the map is reloaded from the store, mutated, and saved
/// only if it changed. The watcher thread, foreground calls and other `sage`
/// processes therefore never interleave writes.
pub struct BranchManager {
    store: StateStore,
    git: Arc<dyn GitService>,
    options: ManagerOptions,
    op_lock: Mutex<()>,
}

/// Held for the duration of one operation.
struct OpGuard<'a> {
    _thread: MutexGuard<'a, ()>,
    _process: StoreLock,
}

impl BranchManager {
    pub fn new(store: StateStore, git: Arc<dyn GitService>, options: ManagerOptions) -> Self {
        Self {
            store,
            git,
            options,
            op_lock: Mutex::new(()),
        }
    }

    /// Open the manager for the repository `git` operates on, storing state
    /// under `<git-dir>/<state_dir>`.
    pub fn open(
        git: Arc<dyn GitService>,
        state_dir: &str,
        options: ManagerOptions,
    ) -> Result<Self, BranchError> {
        let git_dir = git.git_dir()?;
        let store = StateStore::open(&git_dir, state_dir)?;
        Ok(Self::new(store, git, options))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn lock(&self) -> Result<OpGuard<'_>, BranchError> {
        let thread = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let process = self.store.lock()?;
        Ok(OpGuard {
            _thread: thread,
            _process: process,
        })
    }

    fn read<T>(&self, f: impl FnOnce(&BranchMap) -> Result<T, BranchError>) -> Result<T, BranchError> {
        let _guard = self.lock()?;
        let branches = self.store.load()?;
        f(&branches)
    }

    /// Run `f` on a freshly loaded map and persist the result if it changed.
    ///
    /// The map is saved even when `f` fails: a failed switch may already
    /// have deactivated another branch in the working tree.
    fn transact<T>(
        &self,
        f: impl FnOnce(&mut BranchMap) -> Result<T, BranchError>,
    ) -> Result<T, BranchError> {
        let _guard = self.lock()?;
        let mut branches = self.store.load()?;
        let before = branches.clone();
        let outcome = f(&mut branches);
        if branches != before {
            if let Err(save_err) = self.store.save(&branches) {
                if let Err(op_err) = &outcome {
                    warn!(error = %op_err, "Operation failed before state could be saved");
                }
                return Err(save_err);
            }
        }
        outcome
    }

    /// Apply (or reverse) `patch` with a three-way merge. The index is synced
    /// with the working tree first since `--3way` requires them to match.
    fn apply_three_way(&self, branch: &str, patch: &str, reverse: bool) -> Result<(), BranchError> {
        let file = PatchFile::write(patch)
            .map_err(|e| BranchError::Persistence(format!("Failed to write patch file: {e}")))?;
        self.git.stage_all()?;
        debug!(branch, reverse, patch = %file.path().display(), "Applying patch");
        self.git
            .apply_patch(file.path(), reverse)
            .map_err(|e| BranchError::apply_failed(branch, &e))
    }

    fn activate(&self, branch: &mut VirtualBranch) -> Result<(), BranchError> {
        let patch = build_patch(branch);
        if !patch.is_empty() {
            self.apply_three_way(&branch.name, &patch, false)?;
        }

        if let Some(stash) = branch.stashed_diff.clone().filter(|s| !s.trim().is_empty()) {
            match self.apply_three_way(&branch.name, &stash, false) {
                Ok(()) => {
                    branch.stashed_diff = None;
                    branch.touch();
                    info!(branch = %branch.name, "Restored stashed changes");
                }
                Err(e) => {
                    warn!(
                        branch = %branch.name,
                        error = %e,
                        "Stashed changes did not apply, keeping them for `stash pop`"
                    );
                }
            }
        }

        branch.active = true;
        info!(branch = %branch.name, changes = branch.changes.len(), "Activated virtual branch");
        Ok(())
    }

    /// Reverse `branch` out of the working tree. Whatever is still dirty
    /// afterwards belongs to this branch and is stashed on it.
    ///
    /// The tree is only reset once the stash is known to describe it: if the
    /// captured diff does not reverse cleanly (content git cannot express),
    /// the branch is re-applied and the switch refused.
    fn deactivate(&self, branch: &mut VirtualBranch) -> Result<(), BranchError> {
        let patch = build_patch(branch);
        if !patch.is_empty() {
            self.apply_three_way(&branch.name, &patch, true)?;
        }

        self.git.stage_all()?;
        if !self.git.is_clean()? {
            let leftover = self.git.get_diff()?;
            if !leftover.trim().is_empty() {
                if let Err(e) = self.check_stash(&branch.name, &leftover) {
                    self.restore_after_failed_stash(branch, &patch);
                    return Err(e);
                }
                info!(branch = %branch.name, bytes = leftover.len(), "Stashing uncommitted changes");
                branch.push_stash(leftover);
                branch.touch();
            }
            self.git.reset("HEAD")?;
        }
        branch.active = false;

        info!(branch = %branch.name, stashed = branch.has_stash(), "Deactivated virtual branch");
        Ok(())
    }

    /// Verify `stash` reproduces the working tree by reverse-applying it in
    /// check mode.
    fn check_stash(&self, branch: &str, stash: &str) -> Result<(), BranchError> {
        let file = PatchFile::write(stash)
            .map_err(|e| BranchError::Persistence(format!("Failed to write patch file: {e}")))?;
        self.git
            .check_patch(file.path(), true)
            .map_err(|e| BranchError::StashCaptureFailed {
                branch: branch.to_string(),
                message: e.message(),
            })
    }

    fn restore_after_failed_stash(&self, branch: &VirtualBranch, patch: &str) {
        if patch.is_empty() {
            return;
        }
        if let Err(e) = self.apply_three_way(&branch.name, patch, false) {
            warn!(
                branch = %branch.name,
                error = %e,
                "Failed to re-apply virtual branch after refusing to stash"
            );
        }
    }

    /// Make `name` the only active branch.
    fn switch_to(&self, branches: &mut BranchMap, name: &str) -> Result<(), BranchError> {
        let target = branches
            .get(name)
            .ok_or_else(|| BranchError::branch_not_found(name))?;
        if target.active {
            debug!(branch = name, "Virtual branch already active");
            return Ok(());
        }

        let others: Vec<String> = branches
            .values()
            .filter(|b| b.active)
            .map(|b| b.name.clone())
            .collect();

        if others.is_empty() {
            if !self.git.is_clean()? {
                return Err(BranchError::DirtyWithNoOwner);
            }
        } else {
            for other in others {
                if let Some(branch) = branches.get_mut(&other) {
                    self.deactivate(branch)?;
                }
            }
        }

        let target = branches
            .get_mut(name)
            .ok_or_else(|| BranchError::branch_not_found(name))?;
        self.activate(target)
    }

    fn commit_message(branch: &VirtualBranch) -> String {
        let mut message = format!(
            "{}\n\nMaterialized from virtual branch {} (base: {}).\n",
            branch.name, branch.name, branch.base_branch
        );
        if !branch.changes.is_empty() {
            message.push_str("\nFiles:\n");
            for change in &branch.changes {
                message.push_str("- ");
                message.push_str(&change.path);
                message.push('\n');
            }
        }
        message
    }
}

impl BranchOps for BranchManager {
    fn create_virtual_branch(
        &self,
        name: &str,
        base_branch: &str,
    ) -> Result<VirtualBranch, BranchError> {
        validate_name(name)?;
        if base_branch.is_empty() {
            return Err(BranchError::InvalidName("base branch cannot be empty".into()));
        }
        self.transact(|branches| {
            if branches.contains_key(name) {
                return Err(BranchError::AlreadyExists(name.to_string()));
            }
            let branch = VirtualBranch::new(name, base_branch);
            branches.insert(name.to_string(), branch.clone());
            info!(branch = name, base = base_branch, "Created virtual branch");
            Ok(branch)
        })
    }

    fn list_virtual_branches(&self) -> Result<Vec<VirtualBranch>, BranchError> {
        self.read(|branches| Ok(branches.values().cloned().collect()))
    }

    fn get_virtual_branch(&self, name: &str) -> Result<VirtualBranch, BranchError> {
        self.read(|branches| {
            branches
                .get(name)
                .cloned()
                .ok_or_else(|| BranchError::branch_not_found(name))
        })
    }

    fn get_active_branch(&self) -> Result<VirtualBranch, BranchError> {
        self.read(|branches| {
            branches
                .values()
                .find(|b| b.active)
                .cloned()
                .ok_or_else(|| BranchError::NotFound("active virtual branch".into()))
        })
    }

    fn apply_virtual_branch(&self, name: &str) -> Result<(), BranchError> {
        self.transact(|branches| self.switch_to(branches, name))
    }

    fn unapply_virtual_branch(&self, name: &str) -> Result<(), BranchError> {
        self.transact(|branches| {
            let branch = branches
                .get_mut(name)
                .ok_or_else(|| BranchError::branch_not_found(name))?;
            if !branch.active {
                debug!(branch = name, "Virtual branch already inactive");
                return Ok(());
            }
            self.deactivate(branch)
        })
    }

    fn add_change(&self, branch: &str, change: Change) -> Result<(), BranchError> {
        let change = change.normalized();
        self.transact(|branches| {
            let target = branches
                .get_mut(branch)
                .ok_or_else(|| BranchError::branch_not_found(branch))?;
            let path = change.path.clone();
            if target.upsert_change(change) {
                target.touch();
                debug!(branch, path = %path, "Recorded change");
            }
            Ok(())
        })
    }

    fn record_active_change(
        &self,
        branch: &str,
        capture: &mut dyn FnMut() -> Result<Option<Change>, GitError>,
    ) -> Result<bool, BranchError> {
        self.transact(|branches| {
            let target = branches
                .get_mut(branch)
                .ok_or_else(|| BranchError::branch_not_found(branch))?;
            if !target.active {
                return Err(BranchError::NotActive(branch.to_string()));
            }
            let Some(change) = capture()? else {
                return Ok(false);
            };
            let change = change.normalized();
            let path = change.path.clone();
            if target.upsert_change(change) {
                target.touch();
                debug!(branch, path = %path, "Recorded change");
            }
            Ok(true)
        })
    }

    fn remove_change(&self, branch: &str, path: &str) -> Result<(), BranchError> {
        self.transact(|branches| {
            let target = branches
                .get_mut(branch)
                .ok_or_else(|| BranchError::branch_not_found(branch))?;
            target.take_change(path).ok_or_else(|| {
                BranchError::NotFound(format!("change for {path} in virtual branch {branch}"))
            })?;
            target.touch();
            debug!(branch, path, "Removed change");
            Ok(())
        })
    }

    fn move_changes(&self, from: &str, to: &str, paths: &[String]) -> Result<usize, BranchError> {
        if from == to {
            return Err(BranchError::SameBranch(from.to_string()));
        }
        self.transact(|branches| {
            if !branches.contains_key(to) {
                return Err(BranchError::branch_not_found(to));
            }
            let source = branches
                .get_mut(from)
                .ok_or_else(|| BranchError::branch_not_found(from))?;

            let moved: Vec<Change> = paths.iter().filter_map(|p| source.take_change(p)).collect();
            if moved.is_empty() {
                return Ok(0);
            }
            source.touch();

            let count = moved.len();
            let target = branches
                .get_mut(to)
                .ok_or_else(|| BranchError::branch_not_found(to))?;
            for change in moved {
                target.upsert_change(change);
            }
            target.touch();

            info!(from, to, moved = count, requested = paths.len(), "Moved changes");
            Ok(count)
        })
    }

    fn materialize_branch(&self, name: &str) -> Result<(), BranchError> {
        self.transact(|branches| {
            self.switch_to(branches, name)?;

            let branch = branches
                .get(name)
                .ok_or_else(|| BranchError::branch_not_found(name))?;
            if let Ok(current) = self.git.current_branch() {
                if current != branch.base_branch {
                    warn!(
                        branch = name,
                        base = %branch.base_branch,
                        head = %current,
                        "Materializing on top of a different branch than the recorded base"
                    );
                }
            }
            let message = Self::commit_message(branch);

            self.git.create_branch(name)?;
            self.git.stage_all()?;
            self.git
                .commit(&message, self.options.allow_empty, self.options.signoff)?;

            branches.remove(name);
            info!(branch = name, "Materialized virtual branch");
            Ok(())
        })
    }

    fn has_stashed_changes(&self, name: &str) -> Result<bool, BranchError> {
        self.read(|branches| {
            branches
                .get(name)
                .map(VirtualBranch::has_stash)
                .ok_or_else(|| BranchError::branch_not_found(name))
        })
    }

    fn pop_stashed_changes(&self, name: &str) -> Result<(), BranchError> {
        self.transact(|branches| {
            let branch = branches
                .get_mut(name)
                .ok_or_else(|| BranchError::branch_not_found(name))?;
            if !branch.active {
                return Err(BranchError::NotActive(name.to_string()));
            }
            let stash = branch
                .stashed_diff
                .clone()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    BranchError::NotFound(format!("stashed changes for virtual branch {name}"))
                })?;

            self.apply_three_way(name, &stash, false)?;
            branch.stashed_diff = None;
            branch.touch();
            info!(branch = name, "Popped stashed changes");
            Ok(())
        })
    }

    fn drop_stashed_changes(&self, name: &str) -> Result<(), BranchError> {
        self.transact(|branches| {
            let branch = branches
                .get_mut(name)
                .ok_or_else(|| BranchError::branch_not_found(name))?;
            if !branch.has_stash() {
                return Err(BranchError::NotFound(format!(
                    "stashed changes for virtual branch {name}"
                )));
            }
            branch.stashed_diff = None;
            branch.touch();
            info!(branch = name, "Dropped stashed changes");
            Ok(())
        })
    }
}
