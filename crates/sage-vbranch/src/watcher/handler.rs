//! Turns filesystem events into changes on the active branch.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};
use tracing::{debug, warn};

use super::ignore::IgnoreMatcher;
use crate::branch::{BranchError, BranchOps, Change};
use crate::git::{GitError, GitService};

/// What the worker should do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventAction {
    /// Recompute the diff of each path.
    Record,
    /// A directory may have appeared and needs a watch.
    Register,
    Skip,
}

pub(crate) fn classify(kind: &EventKind) -> EventAction {
    match kind {
        EventKind::Create(CreateKind::Folder | CreateKind::Any | CreateKind::Other) => {
            EventAction::Register
        }
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Remove(RemoveKind::Folder) => {
            EventAction::Skip
        }
        EventKind::Modify(_) | EventKind::Remove(_) => EventAction::Record,
        _ => EventAction::Skip,
    }
}

/// Shared "current owner" of incoming changes.
pub(crate) type ActiveBranch = Arc<Mutex<Option<String>>>;

pub(crate) struct EventHandler {
    roots: Vec<PathBuf>,
    ignore: IgnoreMatcher,
    git: Arc<dyn GitService>,
    branches: Arc<dyn BranchOps>,
    active: ActiveBranch,
}

impl EventHandler {
    pub(crate) fn new(
        root: &Path,
        ignore: IgnoreMatcher,
        git: Arc<dyn GitService>,
        branches: Arc<dyn BranchOps>,
        active: ActiveBranch,
    ) -> Self {
        // Event paths may arrive canonicalized (e.g. /private/var on macOS).
        let mut roots = vec![root.to_path_buf()];
        if let Ok(canonical) = root.canonicalize() {
            if canonical != root {
                roots.push(canonical);
            }
        }
        Self {
            roots,
            ignore,
            git,
            branches,
            active,
        }
    }

    pub(crate) fn ignore(&self) -> &IgnoreMatcher {
        &self.ignore
    }

    fn active_branch(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn relative(&self, path: &Path) -> Option<PathBuf> {
        self.roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }

    /// Record every path of a modify/remove event on the active branch.
    ///
    /// The target is a hint: the manager refuses changes for a branch that is
    /// no longer active, and the handler then follows the store's owner.
    pub(crate) fn handle(&self, event: &Event) {
        if classify(&event.kind) != EventAction::Record {
            return;
        }
        let Some(mut branch) = self.active_branch() else {
            debug!(paths = ?event.paths, "No active virtual branch, dropping event");
            return;
        };

        for path in &event.paths {
            let Some(rel) = self.relative(path) else {
                continue;
            };
            if self.ignore.is_ignored_relative(&rel) || path.is_dir() {
                continue;
            }
            match self.record(&branch, &rel) {
                Err(BranchError::NotActive(_)) => {
                    let Some(owner) = self.follow_store() else {
                        return;
                    };
                    branch = owner;
                    report(&branch, &rel, &self.record(&branch, &rel));
                }
                outcome => report(&branch, &rel, &outcome),
            }
        }
    }

    fn record(&self, branch: &str, rel: &Path) -> Result<bool, BranchError> {
        self.branches
            .record_active_change(branch, &mut || self.change_for(rel))
    }

    /// Retarget to whichever branch the store says is active.
    fn follow_store(&self) -> Option<String> {
        let owner = match self.branches.get_active_branch() {
            Ok(branch) => Some(branch.name),
            Err(BranchError::NotFound(_)) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read active virtual branch, dropping event");
                return None;
            }
        };
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = ?active.as_deref(), to = ?owner.as_deref(), "Active branch changed elsewhere");
        active.clone_from(&owner);
        owner
    }

    fn change_for(&self, rel: &Path) -> Result<Option<Change>, GitError> {
        let diff = if self.git.is_tracked(rel)? {
            self.git.diff_path(rel)?
        } else if self.roots[0].join(rel).is_file() {
            self.git.diff_new_file(rel)?
        } else {
            String::new()
        };

        // A removed directory can still match tracked files below it.
        if diff.matches("diff --git ").count() > 1 {
            debug!(path = %rel.display(), "Diff spans several files, skipping");
            return Ok(None);
        }
        Ok(Some(Change::new(to_repo_path(rel), &diff, false)))
    }
}

fn report(branch: &str, rel: &Path, outcome: &Result<bool, BranchError>) {
    match outcome {
        Ok(true) => debug!(branch, path = %rel.display(), "Forwarded change"),
        Ok(false) => {}
        Err(BranchError::NotFound(what)) => {
            warn!(branch, path = %rel.display(), what = %what, "Active branch vanished, change dropped");
        }
        Err(e) => warn!(branch, path = %rel.display(), error = %e, "Failed to record change"),
    }
}

/// `/`-separated repository path.
fn to_repo_path(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
