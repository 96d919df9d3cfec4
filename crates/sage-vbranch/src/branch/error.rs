use thiserror::Error;

use crate::git::GitError;

/// Errors from virtual branch operations.
#[derive(Debug, Error)]
pub enum BranchError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Virtual branch already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error(
        "Working tree has uncommitted changes and no active virtual branch owns them; \
         commit or discard them first"
    )]
    DirtyWithNoOwner,

    #[error("Virtual branch {0} is not active")]
    NotActive(String),

    #[error("Cannot move changes from {0} onto itself")]
    SameBranch(String),

    #[error("Patch for {branch} did not apply: {message}")]
    PatchApplyFailed { branch: String, message: String },

    #[error("Uncommitted changes on {branch} cannot be stashed faithfully: {message}")]
    StashCaptureFailed { branch: String, message: String },

    #[error("State persistence failed: {0}")]
    Persistence(String),

    #[error("Git command failed: {0}")]
    Git(#[from] GitError),
}

impl BranchError {
    pub(crate) fn branch_not_found(name: &str) -> Self {
        Self::NotFound(format!("virtual branch {name}"))
    }

    pub(crate) fn apply_failed(branch: &str, err: &GitError) -> Self {
        Self::PatchApplyFailed {
            branch: branch.to_string(),
            message: err.message(),
        }
    }
}
