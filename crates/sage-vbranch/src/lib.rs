//! Sage virtual branch engine.
//!
//! Lets several named sets of uncommitted changes share one working tree:
//! - `branch`: data model, JSON state store, patch codec and the manager
//! - `git`: the Git service the engine drives (trait + `git` CLI implementation)
//! - `watcher`: background filesystem watcher feeding changes to the active branch

pub mod branch;
pub mod git;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use branch::{
    BranchError, BranchManager, BranchMap, BranchOps, Change, ChangeKind, FileModes,
    ManagerOptions, StateStore, StoreLock, VirtualBranch,
};
pub use git::{GitCli, GitError, GitService};
pub use watcher::{BranchWatcher, WatchError, WatcherOptions};
