//! Virtual branches: named sets of uncommitted changes sharing one working tree.
//!
//! [`BranchManager`] is the entry point. It keeps the branch map in a
//! [`StateStore`] and moves changes in and out of the working tree as
//! patches built by [`patch`].

mod error;
mod manager;
pub mod patch;
mod store;
mod types;

pub use error::BranchError;
pub use manager::{BranchManager, BranchOps, ManagerOptions, validate_name};
pub use store::{LOCK_FILE, STATE_FILE, StateStore, StoreLock};
pub use types::{BranchMap, Change, ChangeKind, FileModes, VirtualBranch};
