//! Sage CLI Library
//!
//! Command implementations behind the `sage` binary. Each `*_cmd` module
//! owns one group of subcommands; [`repo::Repo`] wires the engine up for
//! the repository being operated on.

pub mod branch_cmd;
pub mod daemon_cmd;
pub mod repo;
pub mod stash_cmd;
