//! CLI stash subcommands.
//!
//! Each virtual branch holds at most one stash: the uncommitted leftovers set
//! aside when it was last switched away from.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Subcommand;

use sage_vbranch::{BranchOps, VirtualBranch};

use crate::repo::Repo;

/// Stash subcommand actions.
#[derive(Subcommand, Debug)]
pub enum StashAction {
    /// List virtual branches holding stashed changes
    List,
    /// Re-apply a branch's stashed changes (the branch must be active)
    Pop {
        /// Virtual branch name
        name: String,
    },
    /// Discard a branch's stashed changes
    Drop {
        /// Virtual branch name
        name: String,
    },
}

/// Execute a stash subcommand.
pub fn run(repo: &Repo, action: StashAction) -> Result<()> {
    execute(repo.branches.as_ref(), action, &mut io::stdout())
}

pub fn execute(branches: &dyn BranchOps, action: StashAction, out: &mut impl Write) -> Result<()> {
    match action {
        StashAction::List => {
            let stashed: Vec<VirtualBranch> = branches
                .list_virtual_branches()?
                .into_iter()
                .filter(VirtualBranch::has_stash)
                .collect();
            write_stash_list(out, &stashed)?;
        }
        StashAction::Pop { name } => {
            branches
                .pop_stashed_changes(&name)
                .with_context(|| format!("Failed to pop stashed changes of {name}"))?;
            writeln!(out, "Restored stashed changes of {name}")?;
        }
        StashAction::Drop { name } => {
            branches
                .drop_stashed_changes(&name)
                .with_context(|| format!("Failed to drop stashed changes of {name}"))?;
            writeln!(out, "Dropped stashed changes of {name}")?;
        }
    }
    Ok(())
}

fn write_stash_list(w: &mut impl Write, stashed: &[VirtualBranch]) -> io::Result<()> {
    if stashed.is_empty() {
        return writeln!(w, "No stashed changes.");
    }
    for b in stashed {
        let diff = b.stashed_diff.as_deref().unwrap_or_default();
        writeln!(
            w,
            "{:<24}  {} file(s){}",
            b.name,
            diff.matches("diff --git ").count(),
            if b.active { "  (active)" } else { "" }
        )?;
    }
    Ok(())
}
