//! CLI virtual branch subcommands.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Subcommand;

use sage_vbranch::branch::patch::{PatchFile, build_patch};
use sage_vbranch::{BranchError, BranchOps, ChangeKind, GitService, VirtualBranch};

use crate::daemon_cmd;
use crate::repo::Repo;

/// Virtual branch subcommand actions.
#[derive(Subcommand, Debug)]
pub enum BranchAction {
    /// Create a new virtual branch
    Create {
        /// Virtual branch name
        name: String,
        /// Branch the changes are meant to land on (default: the current branch)
        #[arg(short, long)]
        base: Option<String>,
    },
    /// List all virtual branches
    List,
    /// Make a virtual branch the one reflected in the working tree
    #[command(alias = "apply")]
    Switch {
        /// Virtual branch name
        name: String,
    },
    /// Take a virtual branch's changes out of the working tree
    Unapply {
        /// Virtual branch name
        name: String,
    },
    /// Turn a virtual branch into a real branch with a single commit
    Materialize {
        /// Virtual branch name
        name: String,
    },
    /// Show the active virtual branch and its changes
    Status,
    /// Print the patch a virtual branch would apply
    Diff {
        /// Virtual branch name (default: the active branch)
        name: Option<String>,
        /// Show a diffstat instead of the patch
        #[arg(long)]
        stat: bool,
    },
    /// Move recorded changes from one virtual branch to another
    Move {
        /// Source virtual branch
        from: String,
        /// Destination virtual branch
        to: String,
        /// Repository-relative paths to move
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

/// Execute a virtual branch subcommand.
pub fn run(repo: &Repo, action: BranchAction) -> Result<()> {
    execute(repo, action, &mut io::stdout())
}

/// Execute against an arbitrary writer.
pub fn execute(repo: &Repo, action: BranchAction, out: &mut impl Write) -> Result<()> {
    let branches = repo.branches.as_ref();
    match action {
        BranchAction::Create { name, base } => {
            let base = match base {
                Some(base) => base,
                None => repo
                    .git
                    .current_branch()
                    .context("Cannot determine the current branch, pass --base")?,
            };
            branches
                .create_virtual_branch(&name, &base)
                .with_context(|| format!("Failed to create virtual branch {name}"))?;
            writeln!(out, "Created virtual branch {name} (base: {base})")?;
        }
        BranchAction::List => {
            let all = branches.list_virtual_branches()?;
            write_branch_table(out, &all)?;
        }
        BranchAction::Switch { name } => {
            branches
                .apply_virtual_branch(&name)
                .with_context(|| format!("Failed to switch to virtual branch {name}"))?;
            writeln!(out, "Switched to virtual branch {name}")?;
            if branches.has_stashed_changes(&name)? {
                writeln!(
                    out,
                    "Stashed changes could not be restored; resolve and run `sage stash pop {name}`"
                )?;
            }
        }
        BranchAction::Unapply { name } => {
            branches
                .unapply_virtual_branch(&name)
                .with_context(|| format!("Failed to unapply virtual branch {name}"))?;
            writeln!(out, "Unapplied virtual branch {name}")?;
            if branches.has_stashed_changes(&name)? {
                writeln!(out, "Uncommitted changes were stashed on {name}")?;
            }
        }
        BranchAction::Materialize { name } => {
            branches
                .materialize_branch(&name)
                .with_context(|| format!("Failed to materialize virtual branch {name}"))?;
            writeln!(out, "Materialized {name} as a real branch")?;
        }
        BranchAction::Status => {
            let active = match branches.get_active_branch() {
                Ok(branch) => Some(branch),
                Err(BranchError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            write_status(out, active.as_ref())?;
            match daemon_cmd::read_pid(&daemon_cmd::pid_path(&repo.state_dir())) {
                Some(pid) => writeln!(out, "Watcher: running (pid {pid})")?,
                None => writeln!(out, "Watcher: not running")?,
            }
        }
        BranchAction::Diff { name, stat } => {
            let branch = resolve(branches, name)?;
            let patch = build_patch(&branch);
            if patch.is_empty() {
                writeln!(out, "No changes on {}.", branch.name)?;
            } else if stat {
                let file = PatchFile::write(&patch).context("Failed to write patch file")?;
                let path = file.path().to_string_lossy();
                out.flush()?;
                repo.git
                    .run_interactive(&["apply", "--stat", &path])
                    .context("Failed to compute diffstat")?;
            } else {
                write!(out, "{patch}")?;
            }
        }
        BranchAction::Move { from, to, paths } => {
            let moved = branches
                .move_changes(&from, &to, &paths)
                .with_context(|| format!("Failed to move changes from {from} to {to}"))?;
            writeln!(
                out,
                "Moved {moved} of {} change(s) from {from} to {to}",
                paths.len()
            )?;
        }
    }
    Ok(())
}

/// The named branch, or the active one when no name is given.
fn resolve(branches: &dyn BranchOps, name: Option<String>) -> Result<VirtualBranch> {
    match name {
        Some(name) => Ok(branches.get_virtual_branch(&name)?),
        None => branches
            .get_active_branch()
            .context("No active virtual branch; name one explicitly"),
    }
}

/// Write the `list` table.
pub fn write_branch_table(w: &mut impl Write, branches: &[VirtualBranch]) -> io::Result<()> {
    if branches.is_empty() {
        return writeln!(w, "No virtual branches.");
    }
    writeln!(
        w,
        "  {:<24}  {:<16}  {:>7}  {:<5}  {}",
        "NAME", "BASE", "CHANGES", "STASH", "UPDATED"
    )?;
    for b in branches {
        writeln!(
            w,
            "{} {:<24}  {:<16}  {:>7}  {:<5}  {}",
            if b.active { '*' } else { ' ' },
            truncate(&b.name, 24),
            truncate(&b.base_branch, 16),
            b.changes.len(),
            if b.has_stash() { "yes" } else { "-" },
            b.last_updated
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M"),
        )?;
    }
    writeln!(w, "\n{} virtual branch(es)", branches.len())
}

/// Write the `status` report for the active branch, if any.
pub fn write_status(w: &mut impl Write, active: Option<&VirtualBranch>) -> io::Result<()> {
    let Some(branch) = active else {
        return writeln!(w, "No active virtual branch.");
    };
    writeln!(
        w,
        "On virtual branch {} (base: {})",
        branch.name, branch.base_branch
    )?;
    if branch.changes.is_empty() {
        writeln!(w, "  no recorded changes")?;
    }
    for change in &branch.changes {
        let kind = match change.kind {
            ChangeKind::Added => "added",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Modified => "modified",
        };
        let label = if change.staged { "staged" } else { "unstaged" };
        writeln!(w, "  {label:<9} {kind:<9} {}", change.path)?;
    }
    if branch.has_stash() {
        writeln!(
            w,
            "  (stashed changes held; `sage stash pop {}` to restore)",
            branch.name
        )?;
    }
    Ok(())
}

/// Truncate a string to max display characters with ellipsis.
fn truncate(s: &str, max: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max - 1).collect::<String>())
    }
}
