//! Sage CLI
//!
//! Several named sets of uncommitted changes sharing one Git working tree.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

use sage_cli::branch_cmd::{self, BranchAction};
use sage_cli::daemon_cmd::{self, DaemonArgs};
use sage_cli::repo::Repo;
use sage_cli::stash_cmd::{self, StashAction};
use sage_core::tracing_init::{default_filter, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "sage")]
#[command(version, about = "Virtual branches for a single Git working tree", long_about = None)]
struct Cli {
    /// Repository to operate on (default: the current directory)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Log level (overrides `log_level` from config and SAGE_LOG_LEVEL)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Branch(BranchAction),

    /// Inspect, restore or discard per-branch stashed changes
    Stash {
        #[command(subcommand)]
        action: StashAction,
    },

    /// Run the working-tree watcher in the foreground
    #[command(hide = true)]
    Daemon(DaemonArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let repo = Repo::open(cli.repo.as_deref())?;
    let level = cli.log_level.as_deref().unwrap_or(&repo.config.log_level);
    init_tracing(&default_filter(level), cli.log_json);
    debug!(root = %repo.root().display(), version = env!("CARGO_PKG_VERSION"), "Opened repository");

    match cli.command {
        Command::Branch(action) => branch_cmd::run(&repo, action),
        Command::Stash { action } => stash_cmd::run(&repo, action),
        Command::Daemon(args) => daemon_cmd::run(&repo, &args),
    }
}
