//! The hidden `sage daemon` subcommand.
//!
//! Runs the working-tree watcher in the foreground until SIGINT/SIGTERM.
//! Branch switches happen in other `sage` processes, so the watcher's target
//! is re-read from the state store on a fixed interval.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use sage_vbranch::{BranchError, BranchOps, BranchWatcher, WatcherOptions};

use crate::repo::Repo;

/// PID file name inside the state directory.
pub const PID_FILE: &str = "daemon.pid";

/// Daemon arguments.
#[derive(clap::Args, Debug)]
pub struct DaemonArgs {
    /// Seconds between active-branch refreshes (default: `watcher.refresh_secs`)
    #[arg(long, env = "SAGE_REFRESH_SECS")]
    pub refresh_secs: Option<u64>,
}

pub fn pid_path(state_dir: &Path) -> PathBuf {
    state_dir.join(PID_FILE)
}

/// PID recorded in `path`, if the file exists and parses.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Holds the PID file for the daemon's lifetime and removes it on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create `path` exclusively and write the current PID into it.
    pub fn create(path: PathBuf) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let owner = read_pid(&path)
                    .map_or_else(|| "unknown pid".to_string(), |pid| format!("pid {pid}"));
                anyhow::bail!(
                    "A watcher already runs for this repository ({owner}). Remove {} if it is stale.",
                    path.display()
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()));
            }
        };
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
        }
    }
}

/// The branch the watcher should target according to the store. Read
/// failures keep `current` so a transient error does not drop events.
pub fn resolve_active(branches: &dyn BranchOps, current: Option<String>) -> Option<String> {
    match branches.get_active_branch() {
        Ok(branch) => Some(branch.name),
        Err(BranchError::NotFound(_)) => None,
        Err(e) => {
            warn!(error = %e, "Failed to read active virtual branch, keeping watcher target");
            current
        }
    }
}

/// Execute the `daemon` subcommand.
pub fn run(repo: &Repo, args: &DaemonArgs) -> Result<()> {
    let pid_file = PidFile::create(pid_path(&repo.state_dir()))?;

    let mut watcher = BranchWatcher::new(
        repo.root(),
        repo.git.clone(),
        repo.branches.clone(),
        WatcherOptions::from(&repo.config.watcher),
    )
    .context("Failed to configure watcher")?;
    watcher.set_active_branch(resolve_active(repo.branches.as_ref(), None).as_deref());
    watcher.start().context("Failed to start watcher")?;

    let refresh = Duration::from_secs(
        args.refresh_secs
            .unwrap_or(repo.config.watcher.refresh_secs)
            .max(1),
    );
    info!(
        root = %repo.root().display(),
        pid_file = %pid_file.path().display(),
        refresh_secs = refresh.as_secs(),
        active = ?watcher.active_branch(),
        "Daemon started"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let result = runtime.block_on(serve(&watcher, repo.branches.as_ref(), refresh));

    watcher.stop();
    drop(pid_file);
    info!("Daemon stopped");
    result
}

/// Refresh the watcher target until a shutdown signal arrives.
async fn serve(watcher: &BranchWatcher, branches: &dyn BranchOps, refresh: Duration) -> Result<()> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C shutdown signal");
                break;
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                let next = resolve_active(branches, watcher.active_branch());
                watcher.set_active_branch(next.as_deref());
            }
        }
    }
    Ok(())
}
