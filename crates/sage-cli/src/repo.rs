//! Repository discovery and engine wiring shared by every subcommand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use sage_core::Config;
use sage_core::config::load_config;
use sage_vbranch::{BranchManager, GitCli, GitService, ManagerOptions};

/// The repository a command operates on, with its configuration and engine.
pub struct Repo {
    pub git: Arc<GitCli>,
    pub branches: Arc<BranchManager>,
    pub config: Config,
}

impl Repo {
    /// Open the repository enclosing `dir` (the current directory when `None`).
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().context("Cannot determine current directory")?,
        };
        let git = GitCli::discover(&dir)
            .with_context(|| format!("{} is not inside a git repository", dir.display()))?;
        let config = load_config(Some(git.root())).context("Failed to load configuration")?;

        let git = Arc::new(git);
        let branches = BranchManager::open(
            git.clone(),
            &config.state.dir_name,
            ManagerOptions::from(&config.materialize),
        )
        .context("Failed to open virtual branch state")?;

        Ok(Self {
            git,
            branches: Arc::new(branches),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        self.git.root()
    }

    /// `<git-dir>/<state.dir_name>`.
    pub fn state_dir(&self) -> PathBuf {
        self.branches.store().dir().to_path_buf()
    }
}
