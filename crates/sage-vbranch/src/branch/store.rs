//! JSON persistence for the branch map.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::BranchError;
use super::types::BranchMap;

/// File name of the branch map inside the state directory.
pub const STATE_FILE: &str = "branches.json";

/// Lock file serializing branch operations across `sage` processes.
pub const LOCK_FILE: &str = "branches.lock";

/// Exclusive advisory lock on a state directory. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
}

/// Durable store for all virtual branches of one repository.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    path: PathBuf,
}

impl StateStore {
    /// Open (creating if needed) `<git_dir>/<dir_name>`.
    pub fn open(git_dir: &Path, dir_name: &str) -> Result<Self, BranchError> {
        let dir = git_dir.join(dir_name);
        std::fs::create_dir_all(&dir).map_err(|e| {
            BranchError::Persistence(format!(
                "Failed to create state directory {}: {e}",
                dir.display()
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).map_err(
                |e| {
                    BranchError::Persistence(format!(
                        "Failed to set permissions on {}: {e}",
                        dir.display()
                    ))
                },
            )?;
        }

        let path = dir.join(STATE_FILE);
        Ok(Self { dir, path })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until this process holds the state directory's lock.
    pub fn lock(&self) -> Result<StoreLock, BranchError> {
        let path = self.dir.join(LOCK_FILE);
        let lock_err = |e: std::io::Error| {
            BranchError::Persistence(format!("Failed to lock {}: {e}", path.display()))
        };
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;
        file.lock().map_err(lock_err)?;
        Ok(StoreLock { _file: file })
    }

    /// Load the branch map. A missing file is an empty map.
    pub fn load(&self) -> Result<BranchMap, BranchError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BranchMap::new()),
            Err(e) => {
                return Err(BranchError::Persistence(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&data).map_err(|e| {
            BranchError::Persistence(format!("Failed to parse {}: {e}", self.path.display()))
        })
    }

    /// Replace the stored map. Writes a sibling temp file and renames it over
    /// the target, so readers only ever see a complete document.
    pub fn save(&self, branches: &BranchMap) -> Result<(), BranchError> {
        let json = serde_json::to_string_pretty(branches).map_err(|e| {
            BranchError::Persistence(format!("Failed to serialize branch state: {e}"))
        })?;

        let persist_err = |e: std::io::Error| {
            BranchError::Persistence(format!("Failed to write {}: {e}", self.path.display()))
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(persist_err)?;
        tmp.write_all(json.as_bytes()).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(&self.path).map_err(|e| persist_err(e.error))?;

        debug!(path = %self.path.display(), branches = branches.len(), "Saved branch state");
        Ok(())
    }
}
