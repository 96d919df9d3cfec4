//! Path filtering for the watcher.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use super::WatchError;

/// Matches path components against the ignore glob list.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    set: GlobSet,
}

impl IgnoreMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, WatchError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern.as_ref()).map_err(|e| WatchError::Glob {
                pattern: pattern.as_ref().to_string(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| WatchError::Glob {
            pattern: "<ignore set>".into(),
            message: e.to_string(),
        })?;
        Ok(Self { set })
    }

    /// True when the final component of `path` matches an ignore pattern.
    pub fn is_ignored_name(&self, path: &Path) -> bool {
        path.file_name().is_some_and(|name| self.set.is_match(name))
    }

    /// True when any component of the repository-relative `path` is ignored.
    pub fn is_ignored_relative(&self, path: &Path) -> bool {
        path.components()
            .any(|c| self.set.is_match(c.as_os_str()))
    }
}
