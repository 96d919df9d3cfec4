//! Virtual branch data model, persisted as camelCase JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::patch;

/// All virtual branches of a repository, keyed (and ordered) by name.
pub type BranchMap = BTreeMap<String, VirtualBranch>;

/// What a change does to its file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    #[default]
    Modified,
    Added,
    Deleted,
}

/// File modes from a diff header. `old` comes from `deleted file mode` or
/// `old mode`, `new` from `new file mode` or `new mode`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

impl FileModes {
    pub const fn is_empty(&self) -> bool {
        self.old.is_none() && self.new.is_none()
    }

    /// Both modes known and different, e.g. `chmod +x` on a tracked file.
    pub fn is_mode_change(&self) -> bool {
        matches!((&self.old, &self.new), (Some(old), Some(new)) if old != new)
    }
}

/// One file's delta against `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Repository-relative, `/`-separated.
    pub path: String,
    #[serde(default)]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "FileModes::is_empty")]
    pub modes: FileModes,
    /// Hunks, or an `index` line plus `GIT binary patch` for binary files.
    /// File headers are stripped at capture and rebuilt by [`patch::build_patch`].
    pub diff: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub staged: bool,
}

impl Change {
    /// Build a change from raw `git diff` output, normalizing away file headers.
    pub fn new(path: impl Into<String>, raw_diff: &str, staged: bool) -> Self {
        let parsed = patch::normalize_diff(raw_diff);
        Self {
            path: path.into(),
            kind: parsed.kind,
            modes: parsed.modes,
            diff: parsed.body,
            timestamp: Utc::now(),
            staged,
        }
    }

    /// True when the file matches `HEAD`. Added and deleted files are never
    /// empty, even with no content lines.
    pub fn is_empty(&self) -> bool {
        self.diff.trim().is_empty()
            && self.kind == ChangeKind::Modified
            && !self.modes.is_mode_change()
    }

    pub fn is_binary(&self) -> bool {
        self.diff.lines().any(|line| line == "GIT binary patch")
    }

    /// Strip file headers from a diff that still carries them.
    #[must_use]
    pub fn normalized(self) -> Self {
        let parsed = patch::normalize_diff(&self.diff);
        if parsed.body.len() == self.diff.len() {
            return self;
        }
        Self {
            kind: parsed.kind,
            modes: parsed.modes,
            diff: parsed.body,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualBranch {
    pub name: String,
    pub base_branch: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub changes: Vec<Change>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stashed_diff: Option<String>,
}

impl VirtualBranch {
    pub fn new(name: impl Into<String>, base_branch: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            base_branch: base_branch.into(),
            created: now,
            last_updated: now,
            changes: Vec::new(),
            active: false,
            stashed_diff: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn change(&self, path: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.path == path)
    }

    /// Insert or replace the entry for `change.path`, keeping its position.
    /// An empty change removes the entry instead. Returns whether anything changed.
    pub fn upsert_change(&mut self, change: Change) -> bool {
        let existing = self.changes.iter().position(|c| c.path == change.path);
        match (existing, change.is_empty()) {
            (Some(idx), true) => {
                self.changes.remove(idx);
                true
            }
            (Some(idx), false) => {
                self.changes[idx] = change;
                true
            }
            (None, true) => false,
            (None, false) => {
                self.changes.push(change);
                true
            }
        }
    }

    pub fn take_change(&mut self, path: &str) -> Option<Change> {
        let idx = self.changes.iter().position(|c| c.path == path)?;
        Some(self.changes.remove(idx))
    }

    pub fn has_stash(&self) -> bool {
        self.stashed_diff
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    /// Set aside `diff`, after any stash already held.
    pub fn push_stash(&mut self, diff: String) {
        self.stashed_diff = Some(match self.stashed_diff.take() {
            Some(mut existing) if !existing.trim().is_empty() => {
                if !existing.ends_with('\n') {
                    existing.push('\n');
                }
                existing.push_str(&diff);
                existing
            }
            _ => diff,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HUNK: &str = "@@ -1 +1 @@\n-old\n+new\n";

    #[test]
    fn upsert_replaces_by_path() {
        let mut b = VirtualBranch::new("feat", "main");
        b.upsert_change(Change::new("a.rs", HUNK, false));
        b.upsert_change(Change::new("b.rs", HUNK, false));
        b.upsert_change(Change::new("a.rs", "@@ -1 +1 @@\n-old\n+newer\n", false));

        assert_eq!(b.changes.len(), 2);
        assert_eq!(b.changes[0].path, "a.rs");
        assert!(b.changes[0].diff.contains("+newer"));
    }

    #[test]
    fn upsert_empty_removes_entry() {
        let mut b = VirtualBranch::new("feat", "main");
        b.upsert_change(Change::new("a.rs", HUNK, false));
        assert!(b.upsert_change(Change::new("a.rs", "", false)));
        assert!(b.changes.is_empty());

        // Empty change for an unknown path is ignored
        assert!(!b.upsert_change(Change::new("c.rs", "", false)));
        assert!(b.changes.is_empty());
    }

    #[test]
    fn normalized_strips_headers_from_literal_changes() {
        let c = Change {
            path: "n.txt".into(),
            kind: ChangeKind::Modified,
            modes: FileModes::default(),
            diff: "--- /dev/null\n+++ b/n.txt\n@@ -0,0 +1 @@\n+hi\n".into(),
            timestamp: Utc::now(),
            staged: false,
        }
        .normalized();
        assert_eq!(c.kind, ChangeKind::Added);
        assert!(c.diff.starts_with("@@"));
    }

    #[test]
    fn header_only_additions_are_kept() {
        let mut b = VirtualBranch::new("feat", "main");
        let empty = Change::new(
            "empty.txt",
            "diff --git a/empty.txt b/empty.txt\nnew file mode 100644\nindex 0000000..e69de29\n",
            false,
        );
        assert!(!empty.is_empty());
        assert!(b.upsert_change(empty));

        // Back to nothing on disk: the entry goes away
        assert!(b.upsert_change(Change::new("empty.txt", "", false)));
        assert!(b.changes.is_empty());
    }

    #[test]
    fn mode_only_change_is_not_empty() {
        let c = Change::new(
            "run.sh",
            "diff --git a/run.sh b/run.sh\nold mode 100644\nnew mode 100755\n",
            false,
        );
        assert!(!c.is_empty());
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["modes"]["new"], "100755");
    }

    #[test]
    fn push_stash_appends() {
        let mut b = VirtualBranch::new("feat", "main");
        assert!(!b.has_stash());
        b.push_stash("first".into());
        b.push_stash("second\n".into());
        assert_eq!(b.stashed_diff.as_deref(), Some("first\nsecond\n"));
        assert!(b.has_stash());
    }

    #[test]
    fn json_uses_camel_case_and_omits_empty_stash() {
        let b = VirtualBranch::new("feat", "main");
        let json = serde_json::to_value(&b).unwrap();
        assert!(json.get("baseBranch").is_some());
        assert!(json.get("lastUpdated").is_some());
        assert!(json.get("stashedDiff").is_none());
    }

    #[test]
    fn change_kind_defaults_when_missing() {
        let json = r#"{"path":"a.rs","diff":"@@ -1 +1 @@\n","timestamp":"2024-01-01T00:00:00Z"}"#;
        let c: Change = serde_json::from_str(json).unwrap();
        assert_eq!(c.kind, ChangeKind::Modified);
        assert!(!c.staged);
    }
}
