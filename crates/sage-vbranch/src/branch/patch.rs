//! Patch codec: header normalization, patch assembly and scoped patch files.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use super::types::{ChangeKind, FileModes, VirtualBranch};

/// Mode emitted for added and deleted files when git reported none.
const DEFAULT_MODE: &str = "100644";

/// One file's `git diff` output split into header facts and body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDiff {
    pub kind: ChangeKind,
    pub modes: FileModes,
    pub body: String,
}

/// Split raw `git diff` output for one file into its kind, modes and body.
///
/// Text bodies start at the first `@@` line. Binary bodies start at the
/// `index` line since `git apply` refuses binary patches without it.
/// Input that already starts at its body is returned unchanged.
pub fn normalize_diff(raw: &str) -> ParsedDiff {
    let mut parsed = ParsedDiff::default();
    let mut body_start = None;
    let mut index_line = None;
    let mut offset = 0;

    for line in raw.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if line.starts_with("@@") {
            body_start = Some(offset);
            break;
        }
        if trimmed == "GIT binary patch" {
            body_start = Some(index_line.unwrap_or(offset));
            break;
        }

        if let Some(mode) = trimmed.strip_prefix("new file mode ") {
            parsed.kind = ChangeKind::Added;
            parsed.modes.new = Some(mode.to_string());
        } else if let Some(mode) = trimmed.strip_prefix("deleted file mode ") {
            parsed.kind = ChangeKind::Deleted;
            parsed.modes.old = Some(mode.to_string());
        } else if let Some(mode) = trimmed.strip_prefix("old mode ") {
            parsed.modes.old = Some(mode.to_string());
        } else if let Some(mode) = trimmed.strip_prefix("new mode ") {
            parsed.modes.new = Some(mode.to_string());
        } else if trimmed == "--- /dev/null" {
            parsed.kind = ChangeKind::Added;
        } else if trimmed == "+++ /dev/null" {
            parsed.kind = ChangeKind::Deleted;
        } else if trimmed.starts_with("index ") {
            index_line = Some(offset);
        }
        offset += line.len();
    }

    parsed.body = body_start.map_or_else(String::new, |start| raw[start..].to_string());
    parsed
}

/// Build one unified diff covering every change of `branch`, with exactly
/// one header block per file.
pub fn build_patch(branch: &VirtualBranch) -> String {
    let mut patch = String::new();
    for change in branch.changes.iter().filter(|c| !c.is_empty()) {
        let path = &change.path;
        let modes = &change.modes;
        patch.push_str(&format!("diff --git a/{path} b/{path}\n"));
        let (old, new) = match change.kind {
            ChangeKind::Added => {
                let mode = modes.new.as_deref().unwrap_or(DEFAULT_MODE);
                patch.push_str(&format!("new file mode {mode}\n"));
                ("/dev/null".to_string(), format!("b/{path}"))
            }
            ChangeKind::Deleted => {
                let mode = modes.old.as_deref().unwrap_or(DEFAULT_MODE);
                patch.push_str(&format!("deleted file mode {mode}\n"));
                (format!("a/{path}"), "/dev/null".to_string())
            }
            ChangeKind::Modified => {
                if let (Some(old), Some(new)) = (&modes.old, &modes.new)
                    && old != new
                {
                    patch.push_str(&format!("old mode {old}\nnew mode {new}\n"));
                }
                (format!("a/{path}"), format!("b/{path}"))
            }
        };

        // Header-only changes: empty files and mode flips
        if change.diff.trim().is_empty() {
            continue;
        }
        if !change.is_binary() {
            patch.push_str(&format!("--- {old}\n+++ {new}\n"));
        }
        patch.push_str(&change.diff);
        if !change.diff.ends_with('\n') {
            patch.push('\n');
        }
    }
    patch
}

/// A patch written to a temporary file for `git apply`. The file is removed
/// when this value is dropped.
#[derive(Debug)]
pub struct PatchFile {
    file: NamedTempFile,
}

impl PatchFile {
    pub fn write(contents: &str) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("sage-")
            .suffix(".patch")
            .tempfile()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
