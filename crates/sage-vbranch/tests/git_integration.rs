//! End-to-end branch manager behavior against a real `git` repository.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use sage_vbranch::{
    BranchError, BranchManager, BranchOps, Change, GitCli, GitService, ManagerOptions,
};

const ORIGINAL: &str = "package a\n\nvar x = 1\n";
const EDITED: &str = "package a\n\nvar x = 2\n";

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn init_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "--quiet", "--initial-branch=main"]);
    run_git(dir.path(), &["config", "user.email", "sage@example.com"]);
    run_git(dir.path(), &["config", "user.name", "Sage Test"]);
    run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.path().join("a.go"), ORIGINAL).unwrap();
    run_git(dir.path(), &["add", "a.go"]);
    run_git(dir.path(), &["commit", "--quiet", "-m", "init"]);
    dir
}

fn open(repo: &Path) -> (BranchManager, Arc<GitCli>) {
    let git = Arc::new(GitCli::new(repo));
    let mgr = BranchManager::open(git.clone(), "sage", ManagerOptions::default()).unwrap();
    (mgr, git)
}

fn read(repo: &Path, file: &str) -> String {
    std::fs::read_to_string(repo.join(file)).unwrap()
}

/// Record the on-disk state of `file` the way the watcher does.
fn capture(mgr: &BranchManager, git: &GitCli, branch: &str, file: &str) {
    let diff = git.diff_path(Path::new(file)).unwrap();
    mgr.add_change(branch, Change::new(file, &diff, false)).unwrap();
}

#[test]
fn state_lives_inside_git_dir() {
    let repo = init_repo();
    let (mgr, git) = open(repo.path());
    mgr.create_virtual_branch("feat-x", "main").unwrap();

    assert!(mgr.store().path().starts_with(git.git_dir().unwrap()));
    assert!(mgr.store().path().ends_with("sage/branches.json"));
    assert!(git.is_clean().unwrap());
}

#[test]
fn unapply_restores_base_and_apply_brings_changes_back() {
    let repo = init_repo();
    let (mgr, git) = open(repo.path());
    mgr.create_virtual_branch("feat-x", "main").unwrap();
    mgr.apply_virtual_branch("feat-x").unwrap();

    std::fs::write(repo.path().join("a.go"), EDITED).unwrap();
    capture(&mgr, &git, "feat-x", "a.go");
    let feat = mgr.get_virtual_branch("feat-x").unwrap();
    assert_eq!(feat.changes.len(), 1);
    assert!(feat.changes[0].diff.starts_with("@@"));

    mgr.unapply_virtual_branch("feat-x").unwrap();
    assert_eq!(read(repo.path(), "a.go"), ORIGINAL);
    assert!(git.is_clean().unwrap());
    let feat = mgr.get_virtual_branch("feat-x").unwrap();
    assert!(!feat.active);
    assert!(!feat.has_stash());

    mgr.apply_virtual_branch("feat-x").unwrap();
    assert_eq!(read(repo.path(), "a.go"), EDITED);
    assert!(mgr.get_virtual_branch("feat-x").unwrap().active);
}

#[test]
fn dirty_tree_without_owner_is_refused() {
    let repo = init_repo();
    let (mgr, _git) = open(repo.path());
    mgr.create_virtual_branch("feat", "main").unwrap();
    std::fs::write(repo.path().join("stray.txt"), "stray\n").unwrap();

    assert!(matches!(
        mgr.apply_virtual_branch("feat"),
        Err(BranchError::DirtyWithNoOwner)
    ));
    assert_eq!(read(repo.path(), "stray.txt"), "stray\n");
}

#[test]
fn unrecorded_edits_are_stashed_and_restored() {
    let repo = init_repo();
    let (mgr, git) = open(repo.path());
    mgr.create_virtual_branch("a", "main").unwrap();
    mgr.create_virtual_branch("b", "main").unwrap();

    mgr.apply_virtual_branch("a").unwrap();
    std::fs::write(repo.path().join("a.go"), EDITED).unwrap();
    capture(&mgr, &git, "a", "a.go");
    // Never recorded on the branch
    std::fs::write(repo.path().join("scratch.txt"), "scratch\n").unwrap();

    mgr.apply_virtual_branch("b").unwrap();
    assert!(git.is_clean().unwrap());
    assert_eq!(read(repo.path(), "a.go"), ORIGINAL);
    assert!(!repo.path().join("scratch.txt").exists());
    assert!(mgr.has_stashed_changes("a").unwrap());
    assert!(!mgr.get_virtual_branch("a").unwrap().active);

    mgr.apply_virtual_branch("a").unwrap();
    assert_eq!(read(repo.path(), "a.go"), EDITED);
    assert_eq!(read(repo.path(), "scratch.txt"), "scratch\n");
    assert!(!mgr.has_stashed_changes("a").unwrap());
    assert!(matches!(
        mgr.pop_stashed_changes("a"),
        Err(BranchError::NotFound(_))
    ));
}

#[test]
fn only_one_branch_is_ever_active() {
    let repo = init_repo();
    let (mgr, _git) = open(repo.path());
    for name in ["a", "b", "c"] {
        mgr.create_virtual_branch(name, "main").unwrap();
    }
    for name in ["b", "a", "c", "c"] {
        mgr.apply_virtual_branch(name).unwrap();
        let active: Vec<_> = mgr
            .list_virtual_branches()
            .unwrap()
            .into_iter()
            .filter(|b| b.active)
            .map(|b| b.name)
            .collect();
        assert_eq!(active, vec![name.to_string()]);
    }
}

#[test]
fn materialize_creates_one_commit_and_forgets_branch() {
    let repo = init_repo();
    let (mgr, git) = open(repo.path());
    mgr.create_virtual_branch("feat-x", "main").unwrap();
    mgr.apply_virtual_branch("feat-x").unwrap();
    std::fs::write(repo.path().join("a.go"), EDITED).unwrap();
    capture(&mgr, &git, "feat-x", "a.go");
    // Materialize from the inactive state so the patch is re-applied first
    mgr.unapply_virtual_branch("feat-x").unwrap();

    mgr.materialize_branch("feat-x").unwrap();

    assert_eq!(git.current_branch().unwrap(), "feat-x");
    assert_eq!(run_git(repo.path(), &["rev-list", "--count", "main..feat-x"]).trim(), "1");
    assert_eq!(
        run_git(repo.path(), &["diff", "--name-only", "main", "feat-x"]).trim(),
        "a.go"
    );
    assert!(git.is_clean().unwrap());
    assert!(matches!(
        mgr.get_virtual_branch("feat-x"),
        Err(BranchError::NotFound(_))
    ));
    assert!(mgr.list_virtual_branches().unwrap().is_empty());
}

#[test]
fn new_files_round_trip_through_unapply() {
    let repo = init_repo();
    let (mgr, git) = open(repo.path());
    mgr.create_virtual_branch("feat", "main").unwrap();
    mgr.apply_virtual_branch("feat").unwrap();

    std::fs::write(repo.path().join("new.txt"), "hello\n").unwrap();
    let diff = git.diff_new_file(Path::new("new.txt")).unwrap();
    mgr.add_change("feat", Change::new("new.txt", &diff, false))
        .unwrap();

    mgr.unapply_virtual_branch("feat").unwrap();
    assert!(!repo.path().join("new.txt").exists());
    assert!(git.is_clean().unwrap());

    mgr.apply_virtual_branch("feat").unwrap();
    assert_eq!(read(repo.path(), "new.txt"), "hello\n");
}

#[test]
fn state_is_shared_between_managers() {
    let repo = init_repo();
    let (first, _git) = open(repo.path());
    first.create_virtual_branch("feat", "main").unwrap();
    first.apply_virtual_branch("feat").unwrap();

    let (second, _git) = open(repo.path());
    assert_eq!(second.get_active_branch().unwrap().name, "feat");
    assert_eq!(
        second.list_virtual_branches().unwrap(),
        first.list_virtual_branches().unwrap()
    );
}

#[test]
fn dirty_binary_file_survives_switching_away_and_back() {
    let repo = init_repo();
    let (mgr, _git) = open(repo.path());
    mgr.create_virtual_branch("a", "main").unwrap();
    mgr.create_virtual_branch("b", "main").unwrap();
    mgr.apply_virtual_branch("a").unwrap();

    let bytes = [0u8, 1, 2, 255, 0, 7];
    std::fs::write(repo.path().join("img.bin"), bytes).unwrap();

    mgr.apply_virtual_branch("b").unwrap();
    assert!(!repo.path().join("img.bin").exists());
    let stash = mgr.get_virtual_branch("a").unwrap().stashed_diff.unwrap();
    assert!(stash.contains("GIT binary patch"));

    mgr.apply_virtual_branch("a").unwrap();
    assert_eq!(std::fs::read(repo.path().join("img.bin")).unwrap(), bytes);
    assert!(!mgr.has_stashed_changes("a").unwrap());
}

#[test]
fn recorded_binary_file_round_trips_through_unapply() {
    let repo = init_repo();
    let (mgr, git) = open(repo.path());
    mgr.create_virtual_branch("feat", "main").unwrap();
    mgr.apply_virtual_branch("feat").unwrap();

    let bytes = [0u8, 1, 2, 255, 0, 7];
    std::fs::write(repo.path().join("img.bin"), bytes).unwrap();
    let diff = git.diff_new_file(Path::new("img.bin")).unwrap();
    mgr.add_change("feat", Change::new("img.bin", &diff, false))
        .unwrap();
    assert!(mgr.get_virtual_branch("feat").unwrap().changes[0].is_binary());

    mgr.unapply_virtual_branch("feat").unwrap();
    assert!(!repo.path().join("img.bin").exists());
    assert!(git.is_clean().unwrap());

    mgr.apply_virtual_branch("feat").unwrap();
    assert_eq!(std::fs::read(repo.path().join("img.bin")).unwrap(), bytes);
}

#[test]
fn empty_new_file_is_kept_on_the_branch() {
    let repo = init_repo();
    let (mgr, git) = open(repo.path());
    mgr.create_virtual_branch("feat", "main").unwrap();
    mgr.apply_virtual_branch("feat").unwrap();

    std::fs::write(repo.path().join("empty.txt"), "").unwrap();
    let diff = git.diff_new_file(Path::new("empty.txt")).unwrap();
    mgr.add_change("feat", Change::new("empty.txt", &diff, false))
        .unwrap();
    assert_eq!(mgr.get_virtual_branch("feat").unwrap().changes.len(), 1);

    mgr.unapply_virtual_branch("feat").unwrap();
    assert!(!repo.path().join("empty.txt").exists());

    mgr.apply_virtual_branch("feat").unwrap();
    assert_eq!(read(repo.path(), "empty.txt"), "");
}

#[cfg(unix)]
#[test]
fn executable_new_file_keeps_its_mode() {
    use std::os::unix::fs::PermissionsExt;

    let repo = init_repo();
    let (mgr, git) = open(repo.path());
    mgr.create_virtual_branch("feat", "main").unwrap();
    mgr.apply_virtual_branch("feat").unwrap();

    let script = repo.path().join("run.sh");
    std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let diff = git.diff_new_file(Path::new("run.sh")).unwrap();
    mgr.add_change("feat", Change::new("run.sh", &diff, false))
        .unwrap();

    mgr.unapply_virtual_branch("feat").unwrap();
    assert!(!script.exists());
    mgr.apply_virtual_branch("feat").unwrap();

    let mode = std::fs::metadata(&script).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0o111);
}
