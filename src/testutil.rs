//! Git fixtures shared by unit and integration tests.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

/// Run git in `repo` and panic with its output if it fails.
pub fn run_git(repo: &Path, args: &[&str]) -> Output {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .output()
        .expect("failed to run git command");
    assert!(
        output.status.success(),
        "git {:?} failed\nstdout:\n{}\nstderr:\n{}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

/// Trimmed stdout of a successful git command.
pub fn git_stdout(repo: &Path, args: &[&str]) -> String {
    String::from_utf8_lossy(&run_git(repo, args).stdout)
        .trim()
        .to_string()
}

/// A repository on `main` with one commit.
pub fn init_repo(repo: &Path) {
    run_git(repo, &["init"]);
    run_git(repo, &["config", "user.name", "Swarm Test"]);
    run_git(repo, &["config", "user.email", "swarm-test@example.com"]);
    run_git(repo, &["config", "commit.gpgsign", "false"]);
    fs::write(repo.join("README.md"), "init").expect("write README");
    run_git(repo, &["add", "."]);
    run_git(repo, &["commit", "-m", "init"]);
    run_git(repo, &["branch", "-M", "main"]);
}

/// Write `name` in `dir` and commit it there.
pub fn commit_file(dir: &Path, name: &str, content: &str, message: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(&path, content).expect("write file");
    run_git(dir, &["add", name]);
    run_git(dir, &["commit", "-m", message]);
}

/// Local branch names.
pub fn branches(repo: &Path) -> Vec<String> {
    git_stdout(repo, &["branch", "--format=%(refname:short)"])
        .lines()
        .map(str::to_string)
        .collect()
}

/// Number of registered worktrees, the main one included.
pub fn worktree_count(repo: &Path) -> usize {
    git_stdout(repo, &["worktree", "list", "--porcelain"])
        .lines()
        .filter(|l| l.starts_with("worktree "))
        .count()
}
