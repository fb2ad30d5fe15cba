//! Version-control access for the swarm harness.
//!
//! [`Vcs`] is the set of primitives the harness composes into sagas.
//! [`GitCli`] implements it by shelling out to `git -C <repo>`.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::process_group::{kill_group, spawn_in_new_process_group};
use crate::shutdown;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VcsError {
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },
    #[error("git {command} returned no output")]
    EmptyOutput { command: String },
}

/// Captured result of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed or ended by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Stopped because shutdown was requested.
    pub interrupted: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && !self.interrupted && self.exit_code == Some(0)
    }

    fn from_output(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            timed_out: false,
            interrupted: false,
        }
    }
}

/// Result of a `--no-ff` merge attempt. The merge is left as git left it;
/// aborting is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Conflict(Vec<String>),
    Failed(String),
}

/// Result of cherry-picking one merge commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Picked,
    Conflict(Vec<String>),
    Failed(String),
}

/// Primitive repository operations.
///
/// Structured calls report failures as [`VcsError`]; merge and cherry-pick
/// return outcomes because a conflict is an expected result.
pub trait Vcs: Send + Sync {
    fn current_branch(&self, repo: &Path) -> Result<String, VcsError>;

    /// Paths with uncommitted or untracked changes. Ignored files excluded.
    fn dirty_files(&self, repo: &Path) -> Result<Vec<String>, VcsError>;

    fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, VcsError>;

    /// Create `branch` at `start` without checking it out.
    fn create_branch(&self, repo: &Path, branch: &str, start: &str) -> Result<(), VcsError>;

    fn checkout(&self, repo: &Path, branch: &str) -> Result<(), VcsError>;

    /// Create a worktree at `path` on a new branch forked from `start`.
    fn add_worktree(&self, repo: &Path, path: &Path, branch: &str, start: &str) -> Result<(), VcsError>;

    fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<(), VcsError>;

    fn merge_no_ff(&self, repo: &Path, branch: &str, message: &str) -> MergeOutcome;

    fn abort_merge(&self, repo: &Path) -> Result<(), VcsError>;

    fn merge_in_progress(&self, repo: &Path) -> bool;

    /// Apply a merge commit onto the current branch, picking its mainline.
    fn cherry_pick_merge(&self, repo: &Path, sha: &str) -> PickOutcome;

    fn abort_cherry_pick(&self, repo: &Path) -> Result<(), VcsError>;

    fn cherry_pick_in_progress(&self, repo: &Path) -> bool;

    /// Run git with arbitrary arguments.
    fn git_raw(&self, repo: &Path, args: &[&str]) -> Result<CommandOutput, VcsError>;

    /// Run a shell command in `cwd`, killing it after `timeout`.
    fn shell(&self, cwd: &Path, command: &str, timeout: Duration) -> Result<CommandOutput, VcsError>;

    /// Force-delete a branch. Advisory: callers log failures.
    fn delete_branch(&self, repo: &Path, branch: &str) -> Result<(), VcsError> {
        let out = self.git_raw(repo, &["branch", "-D", branch])?;
        if out.success() {
            Ok(())
        } else {
            Err(VcsError::Git {
                command: "branch -D".to_string(),
                stderr: out.stderr.trim().to_string(),
            })
        }
    }

    /// Commit id of HEAD. Advisory: a failure only costs selective merge.
    fn head_sha(&self, repo: &Path) -> Result<String, VcsError> {
        let out = self.git_raw(repo, &["rev-parse", "HEAD"])?;
        let sha = out.stdout.trim();
        if !out.success() {
            return Err(VcsError::Git {
                command: "rev-parse HEAD".to_string(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        if sha.is_empty() {
            return Err(VcsError::EmptyOutput {
                command: "rev-parse HEAD".to_string(),
            });
        }
        Ok(sha.to_string())
    }
}

/// [`Vcs`] backed by the `git` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl GitCli {
    fn git(&self, repo: &Path, args: &[&str]) -> Result<Output, VcsError> {
        debug!(repo = %repo.display(), ?args, "git");
        Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .output()
            .map_err(|e| VcsError::Spawn {
                program: format!("git {}", args.first().copied().unwrap_or("")),
                message: e.to_string(),
            })
    }

    /// Run git and turn a non-zero exit into [`VcsError::Git`].
    fn git_ok(&self, repo: &Path, args: &[&str]) -> Result<String, VcsError> {
        let output = self.git(repo, args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(VcsError::Git {
                command: args.join(" "),
                stderr: stderr.trim().to_string(),
            })
        }
    }

    fn unmerged_files(&self, repo: &Path) -> Vec<String> {
        match self.git(repo, &["diff", "--name-only", "--diff-filter=U"]) {
            Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout)
                .lines()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn ref_exists(&self, repo: &Path, name: &str) -> bool {
        self.git(repo, &["rev-parse", "-q", "--verify", name])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl Vcs for GitCli {
    fn current_branch(&self, repo: &Path) -> Result<String, VcsError> {
        let out = self.git_ok(repo, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = out.trim();
        if branch.is_empty() {
            return Err(VcsError::EmptyOutput {
                command: "rev-parse --abbrev-ref HEAD".to_string(),
            });
        }
        Ok(branch.to_string())
    }

    fn dirty_files(&self, repo: &Path) -> Result<Vec<String>, VcsError> {
        let out = self.git_ok(repo, &["status", "--porcelain", "--untracked-files=all"])?;
        Ok(parse_porcelain_paths(&out))
    }

    fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, VcsError> {
        let ref_name = format!("refs/heads/{}", branch);
        let output = self.git(repo, &["show-ref", "--verify", "--quiet", &ref_name])?;
        if output.status.success() {
            return Ok(true);
        }
        match output.status.code() {
            Some(1) => Ok(false),
            _ => Err(VcsError::Git {
                command: "show-ref".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn create_branch(&self, repo: &Path, branch: &str, start: &str) -> Result<(), VcsError> {
        self.git_ok(repo, &["branch", branch, start]).map(|_| ())
    }

    fn checkout(&self, repo: &Path, branch: &str) -> Result<(), VcsError> {
        self.git_ok(repo, &["checkout", branch]).map(|_| ())
    }

    fn add_worktree(&self, repo: &Path, path: &Path, branch: &str, start: &str) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy().to_string();
        self.git_ok(repo, &["worktree", "add", "-b", branch, &path_str, start])
            .map(|_| ())
    }

    fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy().to_string();
        self.git_ok(repo, &["worktree", "remove", "--force", &path_str])
            .map(|_| ())
    }

    fn merge_no_ff(&self, repo: &Path, branch: &str, message: &str) -> MergeOutcome {
        match self.git(repo, &["merge", "--no-ff", "-m", message, branch]) {
            Err(e) => MergeOutcome::Failed(e.to_string()),
            Ok(output) if output.status.success() => MergeOutcome::Merged,
            Ok(output) => {
                let conflicts = self.unmerged_files(repo);
                if conflicts.is_empty() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let detail = if stderr.trim().is_empty() { stdout } else { stderr };
                    MergeOutcome::Failed(format!("merge of {} failed: {}", branch, detail.trim()))
                } else {
                    MergeOutcome::Conflict(conflicts)
                }
            }
        }
    }

    fn abort_merge(&self, repo: &Path) -> Result<(), VcsError> {
        self.git_ok(repo, &["merge", "--abort"]).map(|_| ())
    }

    fn merge_in_progress(&self, repo: &Path) -> bool {
        self.ref_exists(repo, "MERGE_HEAD")
    }

    fn cherry_pick_merge(&self, repo: &Path, sha: &str) -> PickOutcome {
        match self.git(
            repo,
            &["cherry-pick", "-m", "1", "--keep-redundant-commits", sha],
        ) {
            Err(e) => PickOutcome::Failed(e.to_string()),
            Ok(output) if output.status.success() => PickOutcome::Picked,
            Ok(output) => {
                let conflicts = self.unmerged_files(repo);
                if conflicts.is_empty() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    PickOutcome::Failed(format!("cherry-pick of {} failed: {}", sha, stderr.trim()))
                } else {
                    PickOutcome::Conflict(conflicts)
                }
            }
        }
    }

    fn abort_cherry_pick(&self, repo: &Path) -> Result<(), VcsError> {
        self.git_ok(repo, &["cherry-pick", "--abort"]).map(|_| ())
    }

    fn cherry_pick_in_progress(&self, repo: &Path) -> bool {
        self.ref_exists(repo, "CHERRY_PICK_HEAD")
    }

    fn git_raw(&self, repo: &Path, args: &[&str]) -> Result<CommandOutput, VcsError> {
        self.git(repo, args).map(CommandOutput::from_output)
    }

    fn shell(&self, cwd: &Path, command: &str, timeout: Duration) -> Result<CommandOutput, VcsError> {
        run_shell(cwd, command, timeout)
    }
}

/// Paths from `git status --porcelain` output. Renames report the new path.
fn parse_porcelain_paths(porcelain: &str) -> Vec<String> {
    porcelain
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            match path.split_once(" -> ") {
                Some((_, to)) => to.trim().to_string(),
                None => path.trim().to_string(),
            }
        })
        .collect()
}

fn run_shell(cwd: &Path, command: &str, timeout: Duration) -> Result<CommandOutput, VcsError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = spawn_in_new_process_group(&mut cmd).map_err(|e| VcsError::Spawn {
        program: "sh".to_string(),
        message: e.to_string(),
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_handle = thread::spawn(move || read_all(stdout));
    let stderr_handle = thread::spawn(move || read_all(stderr));

    let start = Instant::now();
    let mut timed_out = false;
    let mut interrupted = false;
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                } else if shutdown::requested() {
                    interrupted = true;
                } else {
                    thread::sleep(Duration::from_millis(50));
                    continue;
                }
                kill_group(&mut child);
                break None;
            }
            Err(e) => {
                kill_group(&mut child);
                return Err(VcsError::Spawn {
                    program: "sh".to_string(),
                    message: format!("failed to wait: {}", e),
                });
            }
        }
    };

    Ok(CommandOutput {
        stdout: stdout_handle.join().unwrap_or_default(),
        stderr: stderr_handle.join().unwrap_or_default(),
        exit_code,
        timed_out,
        interrupted,
    })
}

fn read_all<R: Read>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
