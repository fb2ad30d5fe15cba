//! Git-worktree swarm harness.
//!
//! Gives each worker an isolated worktree on its own branch, merges finished
//! work into a staging branch, and promotes accepted work onto the user's
//! branch. Every git-mutating operation is a short saga: on failure it
//! compensates back to a known state (original branch checked out, no merge
//! or cherry-pick in progress) before reporting.
//!
//! Layout under the project:
//! - `<worktrees_dir>/<branch-with-dashes>` - one worktree per worker
//! - `<worktrees_dir>/.gitignore` - keeps the main tree clean

mod cleanup;
mod merge;
mod naming;
mod session;
mod setup;
mod task;
mod vcs;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cleanup::CleanupSummary;
pub use merge::{MergeResult, SelectiveMergeResult};
pub use naming::{
    selective_branch_name, slugify, staging_branch_name, worker_branch_name, worktree_dir_name,
};
pub use session::{SessionError, SwarmSession, VerifyReport};
pub use task::{SwarmTask, SwarmTaskStatus};
pub use vcs::{CommandOutput, GitCli, MergeOutcome, PickOutcome, Vcs, VcsError};

pub const DEFAULT_BRANCH_PREFIX: &str = "swarm";
pub const DEFAULT_WORKTREES_DIR: &str = ".swarm/worktrees";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwarmError {
    #[error("working tree has uncommitted changes: {}", files.join(", "))]
    DirtyWorkingTree { files: Vec<String> },
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,
    #[error("task name is empty")]
    EmptyTaskName,
    #[error("failed to create worktree for worker {worker}: {source}")]
    WorktreeCreation {
        worker: usize,
        #[source]
        source: VcsError,
    },
    #[error("failed to prepare {path}: {message}")]
    Filesystem { path: PathBuf, message: String },
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

/// Everything merge and cleanup need to find a swarm's branches and
/// worktrees. `worker_paths[i]` is the checkout of `worker_branches[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmSetupContext {
    pub staging_branch: String,
    pub original_branch: String,
    pub project_path: PathBuf,
    pub worker_paths: Vec<PathBuf>,
    pub worker_branches: Vec<String>,
}

impl SwarmSetupContext {
    pub fn worker_count(&self) -> usize {
        self.worker_branches.len()
    }

    /// Branch and path of a 1-based worker index.
    pub fn worker(&self, index: usize) -> Option<(&str, &Path)> {
        let i = index.checked_sub(1)?;
        let branch = self.worker_branches.get(i)?;
        let path = self.worker_paths.get(i)?;
        Some((branch.as_str(), path.as_path()))
    }
}

/// Tunables for the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSettings {
    pub branch_prefix: String,
    /// Relative to the project path.
    pub worktrees_dir: PathBuf,
    pub command_timeout: Duration,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            worktrees_dir: PathBuf::from(DEFAULT_WORKTREES_DIR),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

/// Runs swarm sagas against a [`Vcs`].
///
/// Sagas for different worktrees may run concurrently. Operations that
/// check out the staging branch are serialized per project.
pub struct SwarmHarness<V: Vcs = GitCli> {
    vcs: V,
    settings: HarnessSettings,
    staging_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SwarmHarness<GitCli> {
    pub fn git(settings: HarnessSettings) -> Self {
        Self::new(GitCli, settings)
    }
}

impl<V: Vcs> SwarmHarness<V> {
    pub fn new(vcs: V, settings: HarnessSettings) -> Self {
        Self {
            vcs,
            settings,
            staging_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Absolute worktrees directory for a project.
    pub fn worktrees_root(&self, project: &Path) -> PathBuf {
        project.join(&self.settings.worktrees_dir)
    }

    /// Lock shared by every staging-touching operation on `project`.
    fn staging_lock(&self, project: &Path) -> Arc<Mutex<()>> {
        let key = project
            .canonicalize()
            .unwrap_or_else(|_| project.to_path_buf());
        let mut locks = self.staging_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key).or_default().clone()
    }

    /// Check out `branch` unless it already is; log instead of failing.
    fn restore_branch(&self, project: &Path, branch: &str) {
        match self.vcs.current_branch(project) {
            Ok(current) if current == branch => {}
            _ => {
                if let Err(e) = self.vcs.checkout(project, branch) {
                    tracing::error!(branch, error = %e, "failed to restore branch");
                }
            }
        }
    }
}
