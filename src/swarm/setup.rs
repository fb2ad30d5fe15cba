use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use super::naming::{staging_branch_name, worker_branch_name, worktree_dir_name};
use super::{SwarmError, SwarmHarness, SwarmSetupContext, Vcs};

impl<V: Vcs> SwarmHarness<V> {
    /// Create a staging branch and one worktree per worker.
    ///
    /// Either every worktree exists when this returns `Ok`, or nothing this
    /// call created is left behind: worktrees are removed, worker and staging
    /// branches deleted, and the original branch checked out.
    pub fn setup_swarm(
        &self,
        project: &Path,
        task_name: &str,
        worker_count: usize,
    ) -> Result<SwarmSetupContext, SwarmError> {
        if worker_count == 0 {
            return Err(SwarmError::InvalidWorkerCount);
        }
        if task_name.trim().is_empty() {
            return Err(SwarmError::EmptyTaskName);
        }

        let dirty = self.vcs.dirty_files(project)?;
        if !dirty.is_empty() {
            return Err(SwarmError::DirtyWorkingTree { files: dirty });
        }

        let original_branch = self.vcs.current_branch(project)?;
        let staging_branch =
            staging_branch_name(&self.settings.branch_prefix, task_name, Utc::now());
        let worktrees_root = self.worktrees_root(project);
        ensure_ignored_dir(&worktrees_root)?;

        self.vcs.create_branch(project, &staging_branch, "HEAD")?;
        info!(staging = %staging_branch, original = %original_branch, "staging branch created");

        let mut worker_paths: Vec<PathBuf> = Vec::with_capacity(worker_count);
        let mut worker_branches: Vec<String> = Vec::with_capacity(worker_count);

        for index in 1..=worker_count {
            let branch = worker_branch_name(&staging_branch, index);
            let path = worktrees_root.join(worktree_dir_name(&branch));

            if let Err(source) = self.vcs.add_worktree(project, &path, &branch, &staging_branch) {
                warn!(worker = index, error = %source, "worktree creation failed; rolling back");
                self.rollback_setup(
                    project,
                    &original_branch,
                    &staging_branch,
                    &worker_paths,
                    &worker_branches,
                    &branch,
                );
                return Err(SwarmError::WorktreeCreation {
                    worker: index,
                    source,
                });
            }

            info!(worker = index, branch = %branch, path = %path.display(), "worktree created");
            worker_paths.push(path);
            worker_branches.push(branch);
        }

        self.restore_branch(project, &original_branch);

        Ok(SwarmSetupContext {
            staging_branch,
            original_branch,
            project_path: project.to_path_buf(),
            worker_paths,
            worker_branches,
        })
    }

    /// Undo a partial setup. Failures are logged; the caller reports the
    /// original error.
    fn rollback_setup(
        &self,
        project: &Path,
        original_branch: &str,
        staging_branch: &str,
        worker_paths: &[PathBuf],
        worker_branches: &[String],
        failed_branch: &str,
    ) {
        self.restore_branch(project, original_branch);

        for path in worker_paths.iter().rev() {
            if let Err(e) = self.vcs.remove_worktree(project, path) {
                warn!(path = %path.display(), error = %e, "rollback: failed to remove worktree");
            }
        }

        // `worktree add -b` may create the branch before failing.
        let failed = self
            .vcs
            .branch_exists(project, failed_branch)
            .unwrap_or(false)
            .then_some(failed_branch);
        let branches = worker_branches
            .iter()
            .map(String::as_str)
            .chain(failed)
            .chain(std::iter::once(staging_branch));
        for branch in branches {
            if let Err(e) = self.vcs.delete_branch(project, branch) {
                warn!(branch, error = %e, "rollback: failed to delete branch");
            }
        }
    }
}

/// Create `dir` with a `.gitignore` that hides everything inside it.
pub(super) fn ensure_ignored_dir(dir: &Path) -> Result<(), SwarmError> {
    let fs_err = |e: std::io::Error| SwarmError::Filesystem {
        path: dir.to_path_buf(),
        message: e.to_string(),
    };
    fs::create_dir_all(dir).map_err(fs_err)?;
    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, "# Managed by swarmflow\n*\n").map_err(fs_err)?;
    }
    Ok(())
}
