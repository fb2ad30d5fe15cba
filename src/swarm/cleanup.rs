use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use super::{SwarmHarness, SwarmSetupContext, Vcs};

/// What a cleanup pass did. Cleanup never stops at the first failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub removed_worktrees: Vec<PathBuf>,
    pub deleted_branches: Vec<String>,
    pub errors: Vec<String>,
}

impl CleanupSummary {
    pub fn removed_count(&self) -> usize {
        self.removed_worktrees.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl<V: Vcs> SwarmHarness<V> {
    /// Tear down a swarm.
    ///
    /// Checks out the original branch first so no worktree being removed is
    /// the current checkout, then removes every worktree independently and,
    /// when asked, deletes worker and staging branches.
    pub fn cleanup_swarm(&self, ctx: &SwarmSetupContext, delete_branches: bool) -> CleanupSummary {
        let project = ctx.project_path.as_path();
        let mut summary = CleanupSummary::default();

        if let Err(e) = self.vcs.checkout(project, &ctx.original_branch) {
            summary
                .errors
                .push(format!("failed to check out {}: {}", ctx.original_branch, e));
        }

        for path in &ctx.worker_paths {
            match self.vcs.remove_worktree(project, path) {
                Ok(()) => summary.removed_worktrees.push(path.clone()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove worktree");
                    summary
                        .errors
                        .push(format!("failed to remove worktree {}: {}", path.display(), e));
                }
            }
        }

        if delete_branches {
            let branches = ctx
                .worker_branches
                .iter()
                .chain(std::iter::once(&ctx.staging_branch));
            for branch in branches {
                match self.vcs.delete_branch(project, branch) {
                    Ok(()) => summary.deleted_branches.push(branch.clone()),
                    Err(e) => summary
                        .errors
                        .push(format!("failed to delete branch {}: {}", branch, e)),
                }
            }
        }

        // Leave the directory if anything else still lives there.
        let root = self.worktrees_root(project);
        if let Ok(entries) = fs::read_dir(&root) {
            let only_gitignore = entries
                .filter_map(Result::ok)
                .all(|entry| entry.file_name() == ".gitignore");
            if only_gitignore {
                if let Err(e) = fs::remove_dir_all(&root) {
                    warn!(path = %root.display(), error = %e, "failed to remove worktrees directory");
                    summary
                        .errors
                        .push(format!("failed to remove {}: {}", root.display(), e));
                }
            }
        }

        info!(
            staging = %ctx.staging_branch,
            removed = summary.removed_count(),
            branches = summary.deleted_branches.len(),
            errors = summary.errors.len(),
            "swarm cleaned up"
        );
        summary
    }
}
