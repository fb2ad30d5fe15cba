use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::naming::selective_branch_name;
use super::task::SwarmTask;
use super::vcs::{MergeOutcome, PickOutcome};
use super::{SwarmHarness, Vcs};

/// Outcome of merging a worker branch into staging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub success: bool,
    /// Non-empty only when the merge stopped on conflicts.
    pub conflict_files: Vec<String>,
    pub message: String,
    /// Merge commit created by this merge. `None` when it could not be
    /// captured or when staging already contained the branch.
    pub commit_sha: Option<String>,
}

impl MergeResult {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflict_files.is_empty()
    }
}

/// Outcome of promoting accepted work onto the original branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectiveMergeResult {
    pub success: bool,
    pub message: String,
    /// Ids of tasks whose merge commits were applied, in order.
    pub picked: Vec<String>,
    /// Accepted tasks skipped for lack of a recorded merge commit.
    pub skipped: Vec<String>,
    /// Title of the task whose pick conflicted.
    pub conflict_task: Option<String>,
    pub conflict_files: Vec<String>,
    /// Temporary branch used, if the partial path ran. Always deleted.
    pub temp_branch: Option<String>,
    /// True when every merged task was accepted and staging merged whole.
    pub full_merge: bool,
}

impl<V: Vcs> SwarmHarness<V> {
    /// Merge `worker_branch` into `staging_branch` with `--no-ff`.
    ///
    /// Leaves staging checked out. Never leaves a merge in progress: a
    /// conflicting or failed merge is aborted before this returns.
    pub fn merge_to_staging(
        &self,
        project: &Path,
        worker_branch: &str,
        staging_branch: &str,
        message: &str,
    ) -> MergeResult {
        let lock = self.staging_lock(project);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Err(e) = self.vcs.checkout(project, staging_branch) {
            return MergeResult::failure(format!("failed to check out {}: {}", staging_branch, e));
        }

        let before = match self.vcs.head_sha(project) {
            Ok(sha) => Some(sha),
            Err(e) => {
                warn!(branch = staging_branch, error = %e, "could not read staging head before merge");
                None
            }
        };

        match self.vcs.merge_no_ff(project, worker_branch, message) {
            MergeOutcome::Merged => {
                let after = match self.vcs.head_sha(project) {
                    Ok(sha) => Some(sha),
                    Err(e) => {
                        warn!(branch = worker_branch, error = %e, "merged but could not capture commit");
                        None
                    }
                };
                // Only a head that moved away from a known start is this merge's commit.
                let (commit_sha, summary) = match (before, after) {
                    (Some(before), Some(after)) if before == after => {
                        info!(branch = worker_branch, staging = staging_branch, "already up to date");
                        (
                            None,
                            format!("{} already up to date with {}", staging_branch, worker_branch),
                        )
                    }
                    (Some(_), after) => {
                        (after, format!("Merged {} into {}", worker_branch, staging_branch))
                    }
                    (None, _) => (None, format!("Merged {} into {}", worker_branch, staging_branch)),
                };
                if commit_sha.is_some() {
                    info!(branch = worker_branch, staging = staging_branch, "merged into staging");
                }
                MergeResult {
                    success: true,
                    conflict_files: Vec::new(),
                    message: summary,
                    commit_sha,
                }
            }
            MergeOutcome::Conflict(files) => {
                self.abort_merge_logged(project);
                warn!(branch = worker_branch, conflicts = files.len(), "merge conflict; aborted");
                MergeResult {
                    success: false,
                    message: format!(
                        "Merging {} into {} conflicts in: {}",
                        worker_branch,
                        staging_branch,
                        files.join(", ")
                    ),
                    conflict_files: files,
                    commit_sha: None,
                }
            }
            MergeOutcome::Failed(msg) => {
                self.abort_merge_logged(project);
                warn!(branch = worker_branch, error = %msg, "merge failed");
                MergeResult::failure(msg)
            }
        }
    }

    /// Bring accepted work from staging onto `original_branch`.
    ///
    /// When every task on staging was accepted, staging is merged whole.
    /// Otherwise a temporary branch is cut from the original branch, the
    /// accepted tasks' merge commits are cherry-picked onto it in task order,
    /// and it is merged into the original branch. The temporary branch is
    /// deleted on every path.
    pub fn selective_merge_to_main(
        &self,
        project: &Path,
        staging_branch: &str,
        original_branch: &str,
        accepted_task_ids: &[String],
        all_tasks: &[SwarmTask],
    ) -> SelectiveMergeResult {
        let lock = self.staging_lock(project);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let accepted: HashSet<&str> = accepted_task_ids.iter().map(String::as_str).collect();
        // Rejected tasks that reached staging still count, so they block the full merge.
        let in_staging: Vec<&SwarmTask> = all_tasks.iter().filter(|t| t.in_staging()).collect();
        let chosen: Vec<&SwarmTask> = in_staging
            .iter()
            .copied()
            .filter(|t| accepted.contains(t.id.as_str()))
            .collect();

        if chosen.is_empty() {
            return SelectiveMergeResult {
                success: true,
                message: "No accepted tasks to merge".to_string(),
                ..Default::default()
            };
        }

        if chosen.len() == in_staging.len() {
            return self.full_merge(project, staging_branch, original_branch, &chosen);
        }

        let temp_branch = selective_branch_name(staging_branch, Utc::now());
        let mut result = SelectiveMergeResult {
            temp_branch: Some(temp_branch.clone()),
            ..Default::default()
        };

        if let Err(e) = self.vcs.create_branch(project, &temp_branch, original_branch) {
            result.message = format!("failed to create {}: {}", temp_branch, e);
            result.temp_branch = None;
            return result;
        }
        if let Err(e) = self.vcs.checkout(project, &temp_branch) {
            result.message = format!("failed to check out {}: {}", temp_branch, e);
            self.finish_selective(project, original_branch, &temp_branch);
            return result;
        }

        for task in &chosen {
            let Some(sha) = task.merge_commit_sha.as_deref() else {
                warn!(task_id = %task.id, title = %task.title, "no merge commit recorded; skipping");
                result.skipped.push(task.id.clone());
                continue;
            };
            match self.vcs.cherry_pick_merge(project, sha) {
                PickOutcome::Picked => {
                    info!(task_id = %task.id, sha, "picked");
                    result.picked.push(task.id.clone());
                }
                PickOutcome::Conflict(files) => {
                    self.abort_pick_logged(project);
                    warn!(task_id = %task.id, conflicts = files.len(), "cherry-pick conflict; rolled back");
                    result.message = format!(
                        "Cherry-picking \"{}\" conflicts in: {}",
                        task.title,
                        files.join(", ")
                    );
                    result.conflict_task = Some(task.title.clone());
                    result.conflict_files = files;
                    self.finish_selective(project, original_branch, &temp_branch);
                    return result;
                }
                PickOutcome::Failed(msg) => {
                    self.abort_pick_logged(project);
                    warn!(task_id = %task.id, error = %msg, "cherry-pick failed; rolled back");
                    result.message = format!("Cherry-picking \"{}\" failed: {}", task.title, msg);
                    self.finish_selective(project, original_branch, &temp_branch);
                    return result;
                }
            }
        }

        if let Err(e) = self.vcs.checkout(project, original_branch) {
            result.message = format!("failed to check out {}: {}", original_branch, e);
            self.finish_selective(project, original_branch, &temp_branch);
            return result;
        }

        let message = format!("Merge {} accepted task(s) from {}", result.picked.len(), staging_branch);
        match self.vcs.merge_no_ff(project, &temp_branch, &message) {
            MergeOutcome::Merged => {
                result.success = true;
                result.message = format!(
                    "Merged {} of {} task(s) into {}",
                    result.picked.len(),
                    in_staging.len(),
                    original_branch
                );
            }
            MergeOutcome::Conflict(files) => {
                self.abort_merge_logged(project);
                result.message = format!(
                    "Merging accepted work into {} conflicts in: {}",
                    original_branch,
                    files.join(", ")
                );
                result.conflict_files = files;
            }
            MergeOutcome::Failed(msg) => {
                self.abort_merge_logged(project);
                result.message = msg;
            }
        }

        self.finish_selective(project, original_branch, &temp_branch);
        result
    }

    fn full_merge(
        &self,
        project: &Path,
        staging_branch: &str,
        original_branch: &str,
        chosen: &[&SwarmTask],
    ) -> SelectiveMergeResult {
        let mut result = SelectiveMergeResult {
            full_merge: true,
            picked: chosen.iter().map(|t| t.id.clone()).collect(),
            ..Default::default()
        };

        if let Err(e) = self.vcs.checkout(project, original_branch) {
            result.picked.clear();
            result.message = format!("failed to check out {}: {}", original_branch, e);
            return result;
        }

        let message = format!("Merge {}", staging_branch);
        match self.vcs.merge_no_ff(project, staging_branch, &message) {
            MergeOutcome::Merged => {
                result.success = true;
                result.message = format!("Merged {} into {}", staging_branch, original_branch);
            }
            MergeOutcome::Conflict(files) => {
                self.abort_merge_logged(project);
                result.picked.clear();
                result.message = format!(
                    "Merging {} into {} conflicts in: {}",
                    staging_branch,
                    original_branch,
                    files.join(", ")
                );
                result.conflict_files = files;
            }
            MergeOutcome::Failed(msg) => {
                self.abort_merge_logged(project);
                result.picked.clear();
                result.message = msg;
            }
        }
        result
    }

    /// Return to the original branch and drop the temporary branch.
    fn finish_selective(&self, project: &Path, original_branch: &str, temp_branch: &str) {
        self.restore_branch(project, original_branch);
        if let Err(e) = self.vcs.delete_branch(project, temp_branch) {
            error!(branch = temp_branch, error = %e, "failed to delete temporary branch");
        }
    }

    fn abort_merge_logged(&self, project: &Path) {
        if !self.vcs.merge_in_progress(project) {
            return;
        }
        if let Err(e) = self.vcs.abort_merge(project) {
            error!(project = %project.display(), error = %e, "failed to abort merge");
        }
    }

    fn abort_pick_logged(&self, project: &Path) {
        if !self.vcs.cherry_pick_in_progress(project) {
            return;
        }
        if let Err(e) = self.vcs.abort_cherry_pick(project) {
            error!(project = %project.display(), error = %e, "failed to abort cherry-pick");
        }
    }
}
