//! Persisted swarm state: the setup context plus the task list.
//!
//! Stored as pretty JSON so a session survives between CLI invocations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::merge::MergeResult;
use super::setup::ensure_ignored_dir;
use super::task::{SwarmTask, SwarmTaskStatus};
use super::vcs::VcsError;
use super::{SwarmHarness, SwarmSetupContext, Vcs};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no swarm session at {0}; run setup first")]
    Missing(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize session: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },
    #[error("task {task} is blocked: dependency {dependency} is not merged")]
    DependencyNotMerged { task: String, dependency: String },
    #[error("worker {worker} is out of range (1..={count})")]
    WorkerOutOfRange { worker: usize, count: usize },
    #[error("task {0} has no assigned worker")]
    Unassigned(String),
    #[error("task {0} has no test command")]
    NoTestCommand(String),
    #[error("task {task} is {status}; expected {expected}")]
    InvalidTaskState {
        task: String,
        status: SwarmTaskStatus,
        expected: &'static str,
    },
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

/// A swarm in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmSession {
    pub task_name: String,
    pub context: SwarmSetupContext,
    pub tasks: Vec<SwarmTask>,
    pub created_at: DateTime<Utc>,
}

/// Result of running a task's test command in its worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub task_id: String,
    pub passed: bool,
    pub timed_out: bool,
    pub interrupted: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SwarmSession {
    pub fn new(task_name: impl Into<String>, context: SwarmSetupContext) -> Self {
        Self {
            task_name: task_name.into(),
            context,
            tasks: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, SessionError> {
        if !path.exists() {
            return Err(SessionError::Missing(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| SessionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SessionError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the session, replacing any previous file in one rename.
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let write_err = |source: io::Error| SessionError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
            if !same_dir(parent, &self.context.project_path) {
                ensure_ignored_dir(parent).map_err(|e| {
                    write_err(io::Error::new(io::ErrorKind::Other, e.to_string()))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(self).map_err(SessionError::Serialize)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json + "\n").map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }

    /// Remove a saved session file if present.
    pub fn discard(path: &Path) -> Result<(), SessionError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Write {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn task(&self, id: &str) -> Option<&SwarmTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut SwarmTask, SessionError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| SessionError::TaskNotFound(id.to_string()))
    }

    /// Add a task and return its id (`t1`, `t2`, ...).
    pub fn add_task(
        &mut self,
        title: &str,
        test_command: Option<&str>,
        depends_on: &[String],
        worker: Option<usize>,
    ) -> Result<String, SessionError> {
        let id = self.next_task_id();
        for dep in depends_on {
            if self.task(dep).is_none() {
                return Err(SessionError::UnknownDependency {
                    task: id,
                    dependency: dep.clone(),
                });
            }
        }
        if let Some(worker) = worker {
            self.check_worker(worker)?;
        }

        let mut task = SwarmTask::new(id.clone(), title.trim());
        task.test_command = test_command
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        task.depends_on = depends_on.to_vec();
        if worker.is_some() {
            task.assigned_worker = worker;
            task.status = SwarmTaskStatus::InProgress;
        }
        self.tasks.push(task);
        Ok(id)
    }

    /// Assign a task to a worker and mark it in progress.
    pub fn assign(&mut self, task_id: &str, worker: usize) -> Result<(), SessionError> {
        self.check_worker(worker)?;
        let task = self.task_mut(task_id)?;
        if !matches!(task.status, SwarmTaskStatus::Pending | SwarmTaskStatus::InProgress) {
            return Err(SessionError::InvalidTaskState {
                task: task_id.to_string(),
                status: task.status,
                expected: "pending or in_progress",
            });
        }
        task.assigned_worker = Some(worker);
        task.status = SwarmTaskStatus::InProgress;
        Ok(())
    }

    /// Mark a task's work as not wanted on the original branch.
    pub fn reject_task(&mut self, task_id: &str) -> Result<(), SessionError> {
        let task = self.task_mut(task_id)?;
        if task.status == SwarmTaskStatus::Rejected {
            return Ok(());
        }
        task.status = SwarmTaskStatus::Rejected;
        Ok(())
    }

    /// Tasks merged to staging and not rejected.
    pub fn accepted_task_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == SwarmTaskStatus::Merged)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Check a task may be merged into staging now.
    pub fn check_mergeable(&self, task_id: &str) -> Result<&SwarmTask, SessionError> {
        let task = self
            .task(task_id)
            .ok_or_else(|| SessionError::TaskNotFound(task_id.to_string()))?;
        if !matches!(
            task.status,
            SwarmTaskStatus::Pending | SwarmTaskStatus::InProgress | SwarmTaskStatus::Failed
        ) {
            return Err(SessionError::InvalidTaskState {
                task: task_id.to_string(),
                status: task.status,
                expected: "pending, in_progress or failed",
            });
        }
        if task.assigned_worker.is_none() {
            return Err(SessionError::Unassigned(task_id.to_string()));
        }
        for dep in &task.depends_on {
            let merged = self
                .task(dep)
                .map(|d| d.status == SwarmTaskStatus::Merged)
                .unwrap_or(false);
            if !merged {
                return Err(SessionError::DependencyNotMerged {
                    task: task_id.to_string(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(task)
    }

    fn check_worker(&self, worker: usize) -> Result<(), SessionError> {
        let count = self.context.worker_count();
        if worker == 0 || worker > count {
            return Err(SessionError::WorkerOutOfRange { worker, count });
        }
        Ok(())
    }

    fn next_task_id(&self) -> String {
        let highest = self
            .tasks
            .iter()
            .filter_map(|t| t.id.strip_prefix('t')?.parse::<usize>().ok())
            .max()
            .unwrap_or(0);
        format!("t{}", highest + 1)
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl<V: Vcs> SwarmHarness<V> {
    /// Run a task's test command inside its worker's worktree.
    ///
    /// A failing or timed-out command marks the task failed. An interrupted
    /// run leaves the status alone.
    pub fn verify_task(
        &self,
        session: &mut SwarmSession,
        task_id: &str,
    ) -> Result<VerifyReport, SessionError> {
        let task = session
            .task(task_id)
            .ok_or_else(|| SessionError::TaskNotFound(task_id.to_string()))?;
        let command = task
            .test_command
            .as_deref()
            .ok_or_else(|| SessionError::NoTestCommand(task_id.to_string()))?;
        let worker = task
            .assigned_worker
            .ok_or_else(|| SessionError::Unassigned(task_id.to_string()))?;
        let (_, path) = session
            .context
            .worker(worker)
            .ok_or(SessionError::WorkerOutOfRange {
                worker,
                count: session.context.worker_count(),
            })?;

        info!(task_id, worker, command, "verifying task");
        let out = self.vcs.shell(path, command, self.settings.command_timeout)?;
        if out.timed_out {
            warn!(task_id, timeout = ?self.settings.command_timeout, "test command timed out");
        }
        if !out.success() && !out.interrupted {
            let task = session.task_mut(task_id)?;
            if task.status != SwarmTaskStatus::Merged {
                task.status = SwarmTaskStatus::Failed;
            }
        }
        Ok(VerifyReport {
            task_id: task_id.to_string(),
            passed: out.success(),
            timed_out: out.timed_out,
            interrupted: out.interrupted,
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    /// Merge a task's worker branch into staging and record the outcome.
    ///
    /// Dependencies must already be merged. A successful merge marks the
    /// task merged with its merge commit; any other result marks it failed
    /// so it can be fixed and merged again.
    pub fn merge_task(
        &self,
        session: &mut SwarmSession,
        task_id: &str,
        message: Option<&str>,
    ) -> Result<MergeResult, SessionError> {
        let task = session.check_mergeable(task_id)?;
        let worker = task
            .assigned_worker
            .ok_or_else(|| SessionError::Unassigned(task_id.to_string()))?;
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Merge task {}: {}", task.id, task.title));
        let (branch, _) = session
            .context
            .worker(worker)
            .ok_or(SessionError::WorkerOutOfRange {
                worker,
                count: session.context.worker_count(),
            })?;

        let result = self.merge_to_staging(
            &session.context.project_path,
            branch,
            &session.context.staging_branch,
            &message,
        );

        let task = session.task_mut(task_id)?;
        if result.success {
            task.status = SwarmTaskStatus::Merged;
            task.merge_commit_sha = result.commit_sha.clone();
            task.staged = true;
        } else {
            task.status = SwarmTaskStatus::Failed;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(project: &Path, workers: usize) -> SwarmSetupContext {
        SwarmSetupContext {
            staging_branch: "swarm/demo-1".to_string(),
            original_branch: "main".to_string(),
            project_path: project.to_path_buf(),
            worker_paths: (1..=workers)
                .map(|i| project.join(format!(".swarm/worktrees/w{i}")))
                .collect(),
            worker_branches: (1..=workers)
                .map(|i| format!("swarm/demo-1-worker-{i}"))
                .collect(),
        }
    }

    #[test]
    fn test_add_task_ids_and_validation() {
        let temp = TempDir::new().expect("temp dir");
        let mut session = SwarmSession::new("demo", context(temp.path(), 2));

        let t1 = session.add_task("Parser", Some("true"), &[], Some(1)).unwrap();
        let t2 = session
            .add_task("Printer", None, &[t1.clone()], None)
            .unwrap();
        assert_eq!((t1.as_str(), t2.as_str()), ("t1", "t2"));
        assert_eq!(session.task("t1").unwrap().status, SwarmTaskStatus::InProgress);
        assert_eq!(session.task("t2").unwrap().status, SwarmTaskStatus::Pending);

        let err = session
            .add_task("Bad", None, &["t9".to_string()], None)
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownDependency { .. }));
        let err = session.add_task("Bad", None, &[], Some(3)).unwrap_err();
        assert!(matches!(err, SessionError::WorkerOutOfRange { worker: 3, count: 2 }));
    }

    #[test]
    fn test_mergeable_requires_merged_dependencies() {
        let temp = TempDir::new().expect("temp dir");
        let mut session = SwarmSession::new("demo", context(temp.path(), 2));
        let t1 = session.add_task("Base", None, &[], Some(1)).unwrap();
        let t2 = session.add_task("Top", None, &[t1.clone()], Some(2)).unwrap();

        let err = session.check_mergeable(&t2).unwrap_err();
        assert!(matches!(err, SessionError::DependencyNotMerged { .. }));

        session.tasks[0].status = SwarmTaskStatus::Merged;
        assert!(session.check_mergeable(&t2).is_ok());
        assert!(matches!(
            session.check_mergeable(&t1),
            Err(SessionError::InvalidTaskState { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join(".swarm").join("session.json");
        let mut session = SwarmSession::new("demo", context(temp.path(), 1));
        session.add_task("Parser", Some("cargo test"), &[], Some(1)).unwrap();

        session.save(&path).unwrap();
        assert!(temp.path().join(".swarm/.gitignore").exists());

        let loaded = SwarmSession::load(&path).unwrap();
        assert_eq!(loaded, session);

        SwarmSession::discard(&path).unwrap();
        assert!(matches!(SwarmSession::load(&path), Err(SessionError::Missing(_))));
    }

    #[test]
    fn test_accepted_excludes_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let mut session = SwarmSession::new("demo", context(temp.path(), 1));
        for title in ["a", "b", "c"] {
            session.add_task(title, None, &[], Some(1)).unwrap();
        }
        for task in &mut session.tasks {
            task.status = SwarmTaskStatus::Merged;
        }
        session.reject_task("t2").unwrap();
        assert_eq!(session.accepted_task_ids(), vec!["t1", "t3"]);
    }
}
