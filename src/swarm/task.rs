use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmTaskStatus {
    Pending,
    InProgress,
    Merged,
    Rejected,
    Failed,
}

impl SwarmTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Merged => "merged",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SwarmTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work assigned to one swarm worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub test_command: Option<String>,
    pub status: SwarmTaskStatus,
    /// 1-based worker index.
    #[serde(default)]
    pub assigned_worker: Option<usize>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Merge commit on the staging branch; needed for selective merge.
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    /// Set once a merge into staging succeeds; survives rejection.
    #[serde(default)]
    pub staged: bool,
}

impl SwarmTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            test_command: None,
            status: SwarmTaskStatus::Pending,
            assigned_worker: None,
            depends_on: Vec::new(),
            merge_commit_sha: None,
            staged: false,
        }
    }

    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = Some(command.into());
        self
    }

    pub fn merged(mut self, sha: Option<&str>) -> Self {
        self.status = SwarmTaskStatus::Merged;
        self.merge_commit_sha = sha.map(str::to_string);
        self.staged = true;
        self
    }

    /// Whether this task was ever merged into staging, whatever its
    /// status is now.
    pub fn in_staging(&self) -> bool {
        self.staged || self.status == SwarmTaskStatus::Merged || self.merge_commit_sha.is_some()
    }
}
