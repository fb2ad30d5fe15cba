//! Agent model: types, statuses and the descriptors used to spawn agents.
//!
//! An agent is one autonomous unit of work. Its execution happens elsewhere;
//! this module only describes the state the engine keeps about it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed set of agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    Explorer,
    Planner,
    Coder,
    ShellRunner,
    Tester,
    Reviewer,
    Documenter,
}

impl AgentType {
    /// All agent types in declaration order.
    pub const ALL: [AgentType; 7] = [
        AgentType::Explorer,
        AgentType::Planner,
        AgentType::Coder,
        AgentType::ShellRunner,
        AgentType::Tester,
        AgentType::Reviewer,
        AgentType::Documenter,
    ];

    /// Parse an agent type from its kebab-case name.
    ///
    /// # Examples
    /// ```
    /// use swarmflow::agent::AgentType;
    /// assert_eq!(AgentType::parse("shell-runner"), Some(AgentType::ShellRunner));
    /// assert_eq!(AgentType::parse("Coder"), Some(AgentType::Coder));
    /// assert_eq!(AgentType::parse("pilot"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "explorer" => Some(Self::Explorer),
            "planner" => Some(Self::Planner),
            "coder" => Some(Self::Coder),
            "shell-runner" | "shell_runner" => Some(Self::ShellRunner),
            "tester" => Some(Self::Tester),
            "reviewer" => Some(Self::Reviewer),
            "documenter" => Some(Self::Documenter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explorer => "explorer",
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::ShellRunner => "shell-runner",
            Self::Tester => "tester",
            Self::Reviewer => "reviewer",
            Self::Documenter => "documenter",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent lifecycle status.
///
/// `Completed` and `Cancelled` are terminal. `Error` is not: a recoverable
/// error may be retried by moving the agent back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl AgentStatus {
    pub const ALL: [AgentStatus; 5] = [
        AgentStatus::Pending,
        AgentStatus::Running,
        AgentStatus::Completed,
        AgentStatus::Error,
        AgentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Rank used by the sorted view: running first, cancelled last.
    pub fn sort_rank(&self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Pending => 1,
            Self::Error => 2,
            Self::Completed => 3,
            Self::Cancelled => 4,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress reported by the execution channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProgress {
    pub current: u32,
    pub total: u32,
    pub description: String,
}

impl AgentProgress {
    pub fn new(current: u32, total: u32, description: impl Into<String>) -> Self {
        Self {
            current,
            total,
            description: description.into(),
        }
    }

    /// Completion ratio in `[0.0, 1.0]`; zero when `total` is zero.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current.min(self.total) as f64) / (self.total as f64)
        }
    }
}

/// Error carried by an agent in `Error` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentError {
    pub message: String,
    pub recoverable: bool,
}

impl AgentError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }
}

/// One registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub task: String,
    /// Conversation channel the agent speaks through. Owned externally.
    pub thread_id: String,
    /// Agents that must be `Completed` before this one may run.
    pub dependencies: Vec<String>,
    pub progress: Option<AgentProgress>,
    pub error: Option<AgentError>,
    /// Final output reported on completion.
    pub output: Option<String>,
    /// Set while paused; the execution channel must hold the agent.
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Check if this agent is in `Error` with a recoverable error.
    pub fn has_recoverable_error(&self) -> bool {
        self.status == AgentStatus::Error
            && self.error.as_ref().map(|e| e.recoverable).unwrap_or(false)
    }
}

/// What a caller supplies to spawn an agent.
///
/// `id` is optional; when omitted the registry assigns a fresh UUID. Inside a
/// workflow phase plan the id acts as a local key that sibling descriptors can
/// list in `dependencies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub task: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(agent_type: AgentType, task: impl Into<String>) -> Self {
        Self {
            id: None,
            agent_type,
            task: task.into(),
            thread_id: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_round_trips_through_name() {
        for agent_type in AgentType::ALL {
            assert_eq!(AgentType::parse(agent_type.as_str()), Some(agent_type));
        }
    }

    #[test]
    fn test_agent_type_serializes_kebab_case() {
        let json = serde_json::to_string(&AgentType::ShellRunner).unwrap();
        assert_eq!(json, "\"shell-runner\"");
    }

    #[test]
    fn test_status_terminal() {
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Cancelled.is_terminal());
        assert!(!AgentStatus::Error.is_terminal());
        assert!(!AgentStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_sort_rank_order() {
        let mut statuses = AgentStatus::ALL.to_vec();
        statuses.sort_by_key(|s| s.sort_rank());
        assert_eq!(
            statuses,
            vec![
                AgentStatus::Running,
                AgentStatus::Pending,
                AgentStatus::Error,
                AgentStatus::Completed,
                AgentStatus::Cancelled,
            ]
        );
    }

    #[test]
    fn test_progress_ratio() {
        assert_eq!(AgentProgress::new(1, 4, "reading").ratio(), 0.25);
        assert_eq!(AgentProgress::new(3, 0, "unknown").ratio(), 0.0);
        assert_eq!(AgentProgress::new(9, 4, "overshoot").ratio(), 1.0);
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = AgentDescriptor::new(AgentType::Coder, "Implement parser")
            .with_id("coder-1")
            .with_thread("thread-9")
            .depends_on("planner-1");
        assert_eq!(desc.id.as_deref(), Some("coder-1"));
        assert_eq!(desc.thread_id.as_deref(), Some("thread-9"));
        assert_eq!(desc.dependencies, vec!["planner-1".to_string()]);
    }
}
