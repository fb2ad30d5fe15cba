use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentDescriptor;

/// What a phase is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Exploration,
    Planning,
    Implementation,
    Review,
    Testing,
    Documentation,
    Custom,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploration => "exploration",
            Self::Planning => "planning",
            Self::Implementation => "implementation",
            Self::Review => "review",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Custom => "custom",
        }
    }
}

/// Phase status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    AwaitingApproval,
    ApprovalTimeout,
    Approved,
    Rejected,
    Completed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::ApprovalTimeout => "approval_timeout",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        }
    }

    /// Check if a human decision may be applied (approve or reject).
    pub fn is_decidable(&self) -> bool {
        matches!(self, Self::AwaitingApproval | Self::ApprovalTimeout)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input used to build a phase: its metadata plus the agents it will spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSpec {
    pub kind: PhaseKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires_approval: bool,
    pub agents: Vec<AgentDescriptor>,
}

impl PhaseSpec {
    pub fn new(kind: PhaseKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: String::new(),
            requires_approval: false,
            agents: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn gated(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn agent(mut self, descriptor: AgentDescriptor) -> Self {
        self.agents.push(descriptor);
        self
    }
}

/// A named stage of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub id: String,
    pub kind: PhaseKind,
    pub name: String,
    pub description: String,
    /// Agents of the current attempt, in spawn order.
    pub agent_ids: Vec<String>,
    pub status: PhaseStatus,
    pub requires_approval: bool,
    /// Synthesized from agent outputs once every agent completed.
    pub output: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Reason given on the last rejection; fed into the retry.
    pub rejection_reason: Option<String>,
    /// Number of times agents were spawned for this phase.
    pub attempts: u32,
    /// Agents of earlier attempts, kept for history.
    pub previous_agent_ids: Vec<String>,
    /// When the phase entered `awaiting_approval`.
    pub awaiting_since: Option<DateTime<Utc>>,
    /// Agents to spawn for each attempt.
    pub agent_plan: Vec<AgentDescriptor>,
}

impl Phase {
    pub fn from_spec(spec: PhaseSpec) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: spec.kind,
            name: spec.name,
            description: spec.description,
            agent_ids: Vec::new(),
            status: PhaseStatus::Pending,
            requires_approval: spec.requires_approval,
            output: None,
            completed_at: None,
            rejection_reason: None,
            attempts: 0,
            previous_agent_ids: Vec::new(),
            awaiting_since: None,
            agent_plan: spec.agents,
        }
    }
}

/// One end-to-end run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: WorkflowStatus,
    pub phases: Vec<Phase>,
    pub current_phase_index: usize,
    pub created_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

impl Workflow {
    /// Build an idle workflow from phase specs.
    pub fn new(name: impl Into<String>, description: impl Into<String>, phases: Vec<PhaseSpec>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            status: WorkflowStatus::Idle,
            phases: phases.into_iter().map(Phase::from_spec).collect(),
            current_phase_index: 0,
            created_at: Utc::now(),
            failure_reason: None,
        }
    }

    pub fn current_phase(&self) -> Option<&Phase> {
        self.phases.get(self.current_phase_index)
    }

    pub fn current_phase_mut(&mut self) -> Option<&mut Phase> {
        self.phases.get_mut(self.current_phase_index)
    }

    pub fn phase(&self, phase_id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkflowStatus::Running
    }

    /// Every agent id the workflow ever spawned, current attempts first.
    pub fn all_agent_ids(&self) -> Vec<String> {
        self.phases
            .iter()
            .flat_map(|p| p.agent_ids.iter().chain(p.previous_agent_ids.iter()))
            .cloned()
            .collect()
    }

    /// Phases completed so far.
    pub fn completed_phases(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed)
            .count()
    }
}
