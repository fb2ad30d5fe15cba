//! Decision queue.
//!
//! A pure derivation over the agents, the active workflow and the external
//! per-thread approval lists. Nothing here mutates its inputs; callers act on
//! a decision through the registry, the workflow machine or the approval
//! store, then recompute.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentStatus};
use crate::workflow::{PhaseStatus, Workflow};

/// What a pending approval asks permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    FileChange,
    Command,
}

/// One entry of the external approval store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub item_id: String,
    #[serde(rename = "type")]
    pub approval_type: ApprovalKind,
    pub data: serde_json::Value,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
}

/// Read access to pending approvals keyed by thread id.
pub trait ApprovalSource {
    fn pending_for(&self, thread_id: &str) -> &[PendingApproval];
}

impl ApprovalSource for HashMap<String, Vec<PendingApproval>> {
    fn pending_for(&self, thread_id: &str) -> &[PendingApproval] {
        self.get(thread_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Kind of decision. Declaration order is also priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    SafetyApproval,
    PhaseApproval,
    TimeoutRecovery,
    ErrorRecovery,
}

impl DecisionType {
    /// Higher sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::SafetyApproval => 4,
            Self::PhaseApproval => 3,
            Self::TimeoutRecovery => 2,
            Self::ErrorRecovery => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SafetyApproval => "safety_approval",
            Self::PhaseApproval => "phase_approval",
            Self::TimeoutRecovery => "timeout_recovery",
            Self::ErrorRecovery => "error_recovery",
        }
    }

    /// Safety and phase approvals block progress until answered.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::SafetyApproval | Self::PhaseApproval)
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the user may do about a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
    Review,
    Recover,
    Retry,
    Dismiss,
}

/// What a decision refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionSubject {
    Agent { agent_id: String, thread_id: String },
    Phase { workflow_id: String, phase_id: String },
}

/// One human-actionable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDecision {
    /// Stable across recomputations while the underlying condition holds.
    pub id: String,
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub priority: u8,
    pub label: String,
    pub description: String,
    pub subject: DecisionSubject,
    pub actions: Vec<DecisionAction>,
}

/// Number of decisions per type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCounts {
    pub safety_approval: usize,
    pub phase_approval: usize,
    pub timeout_recovery: usize,
    pub error_recovery: usize,
}

impl DecisionCounts {
    pub fn total(&self) -> usize {
        self.safety_approval + self.phase_approval + self.timeout_recovery + self.error_recovery
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionQueueState {
    pub decisions: Vec<PendingDecision>,
    pub counts: DecisionCounts,
    pub has_critical_decisions: bool,
}

impl DecisionQueueState {
    /// The decision to show first, if any.
    pub fn primary_decision(&self) -> Option<&PendingDecision> {
        self.decisions.first()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

/// Derive the ordered list of pending decisions.
///
/// `agents` should be in registry insertion order; that order is kept among
/// decisions of equal priority.
pub fn compute<'a, A>(
    agents: impl IntoIterator<Item = &'a Agent>,
    workflow: Option<&Workflow>,
    approvals: &A,
) -> DecisionQueueState
where
    A: ApprovalSource + ?Sized,
{
    let agents: Vec<&Agent> = agents.into_iter().collect();
    let mut decisions = Vec::new();

    for agent in &agents {
        let pending = approvals.pending_for(&agent.thread_id);
        if pending.is_empty() {
            continue;
        }
        decisions.push(safety_decision(agent, pending));
    }

    if let Some(workflow) = workflow.filter(|w| w.is_running()) {
        if let Some(phase) = workflow.current_phase() {
            let subject = DecisionSubject::Phase {
                workflow_id: workflow.id.clone(),
                phase_id: phase.id.clone(),
            };
            match phase.status {
                PhaseStatus::AwaitingApproval => decisions.push(PendingDecision {
                    id: format!("phase:{}", phase.id),
                    decision_type: DecisionType::PhaseApproval,
                    priority: DecisionType::PhaseApproval.priority(),
                    label: format!("Approve phase \"{}\"", phase.name),
                    description: format!(
                        "All {} agent(s) in phase {} of {} finished",
                        phase.agent_ids.len(),
                        workflow.current_phase_index + 1,
                        workflow.phases.len()
                    ),
                    subject,
                    actions: vec![
                        DecisionAction::Approve,
                        DecisionAction::Reject,
                        DecisionAction::Review,
                    ],
                }),
                PhaseStatus::ApprovalTimeout => decisions.push(PendingDecision {
                    id: format!("timeout:{}", phase.id),
                    decision_type: DecisionType::TimeoutRecovery,
                    priority: DecisionType::TimeoutRecovery.priority(),
                    label: format!("Approval for \"{}\" timed out", phase.name),
                    description: "The approval window elapsed without a response".to_string(),
                    subject,
                    actions: vec![
                        DecisionAction::Recover,
                        DecisionAction::Approve,
                        DecisionAction::Reject,
                    ],
                }),
                _ => {}
            }
        }
    }

    for agent in &agents {
        if agent.status != AgentStatus::Error {
            continue;
        }
        let Some(error) = agent.error.as_ref().filter(|e| e.recoverable) else {
            continue;
        };
        decisions.push(PendingDecision {
            id: format!("error:{}", agent.id),
            decision_type: DecisionType::ErrorRecovery,
            priority: DecisionType::ErrorRecovery.priority(),
            label: format!("{} agent failed", agent.agent_type),
            description: error.message.clone(),
            subject: DecisionSubject::Agent {
                agent_id: agent.id.clone(),
                thread_id: agent.thread_id.clone(),
            },
            actions: vec![DecisionAction::Retry, DecisionAction::Dismiss],
        });
    }

    // Stable: emission order survives within a priority.
    decisions.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut counts = DecisionCounts::default();
    for decision in &decisions {
        match decision.decision_type {
            DecisionType::SafetyApproval => counts.safety_approval += 1,
            DecisionType::PhaseApproval => counts.phase_approval += 1,
            DecisionType::TimeoutRecovery => counts.timeout_recovery += 1,
            DecisionType::ErrorRecovery => counts.error_recovery += 1,
        }
    }
    let has_critical_decisions = decisions.iter().any(|d| d.decision_type.is_critical());

    DecisionQueueState {
        decisions,
        counts,
        has_critical_decisions,
    }
}

fn safety_decision(agent: &Agent, pending: &[PendingApproval]) -> PendingDecision {
    let files = pending
        .iter()
        .filter(|p| p.approval_type == ApprovalKind::FileChange)
        .count();
    let commands = pending.len() - files;
    let mut parts = Vec::new();
    if files > 0 {
        parts.push(plural(files, "file change"));
    }
    if commands > 0 {
        parts.push(plural(commands, "command"));
    }

    PendingDecision {
        id: format!("safety:{}", agent.id),
        decision_type: DecisionType::SafetyApproval,
        priority: DecisionType::SafetyApproval.priority(),
        label: format!("{} agent needs approval", agent.agent_type),
        description: format!("{} awaiting approval", parts.join(" and ")),
        subject: DecisionSubject::Agent {
            agent_id: agent.id.clone(),
            thread_id: agent.thread_id.clone(),
        },
        actions: vec![
            DecisionAction::Approve,
            DecisionAction::Reject,
            DecisionAction::Review,
        ],
    }
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentDescriptor, AgentError, AgentType};
    use crate::registry::AgentRegistry;
    use crate::workflow::{PhaseKind, PhaseSpec, WorkflowMachine};

    fn approval(kind: ApprovalKind, n: u32) -> PendingApproval {
        PendingApproval {
            item_id: format!("item-{n}"),
            approval_type: kind,
            data: serde_json::json!({ "path": "src/lib.rs" }),
            request_id: format!("req-{n}"),
            created_at: Utc::now(),
        }
    }

    fn gated_machine(registry: &mut AgentRegistry) -> WorkflowMachine {
        let mut machine = WorkflowMachine::new();
        let phases = vec![PhaseSpec::new(PhaseKind::Review, "Review")
            .gated()
            .agent(AgentDescriptor::new(AgentType::Reviewer, "review"))];
        machine.start(registry, "wf", "", phases, false).unwrap();
        let id = machine.workflow().unwrap().phases[0].agent_ids[0].clone();
        registry
            .update_status(&id, AgentStatus::Completed, None)
            .unwrap();
        machine.evaluate(registry).unwrap();
        machine
    }

    #[test]
    fn test_empty_inputs_yield_empty_queue() {
        let approvals: HashMap<String, Vec<PendingApproval>> = HashMap::new();
        let state = compute(std::iter::empty(), None, &approvals);
        assert!(state.is_empty());
        assert!(state.primary_decision().is_none());
        assert!(!state.has_critical_decisions);
    }

    #[test]
    fn test_safety_decision_summarizes_counts() {
        let mut registry = AgentRegistry::new();
        let id = registry
            .spawn(AgentDescriptor::new(AgentType::Coder, "x").with_thread("t1"))
            .unwrap();
        let mut approvals = HashMap::new();
        approvals.insert(
            "t1".to_string(),
            vec![
                approval(ApprovalKind::FileChange, 1),
                approval(ApprovalKind::FileChange, 2),
                approval(ApprovalKind::Command, 3),
            ],
        );

        let state = compute(registry.all(), None, &approvals);
        assert_eq!(state.decisions.len(), 1);
        let decision = &state.decisions[0];
        assert_eq!(decision.id, format!("safety:{id}"));
        assert_eq!(decision.description, "2 file changes and 1 command awaiting approval");
        assert!(state.has_critical_decisions);
    }

    #[test]
    fn test_priority_order_and_counts() {
        let mut registry = AgentRegistry::new();
        let failing = registry
            .spawn(AgentDescriptor::new(AgentType::Tester, "t"))
            .unwrap();
        registry
            .update_status(
                &failing,
                AgentStatus::Error,
                Some(AgentError::recoverable("flaky network")),
            )
            .unwrap();
        let fatal = registry
            .spawn(AgentDescriptor::new(AgentType::Tester, "t2"))
            .unwrap();
        registry
            .update_status(&fatal, AgentStatus::Error, Some(AgentError::fatal("boom")))
            .unwrap();
        registry
            .spawn(AgentDescriptor::new(AgentType::Coder, "c").with_thread("coder-thread"))
            .unwrap();
        let machine = gated_machine(&mut registry);

        let mut approvals = HashMap::new();
        approvals.insert(
            "coder-thread".to_string(),
            vec![approval(ApprovalKind::Command, 1)],
        );

        let state = compute(registry.all(), machine.workflow(), &approvals);
        let types: Vec<DecisionType> = state.decisions.iter().map(|d| d.decision_type).collect();
        assert_eq!(
            types,
            vec![
                DecisionType::SafetyApproval,
                DecisionType::PhaseApproval,
                DecisionType::ErrorRecovery,
            ]
        );
        assert_eq!(state.counts.total(), 3);
        assert_eq!(state.counts.error_recovery, 1);
        assert_eq!(state.decisions[2].description, "flaky network");
        assert_eq!(
            state.primary_decision().unwrap().decision_type,
            DecisionType::SafetyApproval
        );
    }

    #[test]
    fn test_timeout_replaces_phase_approval() {
        let mut registry = AgentRegistry::new();
        let mut machine = gated_machine(&mut registry);
        let phase_id = machine.workflow().unwrap().phases[0].id.clone();
        machine.mark_approval_timeout(&phase_id).unwrap();

        let approvals: HashMap<String, Vec<PendingApproval>> = HashMap::new();
        let state = compute(registry.all(), machine.workflow(), &approvals);
        assert_eq!(state.decisions.len(), 1);
        assert_eq!(state.decisions[0].id, format!("timeout:{phase_id}"));
        assert_eq!(state.counts.phase_approval, 0);
        assert!(!state.has_critical_decisions);
        assert!(state.decisions[0].actions.contains(&DecisionAction::Recover));
    }

    #[test]
    fn test_compute_is_deterministic() {
        let mut registry = AgentRegistry::new();
        for n in 0..4 {
            let id = registry
                .spawn(AgentDescriptor::new(AgentType::Coder, format!("task {n}")))
                .unwrap();
            registry
                .update_status(
                    &id,
                    AgentStatus::Error,
                    Some(AgentError::recoverable(format!("err {n}"))),
                )
                .unwrap();
        }
        let machine = gated_machine(&mut registry);
        let approvals: HashMap<String, Vec<PendingApproval>> = HashMap::new();

        let first = compute(registry.all(), machine.workflow(), &approvals);
        let second = compute(registry.all(), machine.workflow(), &approvals);
        assert_eq!(first, second);

        let errors: Vec<&str> = first
            .decisions
            .iter()
            .filter(|d| d.decision_type == DecisionType::ErrorRecovery)
            .map(|d| d.description.as_str())
            .collect();
        assert_eq!(errors, vec!["err 0", "err 1", "err 2", "err 3"]);
    }
}
