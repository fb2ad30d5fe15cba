use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::model::{Phase, PhaseSpec, PhaseStatus, Workflow, WorkflowStatus};
use crate::agent::{AgentDescriptor, AgentStatus};
use crate::registry::{AgentRegistry, RegistryError};

/// Errors raised by workflow operations.
///
/// Every variant except `Registry` is a precondition the caller violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("workflow {id} is still running; cancel it or confirm replacement first")]
    AlreadyRunning { id: String },
    #[error("a workflow needs at least one phase")]
    NoPhases,
    #[error("no active workflow")]
    NoWorkflow,
    #[error("workflow is {0}, not running")]
    NotRunning(WorkflowStatus),
    #[error("phase not found: {0}")]
    PhaseNotFound(String),
    #[error("phase {phase_id} is not the current phase ({current})")]
    NotCurrentPhase { phase_id: String, current: String },
    #[error("thread {thread_id} is planned for both {first} and {second}")]
    SharedThread {
        thread_id: String,
        first: String,
        second: String,
    },
    #[error("phase {phase_id} is {status}; expected {expected}")]
    InvalidPhaseState {
        phase_id: String,
        status: PhaseStatus,
        expected: &'static str,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Something the state machine did on its own while evaluating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Agents for a phase were spawned.
    Started { phase_id: String, agent_ids: Vec<String> },
    /// Every agent completed and the phase waits for a human.
    AwaitingApproval { phase_id: String },
    /// Every agent completed and the phase needed no approval.
    AutoCompleted { phase_id: String },
    /// The last phase completed.
    WorkflowCompleted { workflow_id: String },
}

/// Drives the single active workflow.
///
/// The machine never owns agents; it spawns and cancels them through the
/// registry passed to each call, so both must sit behind the same lock.
#[derive(Debug, Default)]
pub struct WorkflowMachine {
    workflow: Option<Workflow>,
}

impl WorkflowMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active (or most recently finished) workflow.
    pub fn workflow(&self) -> Option<&Workflow> {
        self.workflow.as_ref()
    }

    /// Start a workflow and spawn its first phase.
    ///
    /// Fails with [`WorkflowError::AlreadyRunning`] while another workflow is
    /// running unless `replace_running` is set, in which case the old
    /// workflow is cancelled together with its live agents.
    pub fn start(
        &mut self,
        registry: &mut AgentRegistry,
        name: &str,
        description: &str,
        phases: Vec<PhaseSpec>,
        replace_running: bool,
    ) -> Result<Vec<PhaseEvent>, WorkflowError> {
        if phases.is_empty() {
            return Err(WorkflowError::NoPhases);
        }
        if let Some(current) = self.workflow.as_ref().filter(|w| w.is_running()) {
            if !replace_running {
                return Err(WorkflowError::AlreadyRunning {
                    id: current.id.clone(),
                });
            }
        }

        validate_plans(&phases, registry)?;

        let mut workflow = Workflow::new(name, description, phases);
        workflow.status = WorkflowStatus::Running;

        let mut events = Vec::new();
        let phase = workflow
            .current_phase_mut()
            .ok_or(WorkflowError::NoPhases)?;
        events.push(spawn_phase(registry, phase)?);

        if let Some(mut old) = self.workflow.take().filter(|w| w.is_running()) {
            let cancelled = registry.cancel_all(old.all_agent_ids().iter());
            old.status = WorkflowStatus::Cancelled;
            warn!(
                workflow_id = %old.id,
                cancelled_agents = cancelled,
                "running workflow replaced"
            );
        }

        info!(
            workflow_id = %workflow.id,
            phases = workflow.phases.len(),
            "workflow started"
        );
        self.workflow = Some(workflow);
        events.extend(self.evaluate(registry)?);
        Ok(events)
    }

    /// Re-check the current phase against agent statuses.
    ///
    /// Called after every agent update. Moves a finished phase to
    /// `awaiting_approval`, or completes it and advances when it needs no
    /// approval, repeating for as many phases as finish immediately.
    pub fn evaluate(&mut self, registry: &mut AgentRegistry) -> Result<Vec<PhaseEvent>, WorkflowError> {
        let mut events = Vec::new();

        loop {
            let Some(workflow) = self.workflow.as_mut().filter(|w| w.is_running()) else {
                break;
            };
            let Some(phase) = workflow.current_phase_mut() else {
                break;
            };
            if phase.status != PhaseStatus::Running {
                break;
            }
            let all_completed = phase.agent_ids.iter().all(|id| {
                registry
                    .get(id)
                    .map(|a| a.status == AgentStatus::Completed)
                    .unwrap_or(false)
            });
            if !all_completed {
                break;
            }

            let before = phase.clone();
            phase.output = Some(synthesize_output(phase, registry));
            if phase.requires_approval {
                phase.status = PhaseStatus::AwaitingApproval;
                phase.awaiting_since = Some(Utc::now());
                info!(phase_id = %phase.id, phase = %phase.name, "phase awaiting approval");
                events.push(PhaseEvent::AwaitingApproval {
                    phase_id: phase.id.clone(),
                });
                break;
            }

            phase.status = PhaseStatus::Completed;
            phase.completed_at = Some(Utc::now());
            let phase_id = phase.id.clone();
            let next = self.advance_or_restore(registry, before)?;
            info!(phase_id = %phase_id, "phase completed");
            events.push(PhaseEvent::AutoCompleted { phase_id });
            events.extend(next);
        }

        Ok(events)
    }

    /// Approve the current phase and move on.
    pub fn approve_phase(
        &mut self,
        registry: &mut AgentRegistry,
        phase_id: &str,
    ) -> Result<Vec<PhaseEvent>, WorkflowError> {
        let phase = self.decidable_phase(phase_id)?;
        let before = phase.clone();
        phase.status = PhaseStatus::Completed;
        phase.completed_at = Some(Utc::now());
        phase.awaiting_since = None;

        let mut events = self.advance_or_restore(registry, before)?;
        info!(phase_id, "phase approved");
        events.extend(self.evaluate(registry)?);
        Ok(events)
    }

    /// Reject the current phase. The index does not move; the reason is kept
    /// for the next attempt.
    pub fn reject_phase(&mut self, phase_id: &str, reason: Option<&str>) -> Result<(), WorkflowError> {
        let phase = self.decidable_phase(phase_id)?;
        phase.status = PhaseStatus::Rejected;
        phase.awaiting_since = None;
        phase.rejection_reason = reason.map(str::to_string);
        info!(
            phase_id = %phase.id,
            phase = %phase.name,
            reason = reason.unwrap_or(""),
            "phase rejected"
        );
        Ok(())
    }

    /// Spawn a fresh attempt for a rejected or timed-out phase.
    ///
    /// Live agents of the previous attempt are cancelled. The rejection reason
    /// is appended to every task of the new attempt.
    pub fn retry_phase(
        &mut self,
        registry: &mut AgentRegistry,
        phase_id: &str,
    ) -> Result<Vec<PhaseEvent>, WorkflowError> {
        let phase = self.current_phase_checked(phase_id)?;
        if !matches!(
            phase.status,
            PhaseStatus::Rejected | PhaseStatus::ApprovalTimeout | PhaseStatus::Pending
        ) {
            return Err(WorkflowError::InvalidPhaseState {
                phase_id: phase_id.to_string(),
                status: phase.status,
                expected: "rejected, approval_timeout or pending",
            });
        }

        registry.cancel_all(phase.agent_ids.iter());
        let previous = std::mem::take(&mut phase.agent_ids);
        phase.previous_agent_ids.extend(previous);
        phase.status = PhaseStatus::Pending;
        phase.output = None;
        phase.awaiting_since = None;

        let mut events = vec![spawn_phase(registry, phase)?];
        events.extend(self.evaluate(registry)?);
        Ok(events)
    }

    /// Mark the current phase's approval window as elapsed.
    pub fn mark_approval_timeout(&mut self, phase_id: &str) -> Result<(), WorkflowError> {
        let phase = self.current_phase_checked(phase_id)?;
        if phase.status != PhaseStatus::AwaitingApproval {
            return Err(WorkflowError::InvalidPhaseState {
                phase_id: phase_id.to_string(),
                status: phase.status,
                expected: "awaiting_approval",
            });
        }
        phase.status = PhaseStatus::ApprovalTimeout;
        warn!(phase_id = %phase.id, phase = %phase.name, "phase approval timed out");
        Ok(())
    }

    /// Reopen the approval window of a timed-out phase.
    pub fn recover_phase(&mut self, phase_id: &str) -> Result<(), WorkflowError> {
        let phase = self.current_phase_checked(phase_id)?;
        if phase.status != PhaseStatus::ApprovalTimeout {
            return Err(WorkflowError::InvalidPhaseState {
                phase_id: phase_id.to_string(),
                status: phase.status,
                expected: "approval_timeout",
            });
        }
        phase.status = PhaseStatus::AwaitingApproval;
        phase.awaiting_since = Some(Utc::now());
        info!(phase_id = %phase.id, phase = %phase.name, "phase approval window reopened");
        Ok(())
    }

    /// When the current phase's approval window closes, if it is open.
    pub fn approval_deadline(&self, timeout: Duration) -> Option<DateTime<Utc>> {
        let phase = self.workflow.as_ref()?.current_phase()?;
        if phase.status != PhaseStatus::AwaitingApproval {
            return None;
        }
        let timeout = chrono::Duration::from_std(timeout).ok()?;
        phase.awaiting_since.map(|since| since + timeout)
    }

    /// Time out the current phase if its approval window closed before `now`.
    /// Returns the phase id when it did.
    pub fn expire_overdue(&mut self, now: DateTime<Utc>, timeout: Duration) -> Option<String> {
        let deadline = self.approval_deadline(timeout)?;
        if now < deadline {
            return None;
        }
        let phase_id = self.workflow.as_ref()?.current_phase()?.id.clone();
        self.mark_approval_timeout(&phase_id).ok()?;
        Some(phase_id)
    }

    /// End the running workflow as failed and cancel its live agents.
    pub fn fail(&mut self, registry: &mut AgentRegistry, reason: &str) -> Result<(), WorkflowError> {
        let workflow = self.running_mut()?;
        let ids = workflow.all_agent_ids();
        workflow.status = WorkflowStatus::Failed;
        workflow.failure_reason = Some(reason.to_string());
        let cancelled = registry.cancel_all(ids.iter());
        warn!(workflow_id = %workflow.id, reason, cancelled_agents = cancelled, "workflow failed");
        Ok(())
    }

    /// Cancel the running workflow and its live agents.
    pub fn cancel(&mut self, registry: &mut AgentRegistry) -> Result<(), WorkflowError> {
        let workflow = self.running_mut()?;
        let ids = workflow.all_agent_ids();
        workflow.status = WorkflowStatus::Cancelled;
        let cancelled = registry.cancel_all(ids.iter());
        info!(workflow_id = %workflow.id, cancelled_agents = cancelled, "workflow cancelled");
        Ok(())
    }

    /// The phase (any attempt) that spawned an agent.
    pub fn phase_of_agent(&self, agent_id: &str) -> Option<&Phase> {
        self.workflow.as_ref()?.phases.iter().find(|p| {
            p.agent_ids.iter().any(|id| id == agent_id)
                || p.previous_agent_ids.iter().any(|id| id == agent_id)
        })
    }

    /// Spawn the next phase or finish the workflow. The index moves only
    /// once the next phase's agents exist.
    fn advance(&mut self, registry: &mut AgentRegistry) -> Result<Vec<PhaseEvent>, WorkflowError> {
        let workflow = self.running_mut()?;
        let next = workflow.current_phase_index + 1;
        if next >= workflow.phases.len() {
            workflow.status = WorkflowStatus::Completed;
            info!(workflow_id = %workflow.id, "workflow completed");
            return Ok(vec![PhaseEvent::WorkflowCompleted {
                workflow_id: workflow.id.clone(),
            }]);
        }

        let phase = workflow
            .phases
            .get_mut(next)
            .ok_or(WorkflowError::NoWorkflow)?;
        let started = spawn_phase(registry, phase)?;
        workflow.current_phase_index = next;
        Ok(vec![started])
    }

    /// Advance past the current phase, putting it back to `before` if the
    /// next phase cannot be spawned.
    fn advance_or_restore(
        &mut self,
        registry: &mut AgentRegistry,
        before: Phase,
    ) -> Result<Vec<PhaseEvent>, WorkflowError> {
        match self.advance(registry) {
            Ok(events) => Ok(events),
            Err(e) => {
                if let Some(phase) = self.workflow.as_mut().and_then(Workflow::current_phase_mut) {
                    warn!(phase_id = %phase.id, error = %e, "could not start next phase; phase left as it was");
                    *phase = before;
                }
                Err(e)
            }
        }
    }

    fn running_mut(&mut self) -> Result<&mut Workflow, WorkflowError> {
        let workflow = self.workflow.as_mut().ok_or(WorkflowError::NoWorkflow)?;
        if !workflow.is_running() {
            return Err(WorkflowError::NotRunning(workflow.status));
        }
        Ok(workflow)
    }

    fn current_phase_checked(&mut self, phase_id: &str) -> Result<&mut Phase, WorkflowError> {
        let workflow = self.running_mut()?;
        if workflow.phase(phase_id).is_none() {
            return Err(WorkflowError::PhaseNotFound(phase_id.to_string()));
        }
        let phase = workflow
            .current_phase_mut()
            .ok_or(WorkflowError::NoWorkflow)?;
        if phase.id != phase_id {
            return Err(WorkflowError::NotCurrentPhase {
                phase_id: phase_id.to_string(),
                current: phase.id.clone(),
            });
        }
        Ok(phase)
    }

    fn decidable_phase(&mut self, phase_id: &str) -> Result<&mut Phase, WorkflowError> {
        let phase = self.current_phase_checked(phase_id)?;
        if !phase.status.is_decidable() {
            return Err(WorkflowError::InvalidPhaseState {
                phase_id: phase_id.to_string(),
                status: phase.status,
                expected: "awaiting_approval or approval_timeout",
            });
        }
        Ok(phase)
    }
}

/// Spawn the agents for one attempt of a phase and mark it running.
fn spawn_phase(registry: &mut AgentRegistry, phase: &mut Phase) -> Result<PhaseEvent, WorkflowError> {
    let descriptors = instantiate_plan(
        &phase.agent_plan,
        phase.rejection_reason.as_deref(),
        phase.attempts > 0,
    );
    let agent_ids = registry.spawn_batch(descriptors)?;

    phase.agent_ids = agent_ids.clone();
    phase.attempts += 1;
    phase.status = PhaseStatus::Running;
    info!(
        phase_id = %phase.id,
        phase = %phase.name,
        attempt = phase.attempts,
        agents = agent_ids.len(),
        "phase running"
    );
    Ok(PhaseEvent::Started {
        phase_id: phase.id.clone(),
        agent_ids,
    })
}

/// Turn a phase plan into spawnable descriptors.
///
/// Ids in the plan are local keys: each attempt gets fresh registry ids and
/// dependencies on sibling keys are rewritten to match. Dependencies that
/// name no sibling are passed through untouched.
fn instantiate_plan(
    plan: &[AgentDescriptor],
    rejection_reason: Option<&str>,
    is_retry: bool,
) -> Vec<AgentDescriptor> {
    let keys: HashMap<&str, String> = plan
        .iter()
        .filter_map(|d| d.id.as_deref())
        .map(|key| (key, Uuid::new_v4().to_string()))
        .collect();

    plan.iter()
        .map(|desc| {
            let id = desc
                .id
                .as_deref()
                .and_then(|key| keys.get(key).cloned())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let dependencies = desc
                .dependencies
                .iter()
                .map(|dep| keys.get(dep.as_str()).cloned().unwrap_or_else(|| dep.clone()))
                .collect();
            let task = match rejection_reason {
                Some(reason) if is_retry => {
                    format!("{}\n\nPrevious attempt was rejected: {}", desc.task, reason)
                }
                _ => desc.task.clone(),
            };
            AgentDescriptor {
                id: Some(id),
                agent_type: desc.agent_type,
                task,
                // Threads belong to one agent; retries get new ones.
                thread_id: if is_retry { None } else { desc.thread_id.clone() },
                dependencies,
            }
        })
        .collect()
}

/// Reject a workflow whose later phases could not be spawned: plans with
/// self-dependencies, sibling cycles or duplicate keys, and threads that are
/// already bound or planned for more than one phase.
fn validate_plans(phases: &[PhaseSpec], registry: &AgentRegistry) -> Result<(), WorkflowError> {
    let mut planned: HashMap<&str, &str> = HashMap::new();
    for spec in phases {
        let mut scratch = AgentRegistry::new();
        scratch.spawn_batch(instantiate_plan(&spec.agents, None, false))?;

        let threads = spec
            .agents
            .iter()
            .filter_map(|d| d.thread_id.as_deref())
            .filter(|t| !t.trim().is_empty());
        for thread_id in threads {
            if let Some(owner) = registry.get_by_thread(thread_id) {
                return Err(RegistryError::ThreadInUse {
                    thread_id: thread_id.to_string(),
                    agent_id: owner.id.clone(),
                }
                .into());
            }
            if let Some(first) = planned.insert(thread_id, spec.name.as_str()) {
                return Err(WorkflowError::SharedThread {
                    thread_id: thread_id.to_string(),
                    first: first.to_string(),
                    second: spec.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn synthesize_output(phase: &Phase, registry: &AgentRegistry) -> String {
    phase
        .agent_ids
        .iter()
        .filter_map(|id| registry.get(id))
        .map(|agent| {
            let body = agent
                .output
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("(no output)");
            format!("## {}: {}\n\n{}", agent.agent_type, agent.task, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
