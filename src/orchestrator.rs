//! Orchestrator: the registry and the workflow machine behind one lock.
//!
//! Status and progress reports arrive from the execution channel as
//! [`AgentEvent`]s. A single [`EventLoop`] thread applies them, so every
//! mutation happens with the registry and workflow observed together and no
//! reader ever sees a phase that disagrees with its agents.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::agent::{Agent, AgentDescriptor, AgentError, AgentProgress, AgentStatus};
use crate::decision::{self, ApprovalSource, DecisionQueueState};
use crate::registry::{AgentRegistry, RegistryError, StatusCounts};
use crate::timeout::{run_with_timeout, Timed};
use crate::workflow::{PhaseEvent, PhaseSpec, Workflow, WorkflowError, WorkflowMachine};

/// How the execution channel names an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRef {
    Id(String),
    Thread(String),
}

/// A report from the execution channel.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Started { agent: AgentRef },
    Progress { agent: AgentRef, progress: AgentProgress },
    Completed { agent: AgentRef, output: Option<String> },
    Failed { agent: AgentRef, message: String, recoverable: bool },
    Cancelled { agent: AgentRef },
}

impl AgentEvent {
    pub fn agent(&self) -> &AgentRef {
        match self {
            Self::Started { agent }
            | Self::Progress { agent, .. }
            | Self::Completed { agent, .. }
            | Self::Failed { agent, .. }
            | Self::Cancelled { agent } => agent,
        }
    }
}

/// Point-in-time copy of engine state, safe to hand to other threads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub agents: Vec<Agent>,
    pub workflow: Option<Workflow>,
    #[serde(skip)]
    pub counts: StatusCounts,
    pub taken_at: DateTime<Utc>,
}

pub struct Orchestrator {
    registry: AgentRegistry,
    machine: WorkflowMachine,
    approval_timeout: Duration,
}

impl Orchestrator {
    pub fn new(approval_timeout: Duration) -> Self {
        Self {
            registry: AgentRegistry::new(),
            machine: WorkflowMachine::new(),
            approval_timeout,
        }
    }

    pub fn into_shared(self) -> SharedOrchestrator {
        Arc::new(Mutex::new(self))
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn workflow(&self) -> Option<&Workflow> {
        self.machine.workflow()
    }

    pub fn approval_timeout(&self) -> Duration {
        self.approval_timeout
    }

    /// Spawn an agent outside any workflow.
    pub fn spawn_agent(&mut self, descriptor: AgentDescriptor) -> Result<String, RegistryError> {
        self.registry.spawn(descriptor)
    }

    pub fn start_workflow(
        &mut self,
        name: &str,
        description: &str,
        phases: Vec<PhaseSpec>,
        replace_running: bool,
    ) -> Result<Vec<PhaseEvent>, WorkflowError> {
        self.machine
            .start(&mut self.registry, name, description, phases, replace_running)
    }

    pub fn approve_phase(&mut self, phase_id: &str) -> Result<Vec<PhaseEvent>, WorkflowError> {
        self.machine.approve_phase(&mut self.registry, phase_id)
    }

    pub fn reject_phase(&mut self, phase_id: &str, reason: Option<&str>) -> Result<(), WorkflowError> {
        self.machine.reject_phase(phase_id, reason)
    }

    pub fn retry_phase(&mut self, phase_id: &str) -> Result<Vec<PhaseEvent>, WorkflowError> {
        self.machine.retry_phase(&mut self.registry, phase_id)
    }

    pub fn recover_phase(&mut self, phase_id: &str) -> Result<(), WorkflowError> {
        self.machine.recover_phase(phase_id)
    }

    pub fn cancel_workflow(&mut self) -> Result<(), WorkflowError> {
        self.machine.cancel(&mut self.registry)
    }

    pub fn fail_workflow(&mut self, reason: &str) -> Result<(), WorkflowError> {
        self.machine.fail(&mut self.registry, reason)
    }

    /// Move an errored agent back to pending so it runs again.
    pub fn retry_agent(&mut self, agent_id: &str) -> Result<Vec<PhaseEvent>, WorkflowError> {
        self.registry
            .update_status(agent_id, AgentStatus::Pending, None)?;
        self.machine.evaluate(&mut self.registry)
    }

    pub fn cancel_agent(&mut self, agent_id: &str) -> Result<Vec<PhaseEvent>, WorkflowError> {
        self.registry.cancel(agent_id)?;
        self.machine.evaluate(&mut self.registry)
    }

    pub fn pause_agent(&mut self, agent_id: &str) -> Result<(), RegistryError> {
        self.registry.pause(agent_id)
    }

    pub fn resume_agent(&mut self, agent_id: &str) -> Result<(), RegistryError> {
        self.registry.resume(agent_id)
    }

    /// Apply one execution-channel report, then re-evaluate the workflow.
    pub fn apply(&mut self, event: AgentEvent) -> Result<Vec<PhaseEvent>, WorkflowError> {
        let id = self.resolve(event.agent())?;
        match event {
            AgentEvent::Started { .. } => {
                self.registry
                    .update_status(&id, AgentStatus::Running, None)?;
            }
            AgentEvent::Progress { progress, .. } => {
                self.registry.update_progress(&id, progress)?;
                return Ok(Vec::new());
            }
            AgentEvent::Completed { output, .. } => {
                if let Some(output) = output {
                    self.registry.set_output(&id, output)?;
                }
                self.registry
                    .update_status(&id, AgentStatus::Completed, None)?;
            }
            AgentEvent::Failed {
                message,
                recoverable,
                ..
            } => {
                let error = if recoverable {
                    AgentError::recoverable(message)
                } else {
                    AgentError::fatal(message)
                };
                self.registry
                    .update_status(&id, AgentStatus::Error, Some(error))?;
            }
            AgentEvent::Cancelled { .. } => {
                self.registry.cancel(&id)?;
            }
        }
        self.machine.evaluate(&mut self.registry)
    }

    /// Time out the current phase if its approval window elapsed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<String> {
        self.machine.expire_overdue(now, self.approval_timeout)
    }

    /// When the open approval window closes, if one is open.
    pub fn approval_deadline(&self) -> Option<DateTime<Utc>> {
        self.machine.approval_deadline(self.approval_timeout)
    }

    /// Derive pending decisions from the current state.
    pub fn decisions<A>(&self, approvals: &A) -> DecisionQueueState
    where
        A: ApprovalSource + ?Sized,
    {
        decision::compute(self.registry.all(), self.machine.workflow(), approvals)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            agents: self.registry.all().cloned().collect(),
            workflow: self.machine.workflow().cloned(),
            counts: self.registry.counts(),
            taken_at: Utc::now(),
        }
    }

    fn resolve(&self, agent: &AgentRef) -> Result<String, RegistryError> {
        match agent {
            AgentRef::Id(id) => self
                .registry
                .get(id)
                .map(|a| a.id.clone())
                .ok_or_else(|| RegistryError::NotFound(id.clone())),
            AgentRef::Thread(thread_id) => self
                .registry
                .get_by_thread(thread_id)
                .map(|a| a.id.clone())
                .ok_or_else(|| RegistryError::NotFound(format!("thread {thread_id}"))),
        }
    }
}

pub type SharedOrchestrator = Arc<Mutex<Orchestrator>>;

/// Lock the orchestrator, recovering from a poisoned lock.
pub fn lock(shared: &SharedOrchestrator) -> MutexGuard<'_, Orchestrator> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// The single writer that drains execution-channel events.
pub struct EventLoop {
    handle: JoinHandle<usize>,
}

impl EventLoop {
    /// Start draining `events` into `shared`. The loop ends once every
    /// sender is dropped.
    pub fn spawn(shared: SharedOrchestrator, events: Receiver<AgentEvent>) -> Self {
        let handle = thread::spawn(move || {
            let mut applied = 0;
            for event in events {
                let mut orchestrator = lock(&shared);
                match orchestrator.apply(event.clone()) {
                    Ok(phase_events) => {
                        applied += 1;
                        if !phase_events.is_empty() {
                            debug!(?phase_events, "workflow advanced");
                        }
                    }
                    Err(e) => warn!(?event, error = %e, "agent event rejected"),
                }
            }
            applied
        });
        Self { handle }
    }

    /// Wait for the loop to end; returns how many events were applied.
    pub fn join(self) -> usize {
        self.handle.join().unwrap_or(0)
    }

    /// Like [`EventLoop::join`], but gives up after `timeout`.
    pub fn join_timeout(self, timeout: Duration) -> Timed<usize> {
        let handle = self.handle;
        run_with_timeout(timeout, move || handle.join().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentType;
    use crate::workflow::{PhaseKind, PhaseStatus};
    use std::collections::HashMap;

    #[test]
    fn test_apply_by_thread() {
        let mut orch = Orchestrator::new(Duration::from_secs(60));
        let id = orch
            .spawn_agent(AgentDescriptor::new(AgentType::ShellRunner, "ls").with_thread("t-1"))
            .unwrap();

        orch.apply(AgentEvent::Progress {
            agent: AgentRef::Thread("t-1".to_string()),
            progress: AgentProgress::new(1, 2, "listing"),
        })
        .unwrap();
        orch.apply(AgentEvent::Completed {
            agent: AgentRef::Thread("t-1".to_string()),
            output: Some("Cargo.toml".to_string()),
        })
        .unwrap();

        let agent = orch.registry().get(&id).unwrap();
        assert_eq!(agent.status, AgentStatus::Completed);
        assert_eq!(agent.output.as_deref(), Some("Cargo.toml"));
        assert_eq!(agent.progress.as_ref().unwrap().current, 1);
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let mut orch = Orchestrator::new(Duration::from_secs(60));
        let err = orch
            .apply(AgentEvent::Started {
                agent: AgentRef::Id("ghost".to_string()),
            })
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Registry(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_failed_event_raises_decision_and_retry_clears_it() {
        let mut orch = Orchestrator::new(Duration::from_secs(60));
        let id = orch
            .spawn_agent(AgentDescriptor::new(AgentType::Tester, "run tests"))
            .unwrap();
        orch.apply(AgentEvent::Failed {
            agent: AgentRef::Id(id.clone()),
            message: "timeout talking to runner".to_string(),
            recoverable: true,
        })
        .unwrap();

        let approvals: HashMap<String, Vec<decision::PendingApproval>> = HashMap::new();
        let state = orch.decisions(&approvals);
        assert_eq!(state.decisions.len(), 1);
        assert_eq!(state.decisions[0].id, format!("error:{id}"));

        orch.retry_agent(&id).unwrap();
        assert_eq!(orch.registry().get(&id).unwrap().status, AgentStatus::Running);
        assert!(orch.decisions(&approvals).is_empty());
    }

    #[test]
    fn test_tick_times_out_phase() {
        let mut orch = Orchestrator::new(Duration::from_secs(30));
        orch.start_workflow(
            "wf",
            "",
            vec![PhaseSpec::new(PhaseKind::Review, "Review")
                .gated()
                .agent(AgentDescriptor::new(AgentType::Reviewer, "look"))],
            false,
        )
        .unwrap();
        let agent = orch.workflow().unwrap().phases[0].agent_ids[0].clone();
        orch.apply(AgentEvent::Completed {
            agent: AgentRef::Id(agent),
            output: None,
        })
        .unwrap();

        let deadline = orch.approval_deadline().unwrap();
        assert!(orch.tick(deadline - chrono::Duration::seconds(1)).is_none());
        assert!(orch.tick(deadline).is_some());
        assert_eq!(
            orch.workflow().unwrap().phases[0].status,
            PhaseStatus::ApprovalTimeout
        );
    }

    #[test]
    fn test_shared_thread_is_refused_before_any_agent_runs() {
        let mut orch = Orchestrator::new(Duration::from_secs(60));
        let err = orch
            .start_workflow(
                "wf",
                "",
                vec![
                    PhaseSpec::new(PhaseKind::Exploration, "Explore")
                        .agent(AgentDescriptor::new(AgentType::Explorer, "look").with_thread("t1")),
                    PhaseSpec::new(PhaseKind::Implementation, "Implement")
                        .agent(AgentDescriptor::new(AgentType::Coder, "write").with_thread("t1")),
                ],
                false,
            )
            .unwrap_err();

        assert!(matches!(err, WorkflowError::SharedThread { .. }));
        assert!(orch.registry().is_empty());
        assert!(orch.workflow().is_none());
    }

    #[test]
    fn test_event_loop_applies_until_senders_drop() {
        let shared = Orchestrator::new(Duration::from_secs(60)).into_shared();
        let id = lock(&shared)
            .spawn_agent(AgentDescriptor::new(AgentType::Coder, "write it"))
            .unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let event_loop = EventLoop::spawn(Arc::clone(&shared), rx);
        tx.send(AgentEvent::Completed {
            agent: AgentRef::Id(id.clone()),
            output: Some("done".to_string()),
        })
        .unwrap();
        tx.send(AgentEvent::Progress {
            agent: AgentRef::Id("missing".to_string()),
            progress: AgentProgress::new(1, 1, "nothing"),
        })
        .unwrap();
        drop(tx);

        let applied = event_loop.join_timeout(Duration::from_secs(5));
        assert_eq!(applied, Timed::Completed(1));
        assert_eq!(lock(&shared).registry().get(&id).unwrap().status, AgentStatus::Completed);
    }
}
