//! Agent registry.
//!
//! Owns the canonical set of agents, an insertion-ordered index and a
//! thread-id index kept 1:1 with the primary map. The registry is a passive
//! state holder: every transition goes through the functions here, execution
//! happens elsewhere.
//!
//! Status transitions:
//! - `pending -> running` once every dependency is `completed` (automatic on
//!   spawn and whenever a dependency completes)
//! - `running -> completed`, `pending | running -> error`
//! - `error -> pending` (retry)
//! - any non-terminal status `-> cancelled`

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::{Agent, AgentDescriptor, AgentError, AgentProgress, AgentStatus};

/// Errors raised by registry operations. All of them are caller mistakes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    NotFound(String),
    #[error("agent id already registered: {0}")]
    DuplicateId(String),
    #[error("thread {thread_id} is already bound to agent {agent_id}")]
    ThreadInUse { thread_id: String, agent_id: String },
    #[error("agent {0} cannot depend on itself")]
    SelfDependency(String),
    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
    #[error("agent {id} cannot run: dependencies not completed: {}", .pending.join(", "))]
    DependenciesUnmet { id: String, pending: Vec<String> },
    #[error("agent {id} is {from}; cannot move to {to}")]
    InvalidTransition {
        id: String,
        from: AgentStatus,
        to: AgentStatus,
    },
}

/// Number of agents per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub error: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.error + self.cancelled
    }

    /// Agents that may still produce work.
    pub fn active(&self) -> usize {
        self.pending + self.running
    }
}

/// Canonical store of agents.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Agent>,
    order: Vec<String>,
    by_thread: HashMap<String, String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent and return its id.
    ///
    /// The agent starts `running` when all dependencies are already
    /// completed, `pending` otherwise. Dependencies may name agents that are
    /// not registered yet; those count as unmet.
    pub fn spawn(&mut self, descriptor: AgentDescriptor) -> Result<String, RegistryError> {
        let mut ids = self.spawn_batch(vec![descriptor])?;
        Ok(ids.remove(0))
    }

    /// Register several agents atomically.
    ///
    /// Either every descriptor is registered or none is. Descriptors may
    /// depend on each other by id.
    pub fn spawn_batch(
        &mut self,
        descriptors: Vec<AgentDescriptor>,
    ) -> Result<Vec<String>, RegistryError> {
        let prepared = self.prepare(descriptors)?;
        let mut ids = Vec::with_capacity(prepared.len());

        for agent in prepared {
            let id = agent.id.clone();
            self.by_thread.insert(agent.thread_id.clone(), id.clone());
            self.order.push(id.clone());
            debug!(agent_id = %id, agent_type = %agent.agent_type, "agent registered");
            self.agents.insert(id.clone(), agent);
            ids.push(id);
        }

        // Promotion runs after the whole batch is in place so siblings that
        // depend on nothing start immediately and the rest stay pending.
        for id in &ids {
            self.try_start(id);
        }

        Ok(ids)
    }

    /// Build agents for a batch and validate ids, threads and the dependency graph.
    fn prepare(&self, descriptors: Vec<AgentDescriptor>) -> Result<Vec<Agent>, RegistryError> {
        let mut batch_ids = HashSet::new();
        let mut batch_threads = HashSet::new();
        let mut agents = Vec::with_capacity(descriptors.len());

        for desc in descriptors {
            let id = desc
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            if self.agents.contains_key(&id) || !batch_ids.insert(id.clone()) {
                return Err(RegistryError::DuplicateId(id));
            }

            let thread_id = desc
                .thread_id
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| format!("thread-{}", Uuid::new_v4()));
            if let Some(owner) = self.by_thread.get(&thread_id) {
                return Err(RegistryError::ThreadInUse {
                    thread_id,
                    agent_id: owner.clone(),
                });
            }
            if !batch_threads.insert(thread_id.clone()) {
                return Err(RegistryError::ThreadInUse {
                    thread_id,
                    agent_id: id,
                });
            }

            let mut dependencies = Vec::new();
            for dep in desc.dependencies {
                if dep == id {
                    return Err(RegistryError::SelfDependency(id));
                }
                if !dependencies.contains(&dep) {
                    dependencies.push(dep);
                }
            }

            agents.push(Agent {
                id,
                agent_type: desc.agent_type,
                status: AgentStatus::Pending,
                task: desc.task,
                thread_id,
                dependencies,
                progress: None,
                error: None,
                output: None,
                paused: false,
                created_at: Utc::now(),
            });
        }

        let mut edges: HashMap<&str, &[String]> = self
            .agents
            .values()
            .map(|a| (a.id.as_str(), a.dependencies.as_slice()))
            .collect();
        for agent in &agents {
            edges.insert(agent.id.as_str(), agent.dependencies.as_slice());
        }
        for agent in &agents {
            if let Some(cycle) = find_cycle(&edges, &agent.id) {
                return Err(RegistryError::DependencyCycle(cycle));
            }
        }

        Ok(agents)
    }

    /// Get an agent by id.
    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// Get the agent speaking through a thread.
    pub fn get_by_thread(&self, thread_id: &str) -> Option<&Agent> {
        self.by_thread
            .get(thread_id)
            .and_then(|id| self.agents.get(id))
    }

    /// All agents in insertion order.
    pub fn all(&self) -> impl Iterator<Item = &Agent> {
        self.order.iter().filter_map(|id| self.agents.get(id))
    }

    /// Agents with the given status, in insertion order.
    pub fn in_status(&self, status: AgentStatus) -> Vec<&Agent> {
        self.all().filter(|a| a.status == status).collect()
    }

    /// Agents ordered running > pending > error > completed > cancelled,
    /// ties broken by creation time.
    pub fn sorted(&self) -> Vec<&Agent> {
        let mut agents: Vec<&Agent> = self.all().collect();
        // Stable sort keeps insertion order for identical timestamps.
        agents.sort_by(|a, b| {
            a.status
                .sort_rank()
                .cmp(&b.status.sort_rank())
                .then(a.created_at.cmp(&b.created_at))
        });
        agents
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for agent in self.agents.values() {
            match agent.status {
                AgentStatus::Pending => counts.pending += 1,
                AgentStatus::Running => counts.running += 1,
                AgentStatus::Completed => counts.completed += 1,
                AgentStatus::Error => counts.error += 1,
                AgentStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Dependencies of `id` that are not completed yet.
    pub fn unmet_dependencies(&self, id: &str) -> Result<Vec<String>, RegistryError> {
        let agent = self
            .agents
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        Ok(agent
            .dependencies
            .iter()
            .filter(|dep| {
                self.agents
                    .get(dep.as_str())
                    .map(|d| d.status != AgentStatus::Completed)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    /// Apply a status reported by the execution channel.
    ///
    /// Moving to `Cancelled` is the same as [`AgentRegistry::cancel`]. When an
    /// agent completes, pending dependents whose dependencies are now all
    /// completed start running.
    pub fn update_status(
        &mut self,
        id: &str,
        status: AgentStatus,
        error: Option<AgentError>,
    ) -> Result<(), RegistryError> {
        if status == AgentStatus::Cancelled {
            return self.cancel(id);
        }

        let from = self
            .agents
            .get(id)
            .map(|a| a.status)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if from == status {
            if status == AgentStatus::Error {
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.error = error;
                }
            }
            return Ok(());
        }

        let allowed = match (from, status) {
            (AgentStatus::Pending | AgentStatus::Error, AgentStatus::Running) => true,
            (AgentStatus::Running, AgentStatus::Completed) => true,
            (AgentStatus::Pending | AgentStatus::Running, AgentStatus::Error) => true,
            (AgentStatus::Error, AgentStatus::Pending) => true,
            _ => false,
        };
        if !allowed {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from,
                to: status,
            });
        }

        if status == AgentStatus::Running {
            let pending = self.unmet_dependencies(id)?;
            if !pending.is_empty() {
                return Err(RegistryError::DependenciesUnmet {
                    id: id.to_string(),
                    pending,
                });
            }
        }

        if let Some(agent) = self.agents.get_mut(id) {
            agent.status = status;
            agent.error = if status == AgentStatus::Error {
                Some(error.unwrap_or_else(|| AgentError::fatal("unknown error")))
            } else {
                None
            };
            info!(agent_id = %id, from = %from, to = %status, "agent status changed");
        }

        match status {
            AgentStatus::Completed => {
                self.promote_ready();
            }
            AgentStatus::Pending => {
                self.try_start(id);
            }
            _ => {}
        }
        Ok(())
    }

    /// Record progress for an agent.
    pub fn update_progress(&mut self, id: &str, progress: AgentProgress) -> Result<(), RegistryError> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        agent.progress = Some(progress);
        Ok(())
    }

    /// Record the final output of an agent; usually sent with completion.
    pub fn set_output(&mut self, id: &str, output: impl Into<String>) -> Result<(), RegistryError> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        agent.output = Some(output.into());
        Ok(())
    }

    /// Cancel an agent. Terminal; does not cascade.
    ///
    /// Running dependents keep running. Pending dependents stay pending
    /// forever because a cancelled dependency never completes.
    pub fn cancel(&mut self, id: &str) -> Result<(), RegistryError> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        match agent.status {
            AgentStatus::Cancelled => Ok(()),
            AgentStatus::Completed => Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: AgentStatus::Completed,
                to: AgentStatus::Cancelled,
            }),
            from => {
                agent.status = AgentStatus::Cancelled;
                agent.paused = false;
                info!(agent_id = %id, from = %from, "agent cancelled");
                Ok(())
            }
        }
    }

    /// Cancel every non-terminal agent in `ids`, ignoring unknown ids.
    pub fn cancel_all<'a, I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut cancelled = 0;
        for id in ids {
            let live = self
                .agents
                .get(id)
                .map(|a| !a.status.is_terminal())
                .unwrap_or(false);
            if live && self.cancel(id).is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Pause a pending or running agent.
    pub fn pause(&mut self, id: &str) -> Result<(), RegistryError> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if !matches!(agent.status, AgentStatus::Pending | AgentStatus::Running) {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: agent.status,
                to: agent.status,
            });
        }
        agent.paused = true;
        debug!(agent_id = %id, "agent paused");
        Ok(())
    }

    /// Resume a paused agent. A pending agent whose dependencies completed
    /// while it was paused starts running.
    pub fn resume(&mut self, id: &str) -> Result<(), RegistryError> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        agent.paused = false;
        debug!(agent_id = %id, "agent resumed");
        self.try_start(id);
        Ok(())
    }

    /// Start every pending, unpaused agent whose dependencies are all completed.
    /// Returns the ids that started.
    pub fn promote_ready(&mut self) -> Vec<String> {
        let candidates: Vec<String> = self
            .order
            .iter()
            .filter(|id| {
                self.agents
                    .get(id.as_str())
                    .map(|a| a.status == AgentStatus::Pending && !a.paused)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        candidates
            .into_iter()
            .filter(|id| self.try_start(id))
            .collect()
    }

    fn try_start(&mut self, id: &str) -> bool {
        let ready = match self.agents.get(id) {
            Some(agent) if agent.status == AgentStatus::Pending && !agent.paused => agent
                .dependencies
                .iter()
                .all(|dep| {
                    self.agents
                        .get(dep)
                        .map(|d| d.status == AgentStatus::Completed)
                        .unwrap_or(false)
                }),
            _ => false,
        };
        if ready {
            if let Some(agent) = self.agents.get_mut(id) {
                agent.status = AgentStatus::Running;
                info!(agent_id = %id, "agent running");
            }
        }
        ready
    }
}

/// Depth-first search for a path from `start` back to itself.
fn find_cycle(edges: &HashMap<&str, &[String]>, start: &str) -> Option<Vec<String>> {
    fn visit<'a>(
        edges: &HashMap<&'a str, &'a [String]>,
        node: &'a str,
        start: &str,
        path: &mut Vec<String>,
        seen: &mut HashSet<&'a str>,
    ) -> bool {
        let Some(&deps) = edges.get(node) else {
            return false;
        };
        for dep in deps.iter() {
            if dep == start {
                path.push(dep.clone());
                return true;
            }
            if seen.insert(dep.as_str()) {
                path.push(dep.clone());
                if visit(edges, dep.as_str(), start, path, seen) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    let (&key, _) = edges.get_key_value(start)?;
    let mut path = vec![start.to_string()];
    let mut seen = HashSet::new();
    seen.insert(key);
    if visit(edges, key, start, &mut path, &mut seen) {
        Some(path)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentType;

    fn coder(id: &str) -> AgentDescriptor {
        AgentDescriptor::new(AgentType::Coder, format!("task {}", id)).with_id(id)
    }

    #[test]
    fn test_spawn_without_dependencies_runs() {
        let mut registry = AgentRegistry::new();
        let id = registry.spawn(coder("a")).unwrap();
        assert_eq!(id, "a");
        assert_eq!(registry.get("a").unwrap().status, AgentStatus::Running);
    }

    #[test]
    fn test_spawn_assigns_ids_and_threads() {
        let mut registry = AgentRegistry::new();
        let id = registry
            .spawn(AgentDescriptor::new(AgentType::Explorer, "look around"))
            .unwrap();
        let agent = registry.get(&id).unwrap();
        assert!(agent.thread_id.starts_with("thread-"));
        assert_eq!(registry.get_by_thread(&agent.thread_id).unwrap().id, id);
    }

    #[test]
    fn test_spawn_with_unmet_dependency_is_pending() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("a")).unwrap();
        registry.spawn(coder("b").depends_on("a")).unwrap();
        assert_eq!(registry.get("b").unwrap().status, AgentStatus::Pending);
    }

    #[test]
    fn test_completion_promotes_dependents() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("a")).unwrap();
        registry.spawn(coder("b").depends_on("a")).unwrap();
        registry.spawn(coder("c").depends_on("a").depends_on("b")).unwrap();

        registry.update_status("a", AgentStatus::Completed, None).unwrap();
        assert_eq!(registry.get("b").unwrap().status, AgentStatus::Running);
        assert_eq!(registry.get("c").unwrap().status, AgentStatus::Pending);

        registry.update_status("b", AgentStatus::Completed, None).unwrap();
        assert_eq!(registry.get("c").unwrap().status, AgentStatus::Running);
    }

    #[test]
    fn test_running_with_unmet_dependencies_rejected() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("a")).unwrap();
        registry.spawn(coder("b").depends_on("a")).unwrap();

        let err = registry
            .update_status("b", AgentStatus::Running, None)
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DependenciesUnmet {
                id: "b".to_string(),
                pending: vec!["a".to_string()],
            }
        );
        assert_eq!(registry.get("b").unwrap().status, AgentStatus::Pending);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut registry = AgentRegistry::new();
        let err = registry.spawn(coder("a").depends_on("a")).unwrap_err();
        assert_eq!(err, RegistryError::SelfDependency("a".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cycle_through_forward_reference_rejected() {
        let mut registry = AgentRegistry::new();
        // "a" waits for an agent that does not exist yet.
        registry.spawn(coder("a").depends_on("b")).unwrap();
        let err = registry.spawn(coder("b").depends_on("a")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DependencyCycle(vec![
                "b".to_string(),
                "a".to_string(),
                "b".to_string()
            ])
        );
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_batch_cycle_rejects_whole_batch() {
        let mut registry = AgentRegistry::new();
        let err = registry
            .spawn_batch(vec![
                coder("a").depends_on("c"),
                coder("b").depends_on("a"),
                coder("c").depends_on("b"),
            ])
            .unwrap_err();
        assert!(matches!(err, RegistryError::DependencyCycle(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_id_and_thread_rejected() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("a").with_thread("t1")).unwrap();
        assert_eq!(
            registry.spawn(coder("a")).unwrap_err(),
            RegistryError::DuplicateId("a".to_string())
        );
        assert_eq!(
            registry.spawn(coder("b").with_thread("t1")).unwrap_err(),
            RegistryError::ThreadInUse {
                thread_id: "t1".to_string(),
                agent_id: "a".to_string(),
            }
        );
    }

    #[test]
    fn test_cancel_does_not_cascade() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("a")).unwrap();
        registry.spawn(coder("b").depends_on("a")).unwrap();
        registry.spawn(coder("c")).unwrap();

        registry.cancel("a").unwrap();
        assert_eq!(registry.get("a").unwrap().status, AgentStatus::Cancelled);
        assert_eq!(registry.get("b").unwrap().status, AgentStatus::Pending);
        assert_eq!(registry.get("c").unwrap().status, AgentStatus::Running);

        // A cancelled dependency never unblocks its dependents.
        assert!(registry.promote_ready().is_empty());
        assert_eq!(registry.get("b").unwrap().status, AgentStatus::Pending);
    }

    #[test]
    fn test_terminal_statuses_are_final() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("a")).unwrap();
        registry.update_status("a", AgentStatus::Completed, None).unwrap();

        assert!(matches!(
            registry.cancel("a"),
            Err(RegistryError::InvalidTransition { .. })
        ));
        assert!(matches!(
            registry.update_status("a", AgentStatus::Running, None),
            Err(RegistryError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_error_then_retry() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("a")).unwrap();
        registry
            .update_status("a", AgentStatus::Error, Some(AgentError::recoverable("rate limited")))
            .unwrap();
        let agent = registry.get("a").unwrap();
        assert!(agent.has_recoverable_error());

        registry.update_status("a", AgentStatus::Pending, None).unwrap();
        let agent = registry.get("a").unwrap();
        assert_eq!(agent.status, AgentStatus::Running);
        assert!(agent.error.is_none());
    }

    #[test]
    fn test_pause_holds_promotion_until_resume() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("a")).unwrap();
        registry.spawn(coder("b").depends_on("a")).unwrap();
        registry.pause("b").unwrap();

        registry.update_status("a", AgentStatus::Completed, None).unwrap();
        assert_eq!(registry.get("b").unwrap().status, AgentStatus::Pending);

        registry.resume("b").unwrap();
        let b = registry.get("b").unwrap();
        assert_eq!(b.status, AgentStatus::Running);
        assert!(!b.paused);
    }

    #[test]
    fn test_sorted_view_orders_by_status_then_creation() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("done")).unwrap();
        registry.spawn(coder("cancelled")).unwrap();
        registry.spawn(coder("waiting").depends_on("missing")).unwrap();
        registry.spawn(coder("failed")).unwrap();
        registry.spawn(coder("busy")).unwrap();

        registry.update_status("done", AgentStatus::Completed, None).unwrap();
        registry.cancel("cancelled").unwrap();
        registry.update_status("failed", AgentStatus::Error, None).unwrap();

        let ids: Vec<&str> = registry.sorted().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["busy", "waiting", "failed", "done", "cancelled"]);
    }

    #[test]
    fn test_counts_and_in_status() {
        let mut registry = AgentRegistry::new();
        registry.spawn(coder("a")).unwrap();
        registry.spawn(coder("b").depends_on("a")).unwrap();
        registry.spawn(coder("c")).unwrap();
        registry.cancel("c").unwrap();

        let counts = registry.counts();
        assert_eq!(counts.running, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.active(), 2);

        let pending = registry.in_status(AgentStatus::Pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
    }

    #[test]
    fn test_unknown_agent_errors() {
        let mut registry = AgentRegistry::new();
        assert_eq!(
            registry.update_progress("nope", AgentProgress::new(1, 2, "x")),
            Err(RegistryError::NotFound("nope".to_string()))
        );
        assert_eq!(
            registry.cancel("nope"),
            Err(RegistryError::NotFound("nope".to_string()))
        );
    }
}
