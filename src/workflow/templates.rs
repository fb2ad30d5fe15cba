use super::model::{PhaseKind, PhaseSpec};
use crate::agent::{AgentDescriptor, AgentType};

/// The standard four-phase plan for a single task.
///
/// Exploration and planning run unattended; implementation and review wait
/// for a human before the workflow moves on.
///
/// # Examples
/// ```
/// use swarmflow::workflow::default_phases;
/// let phases = default_phases("Add token expiry");
/// assert_eq!(phases.len(), 4);
/// assert!(!phases[0].requires_approval);
/// assert!(phases[2].requires_approval);
/// ```
pub fn default_phases(task: &str) -> Vec<PhaseSpec> {
    let task = task.trim();
    vec![
        PhaseSpec::new(PhaseKind::Exploration, "Explore")
            .describe("Map the code relevant to the task")
            .agent(AgentDescriptor::new(
                AgentType::Explorer,
                format!("Explore the codebase for: {task}"),
            )),
        PhaseSpec::new(PhaseKind::Planning, "Plan")
            .describe("Break the task into concrete steps")
            .agent(AgentDescriptor::new(
                AgentType::Planner,
                format!("Write an implementation plan for: {task}"),
            )),
        PhaseSpec::new(PhaseKind::Implementation, "Implement")
            .describe("Make the change and test it")
            .gated()
            .agent(
                AgentDescriptor::new(AgentType::Coder, format!("Implement: {task}")).with_id("coder"),
            )
            .agent(
                AgentDescriptor::new(AgentType::Tester, format!("Write and run tests for: {task}"))
                    .depends_on("coder"),
            ),
        PhaseSpec::new(PhaseKind::Review, "Review")
            .describe("Review the change before it lands")
            .gated()
            .agent(AgentDescriptor::new(
                AgentType::Reviewer,
                format!("Review the changes made for: {task}"),
            )),
    ]
}
