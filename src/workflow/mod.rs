//! Workflow state machine.
//!
//! A workflow is an ordered list of phases. Each phase spawns a group of
//! agents through the registry, optionally waits for human approval once
//! they all complete, and then hands over to the next phase.
//!
//! Phase transitions:
//! - `pending -> running` when its agents are spawned
//! - `running -> awaiting_approval` (gated) or `running -> completed`
//! - `awaiting_approval | approval_timeout -> approved -> completed`
//! - `awaiting_approval | approval_timeout -> rejected -> running` (retry)
//! - `awaiting_approval -> approval_timeout -> awaiting_approval` (recover)

mod machine;
mod model;
mod templates;


pub use machine::{PhaseEvent, WorkflowError, WorkflowMachine};
pub use model::{Phase, PhaseKind, PhaseSpec, PhaseStatus, Workflow, WorkflowStatus};
pub use templates::default_phases;
