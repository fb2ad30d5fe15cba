//! Swarmflow: multi-agent workflow orchestration.
//!
//! The crate keeps agents, their phased workflow and the human decisions
//! they wait on consistent with each other, and runs parallel agent work
//! in git worktrees with a staging branch.
//!
//! ## Components
//!
//! - [`registry`]: agents, dependencies and status transitions
//! - [`workflow`]: ordered phases with approval gates
//! - [`decision`]: the prioritized queue of pending human decisions
//! - [`orchestrator`]: registry and workflow behind one lock, fed by agent events
//! - [`swarm`]: staging branch, worker worktrees, merges and cleanup
//! - [`undo`]: bounded undo/redo over a conversation thread store

pub mod agent;
pub mod config;
pub mod decision;
pub mod orchestrator;
mod process_group;
pub mod registry;
pub mod shutdown;
pub mod swarm;
#[doc(hidden)]
pub mod testutil;
pub mod timeout;
pub mod undo;
pub mod workflow;
