//! Undo/redo log for conversation thread mutations.
//!
//! Each recorded operation carries enough prior state to reverse it. Undo
//! and redo are applied through a [`ThreadStore`], so the log never holds
//! thread contents beyond what it captured.

mod history;
mod model;
mod store;

#[cfg(test)]
mod tests;

pub use history::{UndoLog, UndoOutcome, DEFAULT_HISTORY_LIMIT};
pub use model::{OperationType, PreviousState, ThreadItem, ThreadSnapshot, UndoableOperation};
pub use store::{MemoryThreadStore, StoreError, ThreadStore};
