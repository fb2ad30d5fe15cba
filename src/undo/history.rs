use std::collections::VecDeque;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{OperationType, PreviousState, UndoableOperation};
use super::store::{StoreError, ThreadStore};

/// Operations kept per stack unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Result of an undo or redo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    /// The reversal was applied; carries the operation's description.
    Applied(String),
    /// Nothing to do; carries a notice for the user.
    Empty(String),
    /// The operation cannot be reversed this way. Thread state is untouched.
    Unsupported(String),
    /// The store refused the reversal. The operation is dropped.
    Failed(String),
}

impl UndoOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Message suitable for a notice.
    pub fn message(&self) -> &str {
        match self {
            Self::Applied(m) | Self::Empty(m) | Self::Unsupported(m) | Self::Failed(m) => m,
        }
    }
}

/// Bounded undo and redo stacks over thread mutations.
#[derive(Debug)]
pub struct UndoLog {
    undo: VecDeque<UndoableOperation>,
    redo: VecDeque<UndoableOperation>,
    limit: usize,
    active_thread: Option<String>,
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl UndoLog {
    /// Create a log keeping at most `limit` operations per stack.
    pub fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            limit: limit.max(1),
            active_thread: None,
        }
    }

    pub fn set_active_thread(&mut self, thread_id: Option<&str>) {
        self.active_thread = thread_id.map(str::to_string);
    }

    pub fn active_thread(&self) -> Option<&str> {
        self.active_thread.as_deref()
    }

    /// Record a mutation on the active thread and return its id.
    ///
    /// Without an active thread there is nothing to attribute the operation
    /// to, so this does nothing and returns `None`. Recording a new operation
    /// discards the redo stack.
    pub fn record_operation(
        &mut self,
        op_type: OperationType,
        previous_state: PreviousState,
        description: Option<&str>,
    ) -> Option<String> {
        let thread_id = self.active_thread.clone()?;
        let op = UndoableOperation {
            id: Uuid::new_v4().to_string(),
            op_type,
            timestamp: Utc::now(),
            description: description
                .map(str::to_string)
                .unwrap_or_else(|| op_type.describe().to_string()),
            previous_state,
            thread_id,
        };
        let id = op.id.clone();
        debug!(op_id = %id, op_type = %op_type, thread_id = %op.thread_id, "operation recorded");
        push_bounded(&mut self.undo, op, self.limit);
        self.redo.clear();
        Some(id)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Operations available to undo, most recent last.
    pub fn history(&self) -> impl Iterator<Item = &UndoableOperation> {
        self.undo.iter()
    }

    pub fn clear_history(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Reverse the most recent operation.
    pub fn undo<S: ThreadStore + ?Sized>(&mut self, store: &mut S) -> UndoOutcome {
        let Some(op) = self.undo.pop_back() else {
            return UndoOutcome::Empty("Nothing to undo".to_string());
        };

        match reverse(&op, store) {
            Ok(Applied::Yes) => {
                info!(op_id = %op.id, op_type = %op.op_type, "operation undone");
                let outcome = UndoOutcome::Applied(format!("Undid: {}", op.description));
                push_bounded(&mut self.redo, op, self.limit);
                outcome
            }
            Ok(Applied::Unsupported(msg)) => {
                warn!(op_id = %op.id, op_type = %op.op_type, "undo not supported");
                UndoOutcome::Unsupported(msg)
            }
            Err(e) => {
                warn!(op_id = %op.id, op_type = %op.op_type, error = %e, "undo failed");
                UndoOutcome::Failed(format!("Could not undo {}: {}", op.description, e))
            }
        }
    }

    /// Re-apply the most recently undone operation.
    pub fn redo<S: ThreadStore + ?Sized>(&mut self, store: &mut S) -> UndoOutcome {
        let Some(op) = self.redo.pop_back() else {
            return UndoOutcome::Empty("Nothing to redo".to_string());
        };

        match reapply(&op, store) {
            Ok(Applied::Yes) => {
                info!(op_id = %op.id, op_type = %op.op_type, "operation redone");
                let outcome = UndoOutcome::Applied(format!("Redid: {}", op.description));
                push_bounded(&mut self.undo, op, self.limit);
                outcome
            }
            Ok(Applied::Unsupported(msg)) => {
                warn!(op_id = %op.id, op_type = %op.op_type, "redo not supported");
                UndoOutcome::Unsupported(msg)
            }
            Err(e) => {
                warn!(op_id = %op.id, op_type = %op.op_type, error = %e, "redo failed");
                UndoOutcome::Failed(format!("Could not redo {}: {}", op.description, e))
            }
        }
    }
}

enum Applied {
    Yes,
    Unsupported(String),
}

fn push_bounded(stack: &mut VecDeque<UndoableOperation>, op: UndoableOperation, limit: usize) {
    stack.push_back(op);
    while stack.len() > limit {
        stack.pop_front();
    }
}

fn mismatch(op: &UndoableOperation) -> Applied {
    Applied::Unsupported(format!(
        "{} carries state it cannot be reversed with",
        op.op_type
    ))
}

fn reverse<S: ThreadStore + ?Sized>(op: &UndoableOperation, store: &mut S) -> Result<Applied, StoreError> {
    let thread = op.thread_id.as_str();
    match (op.op_type, &op.previous_state) {
        (OperationType::DeleteMessage, PreviousState::Item { item, index, order }) => {
            store.insert_item(thread, item.clone(), *index)?;
            // Reinsertion alone does not pin the position.
            store.set_order(thread, order.clone())?;
        }
        (OperationType::SendMessage, PreviousState::Sent { item_id }) => {
            store.remove_item(thread, item_id)?;
        }
        (OperationType::EditMessage, PreviousState::Edited { item_id, content }) => {
            store.set_content(thread, item_id, content)?;
        }
        (OperationType::ClearThread, PreviousState::Snapshot(snapshot)) => {
            store.replace(thread, snapshot.clone());
        }
        (OperationType::RevertSnapshot, _) => {
            return Ok(Applied::Unsupported(
                "Undoing a snapshot revert is not supported; restore the files manually".to_string(),
            ));
        }
        _ => return Ok(mismatch(op)),
    }
    Ok(Applied::Yes)
}

fn reapply<S: ThreadStore + ?Sized>(op: &UndoableOperation, store: &mut S) -> Result<Applied, StoreError> {
    let thread = op.thread_id.as_str();
    match (op.op_type, &op.previous_state) {
        (OperationType::DeleteMessage, PreviousState::Item { item, .. }) => {
            store.remove_item(thread, &item.id)?;
        }
        (OperationType::ClearThread, PreviousState::Snapshot(_)) => {
            store.replace(thread, Default::default());
        }
        (OperationType::SendMessage, _) | (OperationType::EditMessage, _) => {
            return Ok(Applied::Unsupported(format!(
                "Redo of {} is not supported; repeat the action manually",
                op.description
            )));
        }
        _ => return Ok(mismatch(op)),
    }
    Ok(Applied::Yes)
}
