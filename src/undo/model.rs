use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of recorded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    SendMessage,
    DeleteMessage,
    EditMessage,
    RevertSnapshot,
    ClearThread,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "sendMessage",
            Self::DeleteMessage => "deleteMessage",
            Self::EditMessage => "editMessage",
            Self::RevertSnapshot => "revertSnapshot",
            Self::ClearThread => "clearThread",
        }
    }

    /// Default description used when the caller gives none.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::SendMessage => "Send message",
            Self::DeleteMessage => "Delete message",
            Self::EditMessage => "Edit message",
            Self::RevertSnapshot => "Revert snapshot",
            Self::ClearThread => "Clear thread",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadItem {
    pub id: String,
    pub role: String,
    pub content: String,
}

impl ThreadItem {
    pub fn new(id: impl Into<String>, role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Full contents of a thread: items by id plus their display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSnapshot {
    pub items: HashMap<String, ThreadItem>,
    pub order: Vec<String>,
}

impl ThreadSnapshot {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Items in display order.
    pub fn ordered(&self) -> Vec<&ThreadItem> {
        self.order.iter().filter_map(|id| self.items.get(id)).collect()
    }
}

/// State captured before a mutation, tagged by what it can reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PreviousState {
    /// A deleted item, where it sat, and the order before deletion.
    Item {
        item: ThreadItem,
        index: usize,
        order: Vec<String>,
    },
    /// The id of a message that was sent.
    Sent { item_id: String },
    /// Content of an item before it was edited.
    Edited { item_id: String, content: String },
    /// A whole thread before it was cleared.
    Snapshot(ThreadSnapshot),
    /// A filesystem snapshot that was reverted.
    FilesystemSnapshot { snapshot_id: String, paths: Vec<String> },
}

/// A recorded mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoableOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub previous_state: PreviousState,
    pub thread_id: String,
}
