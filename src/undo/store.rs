use std::collections::HashMap;

use thiserror::Error;

use super::model::{ThreadItem, ThreadSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("thread not found: {0}")]
    ThreadNotFound(String),
    #[error("item {item_id} not found in thread {thread_id}")]
    ItemNotFound { thread_id: String, item_id: String },
}

/// Mutable access to conversation threads.
///
/// The real store lives outside the engine; the undo log only needs these
/// primitives to apply reversals.
pub trait ThreadStore {
    fn snapshot(&self, thread_id: &str) -> Option<ThreadSnapshot>;

    /// Insert `item` at `index` in the order (clamped to the end).
    fn insert_item(&mut self, thread_id: &str, item: ThreadItem, index: usize) -> Result<(), StoreError>;

    fn remove_item(&mut self, thread_id: &str, item_id: &str) -> Result<ThreadItem, StoreError>;

    fn set_content(&mut self, thread_id: &str, item_id: &str, content: &str) -> Result<(), StoreError>;

    fn set_order(&mut self, thread_id: &str, order: Vec<String>) -> Result<(), StoreError>;

    /// Replace the whole thread, creating it if needed.
    fn replace(&mut self, thread_id: &str, snapshot: ThreadSnapshot);
}

/// In-memory [`ThreadStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryThreadStore {
    threads: HashMap<String, ThreadSnapshot>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item, creating the thread if needed.
    pub fn push(&mut self, thread_id: &str, item: ThreadItem) {
        let thread = self.threads.entry(thread_id.to_string()).or_default();
        thread.order.push(item.id.clone());
        thread.items.insert(item.id.clone(), item);
    }

    pub fn clear(&mut self, thread_id: &str) {
        self.threads.insert(thread_id.to_string(), ThreadSnapshot::default());
    }

    fn thread_mut(&mut self, thread_id: &str) -> Result<&mut ThreadSnapshot, StoreError> {
        self.threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.to_string()))
    }
}

impl ThreadStore for MemoryThreadStore {
    fn snapshot(&self, thread_id: &str) -> Option<ThreadSnapshot> {
        self.threads.get(thread_id).cloned()
    }

    fn insert_item(&mut self, thread_id: &str, item: ThreadItem, index: usize) -> Result<(), StoreError> {
        let thread = self.thread_mut(thread_id)?;
        let index = index.min(thread.order.len());
        thread.order.insert(index, item.id.clone());
        thread.items.insert(item.id.clone(), item);
        Ok(())
    }

    fn remove_item(&mut self, thread_id: &str, item_id: &str) -> Result<ThreadItem, StoreError> {
        let thread = self.thread_mut(thread_id)?;
        let item = thread
            .items
            .remove(item_id)
            .ok_or_else(|| StoreError::ItemNotFound {
                thread_id: thread_id.to_string(),
                item_id: item_id.to_string(),
            })?;
        thread.order.retain(|id| id != item_id);
        Ok(item)
    }

    fn set_content(&mut self, thread_id: &str, item_id: &str, content: &str) -> Result<(), StoreError> {
        let thread = self.thread_mut(thread_id)?;
        let item = thread
            .items
            .get_mut(item_id)
            .ok_or_else(|| StoreError::ItemNotFound {
                thread_id: thread_id.to_string(),
                item_id: item_id.to_string(),
            })?;
        item.content = content.to_string();
        Ok(())
    }

    fn set_order(&mut self, thread_id: &str, order: Vec<String>) -> Result<(), StoreError> {
        self.thread_mut(thread_id)?.order = order;
        Ok(())
    }

    fn replace(&mut self, thread_id: &str, snapshot: ThreadSnapshot) {
        self.threads.insert(thread_id.to_string(), snapshot);
    }
}
