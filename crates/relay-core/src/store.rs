//! Message persistence collaborator.
//!
//! The core only needs to save messages; reading history back is for the
//! HTTP history endpoint. Live delivery never depends on the store: a
//! failed save is logged by the persistence loop and otherwise ignored.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::messages::ChatMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend cannot be reached right now.
    #[error("message store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the operation.
    #[error("message store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save_message(&self, msg: &ChatMessage) -> Result<(), StoreError>;

    /// All stored messages, oldest first.
    async fn chat_history(&self) -> Result<Vec<ChatMessage>, StoreError>;

    async fn delete_all_messages(&self) -> Result<(), StoreError>;
}

/// Process-local store keeping the most recent `limit` messages.
#[derive(Debug)]
pub struct InMemoryStore {
    messages: Mutex<VecDeque<ChatMessage>>,
    limit: Option<usize>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl InMemoryStore {
    /// `limit == 0` means keep everything.
    pub fn with_limit(limit: usize) -> Self {
        InMemoryStore {
            messages: Mutex::new(VecDeque::new()),
            limit: (limit > 0).then_some(limit),
        }
    }

    pub fn unbounded() -> Self {
        Self::with_limit(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<ChatMessage>>, StoreError> {
        self.messages
            .lock()
            .map_err(|_| StoreError::Backend("history lock poisoned".to_string()))
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save_message(&self, msg: &ChatMessage) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        guard.push_back(msg.clone());
        if let Some(limit) = self.limit {
            while guard.len() > limit {
                guard.pop_front();
            }
        }
        Ok(())
    }

    async fn chat_history(&self) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self.lock()?.iter().cloned().collect())
    }

    async fn delete_all_messages(&self) -> Result<(), StoreError> {
        self.lock()?.clear();
        Ok(())
    }
}
