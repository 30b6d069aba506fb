//! In-memory message store, used in tests and for throwaway sessions

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::message::Message;
use crate::store::{MessageStore, StoreError};

/// Messages kept in insertion order behind a mutex
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn messages(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageStore for MemoryStore {
    fn insert(&self, message: &Message) -> Result<(), StoreError> {
        let mut messages = self.messages();
        if messages.iter().any(|m| m.id == message.id) {
            return Err(StoreError::Conflict(message.id.clone()));
        }
        messages.push(message.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.messages().iter().rev().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Message, StoreError> {
        self.messages()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.messages().retain(|m| m.id != id);
        Ok(())
    }

    fn delete_all(&self) -> Result<(), StoreError> {
        self.messages().clear();
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.messages().len())
    }
}
