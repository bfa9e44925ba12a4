//! Key-value storage implementations

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::KeyValueStore;
use crate::error::PersonaError;

/// In-memory storage. Clones share entries, which lets a replay processor keep
/// one browser's storage alive across several page sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all entries
    pub fn entries(&self) -> HashMap<String, String> {
        self.entries.borrow().clone()
    }

    /// Replace all entries
    pub fn load(&self, entries: HashMap<String, String>) {
        *self.entries.borrow_mut() = entries;
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, PersonaError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersonaError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersonaError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Storage that rejects every access (disabled storage, `data:` pages,
/// private browsing)
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledStorage;

impl KeyValueStore for DisabledStorage {
    fn get(&self, _key: &str) -> Result<Option<String>, PersonaError> {
        Err(PersonaError::StorageError("storage is disabled".to_string()))
    }

    fn set(&mut self, _key: &str, _value: &str) -> Result<(), PersonaError> {
        Err(PersonaError::StorageError("storage is disabled".to_string()))
    }

    fn remove(&mut self, _key: &str) -> Result<(), PersonaError> {
        Err(PersonaError::StorageError("storage is disabled".to_string()))
    }
}
