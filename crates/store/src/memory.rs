use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{Entries, ResultStore, StoreError, StoreScope};

/// Process-local store for tests and one-shot runs that need no persistence.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    scopes: Mutex<HashMap<StoreScope, Entries>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StoreScope, Entries>> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResultStore for MemoryResultStore {
    fn replace(&self, scope: StoreScope, entries: &Entries) -> Result<(), StoreError> {
        self.lock().insert(scope, entries.clone());
        Ok(())
    }

    fn get(&self, scope: StoreScope, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .lock()
            .get(&scope)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn entries(&self, scope: StoreScope) -> Result<Entries, StoreError> {
        Ok(self.lock().get(&scope).cloned().unwrap_or_default())
    }
}
