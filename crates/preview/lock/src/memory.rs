//! Process-local locks.

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::{validate_lock_name, LockGuard, LockManager};

/// In-memory lock table. Only coordinates callers sharing this instance.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockManager {
    held: Arc<DashMap<String, ()>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.contains_key(name)
    }
}

struct Release {
    name: String,
    held: Arc<DashMap<String, ()>>,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.held.remove(&self.name);
    }
}

impl LockManager for InMemoryLockManager {
    fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>> {
        validate_lock_name(name)?;
        match self.held.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(None),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Some(LockGuard::new(
                    name,
                    Release {
                        name: name.to_string(),
                        held: Arc::clone(&self.held),
                    },
                )))
            }
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
