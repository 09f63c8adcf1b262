//! Preview Lock
//!
//! Named exclusive locks guarding lifecycle mutations.
//!
//! Two lock domains exist: a single `global` lock for admission and
//! disk-pressure decisions, and one lock per environment slug for every
//! state-mutating operation on that environment. Locks are never persisted;
//! a lock lives exactly as long as its [`LockGuard`], and a crashed process
//! releases its locks with its file descriptors.
//!
//! ## Backends
//!
//! - [`FileLockManager`]: advisory `flock` on files under a lock directory,
//!   coordinating separate processes on one host
//! - [`InMemoryLockManager`]: process-local, for embedding and tests

pub mod coordinator;
pub mod error;
pub mod file;
pub mod memory;

pub use coordinator::{Coordinator, DEFAULT_POLL_INTERVAL};
pub use error::{LockError, Result};
pub use file::FileLockManager;
pub use memory::InMemoryLockManager;

use std::any::Any;
use std::fmt;
use std::time::{Duration, Instant};

/// Name of the global admission/pruning lock.
pub const GLOBAL_LOCK: &str = "global";

/// A backend able to attempt exclusive acquisition of a named lock.
pub trait LockManager: Send + Sync {
    /// Try to take `name` without waiting.
    ///
    /// Returns `Ok(None)` when another holder owns the lock.
    fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Held lock. Dropping the guard releases the lock.
pub struct LockGuard {
    name: String,
    acquired_at: Instant,
    _handle: Box<dyn Any + Send + Sync>,
}

impl LockGuard {
    /// Wrap a backend handle whose drop releases the lock.
    pub fn new(name: impl Into<String>, handle: impl Any + Send + Sync) -> Self {
        Self {
            name: name.into(),
            acquired_at: Instant::now(),
            _handle: Box::new(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("held_for", &self.held_for())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        tracing::debug!(lock = %self.name, held_ms = self.held_for().as_millis() as u64, "released lock");
    }
}

/// Lock names end up as file names, so they share the slug alphabet.
pub(crate) fn validate_lock_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(LockError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_names() {
        assert!(validate_lock_name(GLOBAL_LOCK).is_ok());
        assert!(validate_lock_name("env-pr-12").is_ok());
        assert!(validate_lock_name("").is_err());
        assert!(validate_lock_name("../x").is_err());
        assert!(validate_lock_name("Env").is_err());
    }
}
