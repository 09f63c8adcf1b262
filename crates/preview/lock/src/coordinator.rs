//! Scoped, bounded-wait acquisition on top of a [`LockManager`].

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{LockError, Result};
use crate::{LockGuard, LockManager};

/// Default delay between acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const POLL_JITTER_MS: u64 = 50;

/// Acquires named locks with a timeout and runs work under them.
#[derive(Clone)]
pub struct Coordinator {
    manager: Arc<dyn LockManager>,
    poll_interval: Duration,
}

impl Coordinator {
    pub fn new(manager: Arc<dyn LockManager>) -> Self {
        Self {
            manager,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Non-blocking attempt. `Ok(None)` means someone else holds the lock.
    pub fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>> {
        self.manager.try_acquire(name)
    }

    /// Poll with jitter until the lock is taken or `timeout` elapses.
    pub async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockGuard> {
        let start = Instant::now();
        loop {
            if let Some(guard) = self.manager.try_acquire(name)? {
                debug!(lock = %name, backend = self.manager.name(), waited_ms = start.elapsed().as_millis() as u64, "acquired lock");
                return Ok(guard);
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    name: name.to_string(),
                    waited,
                });
            }
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=POLL_JITTER_MS));
            let remaining = timeout - waited;
            tokio::time::sleep((self.poll_interval + jitter).min(remaining)).await;
        }
    }

    /// Run `f` while holding `name`. The lock is released on every exit
    /// path, including errors returned by `f`.
    pub async fn with_lock<F, Fut, T, E>(&self, name: &str, timeout: Duration, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<LockError>,
    {
        let _guard = self.acquire(name, timeout).await?;
        f().await
    }
}
