//! Retry policy shared by readiness and DNS verification polling.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// Attempt bound plus delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub interval: Duration,
    /// Multiplier applied per further attempt; `None` keeps the interval fixed.
    pub backoff: Option<f64>,
    /// Cap for backed-off delays.
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(60, Duration::from_secs(2))
    }
}

/// Returned when every attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    pub attempts: u32,
    pub elapsed: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff: None,
            max_interval: interval,
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff = Some(multiplier.max(1.0));
        self.max_interval = max_interval.max(self.interval);
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            None => self.interval,
            Some(multiplier) => {
                let exponent = attempt.saturating_sub(1).min(64) as i32;
                let secs = self.interval.as_secs_f64() * multiplier.powi(exponent);
                Duration::from_secs_f64(secs.min(self.max_interval.as_secs_f64()))
            }
        }
    }

    /// Upper bound of time spent sleeping across all attempts.
    pub fn max_total_wait(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }

    /// Run `check` until it returns `true` or attempts run out.
    ///
    /// Returns the number of attempts used on success.
    pub async fn poll<F, Fut>(&self, mut check: F) -> Result<u32, Exhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = Instant::now();
        for attempt in 1..=self.max_attempts {
            if check(attempt).await {
                return Ok(attempt);
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.delay_after(attempt)).await;
            }
        }
        Err(Exhausted {
            attempts: self.max_attempts,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_bounds_total_wait_near_two_minutes() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 60);
        assert_eq!(policy.max_total_wait(), Duration::from_secs(118));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::fixed(10, Duration::from_secs(1))
            .with_backoff(2.0, Duration::from_secs(5));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(40), Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stops_on_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_secs(2));
        let used = policy
            .poll(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { attempt == 3 }
            })
            .await
            .unwrap();
        assert_eq!(used, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_exhausts() {
        let policy = RetryPolicy::fixed(4, Duration::from_secs(2));
        let err = policy.poll(|_| async { false }).await.unwrap_err();
        assert_eq!(err.attempts, 4);
    }
}
