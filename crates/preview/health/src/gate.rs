//! Readiness gate.

use parking_lot::Mutex;
use preview_runtime::{ContainerRuntime, UnitHealth};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// Result of waiting for a service to become healthy.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthOutcome {
    Healthy {
        attempts: u32,
        elapsed: Duration,
    },
    /// Attempt bound exhausted without a healthy report.
    Unhealthy {
        attempts: u32,
        /// Last status observed, if any probe succeeded at all.
        last_status: Option<UnitHealth>,
        /// Last probe error, if the final attempts failed outright.
        last_error: Option<String>,
    },
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            HealthOutcome::Healthy { attempts, .. } | HealthOutcome::Unhealthy { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Polls one designated service until it reports healthy.
#[derive(Clone)]
pub struct HealthGate {
    runtime: Arc<dyn ContainerRuntime>,
    policy: RetryPolicy,
}

impl HealthGate {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, policy: RetryPolicy) -> Self {
        Self { runtime, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[tracing::instrument(skip(self), fields(max_attempts = self.policy.max_attempts))]
    pub async fn await_healthy(&self, project: &str, service: &str) -> HealthOutcome {
        let start = Instant::now();
        let observed = Mutex::new(Observed::default());
        let runtime = &self.runtime;
        let observed_ref = &observed;

        let verdict = self
            .policy
            .poll(|attempt| async move {
                let probe = runtime.service_health(project, service).await;
                let mut last = observed_ref.lock();
                match probe {
                    Ok(UnitHealth::Healthy) => true,
                    Ok(status) => {
                        debug!(attempt, %status, "service not ready");
                        last.status = Some(status);
                        last.error = None;
                        false
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "health probe failed");
                        last.error = Some(e.to_string());
                        false
                    }
                }
            })
            .await;

        match verdict {
            Ok(attempts) => {
                let elapsed = start.elapsed();
                info!(attempts, elapsed_ms = elapsed.as_millis() as u64, "service healthy");
                HealthOutcome::Healthy { attempts, elapsed }
            }
            Err(exhausted) => {
                let Observed { status, error } = observed.into_inner();
                warn!(
                    attempts = exhausted.attempts,
                    last_status = ?status,
                    last_error = error.as_deref().unwrap_or(""),
                    "service never became healthy"
                );
                HealthOutcome::Unhealthy {
                    attempts: exhausted.attempts,
                    last_status: status,
                    last_error: error,
                }
            }
        }
    }
}

/// Last answer seen by the gate.
#[derive(Debug, Default)]
struct Observed {
    status: Option<UnitHealth>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use preview_runtime::testing::{FakeRuntime, RuntimeCall};
    use preview_runtime::StackSpec;

    async fn started(runtime: &FakeRuntime, project: &str) {
        runtime
            .up(&StackSpec {
                project: project.to_string(),
                compose_file: "/nonexistent/compose.yml".into(),
                workdir: "/nonexistent".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_after_starting() {
        let runtime = Arc::new(FakeRuntime::new(&[]));
        started(&runtime, "preview-a").await;
        runtime.script_health(
            "preview-a",
            [UnitHealth::Starting, UnitHealth::Starting, UnitHealth::Healthy],
        );

        let gate = HealthGate::new(runtime.clone(), RetryPolicy::fixed(10, Duration::from_secs(2)));
        let outcome = gate.await_healthy("preview-a", "web").await;
        assert_eq!(outcome.attempts(), 3);
        assert!(outcome.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_bound_when_never_healthy() {
        let runtime = Arc::new(FakeRuntime::new(&[]));
        started(&runtime, "preview-a").await;
        runtime.set_default_health(UnitHealth::Unhealthy);

        let gate = HealthGate::new(runtime.clone(), RetryPolicy::fixed(5, Duration::from_secs(2)));
        let outcome = gate.await_healthy("preview-a", "web").await;
        assert_eq!(
            outcome,
            HealthOutcome::Unhealthy {
                attempts: 5,
                last_status: Some(UnitHealth::Unhealthy),
                last_error: None,
            }
        );
        let probes = runtime
            .calls()
            .into_iter()
            .filter(|c| matches!(c, RuntimeCall::ServiceHealth { .. }))
            .count();
        assert_eq!(probes, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_schedule_is_shared_with_retry_policy() {
        let runtime = Arc::new(FakeRuntime::new(&[]));
        started(&runtime, "preview-a").await;
        runtime.set_default_health(UnitHealth::Starting);
        let policy = RetryPolicy::fixed(4, Duration::from_secs(1))
            .with_backoff(2.0, Duration::from_secs(3));

        let gate = HealthGate::new(runtime, policy);
        let before = tokio::time::Instant::now();
        let outcome = gate.await_healthy("preview-a", "web").await;
        assert_eq!(outcome.attempts(), 4);
        assert_eq!(before.elapsed(), policy.max_total_wait());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_healthcheck_is_not_healthy() {
        let runtime = Arc::new(FakeRuntime::new(&[]));
        started(&runtime, "preview-a").await;
        runtime.set_default_health(UnitHealth::NoHealthcheck);

        let gate = HealthGate::new(runtime, RetryPolicy::fixed(3, Duration::from_secs(1)));
        assert!(!gate.await_healthy("preview-a", "web").await.is_healthy());
    }
}
