//! TTL eviction and disk-pressure pruning.

use chrono::{DateTime, Utc};
use preview_lock::{Coordinator, GLOBAL_LOCK};
use preview_runtime::{ContainerRuntime, HostResources, PruneSummary};
use preview_state::{StateError, StateStore};
use preview_types::{Result, Slug};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ReaperConfig;
use crate::provisioner::Provisioner;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub evicted: Vec<Slug>,
    pub retained: Vec<Slug>,
    /// Lock held by a concurrent operation.
    pub skipped_locked: Vec<Slug>,
    /// Record missing or unreadable; never auto-expired.
    pub skipped_invalid: Vec<Slug>,
    /// Eviction attempted and failed; retried next sweep.
    pub failed: Vec<Slug>,
    /// Disk usage observed under the global lock, if it was taken.
    pub disk_usage_percent: Option<f64>,
    pub pruned: Option<PruneSummary>,
}

impl SweepReport {
    pub fn examined(&self) -> usize {
        self.evicted.len()
            + self.retained.len()
            + self.skipped_locked.len()
            + self.skipped_invalid.len()
            + self.failed.len()
    }
}

enum Verdict {
    Evicted,
    Retained,
    Invalid,
    Failed,
}

/// Periodic reclamation.
#[derive(Clone)]
pub struct Reaper {
    coordinator: Coordinator,
    state: Arc<dyn StateStore>,
    provisioner: Provisioner,
    runtime: Arc<dyn ContainerRuntime>,
    host: Arc<dyn HostResources>,
    config: ReaperConfig,
    data_root: PathBuf,
}

impl Reaper {
    pub fn new(
        coordinator: Coordinator,
        state: Arc<dyn StateStore>,
        provisioner: Provisioner,
        runtime: Arc<dyn ContainerRuntime>,
        host: Arc<dyn HostResources>,
        config: ReaperConfig,
        data_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            coordinator,
            state,
            provisioner,
            runtime,
            host,
            config,
            data_root: data_root.into(),
        }
    }

    /// Evict expired environments, then prune images if the disk is under
    /// pressure. Per-environment failures are recorded and the sweep goes
    /// on; only failing to enumerate environments aborts it.
    #[tracing::instrument(skip_all)]
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// [`sweep`](Self::sweep) with an explicit clock.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let slugs = self.state.list().await?;
        debug!(environments = slugs.len(), "sweep started");

        for slug in slugs {
            let guard = match self.coordinator.try_acquire(&slug.lock_name()) {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    info!(slug = %slug, "environment busy; skipped");
                    report.skipped_locked.push(slug);
                    continue;
                }
                Err(e) => {
                    error!(slug = %slug, error = %e, "lock failure");
                    report.failed.push(slug);
                    continue;
                }
            };

            let verdict = self.examine(&slug, now).await;
            drop(guard);

            match verdict {
                Verdict::Evicted => report.evicted.push(slug),
                Verdict::Retained => report.retained.push(slug),
                Verdict::Invalid => report.skipped_invalid.push(slug),
                Verdict::Failed => report.failed.push(slug),
            }
        }

        self.relieve_disk_pressure(&mut report).await;

        info!(
            evicted = report.evicted.len(),
            retained = report.retained.len(),
            skipped = report.skipped_locked.len() + report.skipped_invalid.len(),
            failed = report.failed.len(),
            pruned = report.pruned.is_some(),
            "sweep finished"
        );
        Ok(report)
    }

    async fn examine(&self, slug: &Slug, now: DateTime<Utc>) -> Verdict {
        let record = match self.state.get(slug).await {
            Ok(record) => record,
            Err(StateError::NotFound(_)) => {
                warn!(slug = %slug, "no state record; skipped");
                return Verdict::Invalid;
            }
            Err(StateError::Corrupt { reason, .. }) => {
                warn!(slug = %slug, %reason, "unreadable state record; skipped");
                return Verdict::Invalid;
            }
            Err(e) => {
                error!(slug = %slug, error = %e, "state read failed");
                return Verdict::Failed;
            }
        };

        let age = record.age(now);
        if !record.is_expired(now, self.config.ttl()) {
            debug!(slug = %slug, age_hours = age.num_hours(), "retained");
            return Verdict::Retained;
        }

        info!(slug = %slug, age_hours = age.num_hours(), "TTL exceeded; evicting");
        match self.provisioner.teardown(slug).await {
            Ok(_) => Verdict::Evicted,
            Err(e) => {
                error!(slug = %slug, error = %e, "eviction failed");
                Verdict::Failed
            }
        }
    }

    async fn relieve_disk_pressure(&self, report: &mut SweepReport) {
        let _guard = match self
            .coordinator
            .acquire(GLOBAL_LOCK, self.config.global_lock_timeout())
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "global lock unavailable; pruning skipped");
                return;
            }
        };

        let usage = match self.host.disk_usage_percent(&self.data_root) {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "disk usage unavailable; pruning skipped");
                return;
            }
        };
        report.disk_usage_percent = Some(usage);

        if usage <= self.config.disk_threshold_percent {
            debug!(usage, threshold = self.config.disk_threshold_percent, "disk below threshold");
            return;
        }

        warn!(usage, threshold = self.config.disk_threshold_percent, "disk pressure; pruning images");
        match self.runtime.prune_images(self.config.prune_min_age()).await {
            Ok(summary) => {
                info!(
                    images_removed = summary.images_removed,
                    reclaimed = summary.reclaimed.as_deref().unwrap_or("unknown"),
                    "images pruned"
                );
                report.pruned = Some(summary);
            }
            Err(e) => error!(error = %e, "image prune failed"),
        }
    }
}
