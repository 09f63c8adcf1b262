//! Admission control for fresh environments.
//!
//! Every decision is derived live from the container runtime and the host;
//! nothing is cached between calls. Admission is best effort: the global lock
//! serialises concurrent decisions but is released before provisioning, so it
//! is not a reservation.

use preview_lock::{Coordinator, LockError, GLOBAL_LOCK};
use preview_runtime::{ContainerRuntime, HostResources};
use preview_types::{DeployMode, PreviewError, ResourceKind, Result, Slug};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AdmissionConfig;
use crate::error::runtime_error;

/// Capacity observed at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    pub running_units: usize,
    /// `running_units / units_per_environment`, rounded down.
    pub environments: usize,
    pub max_environments: usize,
    pub free_disk_bytes: u64,
    pub free_memory_bytes: u64,
}

/// Why a fresh deploy was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    LockTimeout { waited: Duration },
    QuotaExceeded { running: usize, max: usize },
    ResourceInsufficient {
        resource: ResourceKind,
        available: u64,
        required: u64,
    },
}

impl From<DenyReason> for PreviewError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::LockTimeout { waited } => PreviewError::LockTimeout {
                lock: GLOBAL_LOCK.to_string(),
                waited,
            },
            DenyReason::QuotaExceeded { running, max } => {
                PreviewError::QuotaExceeded { running, max }
            }
            DenyReason::ResourceInsufficient {
                resource,
                available,
                required,
            } => PreviewError::ResourceInsufficient {
                resource,
                available,
                required,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow,
    Deny(DenyReason),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// `Ok(())` for `Allow`, the matching error otherwise.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(reason.into()),
        }
    }
}

/// Quota and host-capacity gate.
#[derive(Clone)]
pub struct AdmissionController {
    coordinator: Coordinator,
    runtime: Arc<dyn ContainerRuntime>,
    host: Arc<dyn HostResources>,
    config: AdmissionConfig,
    data_root: PathBuf,
}

impl AdmissionController {
    pub fn new(
        coordinator: Coordinator,
        runtime: Arc<dyn ContainerRuntime>,
        host: Arc<dyn HostResources>,
        config: AdmissionConfig,
        data_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            coordinator,
            runtime,
            host,
            config,
            data_root: data_root.into(),
        }
    }

    /// Decide whether `slug` may be deployed in `mode`.
    ///
    /// Errors are reserved for failures to observe capacity at all; a
    /// refusal is `Ok(Deny(..))`.
    #[tracing::instrument(skip_all, fields(slug = %slug, mode = %mode))]
    pub async fn admit(&self, slug: &Slug, mode: DeployMode) -> Result<AdmissionDecision> {
        let guard = match self
            .coordinator
            .acquire(GLOBAL_LOCK, self.config.lock_timeout())
            .await
        {
            Ok(guard) => guard,
            Err(LockError::Timeout { waited, .. }) => {
                warn!(waited_ms = waited.as_millis() as u64, "admission lock timed out");
                return Ok(AdmissionDecision::Deny(DenyReason::LockTimeout { waited }));
            }
            Err(e) => return Err(e.into()),
        };

        let decision = if mode == DeployMode::Update {
            debug!("update deploys bypass quota");
            AdmissionDecision::Allow
        } else {
            self.decide().await?
        };
        drop(guard);

        match &decision {
            AdmissionDecision::Allow => info!("admitted"),
            AdmissionDecision::Deny(reason) => info!(?reason, "denied"),
        }
        Ok(decision)
    }

    async fn decide(&self) -> Result<AdmissionDecision> {
        let snapshot = self.snapshot().await?;
        debug!(?snapshot, "capacity");

        if snapshot.environments >= self.config.max_environments {
            return Ok(AdmissionDecision::Deny(DenyReason::QuotaExceeded {
                running: snapshot.environments,
                max: self.config.max_environments,
            }));
        }
        if snapshot.free_disk_bytes < self.config.min_free_disk_bytes {
            return Ok(AdmissionDecision::Deny(DenyReason::ResourceInsufficient {
                resource: ResourceKind::Disk,
                available: snapshot.free_disk_bytes,
                required: self.config.min_free_disk_bytes,
            }));
        }
        if snapshot.free_memory_bytes < self.config.min_free_memory_bytes {
            return Ok(AdmissionDecision::Deny(DenyReason::ResourceInsufficient {
                resource: ResourceKind::Memory,
                available: snapshot.free_memory_bytes,
                required: self.config.min_free_memory_bytes,
            }));
        }
        Ok(AdmissionDecision::Allow)
    }

    /// Current capacity, queried fresh. Takes no lock.
    pub async fn snapshot(&self) -> Result<QuotaSnapshot> {
        let running_units = self
            .runtime
            .count_running(&self.config.ownership_label)
            .await
            .map_err(|e| runtime_error("count running units", e))?;
        let free_disk_bytes = self
            .host
            .free_disk(&self.data_root)
            .map_err(|e| runtime_error("free disk", e))?;
        let free_memory_bytes = self
            .host
            .free_memory()
            .map_err(|e| runtime_error("free memory", e))?;

        Ok(QuotaSnapshot {
            running_units,
            environments: running_units / self.config.units_per_environment.max(1),
            max_environments: self.config.max_environments,
            free_disk_bytes,
            free_memory_bytes,
        })
    }
}
