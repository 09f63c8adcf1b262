//! Preview Runtime
//!
//! The external systems the lifecycle manager orchestrates, behind narrow
//! traits:
//!
//! - [`ContainerRuntime`]: multi-service stacks (`docker compose`)
//! - [`DnsBinder`]: host-name records for live environments
//! - [`HostResources`]: free disk/memory and disk usage of the data root
//!
//! Enable the `test-utils` feature for in-memory fakes of all three.

pub mod compose;
pub mod dns;
pub mod error;
pub mod host;
pub mod manifest;
#[cfg(feature = "test-utils")]
pub mod testing;

pub use compose::{ComposeConfig, ComposeRuntime};
pub use dns::{HttpDnsBinder, HttpDnsConfig, NoopDnsBinder};
pub use error::{Result, RuntimeError};
pub use host::SystemHost;
pub use manifest::{ComposeManifest, ManifestError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A rendered stack ready to be brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSpec {
    /// Compose project name; scopes containers, networks and volumes.
    pub project: String,
    /// Rendered compose file.
    pub compose_file: PathBuf,
    /// Working directory the stack is started from.
    pub workdir: PathBuf,
}

/// Readiness of one service as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitHealth {
    Healthy,
    Starting,
    Unhealthy,
    /// Running, but the service defines no healthcheck.
    NoHealthcheck,
    /// No container for the service.
    Missing,
}

impl UnitHealth {
    /// Map a `docker inspect` state/health string.
    pub fn from_status(status: &str) -> Self {
        match status.trim() {
            "healthy" => UnitHealth::Healthy,
            "starting" | "created" | "restarting" => UnitHealth::Starting,
            "unhealthy" | "exited" | "dead" | "paused" | "removing" => UnitHealth::Unhealthy,
            "running" => UnitHealth::NoHealthcheck,
            _ => UnitHealth::Missing,
        }
    }

    pub fn is_healthy(self) -> bool {
        matches!(self, UnitHealth::Healthy)
    }
}

impl fmt::Display for UnitHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitHealth::Healthy => "healthy",
            UnitHealth::Starting => "starting",
            UnitHealth::Unhealthy => "unhealthy",
            UnitHealth::NoHealthcheck => "no-healthcheck",
            UnitHealth::Missing => "missing",
        };
        f.write_str(s)
    }
}

/// Outcome of an image prune.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneSummary {
    pub images_removed: usize,
    /// Human-readable reclaimed space as reported by the runtime.
    pub reclaimed: Option<String>,
}

/// Container-stack runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start every service of the stack, detached.
    async fn up(&self, stack: &StackSpec) -> Result<()>;

    /// Stop and remove the project's containers; optionally its volumes.
    /// Succeeds for projects that do not exist.
    async fn down(&self, project: &str, remove_volumes: bool) -> Result<()>;

    /// Remove one named volume of the project. Returns whether it existed.
    async fn remove_volume(&self, project: &str, volume: &str) -> Result<bool>;

    /// Running units carrying `label` (`key=value`).
    async fn count_running(&self, label: &str) -> Result<usize>;

    /// Readiness of `service` within `project`.
    async fn service_health(&self, project: &str, service: &str) -> Result<UnitHealth>;

    /// Remove unreferenced images older than `older_than`. Never touches
    /// volumes.
    async fn prune_images(&self, older_than: Duration) -> Result<PruneSummary>;

    fn name(&self) -> &str;
}

/// DNS provider for per-environment host labels.
#[async_trait]
pub trait DnsBinder: Send + Sync {
    /// Create a record for `label`. Existing records are left as they are.
    async fn create_record(&self, label: &str) -> Result<()>;

    /// Delete records for `label`. Absent records are not an error.
    async fn delete_record(&self, label: &str) -> Result<()>;

    async fn record_exists(&self, label: &str) -> Result<bool>;

    /// Fully qualified host name for `label`.
    fn host_name(&self, label: &str) -> String;

    fn name(&self) -> &str;
}

/// Host capacity queries.
pub trait HostResources: Send + Sync {
    /// Bytes available to unprivileged users on the filesystem holding `path`.
    fn free_disk(&self, path: &Path) -> Result<u64>;

    /// Used percentage (0-100) of the filesystem holding `path`.
    fn disk_usage_percent(&self, path: &Path) -> Result<f64>;

    /// Available memory in bytes.
    fn free_memory(&self) -> Result<u64>;
}
