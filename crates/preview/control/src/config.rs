//! Lifecycle manager configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `PREVIEW__<SECTION>__<KEY>` environment overrides.

use preview_health::RetryPolicy;
use preview_runtime::{ComposeConfig, HttpDnsConfig};
use preview_types::{ImageRef, PreviewError, Result, Slug};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/preview/config.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PREVIEW";

const GIB: u64 = 1024 * 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Root for state, credentials, working directories and locks.
    pub data_root: PathBuf,
    pub admission: AdmissionConfig,
    pub locks: LockConfig,
    pub stack: StackConfig,
    pub health: HealthConfig,
    pub reaper: ReaperConfig,
    pub dns: DnsConfig,
    pub compose: ComposeConfig,
    pub logging: LoggingConfig,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/var/lib/preview"),
            admission: AdmissionConfig::default(),
            locks: LockConfig::default(),
            stack: StackConfig::default(),
            health: HealthConfig::default(),
            reaper: ReaperConfig::default(),
            dns: DnsConfig::default(),
            compose: ComposeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PreviewConfig {
    /// Load defaults, then `path` (required when given, otherwise the
    /// default location if present), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&PreviewConfig::default()).map_err(config_error)?;
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let loaded: PreviewConfig = config::Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|merged| merged.try_deserialize())
            .map_err(config_error)?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings no deploy could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.admission.max_environments == 0 {
            return Err(PreviewError::Config(
                "admission.max_environments must be at least 1".into(),
            ));
        }
        if self.admission.units_per_environment == 0 {
            return Err(PreviewError::Config(
                "admission.units_per_environment must be at least 1".into(),
            ));
        }
        if self.admission.ownership_label.trim().is_empty() {
            return Err(PreviewError::Config(
                "admission.ownership_label must not be empty".into(),
            ));
        }
        if self.stack.project_prefix.is_empty() {
            return Err(PreviewError::Config("stack.project_prefix must not be empty".into()));
        }
        if self.stack.health_service.is_empty() {
            return Err(PreviewError::Config("stack.health_service must not be empty".into()));
        }
        if !(0.0..=100.0).contains(&self.reaper.disk_threshold_percent) {
            return Err(PreviewError::Config(format!(
                "reaper.disk_threshold_percent out of range: {}",
                self.reaper.disk_threshold_percent
            )));
        }
        if self.dns.enabled && (self.dns.provider.zone_id.is_empty() || self.dns.provider.target.is_empty()) {
            return Err(PreviewError::Config(
                "dns.provider.zone_id and dns.provider.target are required when dns is enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_root)
    }
}

fn config_error(err: config::ConfigError) -> PreviewError {
    PreviewError::Config(err.to_string())
}

/// Admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub max_environments: usize,
    /// Running units one environment contributes to the runtime count.
    pub units_per_environment: usize,
    /// Label (`key=value`) every service of the stack template must carry;
    /// running units are counted by it.
    pub ownership_label: String,
    pub min_free_disk_bytes: u64,
    pub min_free_memory_bytes: u64,
    /// Bounded wait for the global lock.
    pub lock_timeout_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_environments: 3,
            units_per_environment: 5,
            ownership_label: "preview.managed=true".to_string(),
            min_free_disk_bytes: 5 * GIB,
            min_free_memory_bytes: GIB,
            lock_timeout_secs: 30,
        }
    }
}

impl AdmissionConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Per-environment lock wait for deploy, update and destroy.
    pub mutation_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            mutation_timeout_secs: 60,
            poll_interval_ms: 100,
        }
    }
}

impl LockConfig {
    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_secs(self.mutation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How one environment's stack is described and addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Compose template containing `${SLUG}`-style placeholders.
    pub template_path: PathBuf,
    /// Compose project name is `<project_prefix>-<slug>`.
    pub project_prefix: String,
    /// Service polled by the health gate.
    pub health_service: String,
    /// Volume holding the credential-bearing service's data.
    pub credential_volume: String,
    /// Key under which the generated credential is stored.
    pub credential_key: String,
    pub default_registry: String,
    pub default_tag: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from("/etc/preview/docker-compose.template.yml"),
            project_prefix: "preview".to_string(),
            health_service: "web".to_string(),
            credential_volume: "pgdata".to_string(),
            credential_key: "POSTGRES_PASSWORD".to_string(),
            default_registry: "registry.local".to_string(),
            default_tag: "latest".to_string(),
        }
    }
}

impl StackConfig {
    pub fn project_name(&self, slug: &Slug) -> String {
        format!("{}-{}", self.project_prefix, slug)
    }

    pub fn default_image(&self) -> ImageRef {
        ImageRef::new(&self.default_registry, &self.default_tag)
    }
}

/// Readiness polling schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub max_attempts: u32,
    pub interval_secs: u64,
    /// Multiplier per attempt; unset keeps the interval fixed.
    pub backoff: Option<f64>,
    pub max_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval_secs: 2,
            backoff: None,
            max_interval_secs: 10,
        }
    }
}

impl HealthConfig {
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(self.max_attempts, Duration::from_secs(self.interval_secs));
        match self.backoff {
            Some(multiplier) => {
                policy.with_backoff(multiplier, Duration::from_secs(self.max_interval_secs))
            }
            None => policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Idle time after which an environment is evicted.
    pub ttl_hours: u64,
    /// Pruning runs only when disk usage is strictly above this.
    pub disk_threshold_percent: f64,
    /// Minimum age of images removed by pruning.
    pub prune_min_age_hours: u64,
    pub global_lock_timeout_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 72,
            disk_threshold_percent: 80.0,
            prune_min_age_hours: 72,
            global_lock_timeout_secs: 30,
        }
    }
}

impl ReaperConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours as i64)
    }

    pub fn prune_min_age(&self) -> Duration {
        Duration::from_secs(self.prune_min_age_hours * 3600)
    }

    pub fn global_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.global_lock_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// When disabled, records are not managed and host names are derived
    /// from `provider.zone_name` only.
    pub enabled: bool,
    /// Poll for the created record after a fresh deploy.
    pub verify: bool,
    pub verify_attempts: u32,
    pub verify_interval_secs: u64,
    pub provider: HttpDnsConfig,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verify: false,
            verify_attempts: 10,
            verify_interval_secs: 3,
            provider: HttpDnsConfig::default(),
        }
    }
}

impl DnsConfig {
    /// Verification schedule, when verification is on.
    pub fn verify_policy(&self) -> Option<RetryPolicy> {
        self.verify.then(|| {
            RetryPolicy::fixed(self.verify_attempts, Duration::from_secs(self.verify_interval_secs))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Paths under the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn envs_dir(&self) -> PathBuf {
        self.root.join("envs")
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.root.join("secrets")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn work_dir(&self, slug: &Slug) -> PathBuf {
        self.root.join("work").join(slug.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PreviewConfig::default();
        config.validate().unwrap();
        assert_eq!(config.admission.min_free_disk_bytes, 5 * GIB);
        assert_eq!(config.health.policy().max_attempts, 60);
        assert_eq!(config.reaper.ttl(), chrono::Duration::hours(72));
        assert!(config.dns.verify_policy().is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
data_root = "/srv/preview"

[admission]
max_environments = 4

[health]
max_attempts = 10
backoff = 2.0
max_interval_secs = 8
"#
        )
        .unwrap();

        let config = PreviewConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/srv/preview"));
        assert_eq!(config.admission.max_environments, 4);
        assert_eq!(config.admission.units_per_environment, 5);
        let policy = config.health.policy();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.backoff, Some(2.0));
        assert_eq!(config.stack.project_prefix, "preview");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = PreviewConfig::load(Some(Path::new("/nonexistent/preview.toml"))).unwrap_err();
        assert!(matches!(err, PreviewError::Config(_)));
    }

    #[test]
    fn zero_quota_is_rejected() {
        let mut config = PreviewConfig::default();
        config.admission.max_environments = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_dns_needs_zone() {
        let mut config = PreviewConfig::default();
        config.dns.enabled = true;
        assert!(config.validate().is_err());
        config.dns.provider.zone_id = "zone".into();
        config.dns.provider.target = "203.0.113.10".into();
        config.validate().unwrap();
    }

    #[test]
    fn layout_and_naming() {
        let config = PreviewConfig::default();
        let slug = Slug::parse("pr-42").unwrap();
        let layout = DataLayout::new("/data");
        assert_eq!(layout.work_dir(&slug), PathBuf::from("/data/work/pr-42"));
        assert_eq!(layout.locks_dir(), PathBuf::from("/data/locks"));
        assert_eq!(config.stack.project_name(&slug), "preview-pr-42");
    }
}
