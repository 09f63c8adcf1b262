//! Lifecycle entry points: deploy, destroy, sweep, list and status.

use chrono::{DateTime, Utc};
use preview_health::{HealthGate, HealthOutcome};
use preview_lock::{Coordinator, FileLockManager, LockManager};
use preview_runtime::{
    ComposeRuntime, ContainerRuntime, DnsBinder, HostResources, HttpDnsBinder, NoopDnsBinder,
    SystemHost, UnitHealth,
};
use preview_state::{FileStateStore, StateError, StateStore};
use preview_types::{DeployMode, Environment, PreviewError, Result, Slug};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionController, QuotaSnapshot};
use crate::config::PreviewConfig;
use crate::error::io_error;
use crate::provisioner::{ProvisionRequest, Provisioned, Provisioner, TeardownReport};
use crate::reaper::{Reaper, SweepReport};
use crate::render::{TemplateRenderer, TemplateSource};

const MAX_COMMIT_LEN: usize = 64;
const MAX_TAG_LEN: usize = 128;

/// A deploy as received from a trigger, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployRequest {
    /// Explicit slug; derived from `branch` when absent.
    pub slug: Option<String>,
    pub branch: Option<String>,
    pub commit_sha: String,
    pub mode: DeployMode,
    pub registry: Option<String>,
    pub tag: Option<String>,
    pub reset_credential: bool,
}

impl DeployRequest {
    pub fn new(slug: impl Into<String>, commit_sha: impl Into<String>, mode: DeployMode) -> Self {
        Self {
            slug: Some(slug.into()),
            commit_sha: commit_sha.into(),
            mode,
            ..Self::default()
        }
    }

    /// Check every input that ends up in a path, a lock name or the
    /// rendered stack.
    pub fn validate(self) -> Result<ProvisionRequest> {
        let slug = match (&self.slug, &self.branch) {
            (Some(slug), _) => Slug::parse(slug)?,
            (None, Some(branch)) => Slug::from_branch(branch)?,
            (None, None) => {
                return Err(PreviewError::Validation(
                    "either a slug or a branch is required".into(),
                ))
            }
        };

        let commit = self.commit_sha.trim();
        if commit.is_empty()
            || commit.len() > MAX_COMMIT_LEN
            || !commit.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(PreviewError::Validation(format!(
                "invalid commit sha {:?}",
                self.commit_sha
            )));
        }

        let registry = non_empty(self.registry);
        if let Some(registry) = &registry {
            let valid = registry
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "._-:/".contains(c));
            if !valid {
                return Err(PreviewError::Validation(format!("invalid registry {registry:?}")));
            }
        }
        let tag = non_empty(self.tag);
        if let Some(tag) = &tag {
            let valid = tag.len() <= MAX_TAG_LEN
                && tag
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "._-".contains(c));
            if !valid {
                return Err(PreviewError::Validation(format!("invalid tag {tag:?}")));
            }
        }

        Ok(ProvisionRequest {
            slug,
            branch: non_empty(self.branch),
            commit_sha: commit.to_string(),
            mode: self.mode,
            registry,
            tag,
            reset_credential: self.reset_credential,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// One row of `list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentSummary {
    pub slug: Slug,
    pub environment: Option<Environment>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Why the record could not be read.
    pub problem: Option<String>,
}

/// Detail returned by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentStatus {
    pub environment: Environment,
    pub project: String,
    pub host: String,
    pub age_hours: i64,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
    /// `None` when the runtime could not be asked.
    pub health: Option<UnitHealth>,
    pub quota: Option<QuotaSnapshot>,
}

/// External systems the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub dns: Arc<dyn DnsBinder>,
    pub host: Arc<dyn HostResources>,
    pub locks: Arc<dyn LockManager>,
}

impl Collaborators {
    /// Production collaborators: docker compose, the configured DNS provider,
    /// the local host and `flock` locks under the data root.
    pub fn from_config(config: &PreviewConfig) -> Result<Self> {
        let dns: Arc<dyn DnsBinder> = if config.dns.enabled {
            Arc::new(
                HttpDnsBinder::new(config.dns.provider.clone())
                    .map_err(|e| PreviewError::Config(format!("dns provider: {e}")))?,
            )
        } else {
            Arc::new(NoopDnsBinder::new(config.dns.provider.zone_name.clone()))
        };
        Ok(Self {
            runtime: Arc::new(ComposeRuntime::new(config.compose.clone())),
            dns,
            host: Arc::new(SystemHost::new()),
            locks: Arc::new(FileLockManager::new(config.layout().locks_dir())),
        })
    }
}

/// Facade over admission, provisioning, health gating and reaping.
pub struct PreviewController {
    config: PreviewConfig,
    coordinator: Coordinator,
    runtime: Arc<dyn ContainerRuntime>,
    state: Arc<dyn StateStore>,
    admission: AdmissionController,
    provisioner: Provisioner,
    gate: HealthGate,
    reaper: Reaper,
}

impl PreviewController {
    /// Build with production collaborators.
    pub fn from_config(config: PreviewConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::new(config, collaborators)
    }

    /// Build with the stack template at `stack.template_path`, read on each
    /// deploy.
    pub fn new(config: PreviewConfig, collaborators: Collaborators) -> Result<Self> {
        let source = TemplateSource::File(config.stack.template_path.clone());
        Self::with_template(config, collaborators, source)
    }

    /// Build with an in-memory template, checked up front.
    pub fn with_renderer(
        config: PreviewConfig,
        collaborators: Collaborators,
        renderer: TemplateRenderer,
    ) -> Result<Self> {
        let controller = Self::with_template(config, collaborators, renderer.into())?;
        let variables = controller
            .provisioner
            .renderer()?
            .variables()
            .map_err(|e| PreviewError::Config(format!("stack template: {e}")))?;
        debug!(?variables, "stack template checked");
        Ok(controller)
    }

    fn with_template(
        config: PreviewConfig,
        collaborators: Collaborators,
        template: TemplateSource,
    ) -> Result<Self> {
        config.validate()?;

        let layout = config.layout();
        std::fs::create_dir_all(layout.root())
            .map_err(|e| io_error(&format!("create {}", layout.root().display()), e))?;

        let Collaborators {
            runtime,
            dns,
            host,
            locks,
        } = collaborators;
        let coordinator = Coordinator::new(locks).with_poll_interval(config.locks.poll_interval());
        let state: Arc<dyn StateStore> = Arc::new(FileStateStore::new(layout.envs_dir()));

        let admission = AdmissionController::new(
            coordinator.clone(),
            runtime.clone(),
            host.clone(),
            config.admission.clone(),
            layout.root(),
        );
        let provisioner = Provisioner::new(
            runtime.clone(),
            dns,
            state.clone(),
            template,
            layout.clone(),
            config.stack.clone(),
        )
        .with_ownership_label(config.admission.ownership_label.clone())
        .with_dns_verification(config.dns.verify_policy());
        let gate = HealthGate::new(runtime.clone(), config.health.policy());
        let reaper = Reaper::new(
            coordinator.clone(),
            state.clone(),
            provisioner.clone(),
            runtime.clone(),
            host,
            config.reaper.clone(),
            layout.root(),
        );

        Ok(Self {
            config,
            coordinator,
            runtime,
            state,
            admission,
            provisioner,
            gate,
            reaper,
        })
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    /// Validate, admit (fresh only), provision under the environment lock and
    /// gate on health. The record is written only once the stack is healthy;
    /// a failed start or health gate is rolled back before the error is
    /// returned.
    #[tracing::instrument(skip_all, fields(commit = %request.commit_sha))]
    pub async fn deploy(&self, request: DeployRequest) -> Result<Provisioned> {
        let request = request.validate()?;
        let slug = request.slug.clone();

        let mut mode = request.mode;
        if !mode.is_fresh() && self.previous(&slug).await?.is_none() {
            info!(slug = %slug, "no existing environment; deploying fresh");
            mode = DeployMode::Fresh;
        }
        let admitted = mode.is_fresh();
        if admitted {
            self.admission.admit(&slug, mode).await?.into_result()?;
        }

        let timeout = self.config.locks.mutation_timeout();
        self.coordinator
            .with_lock(&slug.lock_name(), timeout, || async move {
                let previous = self.previous(&request.slug).await?;
                let mode = match previous {
                    Some(_) => mode,
                    None if admitted => DeployMode::Fresh,
                    None => {
                        // Removed since the unlocked read; a fresh deploy
                        // still has to fit the quota.
                        info!(slug = %request.slug, "environment vanished; deploying fresh");
                        self.admission
                            .admit(&request.slug, DeployMode::Fresh)
                            .await?
                            .into_result()?;
                        DeployMode::Fresh
                    }
                };
                let request = ProvisionRequest { mode, ..request };
                self.deploy_locked(request, previous).await
            })
            .await
    }

    async fn deploy_locked(
        &self,
        request: ProvisionRequest,
        previous: Option<Environment>,
    ) -> Result<Provisioned> {
        let slug = request.slug.clone();
        let prepared = self.provisioner.prepare(request, previous)?;
        let project = prepared.project().to_string();

        let provisioned = match self.provisioner.start(prepared).await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                error!(slug = %slug, error = %e, "provisioning failed");
                return Err(self.rollback(&slug, e).await);
            }
        };

        match self
            .gate
            .await_healthy(&project, &self.config.stack.health_service)
            .await
        {
            HealthOutcome::Healthy { attempts, elapsed } => {
                if let Err(e) = self.provisioner.commit(&provisioned).await {
                    error!(slug = %slug, error = %e, "healthy environment could not be recorded");
                    return Err(self.rollback(&slug, e).await);
                }
                info!(
                    slug = %slug,
                    mode = %provisioned.mode,
                    host = %provisioned.host,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "environment live"
                );
                Ok(provisioned)
            }
            HealthOutcome::Unhealthy { attempts, .. } => {
                let cause = PreviewError::HealthCheckTimeout {
                    slug: slug.to_string(),
                    attempts,
                };
                Err(self.rollback(&slug, cause).await)
            }
        }
    }

    /// Remove every trace of a failed deploy and return the error to report:
    /// `cause` when the rollback completed, otherwise
    /// [`PreviewError::RollbackIncomplete`].
    async fn rollback(&self, slug: &Slug, cause: PreviewError) -> PreviewError {
        match self.provisioner.discard(slug).await {
            Ok(report) => {
                warn!(slug = %slug, warnings = report.warnings.len(), "rolled back");
                cause
            }
            Err(e) => {
                error!(slug = %slug, error = %e, "rollback incomplete; run destroy to remove the stack");
                PreviewError::RollbackIncomplete {
                    slug: slug.to_string(),
                    cause: cause.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Record for `slug`; unreadable records count as absent so a fresh
    /// deploy can replace them.
    async fn previous(&self, slug: &Slug) -> Result<Option<Environment>> {
        match self.state.get(slug).await {
            Ok(record) => Ok(Some(record)),
            Err(StateError::NotFound(_)) => Ok(None),
            Err(StateError::Corrupt { reason, .. }) => {
                warn!(slug = %slug, %reason, "unreadable state record");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tear an environment down completely. Succeeds when nothing is left.
    #[tracing::instrument(skip(self))]
    pub async fn destroy(&self, slug: &str) -> Result<TeardownReport> {
        let slug = Slug::parse(slug)?;
        let timeout = self.config.locks.mutation_timeout();
        self.coordinator
            .with_lock(&slug.lock_name(), timeout, || self.provisioner.teardown(&slug))
            .await
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.reaper.sweep().await
    }

    /// Every known environment, including unreadable ones.
    pub async fn list(&self) -> Result<Vec<EnvironmentSummary>> {
        let ttl = self.config.reaper.ttl();
        let mut summaries = Vec::new();
        for slug in self.state.list().await? {
            let summary = match self.state.get(&slug).await {
                Ok(record) => EnvironmentSummary {
                    expires_at: Some(record.updated_at + ttl),
                    environment: Some(record),
                    slug,
                    problem: None,
                },
                Err(e) => EnvironmentSummary {
                    slug,
                    environment: None,
                    expires_at: None,
                    problem: Some(e.to_string()),
                },
            };
            summaries.push(summary);
        }
        Ok(summaries)
    }

    pub async fn status(&self, slug: &str) -> Result<EnvironmentStatus> {
        let slug = Slug::parse(slug)?;
        let environment = self.state.get(&slug).await?;
        let project = self.provisioner.project_name(&slug);
        let now = Utc::now();
        let ttl = self.config.reaper.ttl();

        let health = match self
            .runtime
            .service_health(&project, &self.config.stack.health_service)
            .await
        {
            Ok(health) => Some(health),
            Err(e) => {
                warn!(slug = %slug, error = %e, "health query failed");
                None
            }
        };
        let quota = match self.admission.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "capacity query failed");
                None
            }
        };

        Ok(EnvironmentStatus {
            host: self.provisioner.host_name(&slug),
            project,
            age_hours: environment.age(now).num_hours(),
            expires_at: environment.updated_at + ttl,
            expired: environment.is_expired(now, ttl),
            environment,
            health,
            quota,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DeployRequest {
        DeployRequest::new("pr-1", "0123abcd", DeployMode::Fresh)
    }

    #[test]
    fn derives_slug_from_branch() {
        let req = DeployRequest {
            slug: None,
            branch: Some("Feature/Login_Page".into()),
            ..request()
        };
        let validated = req.validate().unwrap();
        assert_eq!(validated.slug.as_str(), "feature-login-page");
        assert_eq!(validated.branch.as_deref(), Some("Feature/Login_Page"));
    }

    #[test]
    fn rejects_bad_inputs() {
        let bad_slug = DeployRequest::new("PR_1", "abc", DeployMode::Fresh);
        assert!(matches!(bad_slug.validate(), Err(PreviewError::Validation(_))));

        let no_target = DeployRequest {
            slug: None,
            ..request()
        };
        assert!(matches!(no_target.validate(), Err(PreviewError::Validation(_))));

        let bad_commit = DeployRequest {
            commit_sha: "abc; rm -rf /".into(),
            ..request()
        };
        assert!(matches!(bad_commit.validate(), Err(PreviewError::Validation(_))));

        let bad_tag = DeployRequest {
            tag: Some("v1\n  privileged: true".into()),
            ..request()
        };
        assert!(matches!(bad_tag.validate(), Err(PreviewError::Validation(_))));
    }

    #[test]
    fn blank_optionals_are_absent() {
        let req = DeployRequest {
            registry: Some(String::new()),
            tag: Some("  ".into()),
            ..request()
        };
        let validated = req.validate().unwrap();
        assert!(validated.registry.is_none());
        assert!(validated.tag.is_none());
    }
}
