//! Stack provisioning and teardown.
//!
//! Provisioning is split in two: [`Provisioner::prepare`] resolves the image,
//! credential and rendered compose file without touching anything, and
//! [`Provisioner::start`] performs the side effects. A template or input
//! problem therefore never disturbs an environment that is already running.
//! The state record is written separately by [`Provisioner::commit`], once
//! the caller has seen the stack become healthy.
//!
//! Callers hold the per-environment lock around `start`, `commit`,
//! `teardown` and `discard`.

use chrono::Utc;
use preview_health::RetryPolicy;
use preview_runtime::{ContainerRuntime, DnsBinder, StackSpec};
use preview_state::atomic::write_atomic;
use preview_state::{CredentialStore, StateError, StateStore};
use preview_types::{Credential, DeployMode, Environment, ImageRef, PreviewError, Result, Slug};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{DataLayout, StackConfig};
use crate::error::{io_error, provisioning_error, runtime_error};
use crate::render::{Bindings, TemplateRenderer, TemplateSource, TemplateVar};

/// File name of the rendered stack inside the working directory.
pub const COMPOSE_FILE: &str = "docker-compose.yml";

const WORKDIR_MODE: u32 = 0o700;
const COMPOSE_FILE_MODE: u32 = 0o600;

/// One deploy, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub slug: Slug,
    /// Display name; defaults to the slug on first deploy.
    pub branch: Option<String>,
    pub commit_sha: String,
    pub mode: DeployMode,
    pub registry: Option<String>,
    pub tag: Option<String>,
    /// Generate a new credential even in update mode.
    pub reset_credential: bool,
}

/// Everything needed to start a stack, computed without side effects.
#[derive(Debug)]
pub struct PreparedStack {
    request: ProvisionRequest,
    previous: Option<Environment>,
    project: String,
    image: ImageRef,
    credential: Credential,
    compose: String,
}

impl PreparedStack {
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn mode(&self) -> DeployMode {
        self.request.mode
    }
}

/// A started environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provisioned {
    /// Record to persist once the environment is live.
    pub environment: Environment,
    pub mode: DeployMode,
    pub project: String,
    pub host: String,
    /// Whether a DNS record was created by this deploy.
    pub dns_bound: bool,
}

/// What a teardown removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub slug: String,
    pub credential_removed: bool,
    pub state_removed: bool,
    pub workdir_removed: bool,
    pub dns_removed: bool,
    /// Non-fatal problems, e.g. DNS provider errors.
    pub warnings: Vec<String>,
}

impl TeardownReport {
    /// Whether anything was left to remove.
    pub fn removed_anything(&self) -> bool {
        self.credential_removed || self.state_removed || self.workdir_removed
    }
}

/// What to do with the record when the stack refuses to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnStopFailure {
    /// Keep everything so destroy or sweep can retry.
    KeepRecord,
    /// Unregister anyway; the stack is left for a later destroy.
    Unregister,
}

/// Brings stacks up and down and keeps their records in step.
#[derive(Clone)]
pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    dns: Arc<dyn DnsBinder>,
    state: Arc<dyn StateStore>,
    credentials: CredentialStore,
    template: TemplateSource,
    ownership_label: Option<String>,
    layout: DataLayout,
    stack: StackConfig,
    dns_verify: Option<RetryPolicy>,
}

impl Provisioner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        dns: Arc<dyn DnsBinder>,
        state: Arc<dyn StateStore>,
        template: impl Into<TemplateSource>,
        layout: DataLayout,
        stack: StackConfig,
    ) -> Self {
        Self {
            runtime,
            dns,
            state,
            credentials: CredentialStore::new(layout.secrets_dir()),
            template: template.into(),
            ownership_label: None,
            layout,
            stack,
            dns_verify: None,
        }
    }

    /// Poll for the DNS record after creating it.
    pub fn with_dns_verification(mut self, policy: Option<RetryPolicy>) -> Self {
        self.dns_verify = policy;
        self
    }

    /// Refuse templates whose services do not all carry `label`.
    pub fn with_ownership_label(mut self, label: impl Into<String>) -> Self {
        self.ownership_label = Some(label.into());
        self
    }

    /// Load the stack template and check its services are owned.
    pub fn renderer(&self) -> Result<TemplateRenderer> {
        let renderer = self
            .template
            .load()
            .map_err(|e| PreviewError::Config(format!("stack template: {e}")))?;
        if let Some(label) = &self.ownership_label {
            renderer
                .check_ownership(label)
                .map_err(|e| PreviewError::Config(format!("stack template: {e}")))?;
        }
        Ok(renderer)
    }

    pub fn project_name(&self, slug: &Slug) -> String {
        self.stack.project_name(slug)
    }

    pub fn host_name(&self, slug: &Slug) -> String {
        self.dns.host_name(slug.as_str())
    }

    pub fn compose_path(&self, slug: &Slug) -> PathBuf {
        self.layout.work_dir(slug).join(COMPOSE_FILE)
    }

    /// Resolve image and credential and render the stack.
    ///
    /// Reads the template and, in update mode, the stored credential;
    /// writes nothing.
    pub fn prepare(
        &self,
        request: ProvisionRequest,
        previous: Option<Environment>,
    ) -> Result<PreparedStack> {
        let renderer = self.renderer()?;
        let image = ImageRef::resolve(
            request.registry.as_deref(),
            request.tag.as_deref(),
            previous.as_ref(),
            &self.stack.default_image(),
        );
        let credential = self.credential_for(&request)?;
        let secret = credential
            .get(&self.stack.credential_key)
            .unwrap_or_default()
            .to_string();

        let bindings = Bindings::new()
            .set(TemplateVar::Slug, request.slug.as_str())
            .set(TemplateVar::CommitSha, request.commit_sha.as_str())
            .set(TemplateVar::Credential, secret)
            .set(TemplateVar::Registry, image.registry.as_str())
            .set(TemplateVar::Tag, image.tag.as_str());
        let compose = renderer.render(&bindings)?;

        Ok(PreparedStack {
            project: self.project_name(&request.slug),
            request,
            previous,
            image,
            credential,
            compose,
        })
    }

    fn credential_for(&self, request: &ProvisionRequest) -> Result<Credential> {
        let key = &self.stack.credential_key;
        if request.mode.is_fresh() || request.reset_credential {
            return Ok(Credential::generate(key));
        }
        match self.credentials.load(&request.slug) {
            Ok(Some(stored)) if stored.get(key).is_some() => Ok(stored),
            Ok(_) => {
                warn!(slug = %request.slug, "no stored credential; generating a new one");
                Ok(Credential::generate(key))
            }
            Err(StateError::Corrupt { reason, .. }) => {
                warn!(slug = %request.slug, %reason, "unreadable credential; generating a new one");
                Ok(Credential::generate(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start a prepared stack.
    ///
    /// The returned record is not persisted; see [`Provisioner::commit`]. On
    /// failure the caller rolls back with [`Provisioner::discard`].
    #[tracing::instrument(skip_all, fields(slug = %prepared.request.slug, mode = %prepared.request.mode))]
    pub async fn start(&self, prepared: PreparedStack) -> Result<Provisioned> {
        let PreparedStack {
            request,
            previous,
            project,
            image,
            credential,
            compose,
        } = prepared;
        let slug = &request.slug;
        let workdir = self.layout.work_dir(slug);

        if request.mode.is_fresh() {
            self.runtime
                .down(&project, true)
                .await
                .map_err(|e| provisioning_error("remove previous stack", e))?;
            remove_dir(&workdir)?;
        } else {
            self.runtime
                .down(&project, false)
                .await
                .map_err(|e| provisioning_error("stop stack", e))?;
            let removed = self
                .runtime
                .remove_volume(&project, &self.stack.credential_volume)
                .await
                .map_err(|e| provisioning_error("reset credential volume", e))?;
            debug!(volume = %self.stack.credential_volume, removed, "credential volume reset");
        }

        create_private_dir(&workdir)?;
        let compose_file = workdir.join(COMPOSE_FILE);
        write_atomic(&compose_file, compose.as_bytes(), Some(COMPOSE_FILE_MODE))?;

        self.runtime
            .up(&StackSpec {
                project: project.clone(),
                compose_file,
                workdir,
            })
            .await
            .map_err(|e| provisioning_error("start stack", e))?;
        self.credentials.save(slug, &credential)?;

        let dns_bound = if request.mode.is_fresh() {
            self.bind_dns(slug).await
        } else {
            false
        };

        let now = Utc::now();
        let record = match &previous {
            Some(prev) if !request.mode.is_fresh() => {
                prev.refreshed(request.branch.as_deref(), request.commit_sha.as_str(), &image, now)
            }
            _ => Environment::created(
                slug.clone(),
                request
                    .branch
                    .clone()
                    .unwrap_or_else(|| slug.to_string()),
                request.commit_sha.as_str(),
                &image,
                now,
            ),
        };
        info!(
            project = %project,
            commit = %record.commit_sha,
            registry = %image.registry,
            tag = %image.tag,
            "stack started"
        );
        Ok(Provisioned {
            host: self.host_name(slug),
            environment: record,
            mode: request.mode,
            project,
            dns_bound,
        })
    }

    /// Persist the record of a started environment, marking it live.
    pub async fn commit(&self, provisioned: &Provisioned) -> Result<()> {
        let record = &provisioned.environment;
        self.state.put(&record.slug, record).await?;
        debug!(slug = %record.slug, updated_at = %record.updated_at, "environment recorded");
        Ok(())
    }

    /// [`prepare`](Self::prepare), [`start`](Self::start) and
    /// [`commit`](Self::commit) with no readiness check in between.
    pub async fn provision(
        &self,
        request: ProvisionRequest,
        previous: Option<Environment>,
    ) -> Result<Provisioned> {
        let prepared = self.prepare(request, previous)?;
        let provisioned = self.start(prepared).await?;
        self.commit(&provisioned).await?;
        Ok(provisioned)
    }

    async fn bind_dns(&self, slug: &Slug) -> bool {
        let label = slug.as_str();
        if let Err(e) = self.dns.create_record(label).await {
            warn!(slug = %slug, provider = self.dns.name(), error = %e, "DNS record creation failed");
            return false;
        }
        if let Some(policy) = &self.dns_verify {
            let dns = &self.dns;
            let verified = policy
                .poll(|_| async move { dns.record_exists(label).await.unwrap_or(false) })
                .await;
            match verified {
                Ok(attempts) => debug!(slug = %slug, attempts, "DNS record verified"),
                Err(exhausted) => warn!(
                    slug = %slug,
                    attempts = exhausted.attempts,
                    "DNS record not visible after verification"
                ),
            }
        }
        true
    }

    /// Remove stack, volumes, DNS record, credential, record and working
    /// directory. Absent pieces are skipped, so repeating a teardown is
    /// harmless.
    ///
    /// When the stack cannot be stopped the record is kept so a later
    /// destroy or sweep can retry.
    #[tracing::instrument(skip_all, fields(slug = %slug))]
    pub async fn teardown(&self, slug: &Slug) -> Result<TeardownReport> {
        self.remove(slug, OnStopFailure::KeepRecord).await
    }

    /// Roll back a failed deploy.
    ///
    /// Like [`teardown`](Self::teardown), except that the record and the
    /// credential are removed even when the stack cannot be stopped, so a
    /// failed environment never stays registered. The stop error is still
    /// returned.
    #[tracing::instrument(skip_all, fields(slug = %slug))]
    pub async fn discard(&self, slug: &Slug) -> Result<TeardownReport> {
        self.remove(slug, OnStopFailure::Unregister).await
    }

    async fn remove(&self, slug: &Slug, on_stop_failure: OnStopFailure) -> Result<TeardownReport> {
        let project = self.project_name(slug);
        let mut report = TeardownReport {
            slug: slug.to_string(),
            ..TeardownReport::default()
        };

        let stopped = self.runtime.down(&project, true).await;

        match self.dns.delete_record(slug.as_str()).await {
            Ok(()) => report.dns_removed = true,
            Err(e) => {
                warn!(provider = self.dns.name(), error = %e, "DNS record deletion failed");
                report.warnings.push(format!("dns: {e}"));
            }
        }

        if let Err(e) = stopped {
            if on_stop_failure == OnStopFailure::Unregister {
                self.credentials.delete(slug)?;
                self.state.delete(slug).await?;
                warn!(project = %project, "environment unregistered with its stack still present");
            }
            return Err(runtime_error("stop stack", e));
        }

        report.credential_removed = self.credentials.delete(slug)?;
        report.state_removed = self.state.delete(slug).await?;
        report.workdir_removed = remove_dir(&self.layout.work_dir(slug))?;

        info!(
            project = %project,
            state_removed = report.state_removed,
            warnings = report.warnings.len(),
            "environment torn down"
        );
        Ok(report)
    }
}

fn remove_dir(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(&format!("remove {}", path.display()), e)),
    }
}

fn create_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| io_error(&format!("create {}", path.display()), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(WORKDIR_MODE))
            .map_err(|e| io_error(&format!("chmod {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    let _ = WORKDIR_MODE;
    Ok(())
}
