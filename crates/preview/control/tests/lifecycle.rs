//! End-to-end lifecycle tests against in-memory collaborators.

use chrono::{Duration as ChronoDuration, Utc};
use preview_control::{
    Collaborators, DataLayout, DeployMode, DeployRequest, PreviewConfig, PreviewController,
    PreviewError, Slug, TemplateRenderer,
};
use preview_lock::{FileLockManager, InMemoryLockManager, LockManager};
use preview_runtime::testing::{DnsCall, FakeDns, FakeHost, FakeRuntime, RuntimeCall};
use preview_runtime::UnitHealth;
use preview_state::{CredentialStore, FileStateStore, StateStore};
use std::sync::Arc;
use std::time::Duration;

const TEMPLATE: &str = r#"services:
  web:
    image: ${REGISTRY}/app:${TAG}
    labels:
      preview.managed: "true"
      preview.slug: ${SLUG}
    environment:
      APP_REVISION: ${COMMIT_SHA}
      DATABASE_URL: postgres://app:${CREDENTIAL}@db:5432/app
  worker:
    image: ${REGISTRY}/app:${TAG}
    command: ["worker"]
    labels:
      - preview.managed=true
  db:
    image: postgres:16
    labels:
      preview.managed: "true"
    environment:
      POSTGRES_PASSWORD: ${CREDENTIAL}
    volumes:
      - pgdata:/var/lib/postgresql/data
volumes:
  pgdata:
"#;

struct Harness {
    _dir: tempfile::TempDir,
    runtime: Arc<FakeRuntime>,
    dns: Arc<FakeDns>,
    host: Arc<FakeHost>,
    locks: Arc<dyn LockManager>,
    layout: DataLayout,
    controller: PreviewController,
}

impl Harness {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(configure: impl FnOnce(&mut PreviewConfig)) -> Self {
        Self::build(configure, |_| {
            Arc::new(InMemoryLockManager::new()) as Arc<dyn LockManager>
        })
    }

    fn build(
        configure: impl FnOnce(&mut PreviewConfig),
        locks: impl FnOnce(&DataLayout) -> Arc<dyn LockManager>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PreviewConfig::default();
        config.data_root = dir.path().join("data");
        config.admission.max_environments = 2;
        config.admission.units_per_environment = 3;
        config.admission.lock_timeout_secs = 1;
        config.locks.mutation_timeout_secs = 1;
        config.locks.poll_interval_ms = 5;
        config.health.max_attempts = 3;
        config.health.interval_secs = 0;
        config.reaper.global_lock_timeout_secs = 1;
        configure(&mut config);

        let layout = config.layout();
        let runtime = Arc::new(FakeRuntime::new(&["pgdata"]));
        let dns = Arc::new(FakeDns::new());
        let host = Arc::new(FakeHost::new());
        let locks = locks(&layout);

        let controller = PreviewController::with_renderer(
            config,
            Collaborators {
                runtime: runtime.clone(),
                dns: dns.clone(),
                host: host.clone(),
                locks: locks.clone(),
            },
            TemplateRenderer::new(TEMPLATE),
        )
        .unwrap();

        Self {
            _dir: dir,
            runtime,
            dns,
            host,
            locks,
            layout,
            controller,
        }
    }

    fn config(configure: impl FnOnce(&mut PreviewConfig)) -> (tempfile::TempDir, PreviewConfig) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PreviewConfig::default();
        config.data_root = dir.path().join("data");
        configure(&mut config);
        (dir, config)
    }

    fn fakes() -> Collaborators {
        Collaborators {
            runtime: Arc::new(FakeRuntime::new(&["pgdata"])),
            dns: Arc::new(FakeDns::new()),
            host: Arc::new(FakeHost::new()),
            locks: Arc::new(InMemoryLockManager::new()),
        }
    }

    fn state(&self) -> FileStateStore {
        FileStateStore::new(self.layout.envs_dir())
    }

    fn credentials(&self) -> CredentialStore {
        CredentialStore::new(self.layout.secrets_dir())
    }

    async fn deploy(&self, slug: &str, mode: DeployMode) -> Result<(), PreviewError> {
        self.controller
            .deploy(DeployRequest::new(slug, "c0ffee42", mode))
            .await
            .map(|_| ())
    }

    /// Rewrite the record of `slug` as if it was last deployed `hours` ago.
    async fn age(&self, slug: &str, hours: i64) {
        let slug = Slug::parse(slug).unwrap();
        let store = self.state();
        let mut record = store.get(&slug).await.unwrap();
        let then = Utc::now() - ChronoDuration::hours(hours);
        record.created_at = then;
        record.updated_at = then;
        store.put(&slug, &record).await.unwrap();
    }

    async fn has_record(&self, slug: &str) -> bool {
        self.state()
            .exists(&Slug::parse(slug).unwrap())
            .await
            .unwrap()
    }
}

fn slug(s: &str) -> Slug {
    Slug::parse(s).unwrap()
}

#[tokio::test]
async fn invalid_slug_has_no_side_effects() {
    let h = Harness::new();
    let too_long = "a".repeat(64);
    for bad in ["", "Feature_X", "pr 1", "../etc", too_long.as_str()] {
        let err = h.deploy(bad, DeployMode::Fresh).await.unwrap_err();
        assert!(matches!(err, PreviewError::Validation(_)), "{bad:?}: {err}");
        assert_eq!(err.exit_code(), 2);
    }
    assert!(h.runtime.calls().is_empty());
    assert!(h.dns.calls().is_empty());
    assert!(h.state().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn fresh_deploy_goes_live() {
    let h = Harness::new();
    let provisioned = h
        .controller
        .deploy(DeployRequest {
            branch: Some("feature/checkout".into()),
            ..DeployRequest::new("pr-1", "c0ffee42", DeployMode::Fresh)
        })
        .await
        .unwrap();

    assert_eq!(provisioned.project, "preview-pr-1");
    assert_eq!(provisioned.host, "pr-1.preview.test");
    assert!(h.runtime.is_running("preview-pr-1"));
    assert!(h.dns.has_record("pr-1"));

    let record = h.state().get(&slug("pr-1")).await.unwrap();
    assert_eq!(record.branch, "feature/checkout");
    assert_eq!(record.commit_sha, "c0ffee42");
    assert_eq!(record.created_at, record.updated_at);
}

#[tokio::test]
async fn state_record_is_camel_case_and_secret_free() {
    let h = Harness::new();
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();

    let raw = std::fs::read_to_string(h.state().record_path(&slug("pr-1"))).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    for key in ["branch", "slug", "commitSha", "createdAt", "updatedAt", "registry", "tag"] {
        assert!(json.get(key).is_some(), "missing {key}");
    }

    let credential = h.credentials().load(&slug("pr-1")).unwrap().unwrap();
    let secret = credential.get("POSTGRES_PASSWORD").unwrap();
    assert!(!raw.contains(secret));
    assert!(h.runtime.rendered("preview-pr-1").unwrap().contains(secret));
}

#[tokio::test]
async fn third_fresh_environment_exceeds_quota() {
    let h = Harness::new();
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    h.deploy("pr-2", DeployMode::Fresh).await.unwrap();

    let err = h.deploy("pr-3", DeployMode::Fresh).await.unwrap_err();
    assert!(matches!(err, PreviewError::QuotaExceeded { running: 2, max: 2 }));
    assert_eq!(err.exit_code(), 3);
    assert!(!h.runtime.calls().contains(&RuntimeCall::Up("preview-pr-3".into())));
    assert!(!h.has_record("pr-3").await);

    h.deploy("pr-1", DeployMode::Update).await.unwrap();
}

#[tokio::test]
async fn quota_counts_units_started_elsewhere() {
    let h = Harness::new();
    h.runtime.set_external_units(6);
    let err = h.deploy("pr-1", DeployMode::Fresh).await.unwrap_err();
    assert!(matches!(err, PreviewError::QuotaExceeded { .. }));
}

#[tokio::test]
async fn low_disk_denies_fresh_deploy() {
    let h = Harness::new();
    h.host.set_free_disk(1024);
    let err = h.deploy("pr-1", DeployMode::Fresh).await.unwrap_err();
    assert!(matches!(err, PreviewError::ResourceInsufficient { .. }));
    assert_eq!(err.exit_code(), 4);
    assert!(h.runtime.calls().iter().all(|c| matches!(c, RuntimeCall::CountRunning(_))));
}

#[tokio::test]
async fn update_preserves_created_at_and_credential_without_dns() {
    let h = Harness::new();
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    let before = h.state().get(&slug("pr-1")).await.unwrap();
    let credential = h.credentials().load(&slug("pr-1")).unwrap().unwrap();
    assert_eq!(h.dns.create_count(), 1);

    let provisioned = h
        .controller
        .deploy(DeployRequest {
            tag: Some("v2".into()),
            ..DeployRequest::new("pr-1", "deadbeef", DeployMode::Update)
        })
        .await
        .unwrap();

    let after = h.state().get(&slug("pr-1")).await.unwrap();
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at >= before.updated_at);
    assert_eq!(after.commit_sha, "deadbeef");
    assert_eq!(after.tag.as_deref(), Some("v2"));
    assert_eq!(after.registry, before.registry);
    assert_eq!(provisioned.environment, after);

    assert_eq!(h.credentials().load(&slug("pr-1")).unwrap().unwrap(), credential);
    assert_eq!(h.dns.create_count(), 1);
    assert!(h.runtime.calls().contains(&RuntimeCall::RemoveVolume {
        project: "preview-pr-1".into(),
        volume: "pgdata".into(),
    }));
}

#[tokio::test]
async fn update_of_unknown_environment_is_admitted_as_fresh() {
    let h = Harness::new();
    h.runtime.set_external_units(6);
    let err = h.deploy("pr-9", DeployMode::Update).await.unwrap_err();
    assert!(matches!(err, PreviewError::QuotaExceeded { .. }));

    h.runtime.set_external_units(0);
    let provisioned = h
        .controller
        .deploy(DeployRequest::new("pr-9", "c0ffee42", DeployMode::Update))
        .await
        .unwrap();
    assert_eq!(provisioned.mode, DeployMode::Fresh);
    assert!(h.dns.has_record("pr-9"));
}

#[tokio::test]
async fn failed_health_gate_rolls_back_everything() {
    let h = Harness::new();
    h.runtime.set_default_health(UnitHealth::Unhealthy);

    let err = h.deploy("pr-1", DeployMode::Fresh).await.unwrap_err();
    assert!(matches!(err, PreviewError::HealthCheckTimeout { attempts: 3, .. }));
    assert_eq!(err.exit_code(), 7);

    assert!(!h.has_record("pr-1").await);
    assert!(!h.dns.has_record("pr-1"));
    assert!(!h.runtime.is_running("preview-pr-1"));
    assert!(!h.runtime.has_volume("preview-pr-1", "pgdata"));
    assert!(h.credentials().load(&slug("pr-1")).unwrap().is_none());
    assert!(!h.layout.work_dir(&slug("pr-1")).exists());
}

#[tokio::test]
async fn service_without_healthcheck_never_goes_live() {
    let h = Harness::new();
    h.runtime.set_default_health(UnitHealth::NoHealthcheck);
    let err = h.deploy("pr-1", DeployMode::Fresh).await.unwrap_err();
    assert!(matches!(err, PreviewError::HealthCheckTimeout { .. }));
}

#[tokio::test]
async fn failed_start_reports_diagnostics_and_rolls_back() {
    let h = Harness::new();
    h.runtime.fail_up("manifest for registry.local/app:latest not found");

    let err = h.deploy("pr-1", DeployMode::Fresh).await.unwrap_err();
    match &err {
        PreviewError::Provisioning { diagnostics, .. } => {
            assert!(diagnostics.as_deref().unwrap().contains("manifest"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.exit_code(), 6);
    assert!(!h.has_record("pr-1").await);
    assert_eq!(h.dns.create_count(), 0);
}

#[tokio::test]
async fn sweep_evicts_only_expired_environments() {
    let h = Harness::new();
    h.deploy("pr-old", DeployMode::Fresh).await.unwrap();
    h.deploy("pr-new", DeployMode::Fresh).await.unwrap();
    h.age("pr-old", 73).await;
    h.age("pr-new", 71).await;

    let report = h.controller.sweep().await.unwrap();
    assert_eq!(report.evicted, vec![slug("pr-old")]);
    assert_eq!(report.retained, vec![slug("pr-new")]);

    assert!(!h.has_record("pr-old").await);
    assert!(!h.runtime.is_running("preview-pr-old"));
    assert!(!h.dns.has_record("pr-old"));
    assert!(h.has_record("pr-new").await);
    assert!(h.runtime.is_running("preview-pr-new"));
}

#[tokio::test]
async fn sweep_skips_locked_environment() {
    let h = Harness::new();
    h.deploy("pr-old", DeployMode::Fresh).await.unwrap();
    h.age("pr-old", 100).await;

    let held = h.locks.try_acquire(&slug("pr-old").lock_name()).unwrap().unwrap();
    let report = h.controller.sweep().await.unwrap();
    assert_eq!(report.skipped_locked, vec![slug("pr-old")]);
    assert!(report.evicted.is_empty());
    assert!(h.has_record("pr-old").await);
    assert!(h.runtime.is_running("preview-pr-old"));

    drop(held);
    let report = h.controller.sweep().await.unwrap();
    assert_eq!(report.evicted, vec![slug("pr-old")]);
}

#[tokio::test]
async fn sweep_skips_unreadable_records() {
    let h = Harness::new();
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    let path = h.state().record_path(&slug("pr-1"));
    std::fs::write(&path, r#"{"slug":"pr-1","branch":"x"}"#).unwrap();

    let report = h.controller.sweep().await.unwrap();
    assert_eq!(report.skipped_invalid, vec![slug("pr-1")]);
    assert!(path.exists());
    assert!(h.runtime.is_running("preview-pr-1"));
}

#[tokio::test]
async fn sweep_continues_past_failed_eviction() {
    let h = Harness::new();
    h.deploy("pr-a", DeployMode::Fresh).await.unwrap();
    h.deploy("pr-b", DeployMode::Fresh).await.unwrap();
    h.age("pr-a", 80).await;
    h.age("pr-b", 80).await;
    h.runtime.fail_down("preview-pr-a");

    let report = h.controller.sweep().await.unwrap();
    assert_eq!(report.failed, vec![slug("pr-a")]);
    assert_eq!(report.evicted, vec![slug("pr-b")]);
    assert!(h.has_record("pr-a").await);
}

#[tokio::test]
async fn pruning_only_above_threshold() {
    let h = Harness::new();

    h.host.set_disk_usage_percent(80.0);
    let report = h.controller.sweep().await.unwrap();
    assert_eq!(h.runtime.prune_count(), 0);
    assert_eq!(report.disk_usage_percent, Some(80.0));
    assert!(report.pruned.is_none());

    h.host.set_disk_usage_percent(80.5);
    let report = h.controller.sweep().await.unwrap();
    assert_eq!(h.runtime.prune_count(), 1);
    assert!(report.pruned.is_some());
    assert!(h
        .runtime
        .calls()
        .contains(&RuntimeCall::PruneImages(std::time::Duration::from_secs(72 * 3600))));
}

#[tokio::test]
async fn pruning_skipped_while_global_lock_held() {
    let h = Harness::new();
    h.host.set_disk_usage_percent(95.0);
    let _held = h.locks.try_acquire("global").unwrap().unwrap();

    let report = h.controller.sweep().await.unwrap();
    assert_eq!(h.runtime.prune_count(), 0);
    assert!(report.disk_usage_percent.is_none());
}

#[tokio::test]
async fn destroy_is_idempotent() {
    let h = Harness::new();
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();

    let first = h.controller.destroy("pr-1").await.unwrap();
    assert!(first.state_removed);
    assert!(!h.runtime.is_running("preview-pr-1"));
    assert!(!h.dns.has_record("pr-1"));
    assert!(h.credentials().load(&slug("pr-1")).unwrap().is_none());

    let second = h.controller.destroy("pr-1").await.unwrap();
    assert!(!second.removed_anything());
    h.controller.destroy("never-existed").await.unwrap();
}

#[tokio::test]
async fn destroy_times_out_on_held_lock() {
    let h = Harness::new();
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    let _held = h.locks.try_acquire("env-pr-1").unwrap().unwrap();

    let err = h.controller.destroy("pr-1").await.unwrap_err();
    assert!(matches!(err, PreviewError::LockTimeout { ref lock, .. } if lock == "env-pr-1"));
    assert_eq!(err.exit_code(), 5);
    assert!(h.has_record("pr-1").await);
}

#[tokio::test]
async fn dns_verification_polls_for_record() {
    let h = Harness::with(|config| {
        config.dns.verify = true;
        config.dns.verify_attempts = 2;
        config.dns.verify_interval_secs = 0;
    });
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    assert!(h.dns.calls().contains(&DnsCall::Exists("pr-1".into())));
}

#[tokio::test]
async fn dns_outage_does_not_fail_deploy() {
    let h = Harness::new();
    h.dns.set_failing(true);
    let provisioned = h
        .controller
        .deploy(DeployRequest::new("pr-1", "c0ffee42", DeployMode::Fresh))
        .await
        .unwrap();
    assert!(!provisioned.dns_bound);
    assert!(h.has_record("pr-1").await);
}

#[tokio::test]
async fn list_and_status() {
    let h = Harness::new();
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    h.deploy("pr-2", DeployMode::Fresh).await.unwrap();
    h.age("pr-2", 80).await;

    let listed = h.controller.list().await.unwrap();
    let slugs: Vec<&str> = listed.iter().map(|s| s.slug.as_str()).collect();
    assert_eq!(slugs, vec!["pr-1", "pr-2"]);
    assert!(listed.iter().all(|s| s.problem.is_none()));

    let status = h.controller.status("pr-2").await.unwrap();
    assert!(status.expired);
    assert_eq!(status.age_hours, 80);
    assert_eq!(status.health, Some(UnitHealth::Healthy));
    assert_eq!(status.quota.unwrap().environments, 2);

    let err = h.controller.status("pr-3").await.unwrap_err();
    assert!(matches!(err, PreviewError::NotFound(_)));
}

#[tokio::test]
async fn file_locks_coordinate_with_other_holders() {
    let h = Harness::build(
        |_| {},
        |layout| Arc::new(FileLockManager::new(layout.locks_dir())) as Arc<dyn LockManager>,
    );
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    h.age("pr-1", 100).await;

    let other = FileLockManager::new(h.layout.locks_dir());
    let held = other.try_acquire("env-pr-1").unwrap().unwrap();
    let report = h.controller.sweep().await.unwrap();
    assert_eq!(report.skipped_locked, vec![slug("pr-1")]);

    drop(held);
    let report = h.controller.sweep().await.unwrap();
    assert_eq!(report.evicted, vec![slug("pr-1")]);
}

#[tokio::test]
async fn unhealthy_environment_is_not_listed_while_gated() {
    let h = Harness::with(|config| config.health.interval_secs = 1);
    h.runtime.set_default_health(UnitHealth::Starting);

    let observe = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.runtime.is_running("preview-pr-1"));
        let listed = h.controller.list().await.unwrap();
        let status = h.controller.status("pr-1").await;
        (listed, status)
    };
    let (result, (listed, status)) = tokio::join!(h.deploy("pr-1", DeployMode::Fresh), observe);

    assert!(listed.is_empty(), "{listed:?}");
    assert!(matches!(status, Err(PreviewError::NotFound(_))));
    assert!(matches!(result, Err(PreviewError::HealthCheckTimeout { .. })));
    assert!(!h.has_record("pr-1").await);
}

#[tokio::test]
async fn update_keeps_previous_record_until_healthy() {
    let h = Harness::with(|config| config.health.interval_secs = 1);
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    let before = h.state().get(&slug("pr-1")).await.unwrap();
    h.runtime.script_health("preview-pr-1", [UnitHealth::Starting, UnitHealth::Healthy]);

    let observe = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.state().get(&slug("pr-1")).await.unwrap()
    };
    let update = h
        .controller
        .deploy(DeployRequest::new("pr-1", "deadbeef", DeployMode::Update));
    let (result, during) = tokio::join!(update, observe);

    assert_eq!(during, before);
    let after = result.unwrap().environment;
    assert_eq!(after.commit_sha, "deadbeef");
    assert_eq!(h.state().get(&slug("pr-1")).await.unwrap(), after);
}

#[tokio::test]
async fn rollback_that_cannot_stop_the_stack_still_unregisters() {
    let h = Harness::with(|config| config.health.interval_secs = 1);
    h.runtime.set_default_health(UnitHealth::Unhealthy);

    let break_runtime = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.runtime.fail_down("preview-pr-1");
    };
    let (result, ()) = tokio::join!(h.deploy("pr-1", DeployMode::Fresh), break_runtime);

    let err = result.unwrap_err();
    assert!(
        matches!(err, PreviewError::RollbackIncomplete { ref slug, .. } if slug == "pr-1"),
        "{err}"
    );
    assert!(!err.to_string().contains("rolled back"));
    assert!(!h.has_record("pr-1").await);
    assert!(h.credentials().load(&slug("pr-1")).unwrap().is_none());
    assert!(h.runtime.is_running("preview-pr-1"));

    let report = h.controller.sweep().await.unwrap();
    assert_eq!(report.examined(), 0);

    h.runtime.allow_down("preview-pr-1");
    h.controller.destroy("pr-1").await.unwrap();
    assert!(!h.runtime.is_running("preview-pr-1"));
}

#[tokio::test]
async fn update_of_vanished_environment_is_admitted() {
    let h = Harness::new();
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    h.deploy("pr-2", DeployMode::Fresh).await.unwrap();

    let held = h.locks.try_acquire("env-pr-1").unwrap().unwrap();
    let vanish = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Record gone but the fleet is full.
        h.state().delete(&slug("pr-1")).await.unwrap();
        drop(held);
    };
    let (result, ()) = tokio::join!(h.deploy("pr-1", DeployMode::Update), vanish);

    let err = result.unwrap_err();
    assert!(matches!(err, PreviewError::QuotaExceeded { .. }), "{err}");
    assert!(!h.has_record("pr-1").await);
}

#[tokio::test]
async fn template_with_unowned_service_is_rejected() {
    let (_dir, config) = Harness::config(|_| {});
    let template = TemplateRenderer::new(
        "services:\n  web:\n    image: ${REGISTRY}/app:${TAG}\n    labels: [preview.managed=true]\n  db:\n    image: postgres:16\n",
    );
    let err = PreviewController::with_renderer(config, Harness::fakes(), template)
        .err()
        .unwrap();
    assert!(matches!(err, PreviewError::Config(ref m) if m.contains("db")), "{err}");
}

#[tokio::test]
async fn quota_counts_only_labelled_units() {
    let h = Harness::new();
    h.deploy("pr-1", DeployMode::Fresh).await.unwrap();
    let snapshot = h.controller.admission().snapshot().await.unwrap();
    assert_eq!(snapshot.running_units, 3);
    assert_eq!(snapshot.environments, 1);
}

#[tokio::test]
async fn missing_template_only_blocks_deploy() {
    let (dir, mut config) = Harness::config(|_| {});
    config.stack.template_path = dir.path().join("absent.yml");
    let controller = PreviewController::new(config, Harness::fakes()).unwrap();

    assert!(controller.list().await.unwrap().is_empty());
    controller.sweep().await.unwrap();
    controller.destroy("pr-1").await.unwrap();

    let err = controller
        .deploy(DeployRequest::new("pr-1", "c0ffee42", DeployMode::Fresh))
        .await
        .unwrap_err();
    assert!(matches!(err, PreviewError::Config(ref m) if m.contains("absent.yml")), "{err}");
}
