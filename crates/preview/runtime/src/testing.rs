//! In-memory collaborators for tests.
//!
//! The fakes record every call so tests can assert on side effects (or their
//! absence) without a docker daemon or DNS provider.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, RuntimeError};
use crate::manifest::ComposeManifest;
use crate::{ContainerRuntime, DnsBinder, HostResources, PruneSummary, StackSpec, UnitHealth};

/// A call observed by [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Up(String),
    Down { project: String, volumes: bool },
    RemoveVolume { project: String, volume: String },
    CountRunning(String),
    ServiceHealth { project: String, service: String },
    PruneImages(Duration),
}

#[derive(Debug, Clone, Default)]
struct FakeStack {
    running: bool,
    rendered: String,
}

#[derive(Debug, Default)]
struct RuntimeState {
    stacks: HashMap<String, FakeStack>,
    volumes: BTreeSet<(String, String)>,
    external_units: usize,
    health: HashMap<String, VecDeque<UnitHealth>>,
    default_health: Option<UnitHealth>,
    fail_up: Option<String>,
    fail_down: BTreeSet<String>,
    calls: Vec<RuntimeCall>,
}

/// Fake container runtime.
///
/// A running stack contributes one unit per service of its compose file
/// that carries the queried label, just as `docker ps --filter label=...`
/// would. Labelled units this process never started can be injected with
/// [`FakeRuntime::set_external_units`].
#[derive(Debug)]
pub struct FakeRuntime {
    volumes_per_stack: Vec<String>,
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new(volumes_per_stack: &[&str]) -> Self {
        Self {
            volumes_per_stack: volumes_per_stack.iter().map(|v| v.to_string()).collect(),
            state: Mutex::new(RuntimeState {
                default_health: Some(UnitHealth::Healthy),
                ..RuntimeState::default()
            }),
        }
    }

    pub fn set_external_units(&self, units: usize) {
        self.state.lock().external_units = units;
    }

    /// Health reported once the per-project script is exhausted.
    pub fn set_default_health(&self, health: UnitHealth) {
        self.state.lock().default_health = Some(health);
    }

    /// Queue health answers for one project, consumed in order.
    pub fn script_health(&self, project: &str, answers: impl IntoIterator<Item = UnitHealth>) {
        self.state
            .lock()
            .health
            .insert(project.to_string(), answers.into_iter().collect());
    }

    /// Make every `up` fail with `output` as diagnostics.
    pub fn fail_up(&self, output: impl Into<String>) {
        self.state.lock().fail_up = Some(output.into());
    }

    pub fn fail_down(&self, project: &str) {
        self.state.lock().fail_down.insert(project.to_string());
    }

    /// Undo [`FakeRuntime::fail_down`].
    pub fn allow_down(&self, project: &str) {
        self.state.lock().fail_down.remove(project);
    }

    pub fn is_running(&self, project: &str) -> bool {
        self.state
            .lock()
            .stacks
            .get(project)
            .map(|s| s.running)
            .unwrap_or(false)
    }

    pub fn has_volume(&self, project: &str, volume: &str) -> bool {
        self.state
            .lock()
            .volumes
            .contains(&(project.to_string(), volume.to_string()))
    }

    /// Compose file contents seen by the last `up` of `project`.
    pub fn rendered(&self, project: &str) -> Option<String> {
        self.state
            .lock()
            .stacks
            .get(project)
            .map(|s| s.rendered.clone())
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    pub fn prune_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RuntimeCall::PruneImages(_)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn up(&self, stack: &StackSpec) -> Result<()> {
        let rendered = std::fs::read_to_string(&stack.compose_file).unwrap_or_default();
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Up(stack.project.clone()));
        if let Some(output) = state.fail_up.clone() {
            return Err(RuntimeError::CommandFailed {
                command: format!("compose up {}", stack.project),
                status: "exit status: 1".to_string(),
                output,
            });
        }
        state.stacks.insert(
            stack.project.clone(),
            FakeStack {
                running: true,
                rendered,
            },
        );
        for volume in &self.volumes_per_stack {
            state
                .volumes
                .insert((stack.project.clone(), volume.clone()));
        }
        Ok(())
    }

    async fn down(&self, project: &str, remove_volumes: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Down {
            project: project.to_string(),
            volumes: remove_volumes,
        });
        if state.fail_down.contains(project) {
            return Err(RuntimeError::CommandFailed {
                command: format!("compose down {project}"),
                status: "exit status: 1".to_string(),
                output: "daemon unavailable".to_string(),
            });
        }
        if let Some(stack) = state.stacks.get_mut(project) {
            stack.running = false;
        }
        if remove_volumes {
            state.volumes.retain(|(p, _)| p != project);
        }
        Ok(())
    }

    async fn remove_volume(&self, project: &str, volume: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::RemoveVolume {
            project: project.to_string(),
            volume: volume.to_string(),
        });
        Ok(state
            .volumes
            .remove(&(project.to_string(), volume.to_string())))
    }

    async fn count_running(&self, label: &str) -> Result<usize> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::CountRunning(label.to_string()));
        let labelled: usize = state
            .stacks
            .values()
            .filter(|s| s.running)
            .filter_map(|s| ComposeManifest::parse(&s.rendered).ok())
            .map(|m| m.count_labelled(label))
            .sum();
        Ok(labelled + state.external_units)
    }

    async fn service_health(&self, project: &str, service: &str) -> Result<UnitHealth> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::ServiceHealth {
            project: project.to_string(),
            service: service.to_string(),
        });
        let running = state.stacks.get(project).map(|s| s.running).unwrap_or(false);
        if !running {
            return Ok(UnitHealth::Missing);
        }
        if let Some(next) = state.health.get_mut(project).and_then(VecDeque::pop_front) {
            return Ok(next);
        }
        Ok(state.default_health.unwrap_or(UnitHealth::Healthy))
    }

    async fn prune_images(&self, older_than: Duration) -> Result<PruneSummary> {
        self.state.lock().calls.push(RuntimeCall::PruneImages(older_than));
        Ok(PruneSummary::default())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// A call observed by [`FakeDns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsCall {
    Create(String),
    Delete(String),
    Exists(String),
}

#[derive(Debug, Default)]
struct DnsState {
    records: BTreeSet<String>,
    failing: bool,
    calls: Vec<DnsCall>,
}

/// Fake DNS provider.
#[derive(Debug, Default)]
pub struct FakeDns {
    state: Mutex<DnsState>,
}

impl FakeDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn has_record(&self, label: &str) -> bool {
        self.state.lock().records.contains(label)
    }

    pub fn calls(&self) -> Vec<DnsCall> {
        self.state.lock().calls.clone()
    }

    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DnsCall::Create(_)))
            .count()
    }
}

#[async_trait]
impl DnsBinder for FakeDns {
    async fn create_record(&self, label: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(DnsCall::Create(label.to_string()));
        if state.failing {
            return Err(RuntimeError::Dns("provider unavailable".to_string()));
        }
        state.records.insert(label.to_string());
        Ok(())
    }

    async fn delete_record(&self, label: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(DnsCall::Delete(label.to_string()));
        if state.failing {
            return Err(RuntimeError::Dns("provider unavailable".to_string()));
        }
        state.records.remove(label);
        Ok(())
    }

    async fn record_exists(&self, label: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.push(DnsCall::Exists(label.to_string()));
        if state.failing {
            return Err(RuntimeError::Dns("provider unavailable".to_string()));
        }
        Ok(state.records.contains(label))
    }

    fn host_name(&self, label: &str) -> String {
        format!("{label}.preview.test")
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[derive(Debug, Clone, Copy)]
struct HostState {
    free_disk: u64,
    disk_usage_percent: f64,
    free_memory: u64,
}

/// Fake host with settable capacity. Defaults to plenty of everything.
#[derive(Debug)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            state: Mutex::new(HostState {
                free_disk: 100 * 1024 * 1024 * 1024,
                disk_usage_percent: 40.0,
                free_memory: 16 * 1024 * 1024 * 1024,
            }),
        }
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_free_disk(&self, bytes: u64) {
        self.state.lock().free_disk = bytes;
    }

    pub fn set_disk_usage_percent(&self, percent: f64) {
        self.state.lock().disk_usage_percent = percent;
    }

    pub fn set_free_memory(&self, bytes: u64) {
        self.state.lock().free_memory = bytes;
    }
}

impl HostResources for FakeHost {
    fn free_disk(&self, _path: &Path) -> Result<u64> {
        Ok(self.state.lock().free_disk)
    }

    fn disk_usage_percent(&self, _path: &Path) -> Result<f64> {
        Ok(self.state.lock().disk_usage_percent)
    }

    fn free_memory(&self) -> Result<u64> {
        Ok(self.state.lock().free_memory)
    }
}
