//! `docker compose` backed runtime.
//!
//! Every call shells out to the docker CLI. Output is captured so failures
//! can be surfaced with diagnostics; each command is bounded by a timeout and
//! killed if it overruns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};
use crate::{ContainerRuntime, PruneSummary, StackSpec, UnitHealth};

/// Docker CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Path or name of the docker binary.
    pub docker_bin: String,
    /// Upper bound for `compose up` (image pulls included).
    pub up_timeout_secs: u64,
    /// Upper bound for every other command.
    pub command_timeout_secs: u64,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            up_timeout_secs: 900,
            command_timeout_secs: 120,
        }
    }
}

#[derive(Debug)]
struct CommandOutput {
    stdout: String,
}

/// [`ContainerRuntime`] driving the local docker daemon.
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    config: ComposeConfig,
}

impl ComposeRuntime {
    pub fn new(config: ComposeConfig) -> Self {
        Self { config }
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let command = format!("{} {}", self.config.docker_bin, args.join(" "));
        debug!(%command, "running");

        let child = Command::new(&self.config.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => return Err(RuntimeError::Timeout { command, timeout }),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(CommandOutput { stdout })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RuntimeError::CommandFailed {
                command,
                status: output.status.to_string(),
                output: format!("{}{}", stderr.trim_end(), stdout.trim_end()),
            })
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn up(&self, stack: &StackSpec) -> Result<()> {
        let file = stack.compose_file.to_string_lossy();
        let workdir = stack.workdir.to_string_lossy();
        self.run(
            &[
                "compose",
                "--project-name",
                &stack.project,
                "--project-directory",
                &workdir,
                "--file",
                &file,
                "up",
                "--detach",
                "--remove-orphans",
            ],
            Duration::from_secs(self.config.up_timeout_secs),
        )
        .await?;
        info!(project = %stack.project, "stack started");
        Ok(())
    }

    async fn down(&self, project: &str, remove_volumes: bool) -> Result<()> {
        let mut args = vec!["compose", "--project-name", project, "down", "--remove-orphans"];
        if remove_volumes {
            args.push("--volumes");
        }
        self.run(&args, self.timeout()).await?;
        info!(project, remove_volumes, "stack stopped");
        Ok(())
    }

    async fn remove_volume(&self, project: &str, volume: &str) -> Result<bool> {
        let name = format!("{project}_{volume}");
        match self.run(&["volume", "rm", &name], self.timeout()).await {
            Ok(_) => Ok(true),
            Err(RuntimeError::CommandFailed { ref output, .. })
                if output.to_ascii_lowercase().contains("no such volume") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn count_running(&self, label: &str) -> Result<usize> {
        let filter = format!("label={label}");
        let out = self
            .run(
                &["ps", "--quiet", "--filter", &filter, "--filter", "status=running"],
                self.timeout(),
            )
            .await?;
        Ok(out.stdout.lines().filter(|l| !l.trim().is_empty()).count())
    }

    async fn service_health(&self, project: &str, service: &str) -> Result<UnitHealth> {
        let ids = self
            .run(
                &["compose", "--project-name", project, "ps", "--all", "--quiet", service],
                self.timeout(),
            )
            .await?;
        let Some(id) = ids.stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Ok(UnitHealth::Missing);
        };
        let status = self
            .run(
                &[
                    "inspect",
                    "--format",
                    "{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}",
                    id,
                ],
                self.timeout(),
            )
            .await?;
        Ok(UnitHealth::from_status(&status.stdout))
    }

    async fn prune_images(&self, older_than: Duration) -> Result<PruneSummary> {
        let filter = format!("until={}s", older_than.as_secs());
        let out = self
            .run(
                &["image", "prune", "--all", "--force", "--filter", &filter],
                self.timeout(),
            )
            .await?;
        let summary = parse_prune_output(&out.stdout);
        info!(
            images_removed = summary.images_removed,
            reclaimed = summary.reclaimed.as_deref().unwrap_or("0B"),
            "pruned images"
        );
        Ok(summary)
    }

    fn name(&self) -> &str {
        "docker-compose"
    }
}

fn parse_prune_output(stdout: &str) -> PruneSummary {
    let images_removed = stdout
        .lines()
        .filter(|l| l.trim_start().starts_with("deleted:"))
        .count();
    let reclaimed = stdout.lines().find_map(|l| {
        l.trim()
            .strip_prefix("Total reclaimed space:")
            .map(|v| v.trim().to_string())
    });
    PruneSummary {
        images_removed,
        reclaimed,
    }
}
