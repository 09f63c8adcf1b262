//! Command handlers

use anyhow::Context;
use clap::{Args, Subcommand};
use preview_control::{DeployMode, DeployRequest, PreviewController};

use crate::output::{self, print_success, print_warning, EnvironmentRow, OutputFormat};

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update the environment for a branch
    Deploy(DeployArgs),

    /// Tear an environment down completely
    Destroy {
        /// Environment slug
        #[arg(long)]
        slug: String,
    },

    /// Evict expired environments and prune images under disk pressure
    Sweep,

    /// List known environments
    List,

    /// Show one environment
    Status {
        /// Environment slug
        #[arg(long)]
        slug: String,
    },
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Environment slug (lowercase letters, digits and hyphens)
    #[arg(long, required_unless_present = "branch")]
    pub slug: Option<String>,

    /// Branch name; the slug is derived from it when --slug is absent
    #[arg(long)]
    pub branch: Option<String>,

    /// Commit being deployed
    #[arg(long)]
    pub commit: String,

    /// fresh or update
    #[arg(long, default_value_t = DeployMode::Fresh)]
    pub mode: DeployMode,

    /// Image registry (defaults to the previous deploy's, then the configured one)
    #[arg(long)]
    pub registry: Option<String>,

    /// Image tag (defaults to the previous deploy's, then the configured one)
    #[arg(long)]
    pub tag: Option<String>,

    /// Generate a new credential on update
    #[arg(long)]
    pub reset_credential: bool,
}

impl From<DeployArgs> for DeployRequest {
    fn from(args: DeployArgs) -> Self {
        DeployRequest {
            slug: args.slug,
            branch: args.branch,
            commit_sha: args.commit,
            mode: args.mode,
            registry: args.registry,
            tag: args.tag,
            reset_credential: args.reset_credential,
        }
    }
}

pub async fn execute(
    command: Commands,
    controller: &PreviewController,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        Commands::Deploy(args) => {
            let provisioned = controller
                .deploy(args.into())
                .await
                .context("deploy failed")?;
            match format {
                OutputFormat::Json => output::print_json(&provisioned)?,
                OutputFormat::Table => {
                    print_success(&format!(
                        "{} live at {} ({}, {})",
                        provisioned.environment.slug,
                        provisioned.host,
                        provisioned.mode,
                        provisioned.environment.commit_sha
                    ));
                    if provisioned.mode.is_fresh() && !provisioned.dns_bound {
                        print_warning("DNS record was not created; see logs");
                    }
                }
            }
        }

        Commands::Destroy { slug } => {
            let report = controller
                .destroy(&slug)
                .await
                .context("destroy failed")?;
            match format {
                OutputFormat::Json => output::print_json(&report)?,
                OutputFormat::Table => {
                    if report.removed_anything() {
                        print_success(&format!("{slug} destroyed"));
                    } else {
                        print_success(&format!("{slug} already absent"));
                    }
                    for warning in &report.warnings {
                        print_warning(warning);
                    }
                }
            }
        }

        Commands::Sweep => {
            let report = controller.sweep().await.context("sweep failed")?;
            match format {
                OutputFormat::Json => output::print_json(&report)?,
                OutputFormat::Table => {
                    print_success(&format!(
                        "sweep: {} evicted, {} retained, {} skipped, {} failed",
                        report.evicted.len(),
                        report.retained.len(),
                        report.skipped_locked.len() + report.skipped_invalid.len(),
                        report.failed.len()
                    ));
                    for slug in &report.evicted {
                        println!("  evicted {slug}");
                    }
                    if let Some(pruned) = &report.pruned {
                        println!(
                            "  pruned {} images ({})",
                            pruned.images_removed,
                            pruned.reclaimed.as_deref().unwrap_or("unknown")
                        );
                    }
                    if !report.failed.is_empty() {
                        print_warning(&format!("{} evictions failed; see logs", report.failed.len()));
                    }
                }
            }
        }

        Commands::List => {
            let summaries = controller.list().await.context("list failed")?;
            match format {
                OutputFormat::Json => output::print_json(&summaries)?,
                OutputFormat::Table => {
                    let rows: Vec<EnvironmentRow> = summaries.iter().map(EnvironmentRow::from).collect();
                    output::print_output(rows, format)?;
                }
            }
        }

        Commands::Status { slug } => {
            let status = controller.status(&slug).await.context("status failed")?;
            match format {
                OutputFormat::Json => output::print_json(&status)?,
                OutputFormat::Table => output::print_status(&status),
            }
        }
    }
    Ok(())
}
