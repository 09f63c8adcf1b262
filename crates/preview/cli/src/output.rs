//! Output formatting utilities

use chrono::{DateTime, Utc};
use colored::*;
use preview_control::{EnvironmentStatus, EnvironmentSummary};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text and tables
    #[default]
    Table,
    /// JSON on stdout
    Json,
}

/// One environment in `list` output
#[derive(Debug, Tabled, Serialize)]
pub struct EnvironmentRow {
    #[tabled(rename = "SLUG")]
    pub slug: String,
    #[tabled(rename = "BRANCH")]
    pub branch: String,
    #[tabled(rename = "COMMIT")]
    pub commit: String,
    #[tabled(rename = "IMAGE")]
    pub image: String,
    #[tabled(rename = "UPDATED")]
    pub updated: String,
    #[tabled(rename = "EXPIRES")]
    pub expires: String,
}

impl From<&EnvironmentSummary> for EnvironmentRow {
    fn from(summary: &EnvironmentSummary) -> Self {
        match &summary.environment {
            Some(env) => Self {
                slug: summary.slug.to_string(),
                branch: env.branch.clone(),
                commit: short_commit(&env.commit_sha),
                image: format!(
                    "{}:{}",
                    env.registry.as_deref().unwrap_or("-"),
                    env.tag.as_deref().unwrap_or("-")
                ),
                updated: timestamp(env.updated_at),
                expires: summary.expires_at.map(timestamp).unwrap_or_default(),
            },
            None => Self {
                slug: summary.slug.to_string(),
                branch: "-".into(),
                commit: "-".into(),
                image: "-".into(),
                updated: "-".into(),
                expires: summary.problem.clone().unwrap_or_else(|| "unreadable".into()),
            },
        }
    }
}

fn short_commit(sha: &str) -> String {
    sha.chars().take(12).collect()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Print rows as a table or JSON array
pub fn print_output<T: Serialize + Tabled>(data: Vec<T>, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No environments".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&data)?),
    }
    Ok(())
}

/// Print one value as JSON
pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

pub fn print_status(status: &EnvironmentStatus) {
    let env = &status.environment;
    let health = status
        .health
        .map(|h| h.to_string())
        .unwrap_or_else(|| "unknown".into());
    println!("{}  {}", "Slug:".bold(), env.slug);
    println!("{}  {}", "Branch:".bold(), env.branch);
    println!("{}  {}", "Commit:".bold(), env.commit_sha);
    println!(
        "{}  {}:{}",
        "Image:".bold(),
        env.registry.as_deref().unwrap_or("-"),
        env.tag.as_deref().unwrap_or("-")
    );
    println!("{}  {}", "Host:".bold(), status.host);
    println!("{}  {}", "Project:".bold(), status.project);
    println!("{}  {}", "Health:".bold(), health);
    println!("{}  {}", "Created:".bold(), timestamp(env.created_at));
    println!("{}  {} ({}h ago)", "Updated:".bold(), timestamp(env.updated_at), status.age_hours);
    let expires = timestamp(status.expires_at);
    if status.expired {
        println!("{}  {} {}", "Expires:".bold(), expires, "(expired)".yellow());
    } else {
        println!("{}  {}", "Expires:".bold(), expires);
    }
    if let Some(quota) = &status.quota {
        println!(
            "{}  {}/{} environments, {} GiB disk free",
            "Capacity:".bold(),
            quota.environments,
            quota.max_environments,
            quota.free_disk_bytes / (1024 * 1024 * 1024)
        );
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}
