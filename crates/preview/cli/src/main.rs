//! previewctl - preview environment lifecycle trigger
//!
//! Invoked by CI (deploy on push, destroy on branch close) and by a timer
//! (sweep). Exit codes let callers tell outcomes apart:
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | success |
//! | 2 | invalid input |
//! | 3 | environment quota exceeded |
//! | 4 | insufficient disk or memory |
//! | 5 | lock wait timed out |
//! | 6 | stack failed to start |
//! | 7 | health check timed out (rolled back) |
//! | 1 | anything else |

use clap::Parser;
use preview_control::{PreviewConfig, PreviewController, PreviewError};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod logging;
mod output;

use commands::Commands;

/// Preview environment lifecycle manager
#[derive(Parser)]
#[command(name = "previewctl")]
#[command(about = "Deploy, destroy and reap per-branch preview environments", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PREVIEW_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: output::OutputFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match PreviewConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&e.to_string());
            return ExitCode::from(exit_code_of(&e));
        }
    };
    logging::init_tracing(&config.logging, cli.verbose);

    match run(cli.command, config, cli.output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(
    command: Commands,
    config: PreviewConfig,
    format: output::OutputFormat,
) -> anyhow::Result<()> {
    let controller = PreviewController::from_config(config)?;
    commands::execute(command, &controller, format).await
}

/// Exit code for an error, looking through any added context.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<PreviewError>()
        .map(exit_code_of)
        .unwrap_or(1)
}

fn exit_code_of(err: &PreviewError) -> u8 {
    u8::try_from(err.exit_code()).unwrap_or(1)
}
