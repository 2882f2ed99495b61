//! # Audit-Keeper CLI
//!
//! Operator command-line interface for the Audit-Keeper service.
//!
//! This module provides CLI commands for:
//! - Creating audit replays and controlling their lifecycle
//! - Inspecting the status of one or every replay
//! - Checking service and broker health
//! - Generating shell completions

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::time::Duration;
use tracing::info;

pub mod client;
pub mod output;

pub use client::{ControlAction, HealthComponent, HealthReport, ReplayClient};
pub use output::OutputFormat;

// ============================================================================
// CLI Structure
// ============================================================================

/// Audit-Keeper CLI - Audit replay operations
#[derive(Parser, Debug)]
#[command(name = "audit-keeper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operate the Audit-Keeper audit intake and replay service")]
#[command(
    long_about = "Audit-Keeper replays audit files onto the message broker at a controlled rate"
)]
pub struct Cli {
    /// Base URL of the service
    #[arg(
        short,
        long,
        env = "AUDIT_KEEPER_URL",
        default_value = "http://localhost:8080",
        global = true
    )]
    pub url: String,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "30", global = true)]
    pub timeout: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Logging level
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Audit replay management commands
    Replay {
        #[command(subcommand)]
        action: ReplayCommands,
    },

    /// Check service health
    Health {
        /// Health endpoint to query
        #[arg(value_enum, default_value = "overall")]
        component: HealthComponent,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Commands {
    fn describe(&self) -> String {
        match self {
            Self::Replay { action } => format!("replay {}", action.name()),
            Self::Health { .. } => "health".to_string(),
            Self::Completions { .. } => "completions".to_string(),
        }
    }
}

// ============================================================================
// Replay Commands
// ============================================================================

/// Replay management subcommands
#[derive(Subcommand, Debug)]
pub enum ReplayCommands {
    /// Create a replay in CREATED state
    Create(CreateArgs),

    /// Create a replay and start it immediately
    CreateAndStart(CreateArgs),

    /// Start a CREATED replay
    Start(Target),

    /// Stop a RUNNING replay
    Stop(Target),

    /// Resume a STOPPED replay
    Resume(Target),

    /// Change the send rate of a replay
    Update {
        #[command(flatten)]
        target: Target,

        /// Audits per second, 0 for unlimited
        #[arg(short = 'r', long, allow_negative_numbers = true)]
        send_rate: i64,
    },

    /// Delete a replay that is not running
    Delete(Target),

    /// Show replay status
    Status(Target),
}

impl ReplayCommands {
    fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::CreateAndStart(_) => "create-and-start",
            Self::Start(_) => "start",
            Self::Stop(_) => "stop",
            Self::Resume(_) => "resume",
            Self::Update { .. } => "update",
            Self::Delete(_) => "delete",
            Self::Status(_) => "status",
        }
    }
}

/// Arguments for creating a replay
#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Directory or file holding the audit files
    pub path_uri: String,

    /// Audits per second, 0 for unlimited
    #[arg(short = 'r', long, allow_negative_numbers = true)]
    pub send_rate: i64,

    /// Also replay files left unfinished by an earlier replay
    #[arg(long)]
    pub unfinished: bool,
}

/// A single replay id or every replay
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct Target {
    /// Replay id
    pub id: Option<String>,

    /// Apply to every replay
    #[arg(long)]
    pub all: bool,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("{failed} of {total} audit replays could not be processed")]
    PartialFailure { failed: usize, total: usize },

    #[error("Service is not healthy")]
    Unhealthy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    initialize_logging(&cli);

    let what = cli.command.describe();
    let mut stdout = std::io::stdout();
    execute(cli, &mut stdout)
        .await
        .with_context(|| format!("audit-keeper {} failed", what))
}

/// Run a parsed command, writing user-facing output to `out`
pub async fn execute<W: Write>(cli: Cli, out: &mut W) -> Result<(), CliError> {
    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "audit-keeper", out);
            Ok(())
        }
        Commands::Health { component } => {
            let client = ReplayClient::new(&cli.url, Duration::from_secs(cli.timeout))?;
            execute_health_command(&client, component, cli.format, out).await
        }
        Commands::Replay { action } => {
            let client = ReplayClient::new(&cli.url, Duration::from_secs(cli.timeout))?;
            execute_replay_command(&client, action, cli.format, out).await
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging on stderr so stdout stays machine readable
fn initialize_logging(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if cli.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

async fn execute_health_command<W: Write>(
    client: &ReplayClient,
    component: HealthComponent,
    format: OutputFormat,
    out: &mut W,
) -> Result<(), CliError> {
    info!(component = ?component, url = %client.base_url(), "Checking service health");

    let report = client.health(component).await?;
    writeln!(out, "{}", output::render_health(&report, format)?)?;
    if report.healthy {
        Ok(())
    } else {
        Err(CliError::Unhealthy)
    }
}

async fn execute_replay_command<W: Write>(
    client: &ReplayClient,
    action: ReplayCommands,
    format: OutputFormat,
    out: &mut W,
) -> Result<(), CliError> {
    info!(action = action.name(), url = %client.base_url(), "Executing replay command");

    let rendered = match action {
        ReplayCommands::Create(args) => {
            let id = client
                .create(&args.path_uri, args.send_rate, args.unfinished, false)
                .await?;
            output::render_created(&id, format)?
        }
        ReplayCommands::CreateAndStart(args) => {
            let id = client
                .create(&args.path_uri, args.send_rate, args.unfinished, true)
                .await?;
            output::render_created(&id, format)?
        }
        ReplayCommands::Start(target) => {
            return control(client, target, ControlAction::Start, format, out).await;
        }
        ReplayCommands::Stop(target) => {
            return control(client, target, ControlAction::Stop, format, out).await;
        }
        ReplayCommands::Resume(target) => {
            return control(client, target, ControlAction::Resume, format, out).await;
        }
        ReplayCommands::Update { target, send_rate } => match target.id {
            Some(id) => {
                client.update(&id, send_rate).await?;
                output::render_ack(&id, "update", format)?
            }
            None => {
                let outcome = client.update_all(send_rate).await?;
                return write_bulk(&outcome, format, out);
            }
        },
        ReplayCommands::Delete(target) => match target.id {
            Some(id) => {
                client.delete(&id).await?;
                output::render_ack(&id, "delete", format)?
            }
            None => {
                let outcome = client.delete_all().await?;
                return write_bulk(&outcome, format, out);
            }
        },
        ReplayCommands::Status(target) => match target.id {
            Some(id) => output::render_status(&client.status(&id).await?, format)?,
            None => output::render_statuses(&client.status_all().await?, format)?,
        },
    };

    writeln!(out, "{}", rendered)?;
    Ok(())
}

async fn control<W: Write>(
    client: &ReplayClient,
    target: Target,
    action: ControlAction,
    format: OutputFormat,
    out: &mut W,
) -> Result<(), CliError> {
    match target.id {
        Some(id) => {
            client.control(&id, action).await?;
            writeln!(out, "{}", output::render_ack(&id, action.as_str(), format)?)?;
            Ok(())
        }
        None => {
            let outcome = client.control_all(action).await?;
            write_bulk(&outcome, format, out)
        }
    }
}

/// Print a bulk outcome, failing when any replay was rejected
fn write_bulk<W: Write>(
    outcome: &audit_keeper_core::BulkOutcome,
    format: OutputFormat,
    out: &mut W,
) -> Result<(), CliError> {
    writeln!(out, "{}", output::render_bulk(outcome, format)?)?;
    if outcome.is_success() {
        Ok(())
    } else {
        Err(CliError::PartialFailure {
            failed: outcome.failed.len(),
            total: outcome.failed.len() + outcome.succeeded.len(),
        })
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
