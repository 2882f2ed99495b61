//! Rendering of service answers for the terminal.

use crate::client::HealthReport;
use crate::CliError;
use audit_keeper_core::{BulkOutcome, ReplayStatus};
use serde_json::json;
use std::fmt::Write;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// A newly created replay
pub fn render_created(id: &str, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Text => Ok(id.to_string()),
        OutputFormat::Json => to_json(&json!({ "id": id })),
    }
}

/// An accepted single-replay command
pub fn render_ack(id: &str, action: &str, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Text => Ok(format!("Audit replay {}: {} accepted", id, action)),
        OutputFormat::Json => to_json(&json!({ "id": id, "action": action })),
    }
}

pub fn render_status(status: &ReplayStatus, format: OutputFormat) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return to_json(status);
    }

    let mut text = String::new();
    let _ = writeln!(text, "Replay   {}", status.id);
    let _ = writeln!(text, "State    {}", status.state);
    let _ = writeln!(text, "Path     {}", status.path_uri);
    let _ = writeln!(text, "Rate     {}/s", status.send_rate);
    let _ = writeln!(text, "Updated  {}", status.last_updated.to_rfc3339());
    let _ = write!(text, "Files    {}", status.files.len());
    for file in &status.files {
        let _ = write!(
            text,
            "\n  {:<8}  {}  read={} sent={} failed={} parse_failures={}",
            file.state.to_string(),
            file.path_uri,
            file.lines_read,
            file.audits_sent,
            file.audits_failed,
            file.parse_failures,
        );
    }
    Ok(text)
}

pub fn render_statuses(statuses: &[ReplayStatus], format: OutputFormat) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return to_json(&statuses);
    }
    if statuses.is_empty() {
        return Ok("No audit replays".to_string());
    }

    let lines: Vec<String> = statuses
        .iter()
        .map(|status| {
            let finished = status
                .files
                .iter()
                .filter(|file| file.state.is_terminal())
                .count();
            format!(
                "{}  {:<8}  {}/{} files  {}/s  {}",
                status.id,
                status.state.as_str(),
                finished,
                status.files.len(),
                status.send_rate,
                status.path_uri
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

pub fn render_bulk(outcome: &BulkOutcome, format: OutputFormat) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return to_json(outcome);
    }

    let mut text = format!("Succeeded: {}", outcome.succeeded.len());
    for id in &outcome.succeeded {
        let _ = write!(text, "\n  {}", id);
    }
    if !outcome.failed.is_empty() {
        let _ = write!(text, "\nFailed: {}", outcome.failed.len());
        for (id, reason) in &outcome.failed {
            let _ = write!(text, "\n  {}: {}", id, reason);
        }
    }
    Ok(text)
}

pub fn render_health(report: &HealthReport, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => to_json(&report.body),
        OutputFormat::Text => {
            let verdict = if report.healthy { "UP" } else { "DOWN" };
            let mut text = format!("{} ({})", verdict, report.status);
            if let Some(fields) = report.body.as_object() {
                for (key, value) in fields {
                    let _ = write!(text, "\n  {}: {}", key, value);
                }
            }
            Ok(text)
        }
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
