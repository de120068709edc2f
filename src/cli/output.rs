//! CLI output formatting

use crate::core::{CapabilityDescriptor, RunStatus};
use crate::execution::ExecutionEvent;
use crate::persistence::RunSummary;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PLUG: Emoji<'_, '_> = Emoji("🔌 ", "+ ");

/// Create a progress bar over the stages of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::NotStarted => style("NOT STARTED").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a run summary as one history line
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Completed => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::NotStarted => INFO,
    };

    let mut line = format!(
        "{} {} - {} - {} ({}/{} stages, {} artifacts) - {}",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.experiment).bold(),
        format_status(summary.status),
        summary.completed_stages,
        summary.total_stages,
        summary.artifact_count,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    );
    if let Some(stage) = &summary.failed_stage {
        line.push_str(&format!(" [failed at {}]", style(stage).red()));
    }
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            experiment,
            total_stages,
        } => format!(
            "{} Starting {} ({}, {} stages)",
            ROCKET,
            style(experiment).bold(),
            style(short_id(run_id)).dim(),
            total_stages
        ),
        ExecutionEvent::DevicesConnected { devices } => {
            if devices.is_empty() {
                format!("{} No devices needed", PLUG)
            } else {
                format!("{} Connected {}", PLUG, style(devices.join(", ")).cyan())
            }
        }
        ExecutionEvent::GroupStarted { order, stages } => format!(
            "{} Order {} ({} stages)",
            INFO,
            style(order).bold(),
            stages
        ),
        ExecutionEvent::StageStarted { stage, .. } => format!("{} {}", SPINNER, style(stage).cyan()),
        ExecutionEvent::StageCompleted { stage, .. } => format!("{} {}", CHECK, style(stage).green()),
        ExecutionEvent::StageFailed { stage, error, .. } => {
            format!("{} {}: {}", CROSS, style(stage).red(), style(error).dim())
        }
        ExecutionEvent::RunCompleted { run_id, status } => {
            let status_str = match status {
                RunStatus::Completed => format!("{} completed", style("successfully").green()),
                RunStatus::Failed => style("failed").red().to_string(),
                other => other.to_string(),
            };
            format!("{} Run ({}) {}", INFO, style(short_id(run_id)).dim(), status_str)
        }
    }
}

/// Operation signatures of one driver, one per line
pub fn format_capabilities(driver_type: &str, descriptor: &CapabilityDescriptor) -> String {
    let mut lines = vec![format!("{}", style(driver_type).bold())];
    for operation in descriptor.operations.keys() {
        if let Some(signature) = descriptor.signature(operation) {
            lines.push(format!("  {}", signature));
        }
    }
    lines.join("\n")
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
