//! CLI output formatting

use crate::{
    core::{
        report::{InstanceReport, RunReport},
        state::RunResult,
        RunPlan,
    },
    execution::ExecutionEvent,
    persistence::RunSummary,
};
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
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "- ");

/// Create a progress bar counting finished instances
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run result for display
pub fn format_result(result: RunResult) -> String {
    match result {
        RunResult::Succeeded => style("SUCCEEDED").green().to_string(),
        RunResult::Failed => style("FAILED").red().to_string(),
        RunResult::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn result_icon(result: RunResult) -> Emoji<'static, 'static> {
    match result {
        RunResult::Succeeded => CHECK,
        RunResult::Failed => CROSS,
        RunResult::Cancelled => STOP,
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut line = format!(
        "{} {} - {} - {} - {} on {} by {} ({}/{} started, {} failed)",
        result_icon(summary.result),
        style(short_id(&summary.run_id)).dim(),
        style(&summary.pipeline).bold(),
        format_result(summary.result),
        summary.event,
        style(&summary.branch).cyan(),
        summary.actor,
        summary.instances_started,
        summary.instances_total,
        summary.instances_failed,
    );
    if let Some(url) = &summary.environment_url {
        line.push_str(&format!(" -> {}", style(url).underlined()));
    }
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunQueued {
            run_id,
            pipeline,
            group,
        } => format!(
            "{} Run {} of {} queued behind concurrency group {}",
            SPINNER,
            style(short_id(run_id)).dim(),
            style(pipeline).bold(),
            style(group).yellow()
        ),
        ExecutionEvent::RunStarted {
            run_id,
            pipeline,
            instances,
        } => format!(
            "{} Starting pipeline {} ({}) with {} job instances",
            ROCKET,
            style(pipeline).bold(),
            style(short_id(run_id)).dim(),
            instances
        ),
        ExecutionEvent::StageStarted {
            stage,
            instances,
            max_parallel,
            ..
        } => format!(
            "{} Stage {} ({} instances, at most {} at once)",
            INFO,
            style(stage).bold(),
            instances,
            max_parallel
        ),
        ExecutionEvent::StageSkipped { stage, reason, .. } => format!(
            "{} Stage {} skipped: {}",
            WARN,
            style(stage).dim(),
            reason
        ),
        ExecutionEvent::InstanceStarted { instance, .. } => {
            format!("{} {}", SPINNER, style(instance).cyan())
        }
        ExecutionEvent::StepStarted {
            instance, name, ..
        } => format!("  {} {}", style(instance).dim(), name),
        ExecutionEvent::StepFinished {
            instance,
            step_id,
            result,
            failure,
            ..
        } => match failure {
            Some(failure) => format!(
                "  {}{} {}: {}",
                result_icon(*result),
                style(instance).dim(),
                style(step_id).red(),
                failure
            ),
            None => format!(
                "  {}{} {}",
                result_icon(*result),
                style(instance).dim(),
                step_id
            ),
        },
        ExecutionEvent::InstanceFinished {
            instance, result, ..
        } => format!(
            "{}{} {}",
            result_icon(*result),
            style(instance).bold(),
            format_result(*result)
        ),
        ExecutionEvent::StageFinished { stage, result, .. } => format!(
            "{}Stage {} {}",
            result_icon(*result),
            style(stage).bold(),
            format_result(*result)
        ),
        ExecutionEvent::OutputsPublished { outputs, .. } => {
            let pairs: Vec<String> = outputs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{} Published outputs: {}", INFO, pairs.join(", "))
        }
        ExecutionEvent::RunFinished { run_id, result } => format!(
            "{}Run ({}) {}",
            result_icon(*result),
            style(short_id(run_id)).dim(),
            format_result(*result)
        ),
    }
}

/// Format the expanded plan of a pipeline
pub fn format_plan(pipeline: &str, plan: &RunPlan) -> String {
    let mut out = format!(
        "{} {} expands to {} job instances\n",
        CHECK,
        style(pipeline).bold(),
        plan.instance_count()
    );
    for stage in &plan.stages {
        out.push_str(&format!(
            "\n  {} (max parallel {})\n",
            style(&stage.name).bold(),
            stage.max_parallel
        ));
        if let Some(env) = &stage.environment {
            out.push_str(&format!("    environment: {}\n", env.name));
        }
        for instance in &stage.instances {
            out.push_str(&format!("    - {}\n", instance));
        }
    }
    out
}

fn instance_label(instance: &InstanceReport) -> String {
    if instance.coordinate.is_empty() {
        instance.job_id.clone()
    } else {
        format!("{} ({})", instance.job_id, instance.coordinate)
    }
}

/// Format a finished run, stage by stage
pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();
    for stage in &report.stages {
        match stage.result {
            Some(result) => out.push_str(&format!(
                "{}{}\n",
                result_icon(result),
                style(&stage.name).bold()
            )),
            None => out.push_str(&format!(
                "{} {} {}\n",
                WARN,
                style(&stage.name).dim(),
                style("(not run)").dim()
            )),
        }
        for instance in stage.jobs.iter().flat_map(|j| j.instances.iter()) {
            let detail = match (&instance.failed_step, instance.was_started()) {
                (Some(failed), _) => format!(" at step {}: {}", failed.step_id, failed.failure),
                (None, false) => " (never started)".to_string(),
                (None, true) => String::new(),
            };
            out.push_str(&format!(
                "    {} {}{}\n",
                format_result(instance.result),
                instance_label(instance),
                detail
            ));
            if instance.result == RunResult::Failed {
                if let Some(step) = instance.steps.last() {
                    if !step.log_tail.is_empty() {
                        out.push_str(&format!(
                            "{}\n",
                            format_output(&step.log_tail.join("\n"), 10)
                        ));
                    }
                }
            }
        }
    }
    out
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Format a duration as a short human-readable string
pub fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
