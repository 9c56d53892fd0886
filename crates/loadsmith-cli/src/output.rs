//! Human-readable and JSON rendering of runs and summaries

use anyhow::Result;
use colored::Colorize;
use loadsmith_core::{MetricsSummary, ParseStatus, RunStage, RunState};
use serde::Serialize;
use std::fmt::Write;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn stage_label(stage: RunStage) -> String {
    let label = stage.to_string();
    match stage {
        RunStage::Complete => label.green().bold().to_string(),
        RunStage::Failed => label.red().bold().to_string(),
        RunStage::Cancelled => label.yellow().bold().to_string(),
        _ => label,
    }
}

fn status_label(status: ParseStatus) -> String {
    let label = status.to_string();
    match status {
        ParseStatus::Ok => label.green().to_string(),
        ParseStatus::Empty => label.yellow().to_string(),
        ParseStatus::Malformed => label.red().to_string(),
    }
}

/// Multi-line report of one result summary
pub fn format_summary(summary: &MetricsSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  Status:       {}", status_label(summary.status));
    if let Some(reason) = &summary.malformed {
        let _ = writeln!(out, "  Malformed:    {reason}");
    }

    let errors = summary
        .error_rate()
        .map(|rate| format!(" ({:.2}% errors)", rate * 100.0))
        .unwrap_or_default();
    let _ = writeln!(
        out,
        "  Samples:      {} total, {} failed{errors}",
        summary.total_samples, summary.failed_samples
    );

    match (summary.mean_latency_ms, summary.min_latency_ms, summary.max_latency_ms) {
        (Some(mean), Some(min), Some(max)) => {
            let _ = writeln!(
                out,
                "  Latency:      mean {mean:.1} ms, min {min} ms, max {max} ms"
            );
        }
        _ => {
            let _ = writeln!(out, "  Latency:      n/a (no timed samples)");
        }
    }
    if let Some(p) = &summary.percentiles {
        let _ = writeln!(
            out,
            "  Percentiles:  p50 {} ms, p90 {} ms, p95 {} ms, p99 {} ms",
            p.p50, p.p90, p.p95, p.p99
        );
    }
    if let Some(throughput) = summary.throughput_per_sec {
        let _ = writeln!(out, "  Throughput:   {throughput:.2} req/s");
    }
    if summary.rows_without_latency > 0 {
        let _ = writeln!(
            out,
            "  Untimed rows: {} (counted, not in latency)",
            summary.rows_without_latency
        );
    }
    out
}

/// Multi-line report of a run's final state
pub fn format_run(state: &RunState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run {}: {}", state.identity, stage_label(state.stage));

    let spec = &state.spec;
    let ramp_up = spec
        .ramp_up_secs
        .map(|secs| format!("{secs}s ramp-up, "))
        .unwrap_or_default();
    let _ = writeln!(out, "  Target:       {} {}", spec.method, spec.target_url());
    let _ = writeln!(
        out,
        "  Load:         {} threads, {ramp_up}{}s duration",
        spec.threads, spec.duration_secs
    );

    if let Some(execution) = &state.execution {
        let _ = writeln!(
            out,
            "  Engine:       {} after {:.1}s",
            execution.status,
            execution.elapsed().num_milliseconds() as f64 / 1000.0
        );
    }
    if let Some(summary) = &state.summary {
        out.push_str(&format_summary(summary));
    }
    if let Some(artifacts) = &state.artifacts {
        let _ = writeln!(out, "  Plan:         {}", artifacts.plan.display());
        let _ = writeln!(out, "  Results:      {}", artifacts.results.display());
        let _ = writeln!(out, "  Engine log:   {}", artifacts.log.display());
    }
    if matches!(state.stage, RunStage::Failed | RunStage::Cancelled) {
        let _ = writeln!(out, "  Diagnostic:   {}", state.diagnostic());
    }
    out
}
