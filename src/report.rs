//! Human-readable rendering for the CLI.

use crate::detect::{FlakeMetrics, QuarantineEntry, ScenarioHistory};
use crate::preflight::PreflightReport;
use crate::quarantine::ListedScenario;
use crate::scheduler::BatchResult;
use std::fmt::Write;

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn or_dash(value: Option<impl ToString>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Summary, per-scenario table, detector actions and comparison for one batch.
pub fn format_batch(batch: &BatchResult) -> String {
    let mut out = String::new();
    let s = &batch.summary;

    let _ = writeln!(out, "\nBatch {} ({:.1}s)", batch.id, batch.duration_ms as f64 / 1000.0);
    let _ = writeln!(out, "{:<30} | {:<8} | {:>9} | Details", "Scenario", "Status", "Duration");
    let _ = writeln!(out, "{:-<30}-|-{:-<8}-|-{:-<9}-|-{:-<40}", "", "", "", "");
    for r in &batch.results {
        let details = r
            .skip_reason
            .as_deref()
            .or(r.error.as_deref())
            .unwrap_or_default();
        let name = if r.quarantined {
            format!("{} [Q]", r.name)
        } else {
            r.name.clone()
        };
        let _ = writeln!(
            out,
            "{:<30} | {:<8} | {:>7}ms | {}",
            name,
            r.status.to_string().to_uppercase(),
            r.duration_ms,
            details
        );
    }

    let _ = writeln!(
        out,
        "\nFound {}, run {}, skipped {}: {} passed, {} failed, {} errors (flake rate {})",
        batch.scenarios_found,
        batch.scenarios_run,
        batch.scenarios_skipped,
        s.passed,
        s.failed,
        s.errors,
        percent(s.flake_rate)
    );
    if s.total_retries > 0 {
        let _ = writeln!(out, "Retries: {}", s.total_retries);
    }
    if !s.observations.is_empty() {
        let counts: Vec<String> = s.observations.iter().map(|(sev, n)| format!("{sev}={n}")).collect();
        let _ = writeln!(out, "Observations: {}", counts.join(" "));
    }

    for (label, names) in [
        ("Auto-quarantined", &s.auto_quarantined),
        ("Auto-unquarantined", &s.auto_unquarantined),
        ("Flagged flaky", &s.flaky_scenarios),
        ("New quarantine candidates", &s.new_quarantine_candidates),
    ] {
        if !names.is_empty() {
            let _ = writeln!(out, "{label}: {}", names.join(", "));
        }
    }

    if let Some(c) = &batch.comparison {
        let _ = writeln!(
            out,
            "\nCompared to {}: {} fixed, {} new, {} recurring (score {:+})",
            c.baseline_id,
            c.fixed.len(),
            c.new_issues.len(),
            c.recurring.len(),
            c.regression_score
        );
        for (marker, items) in [("+", &c.fixed), ("-", &c.new_issues), ("=", &c.recurring)] {
            for item in items {
                let _ = writeln!(out, " {marker} [{}] {}: {}", item.severity, item.scenario, item.description);
            }
        }
    }

    if let Some(path) = &batch.manifest_path {
        let _ = writeln!(out, "\nManifest: {}", path.display());
    }
    out
}

pub fn format_metrics_table(metrics: &[FlakeMetrics]) -> String {
    if metrics.is_empty() {
        return "No scenario history recorded.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<30} | {:>4} | {:>7} | {:>7} | {:>6} | Flags",
        "Scenario", "Runs", "Flake", "Success", "Streak"
    );
    let _ = writeln!(out, "{:-<30}-|-{:-<4}-|-{:-<7}-|-{:-<7}-|-{:-<6}-|-{:-<12}", "", "", "", "", "", "");
    for m in metrics {
        let streak = if m.consecutive_failures > 0 {
            format!("-{}", m.consecutive_failures)
        } else {
            format!("+{}", m.consecutive_passes)
        };
        let flags = match (m.is_flaky, m.is_stable) {
            (true, _) => "FLAKY",
            (false, true) => "stable",
            (false, false) => "",
        };
        let _ = writeln!(
            out,
            "{:<30} | {:>4} | {:>7} | {:>7} | {:>6} | {}",
            m.scenario,
            m.window_runs,
            percent(m.flake_rate),
            percent(m.success_rate),
            streak,
            flags
        );
    }
    out
}

pub fn format_metrics_detail(m: &FlakeMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Scenario:       {}", m.scenario);
    let _ = writeln!(
        out,
        "Window:         {} runs ({} passed, {} failed, {} infra errors)",
        m.window_runs, m.window_passes, m.window_failures, m.window_errors
    );
    let _ = writeln!(out, "Flake rate:     {}", percent(m.flake_rate));
    let _ = writeln!(out, "Success rate:   {}", percent(m.success_rate));
    let _ = writeln!(out, "Avg retries:    {:.2}", m.avg_retries);
    let _ = writeln!(out, "Avg duration:   {:.0}ms", m.avg_duration_ms);
    let _ = writeln!(
        out,
        "Streaks:        {} failing, {} passing",
        m.consecutive_failures, m.consecutive_passes
    );
    let _ = writeln!(out, "Last outcome:   {}", or_dash(m.last_outcome));
    let _ = writeln!(out, "Lifetime runs:  {}", m.total_runs);
    let _ = writeln!(out, "Flaky:          {}", m.is_flaky);
    let _ = writeln!(out, "Stable:         {}", m.is_stable);
    out
}

pub fn format_quarantine_table(entries: &[QuarantineEntry], listed: &[ListedScenario]) -> String {
    if entries.is_empty() && listed.is_empty() {
        return "No quarantined scenarios.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:<30} | {:<6} | {:<16} | {:>6} | Reason", "Scenario", "Source", "Since", "Flake");
    let _ = writeln!(out, "{:-<30}-|-{:-<6}-|-{:-<16}-|-{:-<6}-|-{:-<40}", "", "", "", "", "");
    for e in entries {
        let source = if e.auto_quarantined { "auto" } else { "manual" };
        let review = if e.review_required { " (review)" } else { "" };
        let _ = writeln!(
            out,
            "{:<30} | {:<6} | {:<16} | {:>6} | {}{}",
            e.scenario,
            source,
            e.quarantined_at.format("%Y-%m-%d %H:%M"),
            percent(e.flake_rate),
            e.note(),
            review
        );
    }
    for l in listed {
        let _ = writeln!(
            out,
            "{:<30} | {:<6} | {:<16} | {:>6} | {}",
            l.scenario,
            "list",
            l.added_at.format("%Y-%m-%d %H:%M"),
            "-",
            l.note
        );
    }
    out
}

pub fn format_quarantine_entry(entry: &QuarantineEntry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Scenario:        {}", entry.scenario);
    let _ = writeln!(out, "Quarantined at:  {}", entry.quarantined_at.to_rfc3339());
    let _ = writeln!(out, "Reason:          {}", entry.reason);
    let _ = writeln!(out, "Flake rate:      {}", percent(entry.flake_rate));
    let _ = writeln!(out, "Automatic:       {}", entry.auto_quarantined);
    let _ = writeln!(out, "Review required: {}", entry.review_required);
    let _ = writeln!(out, "Last run:        {}", or_dash(entry.last_run.map(|t| t.to_rfc3339())));
    if let Some(notes) = &entry.notes {
        let _ = writeln!(out, "Notes:           {notes}");
    }
    out
}

/// Newest `limit` runs of a scenario.
pub fn format_history(history: &ScenarioHistory, limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: {} runs ({} passed, {} failed, {} errors)",
        history.scenario, history.total_runs, history.total_passes, history.total_failures, history.total_errors
    );
    let _ = writeln!(out, "{:<20} | {:<5} | {:>7} | {:>7} | {:<16} | Error type", "Time", "Run", "Retries", "Ms", "Batch");
    let _ = writeln!(out, "{:-<20}-|-{:-<5}-|-{:-<7}-|-{:-<7}-|-{:-<16}-|-{:-<14}", "", "", "", "", "", "");
    for r in history.runs.iter().take(limit) {
        let error_type = match (&r.error_type, r.infrastructure_error) {
            (Some(t), true) => format!("{t} (infra)"),
            (Some(t), false) => t.clone(),
            (None, _) => String::new(),
        };
        let _ = writeln!(
            out,
            "{:<20} | {:<5} | {:>7} | {:>7} | {:<16} | {}",
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.outcome.to_string().to_uppercase(),
            r.retry_count,
            r.duration_ms,
            r.batch_id.as_deref().unwrap_or("-"),
            error_type
        );
    }
    out
}

pub fn format_batches(batches: &[BatchResult]) -> String {
    if batches.is_empty() {
        return "No batches found.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:<16} | {:<20} | {:>5} | {:>4} | {:>4} | {:>4} | Convoy", "Batch", "Started", "Run", "Pass", "Fail", "Err");
    let _ = writeln!(out, "{:-<16}-|-{:-<20}-|-{:-<5}-|-{:-<4}-|-{:-<4}-|-{:-<4}-|-{:-<10}", "", "", "", "", "", "", "");
    for b in batches {
        let _ = writeln!(
            out,
            "{:<16} | {:<20} | {:>5} | {:>4} | {:>4} | {:>4} | {}",
            b.id,
            b.started_at.format("%Y-%m-%d %H:%M:%S"),
            b.scenarios_run,
            b.summary.passed,
            b.summary.failed,
            b.summary.errors,
            b.config.convoy.as_deref().unwrap_or("-")
        );
    }
    out
}

pub fn format_preflight(report: &PreflightReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nflakeguard preflight");
    let _ = writeln!(out, "{:<20} | {:<6} | Details", "Check", "Status");
    let _ = writeln!(out, "{:-<20}-|-{:-<6}-|-{:-<40}", "", "", "");
    for c in &report.checks {
        let _ = writeln!(out, "{:<20} | {:<6} | {}", c.name, c.status, c.details);
        if let Some(rem) = &c.remediation {
            let _ = writeln!(out, "{:<20} | {:<6} |   -> {}", "", "", rem);
        }
    }
    let _ = writeln!(out, "\nResult: {}", if report.passed { "READY" } else { "NOT READY" });
    out
}
