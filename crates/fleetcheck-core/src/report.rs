//! Run report rendering.
//!
//! - `render_text`: human-readable summary with every discrepancy
//! - `render_json`: machine-readable [`RunReport`] (pretty JSON)

use crate::runner::{RunReport, ScenarioOutcome};

// ── text ─────────────────────────────────────────────────────────────────

/// Render the report for a terminal.
pub fn render_text(report: &RunReport) -> String {
    let mut out = format!("fleetcheck run {}\n", report.run_id);

    let width = report
        .outcomes
        .iter()
        .map(|o| o.scenario.len())
        .max()
        .unwrap_or(0);

    for outcome in &report.outcomes {
        render_outcome(&mut out, outcome, width);
    }

    let passed = report.outcomes.len() - report.failed_count();
    out.push_str(&format!(
        "\n{passed}/{} scenario(s) passed{}\n",
        report.outcomes.len(),
        if report.passed() { "" } else { " - FAILED" }
    ));
    out
}

fn render_outcome(out: &mut String, outcome: &ScenarioOutcome, width: usize) {
    let verdict = if outcome.passed() { "PASS" } else { "FAIL" };
    out.push_str(&format!(
        "  {verdict}  {:<width$}  {} x{}",
        outcome.scenario,
        outcome.level_label(),
        outcome.members
    ));
    if let Some(ws) = &outcome.workspace_id {
        out.push_str(&format!("  workspace {ws}"));
    }
    if outcome.poll_attempts > 0 {
        out.push_str(&format!("  {} poll attempt(s)", outcome.poll_attempts));
    }
    out.push_str(&format!("  {:.1}s\n", outcome.duration_ms as f64 / 1000.0));

    if let Some(failure) = &outcome.failure {
        let stage = failure.stage.map_or("unknown", |s| s.as_str());
        // Mismatches are listed one per line below instead.
        if outcome.discrepancies.is_empty() || failure.kind != "reconciliation_mismatch" {
            out.push_str(&format!("        [{stage}] {}\n", failure.message));
        } else {
            out.push_str(&format!(
                "        [{stage}] {} discrepancy(ies)\n",
                outcome.discrepancies.len()
            ));
        }
    }
    for discrepancy in &outcome.discrepancies {
        out.push_str(&format!("        - {discrepancy}\n"));
    }
    if let Some(teardown) = &outcome.teardown_error {
        out.push_str(&format!("        teardown: {teardown}\n"));
    }
}

// ── json ─────────────────────────────────────────────────────────────────

/// Render the report as pretty-printed JSON.
pub fn render_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
