//! Structured observability hooks for scenario lifecycle events.
//!
//! - Scenario-scoped tracing spans via [`ScenarioSpan`]
//! - Emission functions for: start, stage failure, poll attempt, finish,
//!   teardown failure
//!
//! Events are emitted at `info!`/`warn!` level; filter with `RUST_LOG`.

use std::fmt::Display;

use tracing::{info, warn, Instrument, Span};

use crate::error::Stage;
use crate::scenario::Scenario;

/// Span carrying the scenario name, redundancy level (`none` without an
/// array) and run id.
///
/// Async work is wrapped with [`ScenarioSpan::wrap`] so every event
/// emitted by the pipeline (including the collaborators) is attributed to
/// the scenario that caused it.
#[derive(Debug, Clone)]
pub struct ScenarioSpan {
    span: Span,
}

impl ScenarioSpan {
    pub fn new(scenario: &Scenario, run_id: &str) -> Self {
        let span = tracing::info_span!(
            "fleetcheck.scenario",
            scenario = %scenario.name,
            level = %scenario.level_label(),
            run_id = %run_id,
        );
        Self { span }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// Run `future` inside this span.
    pub fn wrap<F: std::future::Future>(&self, future: F) -> tracing::instrument::Instrumented<F> {
        future.instrument(self.span.clone())
    }
}

/// Emit event: scenario accepted and about to provision.
pub fn emit_scenario_started(scenario: &str, members: u32, resources: u32) {
    info!(
        event = "scenario.started",
        scenario = %scenario,
        members = members,
        resources = resources,
    );
}

/// Emit event: a pipeline stage failed for the scenario.
pub fn emit_stage_failed(scenario: &str, stage: Stage, error: &dyn Display) {
    warn!(
        event = "scenario.stage_failed",
        scenario = %scenario,
        stage = %stage,
        error = %error,
    );
}

/// Emit event: one convergence poll attempt finished without a match.
pub fn emit_poll_attempt(target: &str, attempt: u32, max_attempts: u32, observation: &str) {
    info!(
        event = "poll.attempt",
        target = %target,
        attempt = attempt,
        max_attempts = max_attempts,
        observation = %observation,
    );
}

/// Emit event: scenario finished with its verdict.
pub fn emit_scenario_finished(scenario: &str, duration_ms: u64, discrepancies: usize, passed: bool) {
    info!(
        event = "scenario.finished",
        scenario = %scenario,
        duration_ms = duration_ms,
        discrepancies = discrepancies,
        passed = passed,
    );
}

/// Emit event: teardown failed; resources may have leaked.
pub fn emit_teardown_failed(workspace_id: &str, error: &dyn Display) {
    warn!(event = "teardown.failed", workspace_id = %workspace_id, error = %error);
}
