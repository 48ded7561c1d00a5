//! Fleetcheck Core Library
//!
//! Provisions short-lived storage fleets from a declarative configuration,
//! waits for every host's redundant array to converge, cross-checks three
//! evidence sources (provisioning outputs, the live inventory, and the
//! host's own view), and always tears the fleet down again.
//!
//! ## Pipeline
//!
//! - `scenario`: redundancy levels and the scenario matrix
//! - `env`: required parameters from an injected source
//! - `workspace`: one private copy of the configuration per scenario
//! - `lifecycle`: apply, validate, destroy exactly once
//! - `poll`: bounded retry until the array reports active
//! - `mdstat` / `reconcile`: evidence parsing and comparison
//! - `runner`: parallel fan-out with isolated failures
//! - `report`: text and JSON rendering of a run

pub mod config;
pub mod env;
pub mod error;
pub mod lifecycle;
pub mod mdstat;
pub mod obs;
pub mod poll;
pub mod reconcile;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod telemetry;
pub mod workspace;

pub use config::{
    AdapterConfig, EnvironmentConfig, ExpectationConfig, FleetConfig, ParameterNames,
    ProvisioningConfig, RemoteConfig,
};
pub use env::{EnvironmentResolver, FixedParameters, Layered, ParameterSource, ParameterSpec, ProcessEnv};
pub use error::{FleetError, Result, Stage};
pub use lifecycle::{with_provisioned, LifecycleOutcome};
pub use mdstat::{parse_member_counts, MemberCounts};
pub use obs::{
    emit_poll_attempt, emit_scenario_finished, emit_scenario_started, emit_stage_failed,
    emit_teardown_failed, ScenarioSpan,
};
pub use poll::{poll_until, ArrayMatcher, MatchedText, RetryBudget};
pub use reconcile::{
    reconcile, Check, Discrepancy, EvidenceSnapshot, EvidenceSource, ExpectedState,
    ResourceEvidence, ValidationOutcome,
};
pub use report::{render_json, render_text};
pub use runner::{Collaborators, Failure, RunReport, ScenarioOutcome, ScenarioRunner};
pub use scenario::{default_matrix, RedundancyLevel, Scenario};
pub use telemetry::init_tracing;
pub use workspace::{Workspace, WorkspaceIsolator};
