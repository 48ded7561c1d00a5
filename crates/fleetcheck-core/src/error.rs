//! Error taxonomy for convergence validation.

use std::fmt;
use std::path::PathBuf;

use fleet_interfaces::CollaboratorError;
use serde::{Deserialize, Serialize};

use crate::reconcile::Discrepancy;

/// Pipeline stage in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Resolve,
    Isolate,
    Apply,
    Poll,
    Reconcile,
    Teardown,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Resolve => "resolve",
            Stage::Isolate => "isolate",
            Stage::Apply => "apply",
            Stage::Poll => "poll",
            Stage::Reconcile => "reconcile",
            Stage::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while validating a fleet.
///
/// Every variant is fatal for the scenario that raised it and for no other.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("missing required parameter(s): {}", .names.join(", "))]
    MissingParameter { names: Vec<String> },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("cannot isolate workspace from {}: {reason}", .source_dir.display())]
    Isolation { source_dir: PathBuf, reason: String },

    #[error("provisioning apply failed: {0}")]
    ProvisionFailure(CollaboratorError),

    #[error(
        "{target} did not converge after {attempts} attempt(s) ({delay_ms}ms apart); last observation: {last_observation}"
    )]
    ConvergenceTimeout {
        target: String,
        attempts: u32,
        delay_ms: u64,
        last_observation: String,
    },

    /// `discrepancies` holds whatever the other checks found before the
    /// scenario was abandoned.
    #[error("unparseable evidence from {source_name}: {reason}{}", also_found(.discrepancies))]
    UnparseableEvidence {
        source_name: String,
        reason: String,
        discrepancies: Vec<Discrepancy>,
    },

    #[error("{} discrepancy(ies) between evidence sources: {}", .discrepancies.len(), summarize(.discrepancies))]
    ReconciliationMismatch { discrepancies: Vec<Discrepancy> },

    #[error("teardown failed: {0}")]
    Teardown(CollaboratorError),

    #[error("invalid scenario {scenario}: {reason}")]
    InvalidScenario { scenario: String, reason: String },

    #[error("{what} query failed: {error}")]
    Collaborator {
        what: String,
        error: CollaboratorError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

fn also_found(discrepancies: &[Discrepancy]) -> String {
    if discrepancies.is_empty() {
        String::new()
    } else {
        format!(
            " (also {} discrepancy(ies): {})",
            discrepancies.len(),
            summarize(discrepancies)
        )
    }
}

fn summarize(discrepancies: &[Discrepancy]) -> String {
    discrepancies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl FleetError {
    /// Short machine-friendly name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetError::MissingParameter { .. } => "missing_parameter",
            FleetError::InvalidParameter { .. } => "invalid_parameter",
            FleetError::Isolation { .. } => "isolation_error",
            FleetError::ProvisionFailure(_) => "provision_failure",
            FleetError::ConvergenceTimeout { .. } => "convergence_timeout",
            FleetError::UnparseableEvidence { .. } => "unparseable_evidence",
            FleetError::ReconciliationMismatch { .. } => "reconciliation_mismatch",
            FleetError::Teardown(_) => "teardown_error",
            FleetError::InvalidScenario { .. } => "invalid_scenario",
            FleetError::Collaborator { .. } => "collaborator_error",
            FleetError::Config(_) => "config_error",
        }
    }

    /// Discrepancies carried by the error, if any.
    pub fn discrepancies(&self) -> &[Discrepancy] {
        match self {
            FleetError::ReconciliationMismatch { discrepancies }
            | FleetError::UnparseableEvidence { discrepancies, .. } => discrepancies,
            _ => &[],
        }
    }

    /// Pipeline stage this error belongs to when it ends a scenario.
    pub fn stage(&self) -> Stage {
        match self {
            FleetError::InvalidScenario { .. } | FleetError::Config(_) => Stage::Validate,
            FleetError::MissingParameter { .. } | FleetError::InvalidParameter { .. } => {
                Stage::Resolve
            }
            FleetError::Isolation { .. } => Stage::Isolate,
            FleetError::ProvisionFailure(_) => Stage::Apply,
            FleetError::ConvergenceTimeout { .. } => Stage::Poll,
            FleetError::UnparseableEvidence { .. }
            | FleetError::ReconciliationMismatch { .. }
            | FleetError::Collaborator { .. } => Stage::Reconcile,
            FleetError::Teardown(_) => Stage::Teardown,
        }
    }
}

/// Result type for fleet validation operations.
pub type Result<T> = std::result::Result<T, FleetError>;
