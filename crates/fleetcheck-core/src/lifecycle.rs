//! Apply/teardown lifecycle around a validation body.
//!
//! [`with_provisioned`] is the only way the runner touches a provisioner:
//! apply, run the body on the outputs, then destroy. Destroy runs exactly
//! once on every path, including apply failure and a panicking body.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use fleet_interfaces::{ParameterSet, ProvisionOutputs, Provisioner};
use futures::FutureExt;
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::obs;
use crate::workspace::Workspace;

/// What happened inside the lifecycle.
#[derive(Debug)]
pub struct LifecycleOutcome<T> {
    /// `ProvisionFailure` when apply failed, otherwise the body's result.
    pub result: Result<T>,
    /// Set when destroy failed. Never replaces `result`.
    pub teardown_error: Option<FleetError>,
}

impl<T> LifecycleOutcome<T> {
    /// Collapse into a single result: the first failure wins, and a teardown
    /// failure after a successful body is itself a failure.
    pub fn into_result(self) -> Result<T> {
        let value = self.result?;
        match self.teardown_error {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }
}

/// Apply the configuration in `workspace`, run `body`, then destroy.
///
/// A panic in `body` (or in the provisioner) still triggers destroy before
/// the panic is resumed.
pub async fn with_provisioned<T, F, Fut>(
    provisioner: &dyn Provisioner,
    workspace: &Workspace,
    parameters: &ParameterSet,
    body: F,
) -> LifecycleOutcome<T>
where
    F: FnOnce(ProvisionOutputs) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let dir = workspace.module_dir();

    let guarded = AssertUnwindSafe(async {
        debug!(workspace_id = %workspace.id(), "applying configuration");
        let outputs = provisioner
            .apply(dir, parameters)
            .await
            .map_err(FleetError::ProvisionFailure)?;
        info!(workspace_id = %workspace.id(), outputs = outputs.len(), "apply complete");
        body(outputs).await
    })
    .catch_unwind()
    .await;

    debug!(workspace_id = %workspace.id(), "destroying configuration");
    let teardown_error = match provisioner.destroy(dir).await {
        Ok(()) => None,
        Err(err) => {
            obs::emit_teardown_failed(workspace.id(), &err);
            Some(FleetError::Teardown(err))
        }
    };

    match guarded {
        Ok(result) => LifecycleOutcome {
            result,
            teardown_error,
        },
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
