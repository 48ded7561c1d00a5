//! Collaborator trait definitions for fleetcheck
//!
//! These traits define the external systems the convergence core consumes:
//! - `Provisioner`: apply / destroy declarative configuration in a workspace
//! - `InventoryQuery`: read-only inventory lookups
//! - `RemoteExecutor`: single-round-trip command execution on a host
//!
//! All traits are async and tool-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::path::Path;

use async_trait::async_trait;

use crate::error::CollaboratorResult;
use crate::params::ParameterSet;
use crate::records::{HostCredentials, ProvisionOutputs, ResourceRecord, VolumeRecord};

/// Declarative provisioning tool.
///
/// Guarantees expected of implementations:
/// - `apply` leaves all state inside `workspace_dir`; nothing is shared
///   between two workspaces.
/// - `destroy` is safe to call after a failed or partial `apply`.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Apply the configuration in `workspace_dir` with `parameters` and
    /// return the structured outputs.
    async fn apply(
        &self,
        workspace_dir: &Path,
        parameters: &ParameterSet,
    ) -> CollaboratorResult<ProvisionOutputs>;

    /// Destroy everything recorded in the workspace's state.
    async fn destroy(&self, workspace_dir: &Path) -> CollaboratorResult<()>;
}

/// Authoritative inventory of compute units and volumes.
#[async_trait]
pub trait InventoryQuery: Send + Sync {
    /// Describe the given resources. Unknown ids are simply absent from
    /// the result.
    async fn describe_resources(&self, ids: &[String]) -> CollaboratorResult<Vec<ResourceRecord>>;

    /// Describe every volume attached to `resource_id`.
    async fn describe_volumes_by_attachment(
        &self,
        resource_id: &str,
    ) -> CollaboratorResult<Vec<VolumeRecord>>;
}

/// Remote command execution on a provisioned host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `host` and return its standard output.
    async fn run_command(
        &self,
        host: &str,
        credentials: &HostCredentials,
        command: &str,
    ) -> CollaboratorResult<String>;
}
