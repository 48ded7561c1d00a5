//! Fleet-Interfaces: collaborator contracts for fleetcheck
//!
//! This crate defines the three external systems the convergence core talks
//! to, without committing to any concrete tool:
//!
//! - `Provisioner`: applies and destroys declarative configuration
//! - `InventoryQuery`: authoritative read-only view of resources and volumes
//! - `RemoteExecutor`: runs a single command on a provisioned host
//!
//! ## Key Components
//!
//! - `ParameterSet`: typed input variables handed to the provisioner
//! - `ProvisionOutputs` / `OutputRecord`: structured provisioning outputs
//! - `ResourceRecord` / `VolumeRecord`: inventory records
//!
//! In-memory fakes live in the `fakes` module for testing.

pub mod collaborator_traits;
mod error;
pub mod fakes;
mod params;
mod records;

pub use collaborator_traits::{InventoryQuery, Provisioner, RemoteExecutor};
pub use error::{CollaboratorError, CollaboratorResult};
pub use params::{ParameterKind, ParameterSet, ParameterValue};
pub use records::{
    HostCredentials, OutputRecord, ProvisionOutputs, ResourceRecord, ResourceState,
    VolumeAttachment, VolumeRecord,
};
