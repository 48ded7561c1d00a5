//! Fleet-Adapters: real collaborators for fleetcheck
//!
//! Concrete implementations of the `fleet-interfaces` traits:
//!
//! - `TerraformCli`: `Provisioner` over `terraform init/apply/output/destroy`
//! - `Ec2Inventory`: `InventoryQuery` over the EC2 API (`aws-sdk-ec2`)
//! - `SshExecutor`: `RemoteExecutor` over non-interactive `ssh`
//!
//! Every call has a time limit; failures map onto `CollaboratorError`.

pub mod aws;
pub mod command;
pub mod ssh;
pub mod terraform;

pub use aws::Ec2Inventory;
pub use command::{CommandOutput, CommandRunner};
pub use ssh::SshExecutor;
pub use terraform::TerraformCli;
