//! `terraform` command-line provisioner.
//!
//! Parameters are written as a JSON variable file inside the workspace, so
//! `destroy` can find them again without being handed the parameter set.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use fleet_interfaces::{
    CollaboratorError, CollaboratorResult, ParameterSet, ProvisionOutputs, Provisioner,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::command::{args, CommandRunner};

/// Variable file written into every workspace by `apply`.
pub const VAR_FILE: &str = "fleetcheck.auto.tfvars.json";

/// Local state file created by the first apply.
pub const STATE_FILE: &str = "terraform.tfstate";

/// Drives `terraform` in a workspace module directory.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    runner: CommandRunner,
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner: CommandRunner::new(binary, timeout).with_env("TF_IN_AUTOMATION", "1"),
        }
    }

    async fn terraform(&self, dir: &Path, argv: Vec<String>) -> CollaboratorResult<String> {
        Ok(self.runner.run(&argv, Some(dir)).await?.stdout)
    }
}

#[async_trait]
impl Provisioner for TerraformCli {
    async fn apply(
        &self,
        workspace_dir: &Path,
        parameters: &ParameterSet,
    ) -> CollaboratorResult<ProvisionOutputs> {
        let var_file = workspace_dir.join(VAR_FILE);
        let body = serde_json::to_vec_pretty(&parameters.to_json())?;
        tokio::fs::write(&var_file, body).await.map_err(|e| {
            CollaboratorError::Unavailable(format!("cannot write {}: {e}", var_file.display()))
        })?;
        debug!(dir = %workspace_dir.display(), variables = parameters.len(), "wrote variable file");

        self.terraform(workspace_dir, args(["init", "-input=false", "-no-color"]))
            .await?;
        self.terraform(
            workspace_dir,
            args([
                "apply".to_string(),
                "-auto-approve".to_string(),
                "-input=false".to_string(),
                "-no-color".to_string(),
                format!("-var-file={VAR_FILE}"),
            ]),
        )
        .await?;
        info!(dir = %workspace_dir.display(), "terraform apply complete");

        let raw = self
            .terraform(workspace_dir, args(["output", "-json", "-no-color"]))
            .await?;
        parse_outputs(&raw)
    }

    async fn destroy(&self, workspace_dir: &Path) -> CollaboratorResult<()> {
        // Nothing was ever created if apply never produced state.
        if !workspace_dir.join(STATE_FILE).exists() {
            debug!(dir = %workspace_dir.display(), "no state file, nothing to destroy");
            return Ok(());
        }

        let mut argv = args(["destroy", "-auto-approve", "-input=false", "-no-color"]);
        if workspace_dir.join(VAR_FILE).exists() {
            argv.push(format!("-var-file={VAR_FILE}"));
        }
        self.terraform(workspace_dir, argv).await?;
        info!(dir = %workspace_dir.display(), "terraform destroy complete");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: serde_json::Value,
}

/// Decode `terraform output -json`, keeping only each output's `value`.
pub fn parse_outputs(raw: &str) -> CollaboratorResult<ProvisionOutputs> {
    let entries: BTreeMap<String, OutputEntry> =
        serde_json::from_str(raw).map_err(|e| CollaboratorError::Decode {
            what: "terraform output".to_string(),
            reason: e.to_string(),
        })?;
    Ok(entries
        .into_iter()
        .fold(ProvisionOutputs::new(), |outputs, (name, entry)| {
            outputs.with(name, entry.value)
        }))
}
