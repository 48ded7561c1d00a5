//! Run configuration.
//!
//! Every field has a default matching the storage-server module layout (and
//! the clients module for array-less scenarios), so an empty TOML file (or
//! no file at all) is a valid configuration.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use fleet_interfaces::ParameterValue;
use serde::{Deserialize, Serialize};

use crate::env::{FixedParameters, ParameterSpec};
use crate::error::{FleetError, Result};
use crate::poll::RetryBudget;
use crate::scenario::{default_matrix, Scenario};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Names of the per-scenario variables handed to the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterNames {
    pub project_name: String,
    pub instance_count: String,
    pub member_count: String,
    pub level: String,
    pub compute_class: String,
}

impl Default for ParameterNames {
    fn default() -> Self {
        Self {
            project_name: "project_name".to_string(),
            instance_count: "storage_instance_count".to_string(),
            member_count: "storage_ebs_count".to_string(),
            level: "storage_raid_level".to_string(),
            compute_class: "storage_instance_type".to_string(),
        }
    }
}

/// Where the configuration lives and what it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Root of the tree copied into every workspace.
    pub source_root: PathBuf,
    /// Directory (relative to `source_root`) the provisioner runs in.
    pub module_dir: PathBuf,
    /// Output holding one attribute map per compute unit.
    pub output_name: String,
    /// Prefix of the generated project name.
    pub project_prefix: String,
    /// Parent directory for workspaces; system temp dir when unset. Must
    /// not lie inside `source_root`.
    pub temp_root: Option<PathBuf>,
    pub names: ParameterNames,
    /// Parameters this module needs on top of `environment.required`.
    pub required: Vec<ParameterSpec>,
    /// Static variables added to every scenario's parameter set.
    pub extra_variables: BTreeMap<String, ParameterValue>,
    /// Module used by scenarios without a redundancy level.
    pub array_less: ArrayLessConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        let mut extra_variables = BTreeMap::new();
        extra_variables.insert(
            "storage_user_data".to_string(),
            ParameterValue::from("../../../templates/storage_server_ubuntu.sh"),
        );
        Self {
            source_root: PathBuf::from("."),
            module_dir: PathBuf::from("modules/storage_servers/examples"),
            output_name: "storage_instances".to_string(),
            project_prefix: "fleetcheck-storage".to_string(),
            temp_root: None,
            names: ParameterNames::default(),
            required: vec![ParameterSpec::string("STORAGE_AMI")],
            extra_variables,
            array_less: ArrayLessConfig::default(),
        }
    }
}

/// The compute-only module: hosts with data volumes and no array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayLessConfig {
    pub module_dir: PathBuf,
    pub output_name: String,
    pub project_prefix: String,
    pub instance_count: String,
    pub volume_count: String,
    pub compute_class: String,
    pub required: Vec<ParameterSpec>,
    pub extra_variables: BTreeMap<String, ParameterValue>,
    /// Expected boot volume class; overrides `expectations.boot_volume_class`.
    pub boot_volume_class: Option<String>,
}

impl Default for ArrayLessConfig {
    fn default() -> Self {
        let mut extra_variables = BTreeMap::new();
        extra_variables.insert("boot_volume_type".to_string(), ParameterValue::from("gp3"));
        extra_variables.insert("ebs_type".to_string(), ParameterValue::from("gp3"));
        Self {
            module_dir: PathBuf::from("modules/clients/tests"),
            output_name: "client_instances".to_string(),
            project_prefix: "fleetcheck-clients".to_string(),
            instance_count: "clients_instance_count".to_string(),
            volume_count: "ebs_count".to_string(),
            compute_class: "clients_instance_type".to_string(),
            required: vec![ParameterSpec::string("CLIENTS_AMI")],
            extra_variables,
            boot_volume_class: Some("gp3".to_string()),
        }
    }
}

/// Provisioning settings that apply to one scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleLayout<'a> {
    pub module_dir: &'a Path,
    pub output_name: &'a str,
    pub project_prefix: &'a str,
    pub project_name: &'a str,
    pub instance_count: &'a str,
    pub volume_count: &'a str,
    pub compute_class: &'a str,
    /// Variable carrying the level; `None` for array-less scenarios.
    pub level: Option<&'a str>,
    pub required: &'a [ParameterSpec],
    pub extra_variables: &'a BTreeMap<String, ParameterValue>,
    pub boot_volume_class: Option<&'a str>,
}

impl ProvisioningConfig {
    /// The module, variable names and expectations `scenario` runs with.
    pub fn layout_for(&self, scenario: &Scenario) -> ModuleLayout<'_> {
        if scenario.has_array() {
            ModuleLayout {
                module_dir: &self.module_dir,
                output_name: &self.output_name,
                project_prefix: &self.project_prefix,
                project_name: &self.names.project_name,
                instance_count: &self.names.instance_count,
                volume_count: &self.names.member_count,
                compute_class: &self.names.compute_class,
                level: Some(&self.names.level),
                required: &self.required,
                extra_variables: &self.extra_variables,
                boot_volume_class: None,
            }
        } else {
            let module = &self.array_less;
            ModuleLayout {
                module_dir: &module.module_dir,
                output_name: &module.output_name,
                project_prefix: &module.project_prefix,
                project_name: &self.names.project_name,
                instance_count: &module.instance_count,
                volume_count: &module.volume_count,
                compute_class: &module.compute_class,
                level: None,
                required: &module.required,
                extra_variables: &module.extra_variables,
                boot_volume_class: module.boot_volume_class.as_deref(),
            }
        }
    }
}

/// Required parameters and where to look them up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Prefix prepended to every key when reading the process environment.
    pub prefix: String,
    /// Needed by every scenario; modules add their own.
    pub required: Vec<ParameterSpec>,
    /// Fallback values consulted after the process environment.
    pub defaults: FixedParameters,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            required: ["REGION", "VPC_ID", "SUBNET_ID", "KEY_NAME"]
                .into_iter()
                .map(ParameterSpec::string)
                .collect(),
            defaults: FixedParameters::new(),
        }
    }
}

/// How hosts are reached and introspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub user: String,
    pub key_path: Option<PathBuf>,
    pub status_command: String,
    /// Array device name as printed by the kernel.
    pub array: String,
    pub reboot_command: String,
    /// Reboot each host after the first convergence and wait again.
    pub verify_after_reboot: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: "ubuntu".to_string(),
            key_path: None,
            status_command: "cat /proc/mdstat".to_string(),
            array: "md0".to_string(),
            reboot_command: "sudo reboot".to_string(),
            verify_after_reboot: false,
        }
    }
}

/// Expected attributes that are not part of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectationConfig {
    pub member_volume_class: String,
    pub boot_volume_class: Option<String>,
    /// Require the `Project` tag to equal the generated project name. Only
    /// for modules that tag their instances that way.
    pub check_project_tag: bool,
}

impl Default for ExpectationConfig {
    fn default() -> Self {
        Self {
            member_volume_class: "gp3".to_string(),
            boot_volume_class: None,
            check_project_tag: false,
        }
    }
}

/// Settings for the real collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub terraform_binary: String,
    /// Per-command limit for provisioning commands (seconds).
    pub command_timeout_secs: u64,
    /// Parameter whose value is the inventory region.
    pub region_parameter: String,
    /// Per-operation limit for EC2 API calls (seconds).
    pub query_timeout_secs: u64,
    pub ssh_binary: String,
    pub connect_timeout_secs: u64,
    pub remote_timeout_secs: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            terraform_binary: "terraform".to_string(),
            command_timeout_secs: 1_800,
            region_parameter: "region".to_string(),
            query_timeout_secs: 60,
            ssh_binary: "ssh".to_string(),
            connect_timeout_secs: 10,
            remote_timeout_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// FleetConfig
// ---------------------------------------------------------------------------

/// Full configuration for a validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub provisioning: ProvisioningConfig,
    pub environment: EnvironmentConfig,
    pub poll: RetryBudget,
    pub remote: RemoteConfig,
    pub expectations: ExpectationConfig,
    pub adapters: AdapterConfig,
    /// Scenarios run concurrently at most.
    pub max_concurrent: usize,
    pub scenarios: Vec<Scenario>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            provisioning: ProvisioningConfig::default(),
            environment: EnvironmentConfig::default(),
            poll: RetryBudget::default(),
            remote: RemoteConfig::default(),
            expectations: ExpectationConfig::default(),
            adapters: AdapterConfig::default(),
            max_concurrent: 4,
            scenarios: default_matrix(),
        }
    }
}

impl FleetConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| FleetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file. Relative `source_root` is resolved against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&text)?;
        if config.provisioning.source_root.is_relative() {
            if let Some(base) = path.parent() {
                config.provisioning.source_root = base.join(&config.provisioning.source_root);
            }
        }
        Ok(config)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(FleetError::Config("max_concurrent must be at least 1".to_string()));
        }
        if self.provisioning.output_name.trim().is_empty() {
            return Err(FleetError::Config("provisioning.output_name must not be empty".to_string()));
        }
        if self.provisioning.array_less.output_name.trim().is_empty() {
            return Err(FleetError::Config(
                "provisioning.array_less.output_name must not be empty".to_string(),
            ));
        }
        if self.remote.status_command.trim().is_empty() {
            return Err(FleetError::Config("remote.status_command must not be empty".to_string()));
        }
        let mut keys = HashSet::new();
        for spec in &self.environment.required {
            if !keys.insert(spec.key.as_str()) {
                return Err(FleetError::Config(format!(
                    "required parameter {} listed twice",
                    spec.key
                )));
            }
        }
        Ok(())
    }

    /// Parameters `scenario` needs: the shared ones, then its module's.
    pub fn required_for(&self, scenario: &Scenario) -> Vec<ParameterSpec> {
        let layout = self.provisioning.layout_for(scenario);
        merge_specs(&self.environment.required, layout.required)
    }

    /// Union of [`FleetConfig::required_for`] over `scenarios`, first
    /// occurrence of each key wins.
    pub fn required_for_all(&self, scenarios: &[Scenario]) -> Vec<ParameterSpec> {
        scenarios.iter().fold(self.environment.required.clone(), |acc, scenario| {
            merge_specs(&acc, self.provisioning.layout_for(scenario).required)
        })
    }

    /// Scenarios whose names are in `names`, in configuration order; all
    /// scenarios when `names` is empty.
    pub fn select_scenarios(&self, names: &[String]) -> Result<Vec<Scenario>> {
        if names.is_empty() {
            return Ok(self.scenarios.clone());
        }
        let unknown: Vec<&str> = names
            .iter()
            .filter(|n| !self.scenarios.iter().any(|s| &s.name == *n))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(FleetError::Config(format!(
                "unknown scenario(s): {}",
                unknown.join(", ")
            )));
        }
        Ok(self
            .scenarios
            .iter()
            .filter(|s| names.contains(&s.name))
            .cloned()
            .collect())
    }
}

fn merge_specs(base: &[ParameterSpec], extra: &[ParameterSpec]) -> Vec<ParameterSpec> {
    let mut merged = base.to_vec();
    for spec in extra {
        if !merged.iter().any(|s| s.key == spec.key) {
            merged.push(spec.clone());
        }
    }
    merged
}
