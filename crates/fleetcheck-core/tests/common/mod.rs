//! Shared fixtures for the runner integration suites.
//!
//! The fake fleet encodes everything the inventory and the hosts need into
//! the resource id (`i-<n>.<members>.<project>`), so a scenario's generated
//! project name flows from the parameter set through every collaborator.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fleet_interfaces::fakes::{FakeInventory, FakeProvisioner, ScriptedRemote};
use fleet_interfaces::{
    CollaboratorError, CollaboratorResult, ProvisionOutputs, ResourceRecord, VolumeRecord,
};
use fleetcheck_core::{
    Collaborators, EnvironmentResolver, FixedParameters, FleetConfig, RedundancyLevel,
    RetryBudget, ScenarioRunner,
};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const MODULE_DIR: &str = "modules/storage_servers/examples";
pub const CLIENTS_MODULE_DIR: &str = "modules/clients/tests";
pub const ROOT_DEVICE: &str = "/dev/sda1";
pub const BOOT_CLASS: &str = "gp3";
pub const MEMBER_CLASS: &str = "standard";

/// A configuration tree with a module directory and a shared template.
pub fn source_tree() -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let module = tmp.path().join(MODULE_DIR);
    std::fs::create_dir_all(&module).unwrap();
    std::fs::write(module.join("main.tf"), "module \"storage\" {}\n").unwrap();
    std::fs::write(module.join("outputs.tf"), "output \"storage_instances\" {}\n").unwrap();
    let clients = tmp.path().join(CLIENTS_MODULE_DIR);
    std::fs::create_dir_all(&clients).unwrap();
    std::fs::write(clients.join("main.tf"), "module \"clients\" {}\n").unwrap();
    let templates = tmp.path().join("templates");
    std::fs::create_dir_all(&templates).unwrap();
    std::fs::write(templates.join("storage_server_ubuntu.sh"), "#!/bin/sh\nmdadm --create\n").unwrap();
    tmp
}

/// Configuration pointing at `source`, with a short poll budget.
pub fn config(source: &Path) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.provisioning.source_root = source.to_path_buf();
    config.poll = RetryBudget::new(3, Duration::from_millis(5));
    config.expectations.member_volume_class = MEMBER_CLASS.to_string();
    config
}

/// Every required key present.
pub fn complete_env() -> FixedParameters {
    FixedParameters::new()
        .with("REGION", "us-east-1")
        .with("VPC_ID", "vpc-0a1b2c")
        .with("SUBNET_ID", "subnet-0d4e5f")
        .with("KEY_NAME", "fleetcheck")
        .with("STORAGE_AMI", "ami-0123456789")
        .with("CLIENTS_AMI", "ami-0fedcba987")
}

// ---------------------------------------------------------------------------
// Resource ids
// ---------------------------------------------------------------------------

pub fn resource_id(index: i64, members: i64, project: &str) -> String {
    format!("i-{index}.{members}.{project}")
}

/// `(members, project)` encoded in a resource id (or host address).
pub fn parse_id(id: &str) -> Option<(u32, String)> {
    let rest = id.strip_prefix("i-")?;
    let mut parts = rest.splitn(3, '.');
    let _index = parts.next()?;
    let members = parts.next()?.parse().ok()?;
    let project = parts.next()?.to_string();
    Some((members, project))
}

pub fn level_of(project: &str) -> Option<RedundancyLevel> {
    RedundancyLevel::ALL
        .into_iter()
        .find(|level| project.contains(&format!("-{}-", level.label())))
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

/// Apply returns one output record per requested instance, under the
/// storage or the clients module's output name.
pub fn fleet_provisioner() -> FakeProvisioner {
    FakeProvisioner::new(|params| {
        let project = params.get_str("project_name").unwrap_or("unnamed").to_string();
        let (output, count, members) = match params.get_int("clients_instance_count") {
            Some(count) => ("client_instances", count, params.get_int("ebs_count").unwrap_or(0)),
            None => (
                "storage_instances",
                params.get_int("storage_instance_count").unwrap_or(1),
                params.get_int("storage_ebs_count").unwrap_or(0),
            ),
        };
        let records: Vec<Value> = (0..count)
            .map(|n| {
                json!({
                    "id": resource_id(n, members, &project),
                    "private_ip": format!("10.0.0.{}", n + 10),
                })
            })
            .collect();
        Ok(ProvisionOutputs::new().with(output, Value::Array(records)))
    })
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// A running record tagged with its project, reachable at its own id.
pub fn record_for(id: &str, project: &str) -> ResourceRecord {
    let mut record = ResourceRecord::running(id, ROOT_DEVICE);
    record.private_address = Some(id.to_string());
    record.tags.insert("Project".to_string(), project.to_string());
    record
}

/// Boot volume plus `members` member volumes of `class`.
pub fn volumes_for(id: &str, members: u32, class: &str) -> Vec<VolumeRecord> {
    let mut volumes = vec![VolumeRecord::attached(format!("vol-boot-{id}"), BOOT_CLASS, id, ROOT_DEVICE)];
    for k in 0..members {
        let device = format!("/dev/sd{}", (b'f' + k as u8) as char);
        volumes.push(VolumeRecord::attached(format!("vol-{k}-{id}"), class, id, device));
    }
    volumes
}

/// Inventory that agrees with whatever the provisioner created.
pub fn fleet_inventory() -> FakeInventory {
    FakeInventory::new().with_lookup(|id| {
        let (members, project) = parse_id(id)?;
        Some((record_for(id, &project), volumes_for(id, members, MEMBER_CLASS)))
    })
}

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

/// `/proc/mdstat` for an active array with `configured` members of which
/// `working` are up.
pub fn mdstat(level: RedundancyLevel, configured: u32, working: u32) -> String {
    let devices: Vec<String> = (0..configured)
        .map(|k| {
            let flag = if k >= working { "(F)" } else { "" };
            format!("nvme{}n1[{k}]{flag}", k + 1)
        })
        .collect();
    let kernel = level.kernel_label();
    let detail = if level.reports_member_counter() {
        let map: String = (0..configured)
            .map(|k| if k < working { 'U' } else { '_' })
            .collect();
        format!("level 5, 512k chunk, algorithm 2 [{configured}/{working}] [{map}]")
    } else {
        "512k chunks".to_string()
    };
    format!(
        "Personalities : [{kernel}]\nmd0 : active {kernel} {}\n      2093056 blocks super 1.2 {detail}\n\nunused devices: <none>\n",
        devices.join(" ")
    )
}

pub const NOT_READY: &str = "Personalities : \nunused devices: <none>\n";

/// Hosts whose `/proc/mdstat` output is computed from `(level, members, call index)`.
pub fn fleet_remote<F>(respond: F) -> ScriptedRemote
where
    F: Fn(RedundancyLevel, u32, usize) -> CollaboratorResult<String> + Send + Sync + 'static,
{
    ScriptedRemote::new().with_fallback(move |host, command, index| {
        if command.contains("reboot") {
            return Ok(String::new());
        }
        let (members, project) = parse_id(host)
            .ok_or_else(|| CollaboratorError::Unavailable(format!("{host}: unknown host")))?;
        let level = level_of(&project)
            .ok_or_else(|| CollaboratorError::Unavailable(format!("{host}: unknown level")))?;
        respond(level, members, index)
    })
}

/// Every host reports a complete array immediately.
pub fn healthy_remote() -> ScriptedRemote {
    fleet_remote(|level, members, _| Ok(mdstat(level, members, members)))
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct Harness {
    pub source: TempDir,
    pub provisioner: Arc<FakeProvisioner>,
    pub inventory: Arc<FakeInventory>,
    pub remote: Arc<ScriptedRemote>,
    pub runner: ScenarioRunner,
}

impl Harness {
    pub fn new(provisioner: FakeProvisioner, inventory: FakeInventory, remote: ScriptedRemote) -> Self {
        let source = source_tree();
        let config = config(source.path());
        Self::with_config(source, config, EnvironmentResolver::new(complete_env()), provisioner, inventory, remote)
    }

    pub fn healthy() -> Self {
        Self::new(fleet_provisioner(), fleet_inventory(), healthy_remote())
    }

    pub fn with_config(
        source: TempDir,
        config: FleetConfig,
        resolver: EnvironmentResolver,
        provisioner: FakeProvisioner,
        inventory: FakeInventory,
        remote: ScriptedRemote,
    ) -> Self {
        let provisioner = Arc::new(provisioner);
        let inventory = Arc::new(inventory);
        let remote = Arc::new(remote);
        let collaborators = Collaborators::new(provisioner.clone(), inventory.clone(), remote.clone());
        let runner = ScenarioRunner::new(config, resolver, collaborators);
        Self {
            source,
            provisioner,
            inventory,
            remote,
            runner,
        }
    }
}
