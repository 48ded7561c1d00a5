//! Cross-source reconciliation of provisioning output, inventory and host
//! introspection.
//!
//! [`reconcile`] runs every check against an [`EvidenceSnapshot`] and
//! accumulates every [`Discrepancy`] into a [`ValidationOutcome`]; one
//! mismatch never hides another. Remote text that cannot be parsed is not a
//! discrepancy but a fatal `UnparseableEvidence` error, raised only after
//! every other check has run and carrying what those checks found.

use std::collections::BTreeMap;
use std::fmt;

use fleet_interfaces::{OutputRecord, ResourceRecord, ResourceState, VolumeRecord};
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::mdstat::{self, parse_member_counts, MemberCounts};
use crate::scenario::RedundancyLevel;

/// Tag key that carries the run's project name.
pub const PROJECT_TAG: &str = "Project";

/// Resource name used for fleet-wide discrepancies.
pub const FLEET: &str = "*";

// ---------------------------------------------------------------------------
// Discrepancies
// ---------------------------------------------------------------------------

/// The system that produced a piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    ProvisioningOutput,
    Inventory,
    RemoteIntrospection,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::ProvisioningOutput => "provisioning_output",
            EvidenceSource::Inventory => "inventory",
            EvidenceSource::RemoteIntrospection => "remote_introspection",
        }
    }
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An individual comparison performed by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    ResourceCount,
    ResourceState,
    ComputeClass,
    ProjectTag,
    VolumeCount,
    BootVolume,
    BootVolumeClass,
    MemberVolumeClass,
    ArrayLevel,
    ActiveMembers,
    TotalMembers,
}

impl Check {
    pub fn as_str(&self) -> &'static str {
        match self {
            Check::ResourceCount => "resource_count",
            Check::ResourceState => "resource_state",
            Check::ComputeClass => "compute_class",
            Check::ProjectTag => "project_tag",
            Check::VolumeCount => "volume_count",
            Check::BootVolume => "boot_volume",
            Check::BootVolumeClass => "boot_volume_class",
            Check::MemberVolumeClass => "member_volume_class",
            Check::ArrayLevel => "array_level",
            Check::ActiveMembers => "active_members",
            Check::TotalMembers => "total_members",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One disagreement between an evidence source and the expected state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Resource id, or [`FLEET`] for fleet-wide checks.
    pub resource: String,
    pub source: EvidenceSource,
    pub check: Check,
    pub expected: String,
    pub observed: String,
}

impl Discrepancy {
    pub fn new(
        resource: impl Into<String>,
        source: EvidenceSource,
        check: Check,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            source,
            check,
            expected: expected.into(),
            observed: observed.into(),
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{}: expected {}, observed {}",
            self.resource, self.source, self.check, self.expected, self.observed
        )
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// The state a scenario's fleet should have converged to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedState {
    pub resources: u32,
    pub members: u32,
    /// `None` for hosts that assemble no array; their introspection text
    /// is not consulted.
    pub level: Option<RedundancyLevel>,
    /// Array device name as printed by the kernel (`md0`).
    pub array: String,
    pub member_volume_class: String,
    pub boot_volume_class: Option<String>,
    pub compute_class: Option<String>,
    /// Required value of the [`PROJECT_TAG`] tag, when tag checking is on.
    pub project_tag: Option<String>,
}

impl ExpectedState {
    pub fn new(
        resources: u32,
        members: u32,
        level: RedundancyLevel,
        member_volume_class: impl Into<String>,
    ) -> Self {
        Self {
            resources,
            members,
            level: Some(level),
            array: "md0".to_string(),
            member_volume_class: member_volume_class.into(),
            boot_volume_class: None,
            compute_class: None,
            project_tag: None,
        }
    }

    /// Expectations for hosts with `volumes` plain data volumes and no array.
    pub fn array_less(resources: u32, volumes: u32, volume_class: impl Into<String>) -> Self {
        Self {
            level: None,
            ..Self::new(resources, volumes, RedundancyLevel::Striping, volume_class)
        }
    }

    pub fn with_array(mut self, array: impl Into<String>) -> Self {
        self.array = array.into();
        self
    }

    pub fn with_boot_volume_class(mut self, class: impl Into<String>) -> Self {
        self.boot_volume_class = Some(class.into());
        self
    }

    pub fn with_compute_class(mut self, class: impl Into<String>) -> Self {
        self.compute_class = Some(class.into());
        self
    }

    pub fn with_project_tag(mut self, tag: impl Into<String>) -> Self {
        self.project_tag = Some(tag.into());
        self
    }

    /// Attached volumes per resource: one boot volume plus the members.
    pub fn volumes_per_resource(&self) -> u32 {
        1 + self.members
    }
}

/// Evidence gathered for one provisioned resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvidence {
    pub id: String,
    /// Live inventory record; `None` if the inventory does not know the id.
    pub inventory: Option<ResourceRecord>,
    pub volumes: Vec<VolumeRecord>,
    /// Introspection text returned by the host; empty for array-less hosts.
    pub remote_text: String,
}

/// Three-way view of a fleet at validation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSnapshot {
    /// Provisioning output records, one per created resource.
    pub outputs: Vec<OutputRecord>,
    pub resources: Vec<ResourceEvidence>,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of reconciling one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Every discrepancy found (empty when passed).
    pub discrepancies: Vec<Discrepancy>,
    /// Member counts parsed from each resource's introspection text.
    pub member_counts: BTreeMap<String, MemberCounts>,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.discrepancies.is_empty()
    }

    /// Convert into `ReconciliationMismatch` when anything disagreed.
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(FleetError::ReconciliationMismatch {
                discrepancies: self.discrepancies,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Compare the snapshot against the expected state.
///
/// Every check runs for every resource. When some host's text cannot be
/// parsed the result is `UnparseableEvidence`, naming each such host and
/// carrying the discrepancies the remaining checks produced.
pub fn reconcile(snapshot: &EvidenceSnapshot, expected: &ExpectedState) -> Result<ValidationOutcome> {
    let mut discrepancies = Vec::new();
    let mut member_counts = BTreeMap::new();
    let mut unparseable = Vec::new();

    check_output_count(snapshot, expected, &mut discrepancies);
    for resource in &snapshot.resources {
        check_inventory_record(resource, expected, &mut discrepancies);
        check_volumes(resource, expected, &mut discrepancies);

        let Some(level) = expected.level else {
            continue;
        };
        match parse_member_counts(&resource.remote_text, &expected.array, level) {
            Ok(counts) => {
                check_members(&resource.id, &counts, level, expected, &mut discrepancies);
                member_counts.insert(resource.id.clone(), counts);
            }
            Err(FleetError::UnparseableEvidence { reason, .. }) => {
                unparseable.push(format!("{}: {reason}", resource.id));
            }
            Err(other) => return Err(other),
        }
    }

    if !unparseable.is_empty() {
        return Err(FleetError::UnparseableEvidence {
            source_name: mdstat::SOURCE.to_string(),
            reason: unparseable.join("; "),
            discrepancies,
        });
    }

    Ok(ValidationOutcome {
        discrepancies,
        member_counts,
    })
}

fn check_output_count(snapshot: &EvidenceSnapshot, expected: &ExpectedState, out: &mut Vec<Discrepancy>) {
    let observed = snapshot.outputs.len();
    if observed != expected.resources as usize {
        out.push(Discrepancy::new(
            FLEET,
            EvidenceSource::ProvisioningOutput,
            Check::ResourceCount,
            expected.resources.to_string(),
            observed.to_string(),
        ));
    }
}

fn check_inventory_record(resource: &ResourceEvidence, expected: &ExpectedState, out: &mut Vec<Discrepancy>) {
    let id = resource.id.as_str();
    let Some(record) = &resource.inventory else {
        out.push(Discrepancy::new(
            id,
            EvidenceSource::Inventory,
            Check::ResourceState,
            ResourceState::Running.as_str(),
            "absent",
        ));
        return;
    };

    if record.state != ResourceState::Running {
        out.push(Discrepancy::new(
            id,
            EvidenceSource::Inventory,
            Check::ResourceState,
            ResourceState::Running.as_str(),
            record.state.as_str(),
        ));
    }

    if let Some(class) = &expected.compute_class {
        let observed = record.compute_class.as_deref().unwrap_or("unknown");
        if observed != class {
            out.push(Discrepancy::new(
                id,
                EvidenceSource::Inventory,
                Check::ComputeClass,
                class.as_str(),
                observed,
            ));
        }
    }

    if let Some(tag) = &expected.project_tag {
        let observed = record.tags.get(PROJECT_TAG).map_or("missing", String::as_str);
        if observed != tag {
            out.push(Discrepancy::new(
                id,
                EvidenceSource::Inventory,
                Check::ProjectTag,
                tag.as_str(),
                observed,
            ));
        }
    }
}

fn check_volumes(resource: &ResourceEvidence, expected: &ExpectedState, out: &mut Vec<Discrepancy>) {
    let id = resource.id.as_str();
    let volumes = &resource.volumes;

    if volumes.len() != expected.volumes_per_resource() as usize {
        out.push(Discrepancy::new(
            id,
            EvidenceSource::Inventory,
            Check::VolumeCount,
            expected.volumes_per_resource().to_string(),
            volumes.len().to_string(),
        ));
    }

    let root_device = resource
        .inventory
        .as_ref()
        .and_then(|r| r.root_device.as_deref());
    let Some(root_device) = root_device else {
        out.push(Discrepancy::new(
            id,
            EvidenceSource::Inventory,
            Check::BootVolume,
            "declared root device",
            "unknown",
        ));
        return;
    };

    let (boot, members): (Vec<&VolumeRecord>, Vec<&VolumeRecord>) = volumes
        .iter()
        .partition(|v| v.device_for(id) == Some(root_device));

    if boot.len() != 1 {
        out.push(Discrepancy::new(
            id,
            EvidenceSource::Inventory,
            Check::BootVolume,
            format!("1 volume at {root_device}"),
            boot.len().to_string(),
        ));
    }

    if let Some(class) = &expected.boot_volume_class {
        for volume in boot.iter().filter(|v| &v.volume_class != class) {
            out.push(Discrepancy::new(
                id,
                EvidenceSource::Inventory,
                Check::BootVolumeClass,
                class.as_str(),
                format!("{} ({})", volume.volume_class, volume.id),
            ));
        }
    }

    for volume in members
        .iter()
        .filter(|v| v.volume_class != expected.member_volume_class)
    {
        out.push(Discrepancy::new(
            id,
            EvidenceSource::Inventory,
            Check::MemberVolumeClass,
            expected.member_volume_class.as_str(),
            format!("{} ({})", volume.volume_class, volume.id),
        ));
    }
}

fn check_members(
    id: &str,
    counts: &MemberCounts,
    level: RedundancyLevel,
    expected: &ExpectedState,
    out: &mut Vec<Discrepancy>,
) {
    let label = level.kernel_label();
    if counts.personality.as_deref() != Some(label) {
        out.push(Discrepancy::new(
            id,
            EvidenceSource::RemoteIntrospection,
            Check::ArrayLevel,
            label,
            counts.personality.as_deref().unwrap_or("none"),
        ));
    }
    if counts.active != expected.members {
        out.push(Discrepancy::new(
            id,
            EvidenceSource::RemoteIntrospection,
            Check::ActiveMembers,
            expected.members.to_string(),
            counts.active.to_string(),
        ));
    }
    if counts.total != expected.members {
        out.push(Discrepancy::new(
            id,
            EvidenceSource::RemoteIntrospection,
            Check::TotalMembers,
            expected.members.to_string(),
            counts.total.to_string(),
        ));
    }
}
