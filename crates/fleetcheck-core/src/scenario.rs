//! Scenario definitions: redundancy levels and the validation matrix.
//!
//! A scenario without a level provisions plain compute hosts with data
//! volumes and no array; only the provisioning output and the inventory
//! are checked for it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Redundancy scheme of the storage array assembled on each host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedundancyLevel {
    /// Striping, no fault tolerance (`raid-0`).
    #[serde(rename = "raid-0", alias = "raid0", alias = "striping")]
    Striping,
    /// Single distributed parity (`raid-5`).
    #[serde(rename = "raid-5", alias = "raid5", alias = "single-parity")]
    SingleParity,
    /// Dual distributed parity (`raid-6`).
    #[serde(rename = "raid-6", alias = "raid6", alias = "dual-parity")]
    DualParity,
}

impl RedundancyLevel {
    pub const ALL: [RedundancyLevel; 3] = [
        RedundancyLevel::Striping,
        RedundancyLevel::SingleParity,
        RedundancyLevel::DualParity,
    ];

    /// Identifier handed to the provisioning configuration.
    pub fn label(&self) -> &'static str {
        match self {
            RedundancyLevel::Striping => "raid-0",
            RedundancyLevel::SingleParity => "raid-5",
            RedundancyLevel::DualParity => "raid-6",
        }
    }

    /// Personality name the kernel prints in `/proc/mdstat`.
    pub fn kernel_label(&self) -> &'static str {
        match self {
            RedundancyLevel::Striping => "raid0",
            RedundancyLevel::SingleParity => "raid5",
            RedundancyLevel::DualParity => "raid6",
        }
    }

    /// Structural minimum number of member disks.
    pub fn min_members(&self) -> u32 {
        match self {
            RedundancyLevel::Striping => 2,
            RedundancyLevel::SingleParity => 3,
            RedundancyLevel::DualParity => 4,
        }
    }

    /// Number of member failures the array survives.
    pub fn fault_tolerance(&self) -> u32 {
        match self {
            RedundancyLevel::Striping => 0,
            RedundancyLevel::SingleParity => 1,
            RedundancyLevel::DualParity => 2,
        }
    }

    /// Whether the kernel reports a `[active/total]` member counter for
    /// arrays of this level. Striped arrays carry no such counter.
    pub fn reports_member_counter(&self) -> bool {
        !matches!(self, RedundancyLevel::Striping)
    }
}

impl fmt::Display for RedundancyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for RedundancyLevel {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raid-0" | "raid0" | "striping" => Ok(RedundancyLevel::Striping),
            "raid-5" | "raid5" | "single-parity" => Ok(RedundancyLevel::SingleParity),
            "raid-6" | "raid6" | "dual-parity" => Ok(RedundancyLevel::DualParity),
            other => Err(FleetError::Config(format!(
                "unknown redundancy level '{other}' (expected raid-0, raid-5 or raid-6)"
            ))),
        }
    }
}

fn default_resources() -> u32 {
    1
}

/// Label shown for scenarios that assemble no array.
pub const NO_ARRAY: &str = "none";

/// One named validation case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Omitted for array-less scenarios.
    #[serde(default)]
    pub level: Option<RedundancyLevel>,
    /// Data volumes per host (excluding the boot volume); the array members
    /// when a level is set.
    pub members: u32,
    /// Compute class override (instance type).
    #[serde(default)]
    pub compute_class: Option<String>,
    /// Number of hosts to provision.
    #[serde(default = "default_resources")]
    pub resources: u32,
}

impl Scenario {
    pub fn new(name: impl Into<String>, level: RedundancyLevel, members: u32) -> Self {
        Self {
            name: name.into(),
            level: Some(level),
            members,
            compute_class: None,
            resources: 1,
        }
    }

    /// Hosts with `volumes` data volumes and no array.
    pub fn array_less(name: impl Into<String>, volumes: u32) -> Self {
        Self {
            level: None,
            ..Self::new(name, RedundancyLevel::Striping, volumes)
        }
    }

    pub fn has_array(&self) -> bool {
        self.level.is_some()
    }

    /// Level label, or [`NO_ARRAY`].
    pub fn level_label(&self) -> &'static str {
        self.level.as_ref().map_or(NO_ARRAY, RedundancyLevel::label)
    }

    /// Fewest data volumes the scenario may request.
    pub fn min_members(&self) -> u32 {
        self.level.as_ref().map_or(0, RedundancyLevel::min_members)
    }

    pub fn with_compute_class(mut self, class: impl Into<String>) -> Self {
        self.compute_class = Some(class.into());
        self
    }

    pub fn with_resources(mut self, resources: u32) -> Self {
        self.resources = resources;
        self
    }

    /// Check the structural preconditions of this scenario.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("scenario name must not be empty".to_string()));
        }
        if let Some(level) = self.level {
            if self.members < level.min_members() {
                return Err(self.invalid(format!(
                    "{} requires at least {} member disks, got {}",
                    level,
                    level.min_members(),
                    self.members
                )));
            }
        }
        if self.resources == 0 {
            return Err(self.invalid("at least one resource must be requested".to_string()));
        }
        if matches!(&self.compute_class, Some(class) if class.trim().is_empty()) {
            return Err(self.invalid("compute class override must not be blank".to_string()));
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> FleetError {
        FleetError::InvalidScenario {
            scenario: self.name.clone(),
            reason,
        }
    }
}

/// The standard matrix: each redundancy level at its structural minimum.
pub fn default_matrix() -> Vec<Scenario> {
    RedundancyLevel::ALL
        .iter()
        .map(|level| {
            Scenario::new(
                level.label().to_ascii_uppercase(),
                *level,
                level.min_members(),
            )
        })
        .collect()
}
