//! Records exchanged with collaborators.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CollaboratorError, CollaboratorResult};

// ---------------------------------------------------------------------------
// Provisioning outputs
// ---------------------------------------------------------------------------

/// Structured outputs emitted by the provisioning collaborator after apply.
///
/// Maps an output name to its raw JSON value. Most outputs of interest are
/// lists of attribute maps (one per created compute unit).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionOutputs(BTreeMap<String, Value>);

impl ProvisionOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Output names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Decode a named output as a list of attribute maps.
    ///
    /// Fails with `NotFound` if the output is absent and `Decode` if it is
    /// not a list of objects.
    pub fn list_of_objects(&self, name: &str) -> CollaboratorResult<Vec<OutputRecord>> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| CollaboratorError::NotFound(format!("output '{name}'")))?;

        let items = value.as_array().ok_or_else(|| CollaboratorError::Decode {
            what: format!("output '{name}'"),
            reason: "expected a list".to_string(),
        })?;

        items
            .iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(map) => Ok(OutputRecord::new(map.clone())),
                _ => Err(CollaboratorError::Decode {
                    what: format!("output '{name}'[{index}]"),
                    reason: "expected an object".to_string(),
                }),
            })
            .collect()
    }
}

/// One entry of a list-of-objects output (one compute unit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRecord(Map<String, Value>);

impl OutputRecord {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self(attributes)
    }

    /// The resource identifier (`id` attribute), if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.attr_str("id")
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Inventory records
// ---------------------------------------------------------------------------

/// Lifecycle state of a compute unit as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Other(String),
}

impl ResourceState {
    /// Parse the inventory's textual state name.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pending" => ResourceState::Pending,
            "running" => ResourceState::Running,
            "stopping" => ResourceState::Stopping,
            "stopped" => ResourceState::Stopped,
            "shutting-down" => ResourceState::ShuttingDown,
            "terminated" => ResourceState::Terminated,
            other => ResourceState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceState::Pending => "pending",
            ResourceState::Running => "running",
            ResourceState::Stopping => "stopping",
            ResourceState::Stopped => "stopped",
            ResourceState::ShuttingDown => "shutting-down",
            ResourceState::Terminated => "terminated",
            ResourceState::Other(name) => name,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live record of one compute unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub state: ResourceState,
    /// Device path of the boot volume (e.g. `/dev/sda1`).
    pub root_device: Option<String>,
    /// Compute class (instance type).
    pub compute_class: Option<String>,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ResourceRecord {
    /// A running record with no addresses or tags.
    pub fn running(id: impl Into<String>, root_device: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: ResourceState::Running,
            root_device: Some(root_device.into()),
            compute_class: None,
            public_address: None,
            private_address: None,
            tags: BTreeMap::new(),
        }
    }

    /// Preferred address for remote execution: public first, then private.
    pub fn address(&self) -> Option<&str> {
        self.public_address
            .as_deref()
            .or(self.private_address.as_deref())
    }
}

/// Attachment of a volume to a compute unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub resource_id: String,
    pub device: String,
}

/// Live record of one block-storage volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub id: String,
    /// Volume type/class (e.g. `gp3`, `standard`).
    pub volume_class: String,
    pub attachments: Vec<VolumeAttachment>,
}

impl VolumeRecord {
    /// A volume attached to a single resource at `device`.
    pub fn attached(
        id: impl Into<String>,
        volume_class: impl Into<String>,
        resource_id: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            volume_class: volume_class.into(),
            attachments: vec![VolumeAttachment {
                resource_id: resource_id.into(),
                device: device.into(),
            }],
        }
    }

    /// Device path under which this volume is attached to `resource_id`.
    pub fn device_for(&self, resource_id: &str) -> Option<&str> {
        self.attachments
            .iter()
            .find(|a| a.resource_id == resource_id)
            .map(|a| a.device.as_str())
    }
}

// ---------------------------------------------------------------------------
// Remote execution
// ---------------------------------------------------------------------------

/// Login credentials for a provisioned host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCredentials {
    pub user: String,
    /// Private key file; `None` defers to the executor's defaults.
    pub key_path: Option<PathBuf>,
}

impl HostCredentials {
    pub fn new(user: impl Into<String>, key_path: Option<PathBuf>) -> Self {
        Self {
            user: user.into(),
            key_path,
        }
    }
}
