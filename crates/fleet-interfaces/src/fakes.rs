//! In-memory fakes for collaborator traits (testing only)
//!
//! Provides `FakeProvisioner`, `FakeInventory`, and `ScriptedRemote` that
//! satisfy the trait contracts without touching any real infrastructure.
//! Each fake records the calls it receives so tests can assert ordering and
//! exactly-once properties.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::collaborator_traits::*;
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::params::ParameterSet;
use crate::records::{HostCredentials, ProvisionOutputs, ResourceRecord, VolumeRecord};

/// File the fake provisioner writes into each workspace it applies to.
pub const FAKE_STATE_FILE: &str = "fake.tfstate";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// FakeProvisioner
// ---------------------------------------------------------------------------

/// A call observed by [`FakeProvisioner`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionCall {
    Apply {
        workspace_dir: PathBuf,
        parameters: ParameterSet,
    },
    Destroy {
        workspace_dir: PathBuf,
    },
}

type OutputFn = dyn Fn(&ParameterSet) -> CollaboratorResult<ProvisionOutputs> + Send + Sync;

/// Provisioner whose outputs are computed from the parameter set.
///
/// `apply` writes [`FAKE_STATE_FILE`] into the workspace and refuses to run
/// if the file already exists, so two runs sharing a workspace fail loudly.
pub struct FakeProvisioner {
    outputs: Box<OutputFn>,
    destroy_error: Option<CollaboratorError>,
    calls: Mutex<Vec<ProvisionCall>>,
}

impl FakeProvisioner {
    pub fn new<F>(outputs: F) -> Self
    where
        F: Fn(&ParameterSet) -> CollaboratorResult<ProvisionOutputs> + Send + Sync + 'static,
    {
        Self {
            outputs: Box::new(outputs),
            destroy_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always return the same outputs.
    pub fn returning(outputs: ProvisionOutputs) -> Self {
        Self::new(move |_| Ok(outputs.clone()))
    }

    /// Always fail `apply` with `error`.
    pub fn failing(error: CollaboratorError) -> Self {
        Self::new(move |_| Err(error.clone()))
    }

    /// Make every `destroy` fail with `error` (the call is still recorded).
    pub fn with_destroy_error(mut self, error: CollaboratorError) -> Self {
        self.destroy_error = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<ProvisionCall> {
        lock(&self.calls).clone()
    }

    pub fn apply_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProvisionCall::Apply { .. }))
            .count()
    }

    pub fn destroy_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProvisionCall::Destroy { .. }))
            .count()
    }

    /// Number of `destroy` calls received for one workspace.
    pub fn destroy_count_for(&self, workspace_dir: &Path) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProvisionCall::Destroy { workspace_dir: d } if d == workspace_dir))
            .count()
    }

    /// Workspace directories passed to `apply`, in call order.
    pub fn applied_dirs(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProvisionCall::Apply { workspace_dir, .. } => Some(workspace_dir),
                ProvisionCall::Destroy { .. } => None,
            })
            .collect()
    }

    /// Parameter sets passed to `apply`, in call order.
    pub fn applied_parameters(&self) -> Vec<ParameterSet> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProvisionCall::Apply { parameters, .. } => Some(parameters),
                ProvisionCall::Destroy { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn apply(
        &self,
        workspace_dir: &Path,
        parameters: &ParameterSet,
    ) -> CollaboratorResult<ProvisionOutputs> {
        lock(&self.calls).push(ProvisionCall::Apply {
            workspace_dir: workspace_dir.to_path_buf(),
            parameters: parameters.clone(),
        });

        let state_file = workspace_dir.join(FAKE_STATE_FILE);
        if state_file.exists() {
            return Err(CollaboratorError::CommandFailed {
                program: "fake-provisioner".to_string(),
                exit_code: 1,
                stderr: format!("workspace {} already holds state", workspace_dir.display()),
            });
        }
        std::fs::write(&state_file, parameters.to_json().to_string()).map_err(|e| {
            CollaboratorError::Unavailable(format!("cannot write fake state: {e}"))
        })?;

        (self.outputs)(parameters)
    }

    async fn destroy(&self, workspace_dir: &Path) -> CollaboratorResult<()> {
        lock(&self.calls).push(ProvisionCall::Destroy {
            workspace_dir: workspace_dir.to_path_buf(),
        });
        match &self.destroy_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeInventory
// ---------------------------------------------------------------------------

type LookupFn = dyn Fn(&str) -> Option<(ResourceRecord, Vec<VolumeRecord>)> + Send + Sync;

/// Inventory backed by a fixed map, with an optional fallback lookup for ids
/// that are only known once a run has generated them.
pub struct FakeInventory {
    resources: HashMap<String, (ResourceRecord, Vec<VolumeRecord>)>,
    lookup: Option<Box<LookupFn>>,
    error: Option<CollaboratorError>,
    queries: Mutex<usize>,
}

impl Default for FakeInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeInventory {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
            lookup: None,
            error: None,
            queries: Mutex::new(0),
        }
    }

    pub fn with_resource(mut self, record: ResourceRecord, volumes: Vec<VolumeRecord>) -> Self {
        self.resources.insert(record.id.clone(), (record, volumes));
        self
    }

    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<(ResourceRecord, Vec<VolumeRecord>)> + Send + Sync + 'static,
    {
        self.lookup = Some(Box::new(lookup));
        self
    }

    /// Make every query fail with `error`.
    pub fn with_error(mut self, error: CollaboratorError) -> Self {
        self.error = Some(error);
        self
    }

    /// Total number of queries received.
    pub fn query_count(&self) -> usize {
        *lock(&self.queries)
    }

    fn find(&self, id: &str) -> Option<(ResourceRecord, Vec<VolumeRecord>)> {
        self.resources
            .get(id)
            .cloned()
            .or_else(|| self.lookup.as_ref().and_then(|f| f(id)))
    }

    fn begin_query(&self) -> CollaboratorResult<()> {
        *lock(&self.queries) += 1;
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl InventoryQuery for FakeInventory {
    async fn describe_resources(&self, ids: &[String]) -> CollaboratorResult<Vec<ResourceRecord>> {
        self.begin_query()?;
        Ok(ids
            .iter()
            .filter_map(|id| self.find(id).map(|(record, _)| record))
            .collect())
    }

    async fn describe_volumes_by_attachment(
        &self,
        resource_id: &str,
    ) -> CollaboratorResult<Vec<VolumeRecord>> {
        self.begin_query()?;
        Ok(self
            .find(resource_id)
            .map(|(_, volumes)| volumes)
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// ScriptedRemote
// ---------------------------------------------------------------------------

/// A call observed by [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub host: String,
    pub command: String,
}

type RemoteFn = dyn Fn(&str, &str, usize) -> CollaboratorResult<String> + Send + Sync;

/// Remote executor that replays scripted responses.
///
/// Each host has a queue of responses consumed in order; once the queue is
/// down to its last entry that entry is repeated. Hosts without a script use
/// the fallback `(host, command, call_index) -> response` if one is set,
/// otherwise they are `Unavailable`.
pub struct ScriptedRemote {
    scripts: Mutex<HashMap<String, Vec<CollaboratorResult<String>>>>,
    fallback: Option<Box<RemoteFn>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, host: impl Into<String>, responses: Vec<CollaboratorResult<String>>) -> Self {
        lock(&self.scripts).insert(host.into(), responses);
        self
    }

    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&str, &str, usize) -> CollaboratorResult<String> + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls made against `host`.
    pub fn call_count_for(&self, host: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.host == host).count()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedRemote {
    async fn run_command(
        &self,
        host: &str,
        _credentials: &HostCredentials,
        command: &str,
    ) -> CollaboratorResult<String> {
        let index = {
            let mut calls = lock(&self.calls);
            let index = calls.iter().filter(|c| c.host == host).count();
            calls.push(RemoteCall {
                host: host.to_string(),
                command: command.to_string(),
            });
            index
        };

        {
            let mut scripts = lock(&self.scripts);
            if let Some(queue) = scripts.get_mut(host) {
                return match queue.len() {
                    0 => Err(CollaboratorError::Unavailable(format!("{host}: empty script"))),
                    1 => queue[0].clone(),
                    _ => queue.remove(0),
                };
            }
        }

        match &self.fallback {
            Some(f) => f(host, command, index),
            None => Err(CollaboratorError::Unavailable(format!(
                "{host}: no route to host"
            ))),
        }
    }
}
