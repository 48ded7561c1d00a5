//! Parallel scenario execution.
//!
//! Each valid scenario runs as its own tokio task through the full
//! pipeline: resolve, isolate, apply, poll, reconcile, teardown. Array-less
//! scenarios skip the poll and reconcile without host introspection. The runner
//! joins every task and never aborts siblings; a semaphore bounds how many
//! scenarios hold provisioned infrastructure at once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_interfaces::{
    HostCredentials, InventoryQuery, OutputRecord, ParameterSet, ParameterValue, ProvisionOutputs,
    Provisioner, RemoteExecutor, ResourceRecord,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{FleetConfig, ModuleLayout};
use crate::env::EnvironmentResolver;
use crate::error::{FleetError, Result, Stage};
use crate::lifecycle::with_provisioned;
use crate::mdstat::MemberCounts;
use crate::obs::{self, ScenarioSpan};
use crate::poll::{poll_until, ArrayMatcher};
use crate::reconcile::{reconcile, Discrepancy, EvidenceSnapshot, ExpectedState, ResourceEvidence};
use crate::scenario::{RedundancyLevel, Scenario, NO_ARRAY};
use crate::workspace::WorkspaceIsolator;

/// Output attributes consulted for a host address when the inventory has none.
const ADDRESS_ATTRIBUTES: &[&str] = &["public_ip", "private_ip"];

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The external systems a run talks to, shared read-only by every task.
#[derive(Clone)]
pub struct Collaborators {
    pub provisioner: Arc<dyn Provisioner>,
    pub inventory: Arc<dyn InventoryQuery>,
    pub remote: Arc<dyn RemoteExecutor>,
}

impl Collaborators {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        inventory: Arc<dyn InventoryQuery>,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            provisioner,
            inventory,
            remote,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a scenario failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// `None` when the task panicked.
    pub stage: Option<Stage>,
    pub kind: String,
    pub message: String,
}

impl Failure {
    fn from_error(err: &FleetError) -> Self {
        Self {
            stage: Some(err.stage()),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub scenario: String,
    /// `None` for array-less scenarios.
    pub level: Option<RedundancyLevel>,
    pub members: u32,
    pub project_name: Option<String>,
    pub workspace_id: Option<String>,
    pub workspace_digest: Option<String>,
    pub failure: Option<Failure>,
    /// Destroy error, reported even when an earlier failure is the cause.
    pub teardown_error: Option<String>,
    pub discrepancies: Vec<Discrepancy>,
    pub member_counts: BTreeMap<String, MemberCounts>,
    pub poll_attempts: u32,
    pub duration_ms: u64,
}

impl ScenarioOutcome {
    fn new(scenario: &Scenario) -> Self {
        Self {
            scenario: scenario.name.clone(),
            level: scenario.level,
            members: scenario.members,
            project_name: None,
            workspace_id: None,
            workspace_digest: None,
            failure: None,
            teardown_error: None,
            discrepancies: Vec::new(),
            member_counts: BTreeMap::new(),
            poll_attempts: 0,
            duration_ms: 0,
        }
    }

    fn failed(scenario: &Scenario, err: &FleetError) -> Self {
        let mut outcome = Self::new(scenario);
        outcome.record_failure(err);
        outcome
    }

    fn record_failure(&mut self, err: &FleetError) {
        self.discrepancies = err.discrepancies().to_vec();
        self.failure = Some(Failure::from_error(err));
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn level_label(&self) -> &'static str {
        self.level.as_ref().map_or(NO_ARRAY, RedundancyLevel::label)
    }
}

/// Outcomes of a run, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl RunReport {
    /// Whether every scenario passed.
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(ScenarioOutcome::passed)
    }

    pub fn outcome(&self, scenario: &str) -> Option<&ScenarioOutcome> {
        self.outcomes.iter().find(|o| o.scenario == scenario)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed()).count()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

struct RunnerInner {
    config: FleetConfig,
    resolver: EnvironmentResolver,
    isolator: WorkspaceIsolator,
    collaborators: Collaborators,
}

/// Fans scenarios out to tasks and collects their outcomes.
#[derive(Clone)]
pub struct ScenarioRunner {
    inner: Arc<RunnerInner>,
}

/// What the validation body hands back to the lifecycle.
struct Validated {
    member_counts: BTreeMap<String, MemberCounts>,
    poll_attempts: u32,
}

impl ScenarioRunner {
    pub fn new(config: FleetConfig, resolver: EnvironmentResolver, collaborators: Collaborators) -> Self {
        let mut isolator = WorkspaceIsolator::new(
            config.provisioning.source_root.clone(),
            config.provisioning.module_dir.clone(),
        );
        if let Some(root) = &config.provisioning.temp_root {
            isolator = isolator.with_temp_root(root.clone());
        }
        Self {
            inner: Arc::new(RunnerInner {
                config,
                resolver,
                isolator,
                collaborators,
            }),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    /// Run every scenario and collect one outcome per input, in order.
    pub async fn run_all(&self, scenarios: Vec<Scenario>) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(run_id = %run_id, scenarios = scenarios.len(), "starting run");

        let prechecks = precheck(&scenarios);
        let sem = Arc::new(Semaphore::new(self.inner.config.max_concurrent.max(1)));

        let mut slots = Vec::with_capacity(scenarios.len());
        for (scenario, verdict) in scenarios.into_iter().zip(prechecks) {
            match verdict {
                Err(err) => {
                    obs::emit_stage_failed(&scenario.name, Stage::Validate, &err);
                    slots.push(Slot::Done(ScenarioOutcome::failed(&scenario, &err)));
                }
                Ok(()) => {
                    let runner = self.clone();
                    let sem = Arc::clone(&sem);
                    let span = ScenarioSpan::new(&scenario, &run_id);
                    let task_scenario = scenario.clone();
                    let handle = tokio::spawn(span.wrap(async move {
                        let _permit = sem.acquire_owned().await.ok();
                        runner.run_scenario(&task_scenario).await
                    }));
                    slots.push(Slot::Running(scenario, handle));
                }
            }
        }

        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            let outcome = match slot {
                Slot::Done(outcome) => outcome,
                Slot::Running(scenario, handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        warn!(scenario = %scenario.name, error = %join_err, "scenario task aborted");
                        let mut outcome = ScenarioOutcome::new(&scenario);
                        outcome.failure = Some(Failure {
                            stage: None,
                            kind: "panic".to_string(),
                            message: panic_message(join_err),
                        });
                        outcome
                    }
                },
            };
            outcomes.push(outcome);
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            run_id = %report.run_id,
            passed = report.passed(),
            failed = report.failed_count(),
            "run finished"
        );
        report
    }

    /// Run one scenario through the whole pipeline.
    ///
    /// Preconditions are checked again here so a direct call cannot skip
    /// them.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioOutcome {
        let start = Instant::now();
        let mut outcome = ScenarioOutcome::new(scenario);

        if let Err(err) = self.pipeline(scenario, &mut outcome).await {
            obs::emit_stage_failed(&scenario.name, err.stage(), &err);
            outcome.record_failure(&err);
        }

        outcome.duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_scenario_finished(
            &scenario.name,
            outcome.duration_ms,
            outcome.discrepancies.len(),
            outcome.passed(),
        );
        outcome
    }

    async fn pipeline(&self, scenario: &Scenario, outcome: &mut ScenarioOutcome) -> Result<()> {
        let inner = &self.inner;
        scenario.validate()?;
        obs::emit_scenario_started(&scenario.name, scenario.members, scenario.resources);

        let layout = inner.config.provisioning.layout_for(scenario);
        let resolved = inner.resolver.resolve(&inner.config.required_for(scenario))?;
        let project_name = project_name(layout.project_prefix, scenario.level);
        let parameters = scenario_parameters(scenario, &layout, &resolved, &project_name);
        outcome.project_name = Some(project_name.clone());

        let isolator = inner.isolator.for_module(layout.module_dir);
        let label = scenario.name.clone();
        let workspace = tokio::task::spawn_blocking(move || isolator.isolate(&label))
            .await
            .map_err(|e| FleetError::Isolation {
                source_dir: inner.isolator.source_root().to_path_buf(),
                reason: format!("isolation task failed: {e}"),
            })??;
        outcome.workspace_id = Some(workspace.id().to_string());
        outcome.workspace_digest = Some(workspace.digest().to_string());

        let lifecycle = with_provisioned(
            inner.collaborators.provisioner.as_ref(),
            &workspace,
            &parameters,
            |outputs| self.validate(scenario, &layout, outputs, &project_name),
        )
        .await;

        if let Some(err) = &lifecycle.teardown_error {
            outcome.teardown_error = Some(err.to_string());
        }
        let validated = lifecycle.into_result()?;
        outcome.member_counts = validated.member_counts;
        outcome.poll_attempts = validated.poll_attempts;
        Ok(())
    }

    async fn validate(
        &self,
        scenario: &Scenario,
        layout: &ModuleLayout<'_>,
        outputs: ProvisionOutputs,
        project_name: &str,
    ) -> Result<Validated> {
        let collaborators = &self.inner.collaborators;

        let records = outputs
            .list_of_objects(layout.output_name)
            .map_err(|e| FleetError::UnparseableEvidence {
                source_name: "provisioning output".to_string(),
                reason: e.to_string(),
                discrepancies: Vec::new(),
            })?;
        let ids = resource_ids(&records)?;
        debug!(resources = ?ids, "provisioned resources");

        let texts = match scenario.level {
            Some(level) => self.introspect(&ids, &records, level).await?,
            None => {
                debug!("no array to wait for");
                ids.iter().map(|_| (String::new(), 0)).collect()
            }
        };
        let poll_attempts = texts.iter().map(|(_, attempts)| *attempts).max().unwrap_or(0);

        // Fresh inventory view now that the hosts have settled.
        let settled = describe(collaborators.inventory.as_ref(), &ids).await?;
        let mut resources = Vec::with_capacity(ids.len());
        for (id, (remote_text, _)) in ids.iter().zip(texts) {
            let volumes = collaborators
                .inventory
                .describe_volumes_by_attachment(id)
                .await
                .map_err(|error| FleetError::Collaborator {
                    what: format!("volume lookup for {id}"),
                    error,
                })?;
            resources.push(ResourceEvidence {
                id: id.clone(),
                inventory: settled.get(id).cloned(),
                volumes,
                remote_text,
            });
        }

        let snapshot = EvidenceSnapshot {
            outputs: records,
            resources,
        };
        let expected = self.expected_state(scenario, layout, project_name);
        let validation = reconcile(&snapshot, &expected)?.into_result()?;

        Ok(Validated {
            member_counts: validation.member_counts,
            poll_attempts,
        })
    }

    /// Wait for every host's array (again after a reboot when configured)
    /// and return each host's final text with its attempt count.
    async fn introspect(
        &self,
        ids: &[String],
        records: &[OutputRecord],
        level: RedundancyLevel,
    ) -> Result<Vec<(String, u32)>> {
        let config = &self.inner.config;
        let collaborators = &self.inner.collaborators;

        let initial = describe(collaborators.inventory.as_ref(), ids).await?;
        let hosts = ids
            .iter()
            .zip(records)
            .map(|(id, record)| host_address(id, initial.get(id), record))
            .collect::<Result<Vec<String>>>()?;

        let credentials = HostCredentials::new(config.remote.user.clone(), config.remote.key_path.clone());
        let matcher = ArrayMatcher::new(config.remote.array.clone(), level);

        let mut texts = self.wait_for_arrays(&hosts, &credentials, &matcher).await?;
        if config.remote.verify_after_reboot {
            for host in &hosts {
                match collaborators
                    .remote
                    .run_command(host, &credentials, &config.remote.reboot_command)
                    .await
                {
                    Ok(_) => debug!(host = %host, "reboot issued"),
                    Err(err) => debug!(host = %host, error = %err, "reboot dropped the connection"),
                }
            }
            tokio::time::sleep(config.poll.delay()).await;
            texts = self.wait_for_arrays(&hosts, &credentials, &matcher).await?;
        }
        Ok(texts)
    }

    /// Poll every host concurrently; the first timeout fails the scenario.
    async fn wait_for_arrays(
        &self,
        hosts: &[String],
        credentials: &HostCredentials,
        matcher: &ArrayMatcher,
    ) -> Result<Vec<(String, u32)>> {
        let config = &self.inner.config;
        let remote = &self.inner.collaborators.remote;

        let polls = hosts.iter().map(|host| async move {
            let matched = poll_until(
                host,
                config.poll,
                || remote.run_command(host, credentials, &config.remote.status_command),
                |text| matcher.matches(text),
            )
            .await?;
            info!(host = %host, attempts = matched.attempts, "array converged");
            Ok::<_, FleetError>((matched.text, matched.attempts))
        });
        try_join_all(polls).await
    }

    fn expected_state(&self, scenario: &Scenario, layout: &ModuleLayout<'_>, project_name: &str) -> ExpectedState {
        let config = &self.inner.config;
        let member_class = config.expectations.member_volume_class.clone();
        let mut expected = match scenario.level {
            Some(level) => ExpectedState::new(scenario.resources, scenario.members, level, member_class)
                .with_array(config.remote.array.clone()),
            None => ExpectedState::array_less(scenario.resources, scenario.members, member_class),
        };
        let boot_class = layout
            .boot_volume_class
            .or(config.expectations.boot_volume_class.as_deref());
        if let Some(class) = boot_class {
            expected = expected.with_boot_volume_class(class);
        }
        if let Some(class) = &scenario.compute_class {
            expected = expected.with_compute_class(class.clone());
        }
        if config.expectations.check_project_tag {
            expected = expected.with_project_tag(project_name);
        }
        expected
    }
}

enum Slot {
    Done(ScenarioOutcome),
    Running(Scenario, tokio::task::JoinHandle<ScenarioOutcome>),
}

/// Validate every scenario before anything is provisioned.
fn precheck(scenarios: &[Scenario]) -> Vec<Result<()>> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for scenario in scenarios {
        *seen.entry(scenario.name.as_str()).or_default() += 1;
    }
    scenarios
        .iter()
        .map(|scenario| {
            scenario.validate()?;
            if seen.get(scenario.name.as_str()).copied().unwrap_or(0) > 1 {
                return Err(FleetError::InvalidScenario {
                    scenario: scenario.name.clone(),
                    reason: "scenario name is not unique".to_string(),
                });
            }
            Ok(())
        })
        .collect()
}

fn project_name(prefix: &str, level: Option<RedundancyLevel>) -> String {
    let unique: String = Uuid::new_v4().simple().to_string().chars().take(6).collect();
    match level {
        Some(level) => format!("{prefix}-{}-{unique}", level.label()),
        None => format!("{prefix}-{unique}"),
    }
}

/// Base parameters, then static extras, then the scenario's own values.
fn scenario_parameters(
    scenario: &Scenario,
    layout: &ModuleLayout<'_>,
    resolved: &ParameterSet,
    project_name: &str,
) -> ParameterSet {
    let extras: ParameterSet = layout
        .extra_variables
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut own = ParameterSet::new()
        .with(layout.project_name, project_name)
        .with(layout.instance_count, i64::from(scenario.resources))
        .with(layout.volume_count, i64::from(scenario.members));
    if let (Some(name), Some(level)) = (layout.level, scenario.level) {
        own.insert(name.to_string(), ParameterValue::from(level.label()));
    }
    if let Some(class) = &scenario.compute_class {
        own.insert(layout.compute_class.to_string(), ParameterValue::from(class.as_str()));
    }

    resolved.clone().merged(&extras).merged(&own)
}

fn resource_ids(records: &[OutputRecord]) -> Result<Vec<String>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            record
                .id()
                .map(str::to_string)
                .ok_or_else(|| FleetError::UnparseableEvidence {
                    source_name: "provisioning output".to_string(),
                    reason: format!("record {index} has no string 'id' attribute"),
                    discrepancies: Vec::new(),
                })
        })
        .collect()
}

async fn describe(inventory: &dyn InventoryQuery, ids: &[String]) -> Result<HashMap<String, ResourceRecord>> {
    let records = inventory
        .describe_resources(ids)
        .await
        .map_err(|error| FleetError::Collaborator {
            what: "resource lookup".to_string(),
            error,
        })?;
    Ok(records.into_iter().map(|r| (r.id.clone(), r)).collect())
}

fn host_address(id: &str, inventory: Option<&ResourceRecord>, output: &OutputRecord) -> Result<String> {
    inventory
        .and_then(ResourceRecord::address)
        .or_else(|| ADDRESS_ATTRIBUTES.iter().find_map(|a| output.attr_str(a)))
        .map(str::to_string)
        .ok_or_else(|| FleetError::Collaborator {
            what: format!("address lookup for {id}"),
            error: fleet_interfaces::CollaboratorError::NotFound(format!("no address for {id}")),
        })
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}
