//! Failure paths: every failure is attributed to one scenario, siblings keep
//! running, and infrastructure is destroyed exactly once per apply.

mod common;

use fleet_interfaces::fakes::{FakeInventory, FakeProvisioner};
use fleet_interfaces::CollaboratorError;
use fleetcheck_core::{
    default_matrix, Check, EnvironmentResolver, EvidenceSource, FixedParameters, RedundancyLevel,
    RetryBudget, Scenario, Stage,
};

use common::*;

fn command_failed(stderr: &str) -> CollaboratorError {
    CollaboratorError::CommandFailed {
        program: "terraform".to_string(),
        exit_code: 1,
        stderr: stderr.to_string(),
    }
}

fn assert_destroyed_once_per_apply(harness: &Harness) {
    let applied = harness.provisioner.applied_dirs();
    assert_eq!(harness.provisioner.destroy_count(), applied.len());
    for dir in &applied {
        assert_eq!(harness.provisioner.destroy_count_for(dir), 1, "{}", dir.display());
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_parameters_fail_every_scenario_without_apply() {
    let source = source_tree();
    let config = config(source.path());
    let partial = FixedParameters::new()
        .with("REGION", "us-east-1")
        .with("VPC_ID", "vpc-0a1b2c")
        .with("STORAGE_AMI", "ami-0123456789");
    let harness = Harness::with_config(
        source,
        config,
        EnvironmentResolver::new(partial),
        fleet_provisioner(),
        fleet_inventory(),
        healthy_remote(),
    );

    let report = harness.runner.run_all(default_matrix()).await;

    assert_eq!(report.failed_count(), 3);
    for outcome in &report.outcomes {
        let failure = outcome.failure.as_ref().unwrap();
        assert_eq!(failure.stage, Some(Stage::Resolve));
        assert_eq!(failure.kind, "missing_parameter");
        assert!(failure.message.contains("SUBNET_ID"));
        assert!(failure.message.contains("KEY_NAME"));
        assert!(outcome.workspace_id.is_none());
    }
    assert_eq!(harness.provisioner.apply_count(), 0);
    assert_eq!(harness.provisioner.destroy_count(), 0);
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_apply_failure_still_destroys() {
    let harness = Harness::new(
        FakeProvisioner::failing(command_failed("Error: creating EC2 Instance: quota exceeded")),
        fleet_inventory(),
        healthy_remote(),
    );

    let report = harness.runner.run_all(default_matrix()).await;

    assert_eq!(report.failed_count(), 3);
    for outcome in &report.outcomes {
        let failure = outcome.failure.as_ref().unwrap();
        assert_eq!(failure.stage, Some(Stage::Apply));
        assert_eq!(failure.kind, "provision_failure");
        assert!(failure.message.contains("quota exceeded"));
    }
    assert_eq!(harness.provisioner.apply_count(), 3);
    assert_destroyed_once_per_apply(&harness);
    assert!(harness.remote.calls().is_empty());
}

#[tokio::test]
async fn test_apply_failure_in_one_scenario_spares_the_others() {
    let provisioner = FakeProvisioner::new(|params| {
        if params.get_str("storage_raid_level") == Some("raid-6") {
            return Err(command_failed("insufficient capacity"));
        }
        fleet_provisioner_outputs(params)
    });
    let harness = Harness::new(provisioner, fleet_inventory(), healthy_remote());

    let report = harness.runner.run_all(default_matrix()).await;

    assert!(report.outcome("RAID-0").unwrap().passed());
    assert!(report.outcome("RAID-5").unwrap().passed());
    let failed = report.outcome("RAID-6").unwrap();
    assert_eq!(failed.failure.as_ref().unwrap().stage, Some(Stage::Apply));
    assert_destroyed_once_per_apply(&harness);
}

fn fleet_provisioner_outputs(
    params: &fleet_interfaces::ParameterSet,
) -> fleet_interfaces::CollaboratorResult<fleet_interfaces::ProvisionOutputs> {
    let project = params.get_str("project_name").unwrap_or("unnamed").to_string();
    let members = params.get_int("storage_ebs_count").unwrap_or(0);
    let record = serde_json::json!([{ "id": resource_id(0, members, &project) }]);
    Ok(fleet_interfaces::ProvisionOutputs::new().with("storage_instances", record))
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_convergence_timeout_reports_last_observation_and_destroys() {
    let harness = Harness::new(
        fleet_provisioner(),
        fleet_inventory(),
        fleet_remote(|_, _, _| Ok(NOT_READY.to_string())),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-5", RedundancyLevel::SingleParity, 3)])
        .await;

    let outcome = &report.outcomes[0];
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Some(Stage::Poll));
    assert_eq!(failure.kind, "convergence_timeout");
    assert!(failure.message.contains("3 attempt(s)"));
    assert!(failure.message.contains("unused devices"));
    // Exactly the configured budget, no more.
    assert_eq!(harness.remote.calls().len(), 3);
    assert_destroyed_once_per_apply(&harness);
}

#[tokio::test]
async fn test_unreachable_host_times_out_with_error_observation() {
    let harness = Harness::new(
        fleet_provisioner(),
        fleet_inventory(),
        fleet_remote(|_, _, _| Err(CollaboratorError::Unavailable("Connection refused".into()))),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-0", RedundancyLevel::Striping, 2)])
        .await;

    let failure = report.outcomes[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, "convergence_timeout");
    assert!(failure.message.contains("Connection refused"));
    assert_destroyed_once_per_apply(&harness);
}

#[tokio::test(start_paused = true)]
async fn test_slow_boot_converges_within_default_budget() {
    let source = source_tree();
    let mut config = config(source.path());
    config.poll = RetryBudget::default();
    let harness = Harness::with_config(
        source,
        config,
        EnvironmentResolver::new(complete_env()),
        fleet_provisioner(),
        fleet_inventory(),
        fleet_remote(|level, members, index| match index {
            0 => Err(CollaboratorError::Unavailable("Connection refused".into())),
            1 => Ok(NOT_READY.to_string()),
            _ => Ok(mdstat(level, members, members)),
        }),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-6", RedundancyLevel::DualParity, 4)])
        .await;

    let outcome = &report.outcomes[0];
    assert!(outcome.passed(), "{outcome:#?}");
    assert_eq!(outcome.poll_attempts, 3);
}

#[tokio::test]
async fn test_reboot_verification_polls_again() {
    let source = source_tree();
    let mut config = config(source.path());
    config.remote.verify_after_reboot = true;
    let harness = Harness::with_config(
        source,
        config,
        EnvironmentResolver::new(complete_env()),
        fleet_provisioner(),
        fleet_inventory(),
        healthy_remote(),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-5", RedundancyLevel::SingleParity, 3)])
        .await;

    assert!(report.passed(), "{report:#?}");
    let commands: Vec<String> = harness.remote.calls().into_iter().map(|c| c.command).collect();
    assert_eq!(commands, ["cat /proc/mdstat", "sudo reboot", "cat /proc/mdstat"]);
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_degraded_array_is_a_mismatch() {
    let harness = Harness::new(
        fleet_provisioner(),
        fleet_inventory(),
        fleet_remote(|level, members, _| Ok(mdstat(level, members, members - 1))),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-5", RedundancyLevel::SingleParity, 3)])
        .await;

    let outcome = &report.outcomes[0];
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Some(Stage::Reconcile));
    assert_eq!(failure.kind, "reconciliation_mismatch");
    assert_eq!(outcome.discrepancies.len(), 1);
    let discrepancy = &outcome.discrepancies[0];
    assert_eq!(discrepancy.source, EvidenceSource::RemoteIntrospection);
    assert_eq!(discrepancy.check, Check::ActiveMembers);
    assert_eq!(discrepancy.expected, "3");
    assert_eq!(discrepancy.observed, "2");
    assert_destroyed_once_per_apply(&harness);
}

#[tokio::test]
async fn test_every_discrepancy_is_reported_together() {
    let inventory = FakeInventory::new().with_lookup(|id| {
        let (members, project) = parse_id(id)?;
        let mut record = record_for(id, &project);
        record.tags.insert("Project".to_string(), "someone-else".to_string());
        // One member volume missing, and the rest of the wrong class.
        Some((record, volumes_for(id, members - 1, "gp2")))
    });
    let source = source_tree();
    let mut config = config(source.path());
    config.expectations.check_project_tag = true;
    let harness = Harness::with_config(
        source,
        config,
        EnvironmentResolver::new(complete_env()),
        fleet_provisioner(),
        inventory,
        fleet_remote(|level, members, _| Ok(mdstat(level, members, members - 1))),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-5", RedundancyLevel::SingleParity, 3)])
        .await;

    let outcome = &report.outcomes[0];
    let checks: Vec<Check> = outcome.discrepancies.iter().map(|d| d.check).collect();
    assert!(checks.contains(&Check::ProjectTag));
    assert!(checks.contains(&Check::VolumeCount));
    assert!(checks.contains(&Check::MemberVolumeClass));
    assert!(checks.contains(&Check::ActiveMembers));
    // Two member volumes of the wrong class, one discrepancy each.
    assert_eq!(
        checks.iter().filter(|c| **c == Check::MemberVolumeClass).count(),
        2
    );
    assert_destroyed_once_per_apply(&harness);
}

#[tokio::test]
async fn test_missing_counter_is_unparseable_not_a_guess() {
    let harness = Harness::new(
        fleet_provisioner(),
        fleet_inventory(),
        fleet_remote(|level, _, _| {
            Ok(format!(
                "md0 : active {} nvme1n1[0] nvme2n1[1] nvme3n1[2]\n      2093056 blocks\n",
                level.kernel_label()
            ))
        }),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-5", RedundancyLevel::SingleParity, 3)])
        .await;

    let outcome = &report.outcomes[0];
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.kind, "unparseable_evidence");
    assert_eq!(failure.stage, Some(Stage::Reconcile));
    assert!(outcome.discrepancies.is_empty());
    assert_destroyed_once_per_apply(&harness);
}

#[tokio::test]
async fn test_unknown_resource_is_reported_absent() {
    let harness = Harness::new(
        fleet_provisioner(),
        // Inventory never heard of the resource; the host is reached through
        // the address in the provisioning output instead.
        FakeInventory::new(),
        fleet_interfaces::fakes::ScriptedRemote::new()
            .with_fallback(|_, _, _| Ok(mdstat(RedundancyLevel::Striping, 2, 2))),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-0", RedundancyLevel::Striping, 2)])
        .await;

    assert_eq!(harness.remote.call_count_for("10.0.0.10"), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.failure.as_ref().unwrap().kind, "reconciliation_mismatch");
    let absent = outcome
        .discrepancies
        .iter()
        .find(|d| d.check == Check::ResourceState)
        .unwrap();
    assert_eq!(absent.observed, "absent");
    assert!(outcome.discrepancies.iter().any(|d| d.check == Check::VolumeCount));
    assert_destroyed_once_per_apply(&harness);
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_teardown_failure_fails_an_otherwise_passing_scenario() {
    let harness = Harness::new(
        fleet_provisioner().with_destroy_error(command_failed("DependencyViolation")),
        fleet_inventory(),
        healthy_remote(),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-0", RedundancyLevel::Striping, 2)])
        .await;

    let outcome = &report.outcomes[0];
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Some(Stage::Teardown));
    assert!(outcome.teardown_error.as_ref().unwrap().contains("DependencyViolation"));
    assert_eq!(harness.provisioner.destroy_count(), 1);
}

#[tokio::test]
async fn test_teardown_failure_does_not_mask_the_original_cause() {
    let harness = Harness::new(
        fleet_provisioner().with_destroy_error(command_failed("DependencyViolation")),
        fleet_inventory(),
        fleet_remote(|level, members, _| Ok(mdstat(level, members, members - 1))),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-5", RedundancyLevel::SingleParity, 3)])
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.failure.as_ref().unwrap().kind, "reconciliation_mismatch");
    assert!(outcome.teardown_error.is_some());
    assert_eq!(harness.provisioner.destroy_count(), 1);
}

#[tokio::test]
async fn test_panicking_scenario_is_contained_and_destroyed() {
    let inventory = FakeInventory::new().with_lookup(|id| {
        let (members, project) = parse_id(id)?;
        if project.contains("-raid-6-") {
            panic!("inventory decoder bug");
        }
        Some((record_for(id, &project), volumes_for(id, members, MEMBER_CLASS)))
    });
    let harness = Harness::new(fleet_provisioner(), inventory, healthy_remote());

    let report = harness.runner.run_all(default_matrix()).await;

    assert!(report.outcome("RAID-0").unwrap().passed());
    assert!(report.outcome("RAID-5").unwrap().passed());
    let failure = report.outcome("RAID-6").unwrap().failure.clone().unwrap();
    assert_eq!(failure.stage, None);
    assert_eq!(failure.kind, "panic");
    assert!(failure.message.contains("inventory decoder bug"));
    assert_eq!(harness.provisioner.apply_count(), 3);
    assert_destroyed_once_per_apply(&harness);
}

#[tokio::test]
async fn test_inventory_outage_is_a_collaborator_error() {
    let harness = Harness::new(
        fleet_provisioner(),
        FakeInventory::new().with_error(CollaboratorError::Timeout {
            program: "aws".to_string(),
            limit_secs: 60,
        }),
        healthy_remote(),
    );

    let report = harness
        .runner
        .run_all(vec![Scenario::new("RAID-0", RedundancyLevel::Striping, 2)])
        .await;

    let failure = report.outcomes[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, "collaborator_error");
    assert!(failure.message.contains("timed out"));
    assert_destroyed_once_per_apply(&harness);
}
