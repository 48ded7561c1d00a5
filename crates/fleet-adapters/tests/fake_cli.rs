//! Adapters driven against fake executables written into temp dirs.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_adapters::terraform::{STATE_FILE, VAR_FILE};
use fleet_adapters::{SshExecutor, TerraformCli};
use fleet_interfaces::{
    CollaboratorError, HostCredentials, ParameterSet, Provisioner, RemoteExecutor,
};
use tempfile::TempDir;

/// Write an executable shell script and return its path.
fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn read_log(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// terraform
// ---------------------------------------------------------------------------

fn fake_terraform(bin: &TempDir, log: &Path) -> PathBuf {
    script(
        bin.path(),
        "terraform",
        &format!(
            r#"echo "$*" >> {log}
case "$1" in
  init) exit 0 ;;
  apply) echo '{{}}' > {state}; exit 0 ;;
  output) echo '{{"storage_instances": {{"sensitive": false, "value": [{{"id": "i-0abc", "private_ip": "10.0.1.5"}}]}}}}' ;;
  destroy) exit 0 ;;
  *) echo "unexpected $1" >&2; exit 2 ;;
esac
"#,
            log = log.display(),
            state = STATE_FILE,
        ),
    )
}

#[tokio::test]
async fn test_terraform_apply_and_destroy_sequence() {
    let bin = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let log = bin.path().join("calls.log");
    let terraform = TerraformCli::new(
        fake_terraform(&bin, &log).display().to_string(),
        Duration::from_secs(30),
    );

    let params = ParameterSet::new()
        .with("project_name", "fleetcheck-storage-raid-5-1a2b3c")
        .with("storage_ebs_count", 3i64);
    let outputs = terraform.apply(workspace.path(), &params).await.unwrap();

    let records = outputs.list_of_objects("storage_instances").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id(), Some("i-0abc"));

    let var_file: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(workspace.path().join(VAR_FILE)).unwrap())
            .unwrap();
    assert_eq!(var_file["storage_ebs_count"], 3);
    assert_eq!(var_file["project_name"], "fleetcheck-storage-raid-5-1a2b3c");

    terraform.destroy(workspace.path()).await.unwrap();

    let calls = read_log(&log);
    assert_eq!(calls.len(), 4);
    assert!(calls[0].starts_with("init -input=false"));
    assert_eq!(
        calls[1],
        format!("apply -auto-approve -input=false -no-color -var-file={VAR_FILE}")
    );
    assert!(calls[2].starts_with("output -json"));
    assert!(calls[3].starts_with("destroy -auto-approve"));
    assert!(calls[3].ends_with(&format!("-var-file={VAR_FILE}")));
}

#[tokio::test]
async fn test_terraform_destroy_without_state_is_a_no_op() {
    let bin = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let log = bin.path().join("calls.log");
    let terraform = TerraformCli::new(
        fake_terraform(&bin, &log).display().to_string(),
        Duration::from_secs(30),
    );

    terraform.destroy(workspace.path()).await.unwrap();
    assert!(read_log(&log).is_empty());
}

#[tokio::test]
async fn test_terraform_apply_failure_carries_stderr() {
    let bin = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let binary = script(
        bin.path(),
        "terraform",
        r#"case "$1" in
  init) exit 0 ;;
  *) echo "" ; echo "Error: creating EC2 Instance: InsufficientInstanceCapacity   " >&2; exit 1 ;;
esac
"#,
    );
    let terraform = TerraformCli::new(binary.display().to_string(), Duration::from_secs(30));

    let err = terraform
        .apply(workspace.path(), &ParameterSet::new())
        .await
        .unwrap_err();

    match err {
        CollaboratorError::CommandFailed {
            exit_code, stderr, ..
        } => {
            assert_eq!(exit_code, 1);
            assert_eq!(stderr, "Error: creating EC2 Instance: InsufficientInstanceCapacity");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// ssh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ssh_returns_remote_stdout() {
    let bin = tempfile::tempdir().unwrap();
    let binary = script(
        bin.path(),
        "ssh",
        r#"for last; do :; done
if [ "$last" = "cat /proc/mdstat" ]; then
  printf 'md0 : active raid5 nvme3n1[2] nvme2n1[1] nvme1n1[0]\n'
fi
"#,
    );
    let ssh = SshExecutor::new(
        binary.display().to_string(),
        Duration::from_secs(5),
        Duration::from_secs(30),
    );

    let out = ssh
        .run_command("10.0.1.5", &HostCredentials::new("ubuntu", None), "cat /proc/mdstat")
        .await
        .unwrap();
    assert!(out.starts_with("md0 : active raid5"));
}

#[tokio::test]
async fn test_ssh_connection_error_is_unavailable() {
    let bin = tempfile::tempdir().unwrap();
    let binary = script(
        bin.path(),
        "ssh",
        "echo 'ssh: connect to host 10.0.1.5 port 22: Connection refused' >&2\nexit 255\n",
    );
    let ssh = SshExecutor::new(
        binary.display().to_string(),
        Duration::from_secs(5),
        Duration::from_secs(30),
    );

    let err = ssh
        .run_command("10.0.1.5", &HostCredentials::new("ubuntu", None), "cat /proc/mdstat")
        .await
        .unwrap_err();
    match err {
        CollaboratorError::Unavailable(msg) => assert!(msg.contains("Connection refused")),
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ssh_remote_command_failure_is_command_failed() {
    let bin = tempfile::tempdir().unwrap();
    let binary = script(bin.path(), "ssh", "echo 'cat: /proc/mdstat: No such file' >&2\nexit 1\n");
    let ssh = SshExecutor::new(
        binary.display().to_string(),
        Duration::from_secs(5),
        Duration::from_secs(30),
    );

    let err = ssh
        .run_command("10.0.1.5", &HostCredentials::new("ubuntu", None), "cat /proc/mdstat")
        .await
        .unwrap_err();
    assert!(matches!(err, CollaboratorError::CommandFailed { exit_code: 1, .. }));
}
