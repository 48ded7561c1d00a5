//! `ssh` command-line remote executor.

use std::time::Duration;

use async_trait::async_trait;
use fleet_interfaces::{CollaboratorError, CollaboratorResult, HostCredentials, RemoteExecutor};

use crate::command::{args, CommandRunner};

/// Exit status `ssh` uses for its own connection errors.
const SSH_CONNECTION_ERROR: i32 = 255;

/// One non-interactive `ssh` invocation per command.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    runner: CommandRunner,
    connect_timeout_secs: u64,
}

impl SshExecutor {
    /// `timeout` bounds the whole invocation; `connect_timeout` only the
    /// connection handshake.
    pub fn new(binary: impl Into<String>, connect_timeout: Duration, timeout: Duration) -> Self {
        Self {
            runner: CommandRunner::new(binary, timeout),
            connect_timeout_secs: connect_timeout.as_secs().max(1),
        }
    }

    fn argv(&self, host: &str, credentials: &HostCredentials, command: &str) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(key) = &credentials.key_path {
            argv.extend(args(["-i".to_string(), key.display().to_string()]));
        }
        argv.extend(args([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            format!("{}@{}", credentials.user, host),
            command.to_string(),
        ]));
        argv
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run_command(
        &self,
        host: &str,
        credentials: &HostCredentials,
        command: &str,
    ) -> CollaboratorResult<String> {
        match self.runner.run(&self.argv(host, credentials, command), None).await {
            Ok(output) => Ok(output.stdout),
            // Refused, unreachable, or mid-reboot: retryable from the caller's view.
            Err(CollaboratorError::CommandFailed {
                exit_code: SSH_CONNECTION_ERROR,
                stderr,
                ..
            }) => Err(CollaboratorError::Unavailable(format!("{host}: {stderr}"))),
            Err(err) => Err(err),
        }
    }
}
