//! External command execution shared by the adapters.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use fleet_interfaces::{CollaboratorError, CollaboratorResult};
use tokio::process::Command;
use tracing::debug;

/// Captured output of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Runs one program with a per-invocation time limit.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            env: Vec::new(),
        }
    }

    /// Set an environment variable for every invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run with `args` in `cwd` (the caller's directory when `None`).
    ///
    /// A non-zero exit becomes `CommandFailed` carrying the trimmed stderr
    /// (stdout when stderr is empty). The child is killed when the limit
    /// expires.
    pub async fn run(&self, args: &[String], cwd: Option<&Path>) -> CollaboratorResult<CommandOutput> {
        let start = Instant::now();

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| CollaboratorError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CollaboratorError::Timeout {
                program: self.program.clone(),
                limit_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| CollaboratorError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            program = %self.program,
            subcommand = args.first().map(String::as_str).unwrap_or(""),
            exit_code = output.status.code().unwrap_or(-1),
            duration_ms,
            "command finished"
        );

        if !output.status.success() {
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(CollaboratorError::CommandFailed {
                program: self.program.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: detail.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            duration_ms,
        })
    }
}

/// Owned argument list from string literals and computed values.
pub(crate) fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
