//! Error types for collaborator calls

use thiserror::Error;

/// Errors reported by a provisioning, inventory, or remote-execution collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The external command ran but exited unsuccessfully.
    #[error("{program} exited with code {exit_code}: {stderr}")]
    CommandFailed {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    /// The external command did not finish within its time limit.
    #[error("{program} timed out after {limit_secs}s")]
    Timeout { program: String, limit_secs: u64 },

    /// The external command could not be started.
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The collaborator answered with something that could not be decoded.
    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    /// A remote API answered with an error of its own.
    #[error("{operation} rejected ({code}): {message}")]
    Rejected {
        operation: String,
        code: String,
        message: String,
    },

    /// A named output or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The collaborator is temporarily unreachable (e.g. a host mid-reboot).
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(err: serde_json::Error) -> Self {
        CollaboratorError::Decode {
            what: "json".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;
