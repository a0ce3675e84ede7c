//! Error types for the guest agent

use crate::capability::Capability;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuestError>;

/// Failure of an external command run on the guest.
///
/// Callers may retry; the runner itself never does.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Command `{command}` exited with code {exit_code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Command `{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("Command `{command}` could not be started: {reason}")]
    Spawn { command: String, reason: String },
}

impl ExecutionError {
    pub fn command(&self) -> &str {
        match self {
            Self::NonZeroExit { command, .. }
            | Self::TimedOut { command, .. }
            | Self::Spawn { command, .. } => command,
        }
    }

    /// Exit code of the child, when it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum GuestError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Status store failed for instance {instance_id}: {reason}")]
    Persistence { instance_id: String, reason: String },

    #[error("Illegal state: {reason}")]
    IllegalState { reason: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Filesystem operation on {} failed: {reason}", path.display())]
    Filesystem { path: PathBuf, reason: String },

    #[error("Operation requires unsupported capability: {capability}")]
    Unsupported { capability: Capability },

    #[error("Serialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },
}

impl GuestError {
    pub fn persistence(instance_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Persistence {
            instance_id: instance_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Filesystem {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors the control plane may retry without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::Persistence { .. })
    }
}
