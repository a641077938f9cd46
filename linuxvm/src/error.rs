//! Error types for linuxvm.
//!
//! Pre-dispatch failures (validation, resource limits, workspace, handoff)
//! abort the run before any subsystem is started. Failures after dispatch are
//! reported by the supervisor as [`LinuxvmError::Subsystem`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for linuxvm operations.
pub type LinuxvmResult<T> = std::result::Result<T, LinuxvmError>;

#[derive(Error, Debug)]
pub enum LinuxvmError {
    /// Bad user input, detected before any I/O.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The host refused to raise a process resource limit.
    #[error("failed to raise resource limit: {0}")]
    ResourceLimit(String),

    /// The ephemeral workspace could not be created.
    #[error("failed to allocate workspace: {0}")]
    Workspace(String),

    /// Copying the bootstrap binary or writing the handoff document failed.
    #[error("guest handoff failed at {path}: {source}")]
    Handoff {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A helper binary (network stack, VM shim) could not be located.
    #[error("helper binary not found: {0}")]
    MissingBinary(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// One of the supervised subsystems failed after dispatch.
    #[error("subsystem {name} failed: {source}")]
    Subsystem {
        name: String,
        #[source]
        source: Box<LinuxvmError>,
    },

    #[error("network stack error: {0}")]
    Network(String),

    #[error("configuration server error: {0}")]
    ConfigServer(String),

    #[error("vm engine error: {0}")]
    Engine(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LinuxvmError {
    pub(crate) fn handoff(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Handoff {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised before the subsystems were dispatched.
    pub fn is_fatal_before_dispatch(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::ResourceLimit(_)
                | Self::Workspace(_)
                | Self::Handoff { .. }
                | Self::MissingBinary(_)
                | Self::Json(_)
        )
    }

    /// Name of the failed subsystem, if this error came from the supervisor.
    pub fn subsystem(&self) -> Option<&str> {
        match self {
            Self::Subsystem { name, .. } => Some(name),
            _ => None,
        }
    }
}
