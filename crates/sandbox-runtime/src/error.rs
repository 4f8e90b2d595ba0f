//! Error types for sandbox-runtime

use std::time::Duration;

use thiserror::Error;

/// Errors produced while acquiring or releasing a container session.
///
/// Every lifecycle variant raised after the container process started
/// carries the container's log output when it could be fetched, since it is
/// usually the only signal separating a boot failure from a probe
/// misconfiguration.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The image is not present locally. No pull is attempted.
    #[error("container image '{image}' not found locally; build or pull it first")]
    ImageNotFound { image: String },

    /// The engine refused to start the container.
    #[error("failed to start container '{name}': {stderr}")]
    ContainerStart { name: String, stderr: String },

    /// No host port mapping appeared within the grace period.
    #[error("no host port published for container '{name}' port {container_port} after {waited:?}")]
    PortDiscovery {
        name: String,
        container_port: u16,
        waited: Duration,
        logs: Option<String>,
    },

    /// The health endpoint never answered 200 in time.
    #[error("container '{name}' not healthy on port {host_port} after {timeout:?}")]
    HealthCheckTimeout {
        name: String,
        host_port: u16,
        timeout: Duration,
        logs: Option<String>,
    },

    /// The connection handle could not be built.
    #[error("failed to connect to tool endpoint of container '{name}': {reason}")]
    Connection {
        name: String,
        reason: String,
        logs: Option<String>,
    },

    /// The engine binary could not be run or returned an unusable answer.
    #[error("container engine error: {0}")]
    Engine(String),

    /// Invalid launch configuration
    #[error("invalid launch configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Container log output captured alongside the failure, if any.
    pub fn container_logs(&self) -> Option<&str> {
        match self {
            RuntimeError::PortDiscovery { logs, .. }
            | RuntimeError::HealthCheckTimeout { logs, .. }
            | RuntimeError::Connection { logs, .. } => logs.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        RuntimeError::Engine(err.to_string())
    }
}

/// Result type for sandbox-runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
