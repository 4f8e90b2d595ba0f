//! Container engine client.
//!
//! The engine is the only piece of global mutable state the runtime touches,
//! so it sits behind [`ContainerEngine`] and is handed to every session
//! explicitly. [`DockerCli`] drives the `docker` (or compatible) binary.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};
use crate::spec::LaunchSpec;

/// Operations the runtime needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Whether `image` is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Start a detached container and return its id.
    ///
    /// Fails with [`RuntimeError::ContainerStart`] carrying the engine's stderr.
    async fn run(&self, spec: &LaunchSpec) -> Result<String>;

    /// Host port bound to `container_port`, or `None` if nothing is published yet.
    async fn host_port(&self, name: &str, container_port: u16) -> Result<Option<u16>>;

    /// Combined log output of the container.
    async fn logs(&self, name: &str) -> Result<String>;

    /// Stop the container. Containers are started with `--rm`, so this also removes it.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Whether a container with this name is currently running.
    async fn is_running(&self, name: &str) -> Result<bool>;
}

/// Captured output of one engine invocation.
#[derive(Debug, Clone)]
struct EngineOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// [`ContainerEngine`] backed by the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    /// Use a specific engine binary (e.g. `podman`).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn exec(&self, args: &[String]) -> Result<EngineOutput> {
        debug!(binary = %self.binary, args = ?args, "running container engine command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RuntimeError::Engine(format!("failed to run {}: {e}", self.binary)))?;

        Ok(EngineOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let out = self
            .exec(&["inspect".into(), "--type=image".into(), image.into()])
            .await?;
        Ok(out.success)
    }

    async fn run(&self, spec: &LaunchSpec) -> Result<String> {
        let out = self.exec(&spec.to_run_args()).await?;
        if !out.success {
            return Err(RuntimeError::ContainerStart {
                name: spec.name.clone(),
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }

    async fn host_port(&self, name: &str, container_port: u16) -> Result<Option<u16>> {
        let out = self
            .exec(&["port".into(), name.into(), container_port.to_string()])
            .await?;
        if !out.success {
            debug!(container = %name, stderr = %out.stderr, "port query not answered yet");
            return Ok(None);
        }
        Ok(parse_port_output(&out.stdout))
    }

    async fn logs(&self, name: &str) -> Result<String> {
        let out = self.exec(&["logs".into(), name.into()]).await?;
        if !out.success {
            return Err(RuntimeError::Engine(format!(
                "logs for {name} unavailable: {}",
                out.stderr
            )));
        }
        // docker logs replays the container's stderr on our stderr
        Ok(match (out.stdout.is_empty(), out.stderr.is_empty()) {
            (_, true) => out.stdout,
            (true, false) => out.stderr,
            (false, false) => format!("{}\n{}", out.stdout, out.stderr),
        })
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let out = self.exec(&["stop".into(), name.into()]).await?;
        if !out.success {
            warn!(container = %name, stderr = %out.stderr, "docker stop failed");
            return Err(RuntimeError::Engine(format!(
                "failed to stop {name}: {}",
                out.stderr
            )));
        }
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        let out = self
            .exec(&[
                "inspect".into(),
                "--type=container".into(),
                "--format".into(),
                "{{.State.Running}}".into(),
                name.into(),
            ])
            .await?;
        Ok(out.success && out.stdout == "true")
    }
}

/// Parse `docker port` output such as `0.0.0.0:49483\n:::49483`.
pub fn parse_port_output(stdout: &str) -> Option<u16> {
    stdout
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse::<u16>().ok().filter(|p| *p > 0))
}
