//! Launch specifications for sandbox containers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Port the tool server listens on inside the container.
pub const SERVICE_PORT: u16 = 3000;

/// How the service port is exposed on the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortBinding {
    /// `-p <host>:<container>`
    Fixed(u16),
    /// `-p <container>`; the engine picks a host port which is discovered after start.
    PublishAll,
}

impl PortBinding {
    /// `Fixed(0)` means "let the engine choose".
    pub fn from_host_port(host_port: Option<u16>) -> Self {
        match host_port {
            Some(port) if port > 0 => PortBinding::Fixed(port),
            _ => PortBinding::PublishAll,
        }
    }
}

/// Everything the engine needs to start one container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchSpec {
    /// Image reference.
    pub image: String,
    /// Container name, unique on the engine.
    pub name: String,
    /// Port the service listens on inside the container.
    pub container_port: u16,
    /// Host side of the service port.
    pub port: PortBinding,
    /// `-e KEY=VALUE` assignments.
    pub env: BTreeMap<String, String>,
    /// Host path -> container path bind mounts.
    pub volumes: BTreeMap<PathBuf, String>,
    /// Additional raw `-p` mappings, passed through verbatim.
    pub extra_ports: Vec<String>,
}

impl LaunchSpec {
    /// A spec for `image` with a generated name and no mounts.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: generate_container_name(),
            container_port: SERVICE_PORT,
            port: PortBinding::PublishAll,
            env: BTreeMap::new(),
            volumes: BTreeMap::new(),
            extra_ports: Vec::new(),
        }
    }

    /// Overlay caller overrides on top of this spec. Caller values win.
    pub fn with_overrides(mut self, overrides: &LaunchOverrides) -> Self {
        if let Some(name) = &overrides.container_name {
            self.name = name.clone();
        }
        if overrides.host_port.is_some() {
            self.port = PortBinding::from_host_port(overrides.host_port);
        }
        for (key, value) in &overrides.env {
            self.env.insert(key.clone(), value.clone());
        }
        for (host, container) in &overrides.volumes {
            self.volumes.insert(host.clone(), container.clone());
        }
        self.extra_ports.extend(overrides.extra_ports.iter().cloned());
        self
    }

    /// Same spec with every host path made absolute.
    pub fn resolved(&self) -> Result<Self> {
        let mut volumes = BTreeMap::new();
        for (host, container) in &self.volumes {
            volumes.insert(absolute_host_path(host)?, container.clone());
        }
        Ok(Self {
            volumes,
            ..self.clone()
        })
    }

    /// Arguments for `<engine> run`, image last.
    pub fn to_run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "-p".to_string(),
        ];
        args.push(match self.port {
            PortBinding::Fixed(host) => format!("{}:{}", host, self.container_port),
            PortBinding::PublishAll => self.container_port.to_string(),
        });

        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for (host, container) in &self.volumes {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host.display(), container));
        }
        for mapping in &self.extra_ports {
            args.push("-p".to_string());
            args.push(mapping.clone());
        }

        args.push(self.image.clone());
        args
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig("image must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "container name must not be empty".into(),
            ));
        }
        if self.container_port == 0 {
            return Err(RuntimeError::InvalidConfig(
                "container port must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Caller-supplied values overlaid on a profile's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LaunchOverrides {
    pub container_name: Option<String>,
    pub host_port: Option<u16>,
    pub env: BTreeMap<String, String>,
    pub volumes: BTreeMap<PathBuf, String>,
    pub extra_ports: Vec<String>,
}

/// `mcp-server-<8 hex>`
pub fn generate_container_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("mcp-server-{}", &id[..8])
}

/// Resolve a host path against the current directory without requiring it to exist.
pub fn absolute_host_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path))
}
