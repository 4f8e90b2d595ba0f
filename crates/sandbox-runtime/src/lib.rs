//! Sandbox runtime: ephemeral containers with a health-checked tool endpoint.
//!
//! One [`ContainerRuntime`] supervises one container through
//! `start -> health-check -> ready -> teardown` and hands out a
//! [`ToolConnection`] for the duration of a scoped acquisition.
//!
//! ## Modules
//!
//! - [`spec`]       - `LaunchSpec`, `LaunchOverrides`, `PortBinding`
//! - [`profile`]    - `EnvironmentProfile` flavors (`PlainProfile`, `CachingProfile`)
//! - [`engine`]     - `ContainerEngine` trait and the `DockerCli` client
//! - [`health`]     - `HealthProbe`, bounded readiness polling
//! - [`connection`] - `ToolConnection` handle and `Connector`
//! - [`runtime`]    - `ContainerRuntime`, `ContainerSession`, `SessionState`
//! - [`fakes`]      - in-memory collaborators for tests

pub mod connection;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod health;
pub mod profile;
pub mod runtime;
pub mod spec;

pub use connection::{Connector, HttpConnector, ToolConnection, MCP_PATH};
pub use engine::{ContainerEngine, DockerCli};
pub use error::{Result, RuntimeError};
pub use health::{HealthCheckConfig, HealthProbe, HttpHealthProbe, HEALTH_PATH};
pub use profile::{
    CacheDirs, CachingProfile, EnvironmentProfile, PlainProfile, DEFAULT_IMAGE, WORKSPACE_MOUNT,
};
pub use runtime::{ContainerRuntime, ContainerSession, ReleaseReport, SessionState};
pub use spec::{LaunchOverrides, LaunchSpec, PortBinding, SERVICE_PORT};
