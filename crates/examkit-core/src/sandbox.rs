//! Workspace-scoped sandbox sessions for agent turns.

use std::path::Path;
use std::sync::Arc;

use sandbox_runtime::{
    CachingProfile, Connector, ContainerEngine, ContainerRuntime, DockerCli, EnvironmentProfile,
    HealthCheckConfig, HealthProbe, HttpConnector, HttpHealthProbe, LaunchOverrides,
    PlainProfile,
};
use tracing::{debug, instrument};

use crate::agent::{Agent, AgentOutcome, AgentRequest};
use crate::config::ExamConfig;
use crate::error::{ExamError, Result};
use crate::obs;

/// Builds one [`ContainerRuntime`] per workspace from a fixed set of
/// collaborators.
#[derive(Clone)]
pub struct Sandbox {
    engine: Arc<dyn ContainerEngine>,
    probe: Arc<dyn HealthProbe>,
    connector: Arc<dyn Connector>,
    profile: Arc<dyn EnvironmentProfile>,
    health: HealthCheckConfig,
    overrides: LaunchOverrides,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("image", &self.profile.image())
            .field("health", &self.health)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// HTTP probe and connector, default health timing.
    pub fn new(engine: Arc<dyn ContainerEngine>, profile: Arc<dyn EnvironmentProfile>) -> Self {
        Self {
            engine,
            probe: Arc::new(HttpHealthProbe::default()),
            connector: Arc::new(HttpConnector::default()),
            profile,
            health: HealthCheckConfig::default(),
            overrides: LaunchOverrides::default(),
        }
    }

    /// Docker-backed sandbox configured from `config`.
    pub fn docker(config: &ExamConfig) -> Self {
        let profile: Arc<dyn EnvironmentProfile> = if config.use_cache {
            Arc::new(CachingProfile::new(&config.image, config.cache.clone()))
        } else {
            Arc::new(PlainProfile::new(&config.image))
        };
        let engine = DockerCli::new(&config.engine_binary);
        debug!(engine = %engine.binary(), image = %config.image, cache = config.use_cache, "docker sandbox configured");
        Self::new(Arc::new(engine), profile).with_health_config(config.health.clone())
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_health_config(mut self, health: HealthCheckConfig) -> Self {
        self.health = health;
        self
    }

    /// Caller overrides applied to every session's launch spec.
    pub fn with_overrides(mut self, overrides: LaunchOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn image(&self) -> &str {
        self.profile.image()
    }

    /// A fresh runtime with `workspace` mounted.
    pub fn runtime_for(&self, workspace: &Path) -> Result<ContainerRuntime> {
        let spec = self.profile.launch_spec(workspace, &self.overrides)?;
        Ok(ContainerRuntime::new(self.engine.clone(), spec)
            .with_probe(self.probe.clone())
            .with_connector(self.connector.clone())
            .with_health_config(self.health.clone()))
    }

    /// Run one agent turn inside a dedicated session on `workspace`.
    ///
    /// The session is torn down before this returns, whatever the outcome.
    #[instrument(skip(self, agent, request), fields(workspace = %workspace.display()))]
    pub async fn run_agent(
        &self,
        workspace: &Path,
        agent: &dyn Agent,
        request: AgentRequest,
        purpose: &str,
    ) -> Result<AgentOutcome> {
        let runtime = self.runtime_for(workspace)?;
        let container = runtime.spec().name.clone();
        let outcome = runtime
            .with_session(|connection| async move {
                obs::emit_session_ready(&container, connection.host_port(), workspace);
                agent
                    .run(&connection, request)
                    .await
                    .map_err(ExamError::from)
            })
            .await?;
        obs::emit_agent_turn(
            purpose,
            outcome.history.len(),
            outcome.final_output.as_deref().map_or(0, str::len),
        );
        Ok(outcome)
    }
}
