//! Configuration for exam builds and runs.

use std::path::{Component, Path};

use sandbox_runtime::{CacheDirs, HealthCheckConfig, DEFAULT_IMAGE};
use serde::{Deserialize, Serialize};

use crate::error::{ExamError, Result};

/// Default location of the library checkout inside the build workspace.
pub const DEFAULT_LIBRARY_SUBPATH: &str = "repos/library";

/// Settings shared by the builder, the runner and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamConfig {
    /// Sandbox image recorded in exams and launched for every session.
    pub image: String,
    /// Container engine CLI, `docker` or a compatible one such as `podman`.
    pub engine_binary: String,
    pub health: HealthCheckConfig,
    /// Where the library is cloned, relative to the build workspace.
    pub library_subpath: String,
    /// Command line of the agent program, if one is configured.
    pub agent_command: Option<String>,
    /// Launch sessions with the sccache/cargo caches mounted.
    pub use_cache: bool,
    pub cache: CacheDirs,
    pub create_max_turns: u32,
    pub solve_max_turns: u32,
    pub evaluate_max_turns: u32,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            engine_binary: "docker".to_string(),
            health: HealthCheckConfig::default(),
            library_subpath: DEFAULT_LIBRARY_SUBPATH.to_string(),
            agent_command: None,
            use_cache: false,
            cache: CacheDirs::default(),
            create_max_turns: 30,
            solve_max_turns: 30,
            evaluate_max_turns: 15,
        }
    }
}

impl ExamConfig {
    /// Defaults overlaid with `EXAMKIT_*` environment variables.
    ///
    /// - `EXAMKIT_IMAGE`
    /// - `EXAMKIT_ENGINE`
    /// - `EXAMKIT_HEALTH_TIMEOUT_SECS`
    /// - `EXAMKIT_LIBRARY_SUBPATH`
    /// - `EXAMKIT_AGENT_CMD`
    /// - `EXAMKIT_SCCACHE_DIR`, `EXAMKIT_CARGO_CACHE_DIR` (read by [`CacheDirs`])
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(image) = std::env::var("EXAMKIT_IMAGE") {
            config.image = image;
        }
        if let Ok(engine) = std::env::var("EXAMKIT_ENGINE") {
            config.engine_binary = engine;
        }
        if let Ok(secs) = std::env::var("EXAMKIT_HEALTH_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ExamError::InvalidConfig(format!(
                    "EXAMKIT_HEALTH_TIMEOUT_SECS must be a whole number of seconds, got '{secs}'"
                ))
            })?;
            config.health.timeout_ms = secs.saturating_mul(1_000);
        }
        if let Ok(subpath) = std::env::var("EXAMKIT_LIBRARY_SUBPATH") {
            config.library_subpath = subpath;
        }
        config.agent_command = std::env::var("EXAMKIT_AGENT_CMD")
            .ok()
            .filter(|cmd| !cmd.trim().is_empty());
        config.cache = CacheDirs::from_env();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(ExamError::InvalidConfig("image must not be empty".into()));
        }
        if self.engine_binary.trim().is_empty() {
            return Err(ExamError::InvalidConfig(
                "engine binary must not be empty".into(),
            ));
        }
        let subpath = Path::new(&self.library_subpath);
        let relative = subpath
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if self.library_subpath.is_empty() || !relative {
            return Err(ExamError::InvalidConfig(format!(
                "library_subpath must be a relative path inside the workspace, got '{}'",
                self.library_subpath
            )));
        }
        if self.create_max_turns == 0 || self.solve_max_turns == 0 || self.evaluate_max_turns == 0
        {
            return Err(ExamError::InvalidConfig(
                "max turn limits must be positive".into(),
            ));
        }
        if self.health.interval_ms == 0 {
            return Err(ExamError::InvalidConfig(
                "health check interval must be positive".into(),
            ));
        }
        Ok(())
    }
}
