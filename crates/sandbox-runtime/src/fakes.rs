//! In-memory fakes for the runtime collaborators (testing only)
//!
//! Provides `FakeEngine`, `FakeProbe` and `FailingConnector` that satisfy the
//! trait contracts without a container engine or network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::connection::{Connector, ToolConnection};
use crate::engine::ContainerEngine;
use crate::error::{Result, RuntimeError};
use crate::health::HealthProbe;
use crate::spec::{LaunchSpec, PortBinding};

// ---------------------------------------------------------------------------
// FakeEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct EngineState {
    images: HashSet<String>,
    launched: Vec<LaunchSpec>,
    running: HashSet<String>,
    stopped: Vec<String>,
    /// Port queries still to answer with "nothing published", per container.
    pending_port_queries: Vec<(String, u32)>,
    assigned_ports: Vec<(String, u16)>,
    run_failure: Option<String>,
    stop_fails: bool,
    never_publish: bool,
    port_delay: u32,
    logs: Option<String>,
    events: Vec<String>,
}

/// Container engine backed by in-memory bookkeeping.
///
/// Published ports are handed out sequentially from 49152, so concurrently
/// running fake containers never share a port.
#[derive(Debug)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
    next_port: AtomicU16,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            next_port: AtomicU16::new(49_152),
        }
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a locally available image.
    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().unwrap().images.insert(image.to_string());
        self
    }

    /// Make `run` fail with the given stderr.
    pub fn failing_run(self, stderr: &str) -> Self {
        self.state.lock().unwrap().run_failure = Some(stderr.to_string());
        self
    }

    /// Make `stop` fail (the container keeps running).
    pub fn failing_stop(self) -> Self {
        self.state.lock().unwrap().stop_fails = true;
        self
    }

    /// Answer the first `queries` port lookups with no mapping.
    pub fn port_delay(self, queries: u32) -> Self {
        self.state.lock().unwrap().port_delay = queries;
        self
    }

    /// Never publish a host port.
    pub fn never_publish(self) -> Self {
        self.state.lock().unwrap().never_publish = true;
        self
    }

    pub fn with_logs(self, logs: &str) -> Self {
        self.state.lock().unwrap().logs = Some(logs.to_string());
        self
    }

    /// Every spec passed to `run`, in order.
    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.state.lock().unwrap().launched.clone()
    }

    pub fn last_launched(&self) -> Option<LaunchSpec> {
        self.state.lock().unwrap().launched.last().cloned()
    }

    /// Names of containers currently running.
    pub fn running(&self) -> HashSet<String> {
        self.state.lock().unwrap().running.clone()
    }

    /// Names of containers stopped, in order.
    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    /// Engine calls as `verb:name` strings, in order.
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("inspect:{image}"));
        Ok(state.images.contains(image))
    }

    async fn run(&self, spec: &LaunchSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("run:{}", spec.name));
        state.launched.push(spec.clone());
        if let Some(stderr) = &state.run_failure {
            return Err(RuntimeError::ContainerStart {
                name: spec.name.clone(),
                stderr: stderr.clone(),
            });
        }
        if !state.running.insert(spec.name.clone()) {
            return Err(RuntimeError::ContainerStart {
                name: spec.name.clone(),
                stderr: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            });
        }
        let port = match spec.port {
            PortBinding::Fixed(port) => port,
            PortBinding::PublishAll => self.next_port.fetch_add(1, Ordering::SeqCst),
        };
        state.assigned_ports.push((spec.name.clone(), port));
        let delay = state.port_delay;
        state.pending_port_queries.push((spec.name.clone(), delay));
        Ok(format!("fake-{}", spec.name))
    }

    async fn host_port(&self, name: &str, _container_port: u16) -> Result<Option<u16>> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("port:{name}"));
        if state.never_publish || !state.running.contains(name) {
            return Ok(None);
        }
        if let Some((_, remaining)) = state
            .pending_port_queries
            .iter_mut()
            .find(|(n, _)| n == name)
        {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        Ok(state
            .assigned_ports
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, port)| *port))
    }

    async fn logs(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("logs:{name}"));
        Ok(state.logs.clone().unwrap_or_default())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("stop:{name}"));
        if state.stop_fails {
            return Err(RuntimeError::Engine(format!("failed to stop {name}")));
        }
        state.running.remove(name);
        state.stopped.push(name.to_string());
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().running.contains(name))
    }
}

// ---------------------------------------------------------------------------
// FakeProbe
// ---------------------------------------------------------------------------

/// Health probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FakeProbe {
    healthy: bool,
}

impl FakeProbe {
    pub fn healthy() -> Self {
        Self { healthy: true }
    }

    pub fn never() -> Self {
        Self { healthy: false }
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, _host_port: u16) -> bool {
        self.healthy
    }
}

// ---------------------------------------------------------------------------
// FailingConnector
// ---------------------------------------------------------------------------

/// Connector whose handle construction always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingConnector;

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, host_port: u16) -> Result<ToolConnection> {
        Err(RuntimeError::Engine(format!(
            "refusing to connect to port {host_port}"
        )))
    }
}
