//! Container session lifecycle.
//!
//! ```text
//! NotStarted -> Starting -> HealthChecking -> Ready -> Stopped
//!                  |              |
//!                  +----> Failed <+
//! ```
//!
//! Any failure after the engine was asked to run the container stops it
//! before the error is returned, so a partial acquisition never leaks a
//! running container.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::{Connector, HttpConnector, ToolConnection};
use crate::engine::ContainerEngine;
use crate::error::{Result, RuntimeError};
use crate::health::{wait_until_healthy, HealthCheckConfig, HealthProbe, HttpHealthProbe};
use crate::spec::{LaunchSpec, PortBinding};

/// Lifecycle state of one container session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Starting,
    HealthChecking,
    Ready,
    Stopped,
    Failed,
}

/// Outcome of a release. Release never fails; problems are collected here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseReport {
    pub connection_closed: bool,
    pub container_stopped: bool,
    pub errors: Vec<String>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Owns the launch configuration of one ephemeral container and the
/// collaborators used to bring it up.
#[derive(Clone)]
pub struct ContainerRuntime {
    engine: Arc<dyn ContainerEngine>,
    probe: Arc<dyn HealthProbe>,
    connector: Arc<dyn Connector>,
    spec: LaunchSpec,
    health: HealthCheckConfig,
}

impl std::fmt::Debug for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRuntime")
            .field("spec", &self.spec)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl ContainerRuntime {
    /// Runtime with the HTTP health probe and connector.
    pub fn new(engine: Arc<dyn ContainerEngine>, spec: LaunchSpec) -> Self {
        Self {
            engine,
            probe: Arc::new(HttpHealthProbe::default()),
            connector: Arc::new(HttpConnector::default()),
            spec,
            health: HealthCheckConfig::default(),
        }
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

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Start the container and return a `Ready` session.
    #[instrument(skip(self), fields(image = %self.spec.image, container = %self.spec.name))]
    pub async fn acquire(&self) -> Result<ContainerSession> {
        let spec = self.spec.resolved()?;
        spec.validate()?;

        if !self.engine.image_exists(&spec.image).await? {
            return Err(RuntimeError::ImageNotFound {
                image: spec.image.clone(),
            });
        }

        let mut session = ContainerSession::new(self.engine.clone(), spec.name.clone());
        match self.start(&mut session, &spec).await {
            Ok(()) => {
                info!(
                    event = "session.ready",
                    container = %session.name,
                    host_port = session.host_port.unwrap_or_default(),
                );
                Ok(session)
            }
            Err(err) => {
                session.fail().await;
                Err(err)
            }
        }
    }

    /// Acquire, run `body` with the connection, then release unconditionally.
    ///
    /// The body's result is returned even when release reports problems;
    /// those are logged.
    pub async fn with_session<T, E, F, Fut>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(ToolConnection) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<RuntimeError>,
    {
        let session = self.acquire().await?;
        let connection = match session.connection().cloned() {
            Some(conn) => conn,
            None => {
                let name = session.name().to_string();
                session.release().await;
                return Err(RuntimeError::Connection {
                    name,
                    reason: "session has no connection".into(),
                    logs: None,
                }
                .into());
            }
        };

        let result = body(connection).await;

        let name = session.name().to_string();
        let report = session.release().await;
        if !report.is_clean() {
            warn!(container = %name, errors = ?report.errors, "session released with errors");
        }
        result
    }

    async fn start(&self, session: &mut ContainerSession, spec: &LaunchSpec) -> Result<()> {
        session.transition(SessionState::Starting);
        session.run_attempted = true;
        let container_id = self.engine.run(spec).await?;
        debug!(container = %spec.name, container_id = %container_id, "container started");
        session.container_id = Some(container_id);

        let host_port = match spec.port {
            PortBinding::Fixed(port) => port,
            PortBinding::PublishAll => self.discover_port(&spec.name, spec.container_port).await?,
        };
        session.host_port = Some(host_port);
        info!(container = %spec.name, host_port, "container port resolved");

        session.transition(SessionState::HealthChecking);
        if !wait_until_healthy(self.probe.as_ref(), host_port, &self.health).await {
            let logs = self.collect_logs(&spec.name).await;
            if let Some(logs) = &logs {
                error!(container = %spec.name, logs = %logs, "server failed to become healthy");
            }
            return Err(RuntimeError::HealthCheckTimeout {
                name: spec.name.clone(),
                host_port,
                timeout: self.health.timeout(),
                logs,
            });
        }

        let connection = match self.connector.connect(host_port).await {
            Ok(conn) => conn,
            Err(err) => {
                return Err(RuntimeError::Connection {
                    name: spec.name.clone(),
                    reason: err.to_string(),
                    logs: self.collect_logs(&spec.name).await,
                })
            }
        };
        session.connection = Some(connection);
        session.transition(SessionState::Ready);
        Ok(())
    }

    /// Poll the engine for the published port, tolerating propagation delay.
    async fn discover_port(&self, name: &str, container_port: u16) -> Result<u16> {
        let start = Instant::now();
        let grace = self.health.port_grace();
        loop {
            if let Some(port) = self.engine.host_port(name, container_port).await? {
                return Ok(port);
            }
            if start.elapsed() >= grace {
                return Err(RuntimeError::PortDiscovery {
                    name: name.to_string(),
                    container_port,
                    waited: grace,
                    logs: self.collect_logs(name).await,
                });
            }
            tokio::time::sleep(self.health.port_poll()).await;
        }
    }

    async fn collect_logs(&self, name: &str) -> Option<String> {
        match self.engine.logs(name).await {
            Ok(logs) => Some(logs),
            Err(e) => {
                warn!(container = %name, error = %e, "could not fetch container logs");
                None
            }
        }
    }
}

/// One running container plus its connection handle.
///
/// Call [`release`](Self::release) on every exit path. A session dropped
/// without release schedules a best-effort stop on the current tokio runtime.
pub struct ContainerSession {
    name: String,
    container_id: Option<String>,
    host_port: Option<u16>,
    connection: Option<ToolConnection>,
    state: SessionState,
    engine: Arc<dyn ContainerEngine>,
    run_attempted: bool,
    released: bool,
}

impl std::fmt::Debug for ContainerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSession")
            .field("name", &self.name)
            .field("container_id", &self.container_id)
            .field("host_port", &self.host_port)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ContainerSession {
    fn new(engine: Arc<dyn ContainerEngine>, name: String) -> Self {
        Self {
            name,
            container_id: None,
            host_port: None,
            connection: None,
            state: SessionState::NotStarted,
            engine,
            run_attempted: false,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn host_port(&self) -> Option<u16> {
        self.host_port
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection(&self) -> Option<&ToolConnection> {
        self.connection.as_ref()
    }

    /// Close the connection, then stop the container. Both steps always run.
    pub async fn release(mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();

        if let Some(conn) = self.connection.take() {
            match conn.close().await {
                Ok(()) => report.connection_closed = true,
                Err(e) => {
                    warn!(container = %self.name, error = %e, "failed to close tool connection");
                    report.errors.push(format!("close connection: {e}"));
                }
            }
        }

        if self.run_attempted {
            info!(container = %self.name, "stopping container");
            match self.engine.stop(&self.name).await {
                Ok(()) => report.container_stopped = true,
                Err(e) => {
                    error!(container = %self.name, error = %e, "failed to stop container");
                    report.errors.push(format!("stop container: {e}"));
                }
            }
        }

        self.released = true;
        self.transition(SessionState::Stopped);
        report
    }

    /// Teardown after a failed acquisition. Errors are logged only; the
    /// acquisition error is the one the caller sees.
    async fn fail(&mut self) {
        if self.run_attempted {
            if let Err(e) = self.engine.stop(&self.name).await {
                error!(container = %self.name, error = %e, "failed to stop container after failed start");
            }
        }
        self.released = true;
        self.transition(SessionState::Failed);
    }

    fn transition(&mut self, next: SessionState) {
        debug!(container = %self.name, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

impl Drop for ContainerSession {
    fn drop(&mut self) {
        if self.released || !self.run_attempted {
            return;
        }
        warn!(container = %self.name, "session dropped without release; stopping in background");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let engine = self.engine.clone();
            let name = self.name.clone();
            handle.spawn(async move {
                if let Err(e) = engine.stop(&name).await {
                    error!(container = %name, error = %e, "background stop failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FailingConnector, FakeEngine, FakeProbe};

    fn runtime(engine: Arc<FakeEngine>, probe: FakeProbe) -> ContainerRuntime {
        ContainerRuntime::new(engine, LaunchSpec::new("agent-server"))
            .with_probe(Arc::new(probe))
            .with_health_config(HealthCheckConfig {
                timeout_ms: 3_000,
                interval_ms: 1_000,
                port_grace_ms: 1_000,
                port_poll_ms: 200,
            })
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_and_release() {
        let engine = Arc::new(FakeEngine::new().with_image("agent-server"));
        let rt = runtime(engine.clone(), FakeProbe::healthy());

        let session = rt.acquire().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        let port = session.host_port().unwrap();
        assert!(port > 0);
        let conn = session.connection().unwrap().clone();
        assert_eq!(conn.endpoint(), format!("http://localhost:{port}/mcp"));
        let name = session.name().to_string();
        assert!(engine.is_running(&name).await.unwrap());

        let report = session.release().await;
        assert!(report.is_clean());
        assert!(report.connection_closed);
        assert!(report.container_stopped);
        assert!(conn.is_closed());
        assert!(!engine.is_running(&name).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_port_skips_discovery() {
        let engine = Arc::new(FakeEngine::new().with_image("agent-server").never_publish());
        let mut spec = LaunchSpec::new("agent-server");
        spec.port = PortBinding::Fixed(4567);
        let rt = ContainerRuntime::new(engine.clone(), spec).with_probe(Arc::new(FakeProbe::healthy()));

        let session = rt.acquire().await.unwrap();
        assert_eq!(session.host_port(), Some(4567));
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_discovery_tolerates_delay() {
        let engine = Arc::new(FakeEngine::new().with_image("agent-server").port_delay(3));
        let rt = runtime(engine.clone(), FakeProbe::healthy());
        let session = rt.acquire().await.unwrap();
        assert!(session.host_port().is_some());
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_discovery_failure_stops_container() {
        let engine = Arc::new(
            FakeEngine::new()
                .with_image("agent-server")
                .never_publish()
                .with_logs("listening on 0.0.0.0:3000"),
        );
        let rt = runtime(engine.clone(), FakeProbe::healthy());

        let err = rt.acquire().await.unwrap_err();
        assert!(matches!(err, RuntimeError::PortDiscovery { .. }));
        assert_eq!(err.container_logs(), Some("listening on 0.0.0.0:3000"));
        assert!(engine.running().is_empty());
        assert_eq!(engine.stopped().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_timeout_surfaces_logs_and_stops() {
        let engine = Arc::new(
            FakeEngine::new()
                .with_image("agent-server")
                .with_logs("thread 'main' panicked"),
        );
        let rt = runtime(engine.clone(), FakeProbe::never());

        let start = Instant::now();
        let err = rt.acquire().await.unwrap_err();
        assert!(start.elapsed() <= rt.health.timeout() + rt.health.interval());
        match &err {
            RuntimeError::HealthCheckTimeout { logs, .. } => {
                assert_eq!(logs.as_deref(), Some("thread 'main' panicked"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(engine.running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connector_failure_stops_container() {
        let engine = Arc::new(FakeEngine::new().with_image("agent-server"));
        let rt = runtime(engine.clone(), FakeProbe::healthy())
            .with_connector(Arc::new(FailingConnector));

        let err = rt.acquire().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Connection { .. }));
        assert!(engine.running().is_empty());
        assert_eq!(engine.launched().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_image_creates_nothing() {
        let engine = Arc::new(FakeEngine::new());
        let rt = runtime(engine.clone(), FakeProbe::healthy());
        let err = rt.acquire().await.unwrap_err();
        assert!(matches!(err, RuntimeError::ImageNotFound { .. }));
        assert!(engine.launched().is_empty());
        assert!(engine.stopped().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_carries_stderr() {
        let engine = Arc::new(
            FakeEngine::new()
                .with_image("agent-server")
                .failing_run("port is already allocated"),
        );
        let rt = runtime(engine.clone(), FakeProbe::healthy());
        let err = rt.acquire().await.unwrap_err();
        match err {
            RuntimeError::ContainerStart { stderr, .. } => {
                assert!(stderr.contains("already allocated"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(engine.running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_session_releases_when_body_fails() {
        let engine = Arc::new(FakeEngine::new().with_image("agent-server"));
        let rt = runtime(engine.clone(), FakeProbe::healthy());

        let result: std::result::Result<(), RuntimeError> = rt
            .with_session(|_conn| async { Err(RuntimeError::Engine("agent blew up".into())) })
            .await;

        assert!(result.is_err());
        assert!(engine.running().is_empty());
        assert_eq!(engine.stopped().len(), 1);
    }

    async fn wait_for_stop(engine: &FakeEngine, name: &str) {
        for _ in 0..20 {
            if engine.stopped().iter().any(|n| n == name) {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_is_stopped_in_background() {
        let engine = Arc::new(FakeEngine::new().with_image("agent-server"));
        let rt = runtime(engine.clone(), FakeProbe::healthy());
        let session = rt.acquire().await.unwrap();
        let name = session.name().to_string();

        drop(session);
        wait_for_stop(&engine, &name).await;

        assert_eq!(engine.stopped(), vec![name.clone()]);
        assert!(!engine.is_running(&name).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_session_body_still_stops_container() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let engine = Arc::new(FakeEngine::new().with_image("agent-server"));
        let rt = runtime(engine.clone(), FakeProbe::healthy());
        let entered = Arc::new(AtomicBool::new(false));

        let body_entered = entered.clone();
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            rt.with_session(move |_conn| async move {
                body_entered.store(true, Ordering::SeqCst);
                std::future::pending::<std::result::Result<(), RuntimeError>>().await
            }),
        )
        .await;

        assert!(outcome.is_err());
        assert!(entered.load(Ordering::SeqCst));
        let name = engine.last_launched().unwrap().name;
        wait_for_stop(&engine, &name).await;
        assert_eq!(engine.stopped(), vec![name]);
        assert!(engine.running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_completes_when_stop_fails() {
        let engine = Arc::new(FakeEngine::new().with_image("agent-server").failing_stop());
        let rt = runtime(engine.clone(), FakeProbe::healthy());
        let session = rt.acquire().await.unwrap();
        let conn = session.connection().unwrap().clone();

        let report = session.release().await;
        assert!(!report.is_clean());
        assert!(report.connection_closed);
        assert!(!report.container_stopped);
        assert!(conn.is_closed());
    }
}
