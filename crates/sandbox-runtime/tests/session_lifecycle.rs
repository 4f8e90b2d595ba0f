//! End-to-end lifecycle tests for container sessions.

use std::sync::Arc;

use sandbox_runtime::fakes::{FakeEngine, FakeProbe};
use sandbox_runtime::{
    CacheDirs, CachingProfile, ContainerEngine, ContainerRuntime, DockerCli, EnvironmentProfile,
    HealthCheckConfig, LaunchOverrides, LaunchSpec, PlainProfile, RuntimeError, SessionState,
};
use tempfile::tempdir;

fn quick_health() -> HealthCheckConfig {
    HealthCheckConfig {
        timeout_ms: 2_000,
        interval_ms: 500,
        port_grace_ms: 1_000,
        port_poll_ms: 100,
    }
}

// -------------------------------------------------------------------------
// Fakes
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrent_sessions_get_distinct_ports() {
    let engine = Arc::new(FakeEngine::new().with_image("agent-server"));
    let make = || {
        ContainerRuntime::new(engine.clone(), LaunchSpec::new("agent-server"))
            .with_probe(Arc::new(FakeProbe::healthy()))
            .with_health_config(quick_health())
    };
    let (rt_a, rt_b) = (make(), make());

    let (a, b) = tokio::join!(rt_a.acquire(), rt_b.acquire());
    let (a, b) = (a.unwrap(), b.unwrap());

    let (port_a, port_b) = (a.host_port().unwrap(), b.host_port().unwrap());
    assert!(port_a > 0 && port_b > 0);
    assert_ne!(port_a, port_b);
    assert_ne!(a.name(), b.name());
    assert_eq!(engine.running().len(), 2);

    a.release().await;
    b.release().await;
    assert!(engine.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn caching_profile_spec_reaches_engine() {
    let root = tempdir().unwrap();
    let workspace = root.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    let profile = CachingProfile::new(
        "agent-server",
        CacheDirs::new(root.path().join("sccache"), root.path().join("cargo")),
    );
    let spec = profile
        .launch_spec(&workspace, &LaunchOverrides::default())
        .unwrap();

    let engine = Arc::new(FakeEngine::new().with_image("agent-server"));
    let rt = ContainerRuntime::new(engine.clone(), spec)
        .with_probe(Arc::new(FakeProbe::healthy()))
        .with_health_config(quick_health());

    let outcome: Result<u16, RuntimeError> = rt
        .with_session(|conn| async move { Ok(conn.host_port()) })
        .await;
    assert!(outcome.unwrap() > 0);

    let launched = engine.last_launched().unwrap();
    assert_eq!(launched.env["CARGO_INCREMENTAL"], "0");
    assert!(launched.volumes.keys().all(|p| p.is_absolute()));
    assert_eq!(launched.volumes[&workspace], "/workspace");
    assert!(engine.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_acquisition_leaves_nothing_running() {
    let root = tempdir().unwrap();
    let spec = PlainProfile::new("agent-server")
        .launch_spec(root.path(), &LaunchOverrides::default())
        .unwrap();
    let engine = Arc::new(
        FakeEngine::new()
            .with_image("agent-server")
            .with_logs("error: address in use"),
    );
    let rt = ContainerRuntime::new(engine.clone(), spec.clone())
        .with_probe(Arc::new(FakeProbe::never()))
        .with_health_config(quick_health());

    let err = rt.acquire().await.unwrap_err();
    assert!(matches!(err, RuntimeError::HealthCheckTimeout { .. }));
    assert!(!engine.is_running(&spec.name).await.unwrap());
    assert_eq!(
        engine.events().last().map(String::as_str),
        Some(format!("stop:{}", spec.name).as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn session_reaches_stopped_after_release() {
    let engine = Arc::new(FakeEngine::new().with_image("agent-server"));
    let rt = ContainerRuntime::new(engine.clone(), LaunchSpec::new("agent-server"))
        .with_probe(Arc::new(FakeProbe::healthy()))
        .with_health_config(quick_health());

    let session = rt.acquire().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.container_id().is_some());
    let report = session.release().await;
    assert!(report.container_stopped);
}

// -------------------------------------------------------------------------
// Live engine (requires docker)
// -------------------------------------------------------------------------

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn live_missing_image_is_reported() {
    let engine: Arc<dyn ContainerEngine> = Arc::new(DockerCli::default());
    let rt = ContainerRuntime::new(engine, LaunchSpec::new("missing-image"));
    let err = rt.acquire().await.unwrap_err();
    assert!(matches!(err, RuntimeError::ImageNotFound { .. }));
}
