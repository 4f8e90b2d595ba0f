//! Health probing for the in-container tool server.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Path of the health endpoint on the tool server.
pub const HEALTH_PATH: &str = "/health";

/// Timing of the readiness loop and of host port discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckConfig {
    /// Overall readiness deadline (milliseconds).
    pub timeout_ms: u64,
    /// Delay between probes (milliseconds). Also bounds a single probe.
    pub interval_ms: u64,
    /// How long to wait for a dynamically published port to show up (milliseconds).
    pub port_grace_ms: u64,
    /// Delay between port queries during the grace period (milliseconds).
    pub port_poll_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            interval_ms: 1_000,
            port_grace_ms: 2_000,
            port_poll_ms: 200,
        }
    }
}

impl HealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn port_grace(&self) -> Duration {
        Duration::from_millis(self.port_grace_ms)
    }

    pub fn port_poll(&self) -> Duration {
        Duration::from_millis(self.port_poll_ms)
    }
}

/// A single readiness check against a host port.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` when the service answered successfully.
    async fn probe(&self, host_port: u16) -> bool;
}

/// `GET http://localhost:<port>/health`, healthy on HTTP 200.
#[derive(Debug, Clone, Default)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, host_port: u16) -> bool {
        let url = format!("http://localhost:{host_port}{HEALTH_PATH}");
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(1))
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(url = %url, error = %e, "health probe failed");
                false
            }
        }
    }
}

/// Probe until healthy or `config.timeout()` elapses.
///
/// Each probe is capped at one interval, so this returns no later than
/// `timeout + interval` after it was called.
pub async fn wait_until_healthy(
    probe: &dyn HealthProbe,
    host_port: u16,
    config: &HealthCheckConfig,
) -> bool {
    let start = Instant::now();
    let deadline = start + config.timeout();
    let interval = config.interval();

    loop {
        let healthy = tokio::time::timeout(interval, probe.probe(host_port))
            .await
            .unwrap_or(false);
        if healthy {
            debug!(host_port, elapsed_ms = start.elapsed().as_millis() as u64, "service healthy");
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
