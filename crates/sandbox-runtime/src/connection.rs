//! Connection handle to the tool endpoint of a running session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, RuntimeError};

/// Path of the MCP endpoint on the tool server.
pub const MCP_PATH: &str = "/mcp";

/// Live reference an agent uses to invoke tools inside a container session.
///
/// Cheap to clone; clones share the closed flag.
#[derive(Debug, Clone)]
pub struct ToolConnection {
    endpoint: String,
    host_port: u16,
    client: reqwest::Client,
    closed: Arc<AtomicBool>,
}

impl ToolConnection {
    pub fn new(endpoint: impl Into<String>, host_port: u16, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            host_port,
            client,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Full URL of the tool endpoint, e.g. `http://localhost:49483/mcp`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn host_port(&self) -> u16 {
        self.host_port
    }

    /// HTTP client configured for the endpoint.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the handle closed. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(endpoint = %self.endpoint, "tool connection closed");
        }
        Ok(())
    }
}

/// Builds a [`ToolConnection`] once the session is healthy.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host_port: u16) -> Result<ToolConnection>;
}

/// Connects to `http://localhost:<port>/mcp` with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    request_timeout: Duration,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl HttpConnector {
    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, host_port: u16) -> Result<ToolConnection> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("examkit-sandbox-runtime/", env!("CARGO_PKG_VERSION")))
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| RuntimeError::Engine(format!("failed to build HTTP client: {e}")))?;
        let endpoint = format!("http://localhost:{host_port}{MCP_PATH}");
        Ok(ToolConnection::new(endpoint, host_port, client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_connector_endpoint() {
        let conn = HttpConnector::default().connect(49_152).await.unwrap();
        assert_eq!(conn.endpoint(), "http://localhost:49152/mcp");
        assert_eq!(conn.host_port(), 49_152);
    }

    #[tokio::test]
    async fn test_close_is_shared_between_clones() {
        let conn = ToolConnection::new("http://localhost:1/mcp", 1, reqwest::Client::new());
        let clone = conn.clone();
        assert!(!clone.is_closed());
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(clone.is_closed());
    }
}
