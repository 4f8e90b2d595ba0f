//! Agent collaborator contract and a subprocess-backed adapter.
//!
//! The builder and runner never talk to a model directly. They hand an
//! [`AgentRequest`] plus the session's [`ToolConnection`] to an [`Agent`]
//! and get back the final output and the conversation history.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sandbox_runtime::ToolConnection;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Errors raised by an agent turn.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent command line is empty or malformed.
    #[error("invalid agent command: {0}")]
    InvalidCommand(String),

    /// The agent process could not be spawned.
    #[error("failed to spawn agent '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The agent process exited non-zero.
    #[error("agent '{command}' exited with {}: {stderr}", .exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Exited {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The agent did not finish within its wall-clock budget.
    #[error("agent '{command}' timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// The agent answered with something other than the expected JSON.
    #[error("agent protocol error: {0}")]
    Protocol(String),

    /// The session's connection was already closed.
    #[error("tool connection {0} is closed")]
    ConnectionClosed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One message of an agent conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnMessage {
    pub role: String,
    pub content: String,
}

impl TurnMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Input to a single agent turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRequest {
    pub messages: Vec<TurnMessage>,
    pub max_turns: u32,
}

impl AgentRequest {
    /// Fresh conversation starting with `instruction`.
    pub fn instruction(instruction: impl Into<String>, max_turns: u32) -> Self {
        Self {
            messages: vec![TurnMessage::user(instruction)],
            max_turns,
        }
    }

    /// Continue `history` with a new user message.
    pub fn continuation(
        history: Vec<TurnMessage>,
        instruction: impl Into<String>,
        max_turns: u32,
    ) -> Self {
        let mut messages = history;
        messages.push(TurnMessage::user(instruction));
        Self {
            messages,
            max_turns,
        }
    }
}

/// Result of an agent turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentOutcome {
    #[serde(default)]
    pub final_output: Option<String>,
    /// Full conversation, including the request messages.
    #[serde(default)]
    pub history: Vec<TurnMessage>,
}

/// Drives an LLM agent against the tools exposed by a sandbox session.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(
        &self,
        connection: &ToolConnection,
        request: AgentRequest,
    ) -> Result<AgentOutcome, AgentError>;
}

// ---------------------------------------------------------------------------
// CommandAgent
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    mcp_url: &'a str,
    messages: &'a [TurnMessage],
    max_turns: u32,
}

/// Runs an external agent program once per turn.
///
/// The request is written to stdin as
/// `{"mcp_url": ..., "messages": [...], "max_turns": n}` and the program must
/// print `{"final_output": ..., "history": [...]}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandAgent {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    /// Parse a whitespace separated command line such as `python agent.py --fast`.
    ///
    /// Quotes are not interpreted, so `sh -c "a b"` yields the arguments
    /// `-c`, `"a` and `b"`. Use [`CommandAgent::new`] for arguments that
    /// contain whitespace.
    pub fn from_command_line(command_line: &str) -> Result<Self, AgentError> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| AgentError::InvalidCommand("empty command line".to_string()))?;
        Ok(Self::new(program, parts))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Agent for CommandAgent {
    #[instrument(skip_all, fields(agent = %self.program, max_turns = request.max_turns))]
    async fn run(
        &self,
        connection: &ToolConnection,
        request: AgentRequest,
    ) -> Result<AgentOutcome, AgentError> {
        if connection.is_closed() {
            return Err(AgentError::ConnectionClosed(
                connection.endpoint().to_string(),
            ));
        }

        let payload = serde_json::to_vec(&WireRequest {
            mcp_url: connection.endpoint(),
            messages: &request.messages,
            max_turns: request.max_turns,
        })
        .map_err(|e| AgentError::Protocol(format!("failed to encode request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                command: self.command_line(),
                source,
            })?;

        // stdin is written while stdout is drained.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await
            })
        });

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| AgentError::Timeout {
                    command: self.command_line(),
                    timeout: limit,
                })??,
            None => child.wait_with_output().await?,
        };

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The agent may legitimately exit without reading all of stdin.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(AgentError::Io(e)),
                Err(e) => return Err(AgentError::Io(std::io::Error::other(e))),
            }
        }

        if !output.status.success() {
            return Err(AgentError::Exited {
                command: self.command_line(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let outcome: AgentOutcome = serde_json::from_slice(&output.stdout).map_err(|e| {
            AgentError::Protocol(format!(
                "invalid agent response ({e}): {}",
                String::from_utf8_lossy(&output.stdout).trim()
            ))
        })?;
        debug!(history_len = outcome.history.len(), "agent turn complete");
        Ok(outcome)
    }
}
