//! Scripted agent for tests (testing only)
//!
//! `ScriptedAgent` plays back a fixed list of turns. Each turn may edit the
//! workspace mounted into the session, the way a real agent would through its
//! tools.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sandbox_runtime::fakes::FakeEngine;
use sandbox_runtime::{ToolConnection, WORKSPACE_MOUNT};

use crate::agent::{Agent, AgentError, AgentOutcome, AgentRequest, TurnMessage};

type WorkspaceEdit = Box<dyn FnOnce(&Path) -> std::io::Result<()> + Send>;

struct Turn {
    edit: WorkspaceEdit,
    final_output: Option<String>,
}

/// Agent that replays scripted turns against the workspace of the most
/// recently launched fake container.
pub struct ScriptedAgent {
    engine: Arc<FakeEngine>,
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<AgentRequest>>,
    workspaces: Mutex<Vec<PathBuf>>,
}

impl ScriptedAgent {
    pub fn new(engine: Arc<FakeEngine>) -> Self {
        Self {
            engine,
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            workspaces: Mutex::new(Vec::new()),
        }
    }

    /// Append a turn that runs `edit` on the workspace and answers `final_output`.
    pub fn turn<F>(self, final_output: Option<&str>, edit: F) -> Self
    where
        F: FnOnce(&Path) -> std::io::Result<()> + Send + 'static,
    {
        self.turns.lock().unwrap().push_back(Turn {
            edit: Box::new(edit),
            final_output: final_output.map(str::to_string),
        });
        self
    }

    /// Append a turn that writes `files` (relative path, content).
    pub fn writes(self, files: &[(&str, &str)]) -> Self {
        let files: Vec<(String, String)> = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        self.turn(Some("done"), move |root| {
            for (path, content) in files {
                let target = root.join(path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(target, content)?;
            }
            Ok(())
        })
    }

    /// Append a turn that leaves the workspace alone and answers `output`.
    pub fn replies(self, output: Option<&str>) -> Self {
        self.turn(output, |_| Ok(()))
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Host workspace of each turn, in order.
    pub fn workspaces(&self) -> Vec<PathBuf> {
        self.workspaces.lock().unwrap().clone()
    }

    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().unwrap().len()
    }

    fn current_workspace(&self) -> Option<PathBuf> {
        let spec = self.engine.last_launched()?;
        spec.volumes
            .into_iter()
            .find(|(_, mount)| mount == WORKSPACE_MOUNT)
            .map(|(host, _)| host)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
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
        let workspace = self
            .current_workspace()
            .ok_or_else(|| AgentError::Protocol("no workspace mounted".to_string()))?;
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Protocol("script exhausted".to_string()))?;

        self.requests.lock().unwrap().push(request.clone());
        self.workspaces.lock().unwrap().push(workspace.clone());
        (turn.edit)(&workspace)?;

        let mut history = request.messages;
        if let Some(output) = &turn.final_output {
            history.push(TurnMessage::assistant(output.clone()));
        }
        Ok(AgentOutcome {
            final_output: turn.final_output,
            history,
        })
    }
}
