//! Structured lifecycle events for exam builds and runs.
//!
//! Every emitter logs at `info!` with an `event = "..."` field so the JSON
//! output can be filtered by event name.

use std::path::Path;

use tracing::{info, warn};

/// Emit event: a builder or runner phase completed.
///
/// ```ignore
/// emit_phase("SolutionCommitted", "/tmp/exam_creator_x");
/// // logs: event=exam.phase phase=SolutionCommitted workspace=/tmp/exam_creator_x
/// ```
pub fn emit_phase(phase: &str, workspace: &Path) {
    info!(event = "exam.phase", phase = %phase, workspace = %workspace.display());
}

/// Emit event: a sandbox session is ready for the agent.
pub fn emit_session_ready(container: &str, host_port: u16, workspace: &Path) {
    info!(
        event = "exam.session_ready",
        container = %container,
        host_port = host_port,
        workspace = %workspace.display(),
    );
}

/// Emit event: agent turn finished.
pub fn emit_agent_turn(purpose: &str, history_len: usize, output_len: usize) {
    info!(
        event = "agent.turn_finished",
        purpose = %purpose,
        history_len = history_len,
        output_len = output_len,
    );
}

/// Emit event: exam published to the origin repository.
pub fn emit_exam_published(exam_id: &str, branch: &str, problem_commit: &str) {
    info!(
        event = "exam.published",
        exam_id = %exam_id,
        branch = %branch,
        problem_commit = %problem_commit,
    );
}

/// Emit event: a failed build left its workspace on disk.
pub fn emit_workspace_kept(workspace: &Path, error: &dyn std::fmt::Display) {
    warn!(
        event = "exam.workspace_kept",
        workspace = %workspace.display(),
        error = %error,
    );
}
