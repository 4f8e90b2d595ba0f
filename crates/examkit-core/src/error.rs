//! Error taxonomy for exam building and running.

use std::path::PathBuf;

use sandbox_runtime::RuntimeError;

use crate::agent::AgentError;

/// A git subcommand exited non-zero. Always fatal to the calling step.
#[derive(Debug, Clone, thiserror::Error)]
#[error("git {command} failed in repository '{repository}': {}", command_detail(.stdout, .stderr))]
pub struct RepositoryCommandError {
    /// Symbolic name of the repository the command ran against.
    pub repository: String,
    /// Arguments passed to git, space separated.
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when killed by a signal.
    pub exit_code: Option<i32>,
}

impl RepositoryCommandError {
    /// stderr, or stdout when git reported the problem there.
    pub fn detail(&self) -> &str {
        command_detail(&self.stdout, &self.stderr)
    }
}

fn command_detail<'a>(stdout: &'a str, stderr: &'a str) -> &'a str {
    if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    }
}

/// Exam domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ExamError {
    #[error(transparent)]
    Repository(#[from] RepositoryCommandError),

    #[error("repository directory does not exist: {}", .0.display())]
    RepositoryNotFound(PathBuf),

    #[error("sandbox error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("agent did not produce {file} in {}", .workspace.display())]
    MissingArtifact { file: String, workspace: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for exam operations.
pub type Result<T> = std::result::Result<T, ExamError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn command_error(stdout: &str, stderr: &str) -> RepositoryCommandError {
        RepositoryCommandError {
            repository: "exam_workspace".to_string(),
            command: "commit -m msg".to_string(),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(1),
        }
    }

    #[test]
    fn test_command_error_prefers_stderr() {
        let err = command_error("", "fatal: not a git repository");
        let msg = err.to_string();
        assert!(msg.contains("exam_workspace"));
        assert!(msg.contains("commit -m msg"));
        assert!(msg.contains("fatal: not a git repository"));
    }

    #[test]
    fn test_command_error_falls_back_to_stdout() {
        let err = command_error("nothing to commit, working tree clean", "");
        assert!(err.to_string().contains("nothing to commit"));
        assert_eq!(err.detail(), "nothing to commit, working tree clean");
    }

    #[test]
    fn test_missing_artifact_display() {
        let err = ExamError::MissingArtifact {
            file: "rubric.md".to_string(),
            workspace: PathBuf::from("/tmp/exam_creator_x"),
        };
        assert!(err.to_string().contains("rubric.md"));
    }
}
