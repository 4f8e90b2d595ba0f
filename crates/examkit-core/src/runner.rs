//! Solving and grading published exams.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::agent::{Agent, AgentRequest};
use crate::config::ExamConfig;
use crate::error::{ExamError, Result};
use crate::exam::ExamRecord;
use crate::obs;
use crate::prompts;
use crate::repository::GitRepository;
use crate::sandbox::Sandbox;

pub const SOLVER_NAME: &str = "Examkit Exam Solver";
pub const SOLVER_EMAIL: &str = "solver@examkit.dev";

/// Returned by [`ExamRunner::evaluate`] when the grader produced no output.
pub const NO_REPORT: &str = "No evaluation report generated.";

/// Runs solver and grader agents against an [`ExamRecord`].
pub struct ExamRunner {
    sandbox: Sandbox,
    agent: Arc<dyn Agent>,
    config: ExamConfig,
}

impl ExamRunner {
    pub fn new(sandbox: Sandbox, agent: Arc<dyn Agent>, config: ExamConfig) -> Self {
        Self {
            sandbox,
            agent,
            config,
        }
    }

    /// Check out the problem state in a fresh `exam_solve_*` directory and let
    /// the agent solve it there.
    ///
    /// The exam library is cloned back into the library subpath, since the
    /// problem commit only records it as a gitlink. The directory is not
    /// cleaned up; it is returned so the attempt can be evaluated.
    #[instrument(skip_all, fields(exam_id = %exam.id))]
    pub async fn solve(&self, exam: &ExamRecord) -> Result<PathBuf> {
        let work_dir = tempfile::Builder::new()
            .prefix("exam_solve_")
            .tempdir()?
            .keep();
        info!(workspace = %work_dir.display(), "created solve workspace");

        let project = GitRepository::open_ref(&exam.project).await?;
        let workspace = project.clone_to(&work_dir, "solve_workspace").await?;
        workspace.configure_identity(SOLVER_NAME, SOLVER_EMAIL).await?;
        workspace.ignore_file_mode().await?;
        workspace.checkout(&exam.problem_commit, false).await?;
        obs::emit_phase("ProblemCheckedOut", &work_dir);

        self.restore_library(exam, &workspace).await?;
        obs::emit_phase("LibraryRestored", &work_dir);

        let request = AgentRequest::instruction(
            prompts::solve_instruction(exam),
            self.config.solve_max_turns,
        );
        self.sandbox
            .run_agent(&work_dir, self.agent.as_ref(), request, "solve")
            .await?;
        obs::emit_phase("Solved", &work_dir);
        Ok(work_dir)
    }

    /// Clone `exam.library` into the library subpath, pinned to the commit
    /// the problem tree records there when it records one.
    async fn restore_library(&self, exam: &ExamRecord, workspace: &GitRepository) -> Result<()> {
        let subpath = self.config.library_subpath.as_str();
        let library_dir = workspace.local_dir().join(subpath);
        if has_entries(&library_dir).await? {
            warn!(path = %library_dir.display(), "library path already populated; leaving it as is");
            return Ok(());
        }
        if let Some(parent) = library_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let library = GitRepository::open_ref(&exam.library).await?;
        let clone = library.clone_to(&library_dir, library.name()).await?;
        clone.ignore_file_mode().await?;

        let gitlink = workspace
            .run(&["ls-tree", &exam.problem_commit, "--", subpath], None)
            .await?;
        match pinned_commit(&gitlink) {
            Some(commit) => {
                clone.checkout(commit, false).await?;
                info!(commit = %commit, "library pinned to recorded commit");
            }
            None => info!("problem tree does not pin the library; using its HEAD"),
        }
        Ok(())
    }
    /// Grade the attempt in `workspace` against the exam rubric.
    ///
    /// Returns the grader's report verbatim, or [`NO_REPORT`] when it is empty.
    #[instrument(skip_all, fields(exam_id = %exam.id, workspace = %workspace.display()))]
    pub async fn evaluate(&self, exam: &ExamRecord, workspace: &Path) -> Result<String> {
        if !workspace.is_dir() {
            return Err(ExamError::RepositoryNotFound(workspace.to_path_buf()));
        }
        let request = AgentRequest::instruction(
            prompts::evaluate_instruction(exam),
            self.config.evaluate_max_turns,
        );
        let outcome = self
            .sandbox
            .run_agent(workspace, self.agent.as_ref(), request, "evaluate")
            .await?;
        let report = outcome
            .final_output
            .filter(|out| !out.trim().is_empty())
            .unwrap_or_else(|| NO_REPORT.to_string());
        obs::emit_phase("Evaluated", workspace);
        Ok(report)
    }
}

async fn has_entries(dir: &Path) -> Result<bool> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Commit id of a gitlink entry in `ls-tree` output.
fn pinned_commit(ls_tree: &str) -> Option<&str> {
    let line = ls_tree.lines().next()?;
    let mut fields = line.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some("160000"), Some("commit"), Some(commit)) => Some(commit),
        _ => None,
    }
}
