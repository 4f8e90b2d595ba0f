//! Two-phase exam authoring.
//!
//! An agent first implements the full solution together with `question.md`
//! and `rubric.md`, then strips the implementation back to stubs. Both states
//! are committed in order, so the solution commit is the parent of the
//! problem commit, and the problem commit is pushed to the project's origin
//! as `exam-<id>`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use tracing::{info, instrument, warn};

use crate::agent::{Agent, AgentRequest};
use crate::config::ExamConfig;
use crate::error::{ExamError, Result};
use crate::exam::{branch_name, exam_id, ExamRecord, Topic};
use crate::obs;
use crate::prompts::{self, QUESTION_FILE, RUBRIC_FILE};
use crate::repository::{GitRepository, RepositoryRef};
use crate::sandbox::Sandbox;

pub const CREATOR_NAME: &str = "Examkit Exam Creator";
pub const CREATOR_EMAIL: &str = "creator@examkit.dev";
pub const SOLUTION_COMMIT_MESSAGE: &str = "Exam Solution: Reference Implementation";
pub const PROBLEM_COMMIT_MESSAGE: &str = "Exam Problem: Initial State";

/// Progress of a build. Each variant is reached only after the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildPhase {
    Cloned,
    SolutionAuthored,
    SolutionCommitted,
    ProblemAuthored,
    ProblemCommitted,
    Published,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::Cloned => "Cloned",
            BuildPhase::SolutionAuthored => "SolutionAuthored",
            BuildPhase::SolutionCommitted => "SolutionCommitted",
            BuildPhase::ProblemAuthored => "ProblemAuthored",
            BuildPhase::ProblemCommitted => "ProblemCommitted",
            BuildPhase::Published => "Published",
        };
        f.write_str(name)
    }
}

/// Authors exams from a project, a library and a topic.
pub struct ExamBuilder {
    sandbox: Sandbox,
    agent: Arc<dyn Agent>,
    config: ExamConfig,
}

impl ExamBuilder {
    pub fn new(sandbox: Sandbox, agent: Arc<dyn Agent>, config: ExamConfig) -> Self {
        Self {
            sandbox,
            agent,
            config,
        }
    }

    /// Build an exam and publish its problem commit to `project`.
    ///
    /// On failure the `exam_creator_*` workspace is left on disk for
    /// inspection and the original error is returned.
    #[instrument(skip_all, fields(project = %project.name(), library = %library.name(), topic = %topic.title))]
    pub async fn build(
        &self,
        project: &GitRepository,
        library: &GitRepository,
        topic: &Topic,
    ) -> Result<BuiltExam> {
        self.config.validate()?;
        let workspace = tempfile::Builder::new()
            .prefix("exam_creator_")
            .tempdir()?;
        info!(workspace = %workspace.path().display(), "created exam workspace");

        let mut progress = Progress::new(workspace.path());
        let outcome = self
            .build_in(workspace.path(), project, library, topic, &mut progress)
            .await;
        match outcome {
            Ok(record) => Ok(BuiltExam {
                record,
                workspace,
                origin: project.to_ref(),
            }),
            Err(err) => {
                warn!(phase = ?progress.phase, "exam build aborted");
                let kept = workspace.keep();
                obs::emit_workspace_kept(&kept, &err);
                Err(err)
            }
        }
    }

    async fn build_in(
        &self,
        work_dir: &Path,
        project: &GitRepository,
        library: &GitRepository,
        topic: &Topic,
        progress: &mut Progress,
    ) -> Result<ExamRecord> {
        let workspace = project.clone_to(work_dir, "exam_workspace").await?;
        workspace
            .configure_identity(CREATOR_NAME, CREATOR_EMAIL)
            .await?;
        workspace.ignore_file_mode().await?;
        let library_dir = work_dir.join(&self.config.library_subpath);
        if let Some(parent) = library_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        library
            .clone_to(&library_dir, library.name())
            .await?
            .ignore_file_mode()
            .await?;
        progress.advance(BuildPhase::Cloned);

        let request = AgentRequest::instruction(
            prompts::solution_instruction(topic, &self.config.library_subpath),
            self.config.create_max_turns,
        );
        let solution = self
            .sandbox
            .run_agent(work_dir, self.agent.as_ref(), request, "solution")
            .await?;
        progress.advance(BuildPhase::SolutionAuthored);

        ensure_artifacts(work_dir)?;
        workspace.stage_all().await?;
        workspace.commit(SOLUTION_COMMIT_MESSAGE).await?;
        let solution_commit = workspace.head().await?;
        info!(commit = %solution_commit, "solution committed");
        progress.advance(BuildPhase::SolutionCommitted);

        let request = AgentRequest::continuation(
            solution.history,
            prompts::problem_instruction(),
            self.config.create_max_turns,
        );
        self.sandbox
            .run_agent(work_dir, self.agent.as_ref(), request, "problem")
            .await?;
        progress.advance(BuildPhase::ProblemAuthored);

        restore_artifacts(&workspace, &solution_commit).await?;
        workspace.stage_all().await?;
        workspace.commit(PROBLEM_COMMIT_MESSAGE).await?;
        let problem_commit = workspace.head().await?;
        info!(commit = %problem_commit, "problem committed");
        progress.advance(BuildPhase::ProblemCommitted);

        let question = tokio::fs::read_to_string(work_dir.join(QUESTION_FILE)).await?;
        let rubric = tokio::fs::read_to_string(work_dir.join(RUBRIC_FILE)).await?;

        let id = exam_id(&topic.title, &solution_commit);
        let branch = branch_name(&id);
        workspace
            .push("origin", &format!("HEAD:refs/heads/{branch}"))
            .await?;
        obs::emit_exam_published(&id, &branch, &problem_commit);
        progress.advance(BuildPhase::Published);

        Ok(ExamRecord {
            id,
            image: self.sandbox.image().to_string(),
            project: workspace.to_ref(),
            library: library.to_ref(),
            solution_commit,
            problem_commit,
            question,
            rubric,
            created_at: Utc::now(),
        })
    }
}

struct Progress {
    workspace: PathBuf,
    phase: Option<BuildPhase>,
}

impl Progress {
    fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            phase: None,
        }
    }

    fn advance(&mut self, next: BuildPhase) {
        debug_assert!(self.phase.map_or(true, |p| p < next));
        self.phase = Some(next);
        obs::emit_phase(&next.to_string(), &self.workspace);
    }
}

fn ensure_artifacts(work_dir: &Path) -> Result<()> {
    for file in [QUESTION_FILE, RUBRIC_FILE] {
        if !work_dir.join(file).is_file() {
            return Err(ExamError::MissingArtifact {
                file: file.to_string(),
                workspace: work_dir.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Put `question.md` and `rubric.md` back exactly as committed in the solution.
async fn restore_artifacts(workspace: &GitRepository, solution_commit: &str) -> Result<()> {
    for file in [QUESTION_FILE, RUBRIC_FILE] {
        let committed = workspace.show_file(solution_commit, file).await?;
        let current = tokio::fs::read(workspace.local_dir().join(file)).await.ok();
        if current.as_deref() != Some(committed.as_slice()) {
            warn!(file = %file, "agent modified an exam artifact during problem authoring; restoring it");
        }
    }
    workspace
        .restore_paths(solution_commit, &[QUESTION_FILE, RUBRIC_FILE])
        .await
}

/// A successfully built exam whose workspace is still owned by the builder.
///
/// The record points at the workspace until the exam is either persisted
/// elsewhere or handed over to the origin repository.
#[derive(Debug)]
pub struct BuiltExam {
    record: ExamRecord,
    workspace: TempDir,
    origin: RepositoryRef,
}

impl BuiltExam {
    pub fn record(&self) -> &ExamRecord {
        &self.record
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Move the workspace to `dest` (which must not exist yet) and re-point
    /// the record at it.
    pub async fn persist(self, dest: &Path) -> Result<ExamRecord> {
        if tokio::fs::try_exists(dest).await? {
            return Err(ExamError::InvalidConfig(format!(
                "destination {} already exists",
                dest.display()
            )));
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let source = self.workspace.keep();
        if let Err(e) = tokio::fs::rename(&source, dest).await {
            // Cross-device moves fall back to copy + delete.
            info!(error = %e, "rename failed, copying workspace instead");
            let (from, to) = (source.clone(), dest.to_path_buf());
            tokio::task::spawn_blocking(move || copy_dir_all(&from, &to))
                .await
                .map_err(|e| ExamError::Io(std::io::Error::other(e)))??;
            tokio::fs::remove_dir_all(&source).await?;
        }

        let project = GitRepository::open(self.record.project.name.clone(), dest).await?;
        let mut record = self.record;
        record.project = project.to_ref();
        info!(exam_id = %record.id, dest = %dest.display(), "exam workspace persisted");
        Ok(record)
    }

    /// Drop the workspace and point the record at the origin repository that
    /// received the exam branch.
    pub fn into_published(self) -> ExamRecord {
        let mut record = self.record;
        record.project = self.origin;
        record
    }
}

fn copy_dir_all(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(std::fs::read_link(entry.path())?, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_are_ordered() {
        assert!(BuildPhase::Cloned < BuildPhase::SolutionAuthored);
        assert!(BuildPhase::SolutionCommitted < BuildPhase::ProblemAuthored);
        assert!(BuildPhase::ProblemCommitted < BuildPhase::Published);
        assert_eq!(BuildPhase::ProblemCommitted.to_string(), "ProblemCommitted");
    }

    #[test]
    fn test_ensure_artifacts_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(QUESTION_FILE), "q").unwrap();
        match ensure_artifacts(dir.path()).unwrap_err() {
            ExamError::MissingArtifact { file, workspace } => {
                assert_eq!(file, RUBRIC_FILE);
                assert_eq!(workspace, dir.path());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_copy_dir_all() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("a/b")).unwrap();
        std::fs::write(src.path().join("a/b/c.txt"), "c").unwrap();
        let dst_root = tempfile::tempdir().unwrap();
        let dst = dst_root.path().join("copy");
        copy_dir_all(src.path(), &dst).unwrap();
        assert_eq!(std::fs::read_to_string(dst.join("a/b/c.txt")).unwrap(), "c");
    }
}
