//! Structural checks on a built exam.

use serde::Serialize;
use tracing::instrument;

use crate::error::Result;
use crate::exam::ExamRecord;
use crate::prompts::{QUESTION_FILE, RUBRIC_FILE};
use crate::repository::GitRepository;

/// Outcome of [`verify_exam`]. Each flag is one check.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub exam_id: String,
    pub commits_exist: bool,
    pub commits_distinct: bool,
    pub solution_is_ancestor: bool,
    pub artifacts_present: bool,
    pub artifacts_identical: bool,
    /// The recorded question and rubric match the problem tree.
    pub record_matches_tree: bool,
    /// `exam-<id>` exists in the recorded project. Informational only: a
    /// persisted build workspace never carries the branch locally.
    pub branch_exists: bool,
    pub problems: Vec<String>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.commits_exist
            && self.commits_distinct
            && self.solution_is_ancestor
            && self.artifacts_present
            && self.artifacts_identical
            && self.record_matches_tree
    }
}

/// Check the invariants of `exam` against its project repository.
///
/// Repository access failures are errors; failed checks are reported.
#[instrument(skip_all, fields(exam_id = %exam.id))]
pub async fn verify_exam(exam: &ExamRecord) -> Result<VerificationReport> {
    let repo = GitRepository::open_ref(&exam.project).await?;
    let mut report = VerificationReport {
        exam_id: exam.id.clone(),
        ..Default::default()
    };
    let (solution, problem) = (&exam.solution_commit, &exam.problem_commit);

    for commit in [solution, problem] {
        if repo.resolve_ref(&format!("{commit}^{{commit}}")).await.is_err() {
            report.problems.push(format!("commit {commit} not found"));
        }
    }
    report.commits_exist = report.problems.is_empty();
    if !report.commits_exist {
        return Ok(report);
    }

    report.commits_distinct = solution != problem;
    if !report.commits_distinct {
        report
            .problems
            .push("solution and problem commits are the same".to_string());
    }

    report.solution_is_ancestor = repo.is_ancestor(solution, problem).await?;
    if !report.solution_is_ancestor {
        report
            .problems
            .push(format!("solution {solution} is not an ancestor of problem {problem}"));
    }

    let solution_files = repo.list_files(solution).await?;
    let problem_files = repo.list_files(problem).await?;
    report.artifacts_present = true;
    for file in [QUESTION_FILE, RUBRIC_FILE] {
        for (label, files) in [("solution", &solution_files), ("problem", &problem_files)] {
            if !files.iter().any(|f| f == file) {
                report.artifacts_present = false;
                report.problems.push(format!("{file} missing from {label} commit"));
            }
        }
    }

    if report.artifacts_present {
        report.artifacts_identical = true;
        for file in [QUESTION_FILE, RUBRIC_FILE] {
            if repo.show_file(solution, file).await? != repo.show_file(problem, file).await? {
                report.artifacts_identical = false;
                report
                    .problems
                    .push(format!("{file} differs between solution and problem"));
            }
        }
        let question = repo.show_file(problem, QUESTION_FILE).await?;
        let rubric = repo.show_file(problem, RUBRIC_FILE).await?;
        report.record_matches_tree =
            question == exam.question.as_bytes() && rubric == exam.rubric.as_bytes();
        if !report.record_matches_tree {
            report
                .problems
                .push("recorded question or rubric differs from the problem tree".to_string());
        }
    }

    report.branch_exists = !repo.branch_list(&exam.branch_name()).await?.is_empty();
    Ok(report)
}
