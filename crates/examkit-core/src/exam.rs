//! Exam domain types and the persisted exam record.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::repository::RepositoryRef;

/// Subject an exam is generated for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub title: String,
    pub description: String,
}

impl Topic {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Everything needed to hand an exam to a solver and grade the result.
///
/// `solution_commit` is the parent of `problem_commit`; both carry identical
/// `question.md` and `rubric.md`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExamRecord {
    pub id: String,
    /// Sandbox image the exam was authored against.
    pub image: String,
    pub project: RepositoryRef,
    pub library: RepositoryRef,
    pub solution_commit: String,
    pub problem_commit: String,
    pub question: String,
    pub rubric: String,
    pub created_at: DateTime<Utc>,
}

impl ExamRecord {
    /// Branch the exam is published under.
    pub fn branch_name(&self) -> String {
        branch_name(&self.id)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// `exam_<slug(title)>_<first 7 chars of commit>`.
pub fn exam_id(title: &str, solution_commit: &str) -> String {
    let short = solution_commit.get(..7).unwrap_or(solution_commit);
    format!("exam_{}_{}", slugify(title), short)
}

pub fn branch_name(exam_id: &str) -> String {
    format!("exam-{exam_id}")
}

/// Lowercase ASCII alphanumerics joined by single underscores.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample() -> ExamRecord {
        ExamRecord {
            id: exam_id("Async Streams", "abcdef0123456789"),
            image: "openhands-agent-server-rs".to_string(),
            project: RepositoryRef {
                name: "project".to_string(),
                local_dir: PathBuf::from("/srv/project"),
            },
            library: RepositoryRef {
                name: "library".to_string(),
                local_dir: PathBuf::from("/srv/library"),
            },
            solution_commit: "abcdef0123456789".to_string(),
            problem_commit: "123456789abcdef0".to_string(),
            question: "# Question".to_string(),
            rubric: "# Rubric".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_exam_id_and_branch() {
        let record = sample();
        assert_eq!(record.id, "exam_async_streams_abcdef0");
        assert_eq!(record.branch_name(), "exam-exam_async_streams_abcdef0");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Error Handling: Result & ?"), "error_handling_result");
        assert_eq!(slugify("  Tokio  Tasks "), "tokio_tasks");
        assert_eq!(slugify("???"), "untitled");
    }

    #[test]
    fn test_exam_id_short_commit() {
        assert_eq!(exam_id("x", "abc"), "exam_x_abc");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exams").join("record.json");
        let record = sample();
        record.save(&path).await.unwrap();
        let loaded = ExamRecord::load(&path).await.unwrap();
        assert_eq!(loaded, record);
    }
}
