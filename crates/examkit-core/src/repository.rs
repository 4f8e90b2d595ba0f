//! Fail-fast git wrapper around one working directory.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::error::{ExamError, RepositoryCommandError, Result};

/// Serialisable pointer to a repository, as stored in exam records.
///
/// Re-open it with [`GitRepository::open_ref`] before use; that re-verifies
/// the checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryRef {
    pub name: String,
    pub local_dir: PathBuf,
}

/// A directory verified to be a git work tree at construction time.
#[derive(Debug, Clone)]
pub struct GitRepository {
    name: String,
    local_dir: PathBuf,
}

impl GitRepository {
    /// Open `local_dir`, failing immediately if it is missing or not a checkout.
    pub async fn open(name: impl Into<String>, local_dir: impl AsRef<Path>) -> Result<Self> {
        let local_dir = local_dir.as_ref();
        if !local_dir.exists() {
            return Err(ExamError::RepositoryNotFound(local_dir.to_path_buf()));
        }
        let repo = Self {
            name: name.into(),
            local_dir: std::fs::canonicalize(local_dir)?,
        };
        repo.run(&["rev-parse", "--is-inside-work-tree"], None).await?;
        Ok(repo)
    }

    pub async fn open_ref(reference: &RepositoryRef) -> Result<Self> {
        Self::open(reference.name.clone(), &reference.local_dir).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn to_ref(&self) -> RepositoryRef {
        RepositoryRef {
            name: self.name.clone(),
            local_dir: self.local_dir.clone(),
        }
    }

    /// Run `git <args>` and return trimmed stdout.
    ///
    /// `cwd` overrides the repository directory; only needed for commands
    /// that target a tree which does not exist yet.
    pub async fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let output = self.exec(args, cwd).await?;
        if !output.status.success() {
            return Err(self.command_error(args, &output).into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn exec(&self, args: &[&str], cwd: Option<&Path>) -> Result<Output> {
        let working_dir = cwd.unwrap_or(&self.local_dir);
        debug!(
            repository = %self.name,
            cwd = %working_dir.display(),
            "running git {}",
            args.join(" ")
        );
        let output = Command::new("git")
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(output)
    }

    fn command_error(&self, args: &[&str], output: &Output) -> RepositoryCommandError {
        let err = RepositoryCommandError {
            repository: self.name.clone(),
            command: args.join(" "),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };
        error!(repository = %self.name, "{err}");
        err
    }

    /// Clone this repository into `dest` and open the clone as `name`.
    pub async fn clone_to(&self, dest: &Path, name: &str) -> Result<GitRepository> {
        let source = self.local_dir.to_string_lossy().to_string();
        let target = dest.to_string_lossy().to_string();
        self.run(&["clone", &source, &target], None).await?;
        GitRepository::open(name, dest).await
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.run(&["config", key, value], None).await.map(|_| ())
    }

    /// Set the committer identity for this checkout only.
    pub async fn configure_identity(&self, user_name: &str, email: &str) -> Result<()> {
        self.set_config("user.name", user_name).await?;
        self.set_config("user.email", email).await
    }

    /// Ignore executable-bit changes in this checkout.
    ///
    /// Required on any workspace that goes through [`fix_permissions`]:
    /// otherwise the chmod shows up as a mode change on every tracked file,
    /// blocks checkouts and gets committed.
    ///
    /// [`fix_permissions`]: GitRepository::fix_permissions
    pub async fn ignore_file_mode(&self) -> Result<()> {
        self.set_config("core.fileMode", "false").await
    }

    /// `git add .` after opening up permissions on the tree.
    pub async fn stage_all(&self) -> Result<()> {
        self.fix_permissions().await;
        self.run(&["add", "."], None).await.map(|_| ())
    }

    pub async fn commit(&self, message: &str) -> Result<()> {
        self.run(&["commit", "-m", message], None).await.map(|_| ())
    }

    /// Full commit id of `reference`.
    pub async fn resolve_ref(&self, reference: &str) -> Result<String> {
        self.run(&["rev-parse", reference], None).await
    }

    pub async fn head(&self) -> Result<String> {
        self.resolve_ref("HEAD").await
    }

    pub async fn checkout(&self, branch: &str, create: bool) -> Result<()> {
        self.fix_permissions().await;
        if create {
            self.run(&["checkout", "-b", branch], None).await?;
        } else {
            self.run(&["checkout", branch], None).await?;
        }
        Ok(())
    }

    /// Restore `paths` in the work tree and index to their content at `rev`.
    pub async fn restore_paths(&self, rev: &str, paths: &[&str]) -> Result<()> {
        let mut args = vec!["checkout", rev, "--"];
        args.extend_from_slice(paths);
        self.run(&args, None).await.map(|_| ())
    }

    pub async fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        self.run(&["push", remote, refspec], None).await.map(|_| ())
    }

    /// Whether `ancestor` is reachable from `descendant`.
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let args = ["merge-base", "--is-ancestor", ancestor, descendant];
        let output = self.exec(&args, None).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.command_error(&args, &output).into()),
        }
    }

    /// Every tracked path at `rev`.
    pub async fn list_files(&self, rev: &str) -> Result<Vec<String>> {
        let out = self.run(&["ls-tree", "-r", rev, "--name-only"], None).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Local branches matching `pattern`, without the `*` marker.
    pub async fn branch_list(&self, pattern: &str) -> Result<Vec<String>> {
        let out = self.run(&["branch", "--list", pattern], None).await?;
        Ok(out
            .lines()
            .map(|line| line.trim_start_matches(['*', '+']).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Raw bytes of `path` at `rev`.
    pub async fn show_file(&self, rev: &str, path: &str) -> Result<Vec<u8>> {
        let spec = format!("{rev}:{path}");
        let args = ["show", spec.as_str()];
        let output = self.exec(&args, None).await?;
        if !output.status.success() {
            return Err(self.command_error(&args, &output).into());
        }
        Ok(output.stdout)
    }

    /// Recursively chmod the tree to 0o777.
    ///
    /// The workspace is written by a sandboxed process that may run as a
    /// different user. Best-effort: failures are logged and swallowed.
    pub async fn fix_permissions(&self) {
        let root = self.local_dir.clone();
        let name = self.name.clone();
        let outcome = tokio::task::spawn_blocking(move || make_tree_writable(&root)).await;
        match outcome {
            Ok(Ok(())) => debug!(repository = %name, "permissions opened up"),
            Ok(Err(e)) => warn!(repository = %name, error = %e, "failed to fix permissions"),
            Err(e) => warn!(repository = %name, error = %e, "permission fix-up task failed"),
        }
    }
}

/// chmod -R 777 without following symlinks. Keeps going past individual
/// failures and reports the first one.
#[cfg(unix)]
fn make_tree_writable(root: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut first_error = None;
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                first_error.get_or_insert(e);
                continue;
            }
        };
        if meta.file_type().is_symlink() {
            continue;
        }
        if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777)) {
            first_error.get_or_insert(e);
        }
        if meta.is_dir() {
            match std::fs::read_dir(&path) {
                Ok(entries) => stack.extend(entries.filter_map(|e| e.ok()).map(|e| e.path())),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(not(unix))]
fn make_tree_writable(_root: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn open_fails_for_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = GitRepository::open("ghost", &missing).await.unwrap_err();
        assert!(matches!(err, ExamError::RepositoryNotFound(_)));
    }

    #[tokio::test]
    async fn open_fails_for_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitRepository::open("plain", dir.path()).await.unwrap_err();
        match err {
            ExamError::Repository(cmd) => {
                assert_eq!(cmd.repository, "plain");
                assert!(cmd.command.contains("rev-parse"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_head_is_stable() {
        let dir = make_git_repo();
        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        let first = repo.head().await.unwrap();
        let second = repo.resolve_ref("HEAD").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
        assert!(repo.local_dir().is_absolute());
    }

    #[tokio::test]
    async fn commit_failure_is_typed() {
        let dir = make_git_repo();
        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        let err = repo.commit("nothing staged").await.unwrap_err();
        match err {
            ExamError::Repository(cmd) => {
                assert_eq!(cmd.repository, "project");
                assert_eq!(cmd.exit_code, Some(1));
                assert!(cmd.command.starts_with("commit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stage_commit_and_ancestry() {
        let dir = make_git_repo();
        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        let base = repo.head().await.unwrap();

        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        repo.stage_all().await.unwrap();
        repo.commit("add a").await.unwrap();
        let next = repo.head().await.unwrap();

        assert_ne!(base, next);
        assert!(repo.is_ancestor(&base, &next).await.unwrap());
        assert!(!repo.is_ancestor(&next, &base).await.unwrap());
        assert_eq!(repo.list_files("HEAD").await.unwrap(), vec!["a.txt"]);
        assert_eq!(repo.show_file(&next, "a.txt").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn is_ancestor_rejects_unknown_commit() {
        let dir = make_git_repo();
        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        let err = repo
            .is_ancestor("0000000000000000000000000000000000000001", "HEAD")
            .await
            .unwrap_err();
        assert!(matches!(err, ExamError::Repository(_)));
    }

    #[tokio::test]
    async fn checkout_create_and_branch_list() {
        let dir = make_git_repo();
        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        repo.checkout("exam-topic", true).await.unwrap();
        let branches = repo.branch_list("exam-*").await.unwrap();
        assert_eq!(branches, vec!["exam-topic"]);
    }

    #[tokio::test]
    async fn restore_paths_reverts_file() {
        let dir = make_git_repo();
        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        std::fs::write(dir.path().join("question.md"), "original").unwrap();
        repo.stage_all().await.unwrap();
        repo.commit("question").await.unwrap();
        let rev = repo.head().await.unwrap();

        std::fs::write(dir.path().join("question.md"), "tampered").unwrap();
        repo.restore_paths(&rev, &["question.md"]).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("question.md")).unwrap();
        assert_eq!(content, "original");
    }

    #[tokio::test]
    async fn clone_to_produces_open_repo() {
        let dir = make_git_repo();
        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        let dest_root = tempfile::tempdir().unwrap();
        let dest = dest_root.path().join("clone");

        let clone = repo.clone_to(&dest, "clone").await.unwrap();
        assert_eq!(clone.name(), "clone");
        assert_eq!(clone.head().await.unwrap(), repo.head().await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ignored_file_mode_keeps_tree_clean_and_checkout_working() {
        let dir = make_git_repo();
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-m", "one"]);
        let first = StdCommand::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        let first = String::from_utf8_lossy(&first.stdout).trim().to_string();
        std::fs::write(dir.path().join("a.txt"), "two").unwrap();
        run_git(dir.path(), &["commit", "-am", "two"]);

        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        repo.ignore_file_mode().await.unwrap();
        repo.fix_permissions().await;
        assert_eq!(repo.run(&["status", "--porcelain"], None).await.unwrap(), "");

        repo.checkout(&first, false).await.unwrap();
        assert_eq!(repo.head().await.unwrap(), first);

        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        repo.stage_all().await.unwrap();
        repo.commit("add b").await.unwrap();
        let modes = repo.run(&["ls-tree", "HEAD"], None).await.unwrap();
        assert!(modes.lines().all(|line| line.starts_with("100644")), "{modes}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_permission_fix_is_swallowed_but_git_errors_propagate() {
        let dir = make_git_repo();
        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        std::fs::remove_dir_all(dir.path()).unwrap();

        assert!(make_tree_writable(repo.local_dir()).is_err());
        repo.fix_permissions().await;
        assert!(repo.stage_all().await.is_err());
        assert!(repo.checkout("main", false).await.is_err());
    }

    #[tokio::test]
    async fn checkout_of_unknown_branch_reports_git_error() {
        let dir = make_git_repo();
        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        match repo.checkout("no-such-branch", false).await.unwrap_err() {
            ExamError::Repository(cmd) => assert_eq!(cmd.command, "checkout no-such-branch"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fix_permissions_opens_tree() {
        use std::os::unix::fs::PermissionsExt;

        let dir = make_git_repo();
        let nested = dir.path().join("src");
        std::fs::create_dir_all(&nested).unwrap();
        let file = nested.join("lib.rs");
        std::fs::write(&file, "").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600)).unwrap();

        let repo = GitRepository::open("project", dir.path()).await.unwrap();
        repo.fix_permissions().await;

        let mode = std::fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o777);
    }
}
