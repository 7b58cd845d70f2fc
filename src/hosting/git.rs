//! Local git operations via the git CLI.
//!
//! Commits always carry the configured author identity, passed with
//! `-c` so no global git configuration is required.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::GitError;

/// Client for local git operations.
#[derive(Debug, Clone)]
pub struct GitClient {
    author_name: String,
    author_email: String,
    branch: String,
}

impl GitClient {
    /// Creates a git client with the given commit identity and branch.
    pub fn new(
        author_name: impl Into<String>,
        author_email: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            author_name: author_name.into(),
            author_email: author_email.into(),
            branch: branch.into(),
        }
    }

    /// The branch that receives commits and pushes.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    async fn run(&self, args: &[&str], cwd: &Path) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Clones a repository into the target directory.
    pub async fn clone_repo(&self, clone_url: &str, target: &Path) -> Result<(), GitError> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(target)?;
        self.run(&["clone", clone_url, "."], target).await?;
        debug!(url = clone_url, path = %target.display(), "Cloned repository");
        Ok(())
    }

    /// Stages everything and commits with the configured identity.
    ///
    /// Returns `None` when the tree is clean and nothing was committed,
    /// otherwise the short commit SHA.
    pub async fn commit_all(&self, repo: &Path, message: &str) -> Result<Option<String>, GitError> {
        self.run(&["checkout", "-B", &self.branch], repo).await?;
        self.run(&["add", "--all"], repo).await?;

        // Commit only if there are staged changes.
        let staged = self.run(&["diff", "--cached", "--name-only"], repo).await?;
        if staged.is_empty() {
            debug!(path = %repo.display(), "Nothing to commit");
            return Ok(None);
        }

        self.run(
            &[
                "-c",
                &format!("user.name={}", self.author_name),
                "-c",
                &format!("user.email={}", self.author_email),
                "commit",
                "-m",
                message,
            ],
            repo,
        )
        .await?;

        let sha = self.head_sha(repo).await?;
        Ok(Some(sha))
    }

    /// Short SHA of the current HEAD.
    pub async fn head_sha(&self, repo: &Path) -> Result<String, GitError> {
        let full = self.run(&["rev-parse", "HEAD"], repo).await?;
        Ok(full.chars().take(7).collect())
    }

    /// Pushes the branch to the given remote URL.
    ///
    /// Rejected non-fast-forward pushes map to `GitError::NonFastForward`.
    pub async fn push(&self, repo: &Path, push_url: &str) -> Result<(), GitError> {
        let refspec = format!("HEAD:{}", self.branch);
        match self.run(&["push", push_url, &refspec], repo).await {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, command, status }) => {
                let lowered = stderr.to_lowercase();
                if lowered.contains("non-fast-forward")
                    || lowered.contains("fetch first")
                    || lowered.contains("rejected")
                {
                    Err(GitError::NonFastForward)
                } else {
                    Err(GitError::CommandFailed {
                        stderr,
                        command,
                        status,
                    })
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Pulls the remote branch with rebase, preserving local commits on top.
    pub async fn pull_rebase(&self, repo: &Path, remote_url: &str) -> Result<(), GitError> {
        self.run(
            &[
                "-c",
                &format!("user.name={}", self.author_name),
                "-c",
                &format!("user.email={}", self.author_email),
                "pull",
                "--rebase",
                remote_url,
                &self.branch,
            ],
            repo,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn client() -> GitClient {
        GitClient::new("repoforge", "bot@repoforge.local", "main")
    }

    fn init_bare(dir: &Path) -> String {
        let status = StdCommand::new("git")
            .args(["init", "--bare", "--initial-branch=main"])
            .arg(dir)
            .status()
            .expect("git init --bare");
        assert!(status.success());
        dir.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_clone_commit_push_roundtrip() {
        let tmp = TempDir::new().expect("tempdir");
        let remote = init_bare(&tmp.path().join("remote.git"));
        let work = tmp.path().join("work");

        let git = client();
        git.clone_repo(&remote, &work).await.expect("clone");

        std::fs::write(work.join("instructions.txt"), "Task: demo\n").expect("write");
        let sha = git
            .commit_all(&work, "Add task instructions")
            .await
            .expect("commit")
            .expect("sha");
        assert_eq!(sha.len(), 7);

        git.push(&work, &remote).await.expect("push");
    }

    #[tokio::test]
    async fn test_commit_all_on_clean_tree_returns_none() {
        let tmp = TempDir::new().expect("tempdir");
        let remote = init_bare(&tmp.path().join("remote.git"));
        let work = tmp.path().join("work");

        let git = client();
        git.clone_repo(&remote, &work).await.expect("clone");

        let result = git.commit_all(&work, "empty").await.expect("commit");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_push_detects_non_fast_forward() {
        let tmp = TempDir::new().expect("tempdir");
        let remote = init_bare(&tmp.path().join("remote.git"));
        let git = client();

        // Two independent clones of the same remote.
        let work_a = tmp.path().join("a");
        let work_b = tmp.path().join("b");
        git.clone_repo(&remote, &work_a).await.expect("clone a");
        git.clone_repo(&remote, &work_b).await.expect("clone b");

        std::fs::write(work_a.join("a.txt"), "from a").expect("write");
        git.commit_all(&work_a, "a").await.expect("commit a");
        git.push(&work_a, &remote).await.expect("push a");

        std::fs::write(work_b.join("b.txt"), "from b").expect("write");
        git.commit_all(&work_b, "b").await.expect("commit b");
        let err = git.push(&work_b, &remote).await.unwrap_err();
        assert!(matches!(err, GitError::NonFastForward));

        // Rebase resolves the divergence, push succeeds.
        git.pull_rebase(&work_b, &remote).await.expect("rebase");
        git.push(&work_b, &remote).await.expect("push after rebase");
    }
}
