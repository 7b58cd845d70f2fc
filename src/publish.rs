//! Committing and pushing task results.
//!
//! A push rejected as non-fast-forward gets exactly one rebase retry;
//! a second rejection surfaces as a conflict. Commits that find a
//! clean tree publish nothing and report no commit SHA.

use tracing::{info, warn};

use crate::error::PublishError;
use crate::hosting::{GitClient, RepositoryHandle};

/// Commits the working tree and pushes it to the remote.
pub struct Publisher {
    git: GitClient,
}

impl Publisher {
    pub fn new(git: GitClient) -> Self {
        Self { git }
    }

    /// Commits everything in the working tree and pushes the branch.
    ///
    /// Returns the short commit SHA, or `None` when the tree was clean
    /// and there was nothing to publish.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Conflict` when the push is still rejected
    /// after a rebase retry.
    pub async fn publish(
        &self,
        handle: &RepositoryHandle,
        push_url: &str,
        message: &str,
    ) -> Result<Option<String>, PublishError> {
        let repo = &handle.local_path;

        let Some(sha) = self.git.commit_all(repo, message).await? else {
            info!(repo = %handle.remote.name, "Working tree clean, nothing to publish");
            return Ok(None);
        };

        match self.git.push(repo, push_url).await {
            Ok(()) => {}
            Err(crate::error::GitError::NonFastForward) => {
                warn!(repo = %handle.remote.name, "Push rejected, rebasing onto remote");
                self.git.pull_rebase(repo, push_url).await.map_err(|e| {
                    PublishError::Conflict(format!("rebase failed: {}", e))
                })?;
                self.git.push(repo, push_url).await.map_err(|e| match e {
                    crate::error::GitError::NonFastForward => {
                        PublishError::Conflict("push rejected after rebase".to_string())
                    }
                    other => PublishError::Git(other),
                })?;
            }
            Err(other) => return Err(other.into()),
        }

        // The rebase may have rewritten the commit.
        let sha = match self.git.head_sha(repo).await {
            Ok(head) => head,
            Err(_) => sha,
        };

        info!(repo = %handle.remote.name, commit = %sha, "Published");
        Ok(Some(sha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosting::RemoteRepo;
    use std::path::Path;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git() -> GitClient {
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

    fn handle(name: &str, clone_url: &str, local: &Path) -> RepositoryHandle {
        RepositoryHandle {
            remote: RemoteRepo {
                name: name.to_string(),
                owner: "mock".to_string(),
                url: format!("https://example.com/mock/{}", name),
                clone_url: clone_url.to_string(),
            },
            local_path: local.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_publish_commits_and_pushes() {
        let tmp = TempDir::new().expect("tempdir");
        let remote = init_bare(&tmp.path().join("remote.git"));
        let work = tmp.path().join("work");
        let git = git();
        git.clone_repo(&remote, &work).await.expect("clone");

        std::fs::write(work.join("index.html"), "<h1>hi</h1>").expect("write");

        let publisher = Publisher::new(git.clone());
        let sha = publisher
            .publish(&handle("demo", &remote, &work), &remote, "Add landing page")
            .await
            .expect("publish")
            .expect("sha");
        assert_eq!(sha.len(), 7);

        // The remote's HEAD matches what we pushed.
        let verify = tmp.path().join("verify");
        git.clone_repo(&remote, &verify).await.expect("verify clone");
        assert!(verify.join("index.html").exists());
    }

    #[tokio::test]
    async fn test_publish_clean_tree_is_a_noop() {
        let tmp = TempDir::new().expect("tempdir");
        let remote = init_bare(&tmp.path().join("remote.git"));
        let work = tmp.path().join("work");
        let git = git();
        git.clone_repo(&remote, &work).await.expect("clone");

        let publisher = Publisher::new(git);
        let sha = publisher
            .publish(&handle("demo", &remote, &work), &remote, "noop")
            .await
            .expect("publish");
        assert!(sha.is_none());
    }

    #[tokio::test]
    async fn test_publish_recovers_from_concurrent_push() {
        let tmp = TempDir::new().expect("tempdir");
        let remote = init_bare(&tmp.path().join("remote.git"));
        let git = git();

        // Another clone pushes first, making ours stale.
        let other = tmp.path().join("other");
        git.clone_repo(&remote, &other).await.expect("clone other");
        let work = tmp.path().join("work");
        git.clone_repo(&remote, &work).await.expect("clone work");

        std::fs::write(other.join("other.txt"), "first").expect("write");
        git.commit_all(&other, "first").await.expect("commit");
        git.push(&other, &remote).await.expect("push");

        std::fs::write(work.join("ours.txt"), "second").expect("write");

        let publisher = Publisher::new(git.clone());
        let sha = publisher
            .publish(&handle("demo", &remote, &work), &remote, "second")
            .await
            .expect("publish")
            .expect("sha");
        assert_eq!(sha.len(), 7);

        // Both files survive the rebase.
        let verify = tmp.path().join("verify");
        git.clone_repo(&remote, &verify).await.expect("verify clone");
        assert!(verify.join("other.txt").exists());
        assert!(verify.join("ours.txt").exists());
    }
}
