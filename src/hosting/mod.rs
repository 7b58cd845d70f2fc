//! Source-control host capability interface.
//!
//! The orchestrator talks to the host exclusively through the
//! [`RepoHost`] trait so provisioning logic can be exercised against
//! mock hosts in tests.

pub mod git;
pub mod github;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::HostError;

pub use git::GitClient;
pub use github::GitHubHost;

/// A repository created on (or looked up from) the host.
#[derive(Debug, Clone)]
pub struct RemoteRepo {
    /// Repository name.
    pub name: String,
    /// Owning account.
    pub owner: String,
    /// Human-facing repository URL.
    pub url: String,
    /// URL used for cloning.
    pub clone_url: String,
}

/// Capability interface onto the source-control host.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Creates a repository with the given name.
    ///
    /// # Errors
    ///
    /// Returns `HostError::NameTaken` when the name collides with an
    /// existing repository.
    async fn create_repository(&self, name: &str, description: &str)
        -> Result<RemoteRepo, HostError>;

    /// Checks whether a repository with the given name exists.
    async fn repository_exists(&self, name: &str) -> Result<bool, HostError>;

    /// Looks up an existing repository by name.
    async fn get_repository(&self, name: &str) -> Result<Option<RemoteRepo>, HostError>;

    /// URL used for authenticated pushes to this repository.
    ///
    /// Defaults to the clone URL; hosts that require token-embedded
    /// URLs override this.
    fn push_url(&self, repo: &RemoteRepo) -> String {
        repo.clone_url.clone()
    }
}

/// A provisioned repository with its local working clone.
#[derive(Debug, Clone)]
pub struct RepositoryHandle {
    /// The remote repository.
    pub remote: RemoteRepo,
    /// Local working tree, scoped per repository name under the
    /// configured base directory.
    pub local_path: PathBuf,
}
