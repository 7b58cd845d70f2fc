//! Repository provisioning: collision-free naming, creation and cloning.
//!
//! Round 1 creates a fresh remote repository under a deterministic,
//! identity-derived name, disambiguating on collision. Later rounds
//! look the repository up and must find it. Working clones live under
//! the configured base directory, one subdirectory per repository
//! name, so concurrent tasks never share a working tree.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{HostError, ProvisionError};
use crate::hosting::{GitClient, RemoteRepo, RepoHost, RepositoryHandle};
use crate::task::TaskSubmission;

/// Provisions remote repositories and local working clones.
pub struct Provisioner {
    host: Arc<dyn RepoHost>,
    git: GitClient,
    base_dir: PathBuf,
    max_name_attempts: u32,
    /// Repository names assigned during this process lifetime, keyed by
    /// task name, so later rounds reuse round 1's name without probing.
    known_repos: Mutex<HashMap<String, String>>,
}

impl Provisioner {
    /// Creates a provisioner over the given host and clone base directory.
    pub fn new(
        host: Arc<dyn RepoHost>,
        git: GitClient,
        base_dir: PathBuf,
        max_name_attempts: u32,
    ) -> Self {
        Self {
            host,
            git,
            base_dir,
            max_name_attempts,
            known_repos: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic base repository name for a task.
    ///
    /// The suffix derives from (email, task): stable across rounds so
    /// round > 1 can re-derive round 1's name, and unlikely to collide
    /// across submitters sharing a task name.
    pub fn base_name(email: &str, task: &str) -> String {
        let seed = format!("{}/{}", email, task);
        let suffix = Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes())
            .simple()
            .to_string();
        format!("{}-{}", task, &suffix[..8])
    }

    fn candidate(base: &str, attempt: u32) -> String {
        if attempt == 0 {
            base.to_string()
        } else {
            format!("{}-{}", base, attempt + 1)
        }
    }

    /// Ensures a repository exists for the submission and produces a
    /// local working clone.
    ///
    /// # Errors
    ///
    /// - `CollisionExhausted` when every candidate name is taken;
    /// - `NotFound` when a round > 1 submission has no existing repository;
    /// - `Provision` when the clone fails (not retried: a silent retry
    ///   risks duplicate remote creation).
    pub async fn provision(
        &self,
        submission: &TaskSubmission,
    ) -> Result<RepositoryHandle, ProvisionError> {
        let remote = if submission.round == 1 {
            self.create_new(submission).await?
        } else {
            self.lookup_existing(submission).await?
        };
        self.clone_into_workspace(remote).await
    }

    async fn create_new(&self, submission: &TaskSubmission) -> Result<RemoteRepo, ProvisionError> {
        let base = Self::base_name(&submission.email, &submission.task);
        let description = format!("Auto-generated for task {}", submission.task);

        for attempt in 0..self.max_name_attempts {
            let name = Self::candidate(&base, attempt);

            if self.host.repository_exists(&name).await? {
                warn!(repo = %name, "Repository name collision, trying next candidate");
                continue;
            }

            match self.host.create_repository(&name, &description).await {
                Ok(remote) => {
                    self.known_repos
                        .lock()
                        .expect("known repo lock")
                        .insert(submission.task.clone(), remote.name.clone());
                    info!(task = %submission.task, repo = %remote.name, "Provisioned repository");
                    return Ok(remote);
                }
                // Lost a creation race; the name is a collision after all.
                Err(HostError::NameTaken(_)) => {
                    warn!(repo = %name, "Repository created concurrently, trying next candidate");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ProvisionError::CollisionExhausted {
            task: submission.task.clone(),
            attempts: self.max_name_attempts,
        })
    }

    async fn lookup_existing(
        &self,
        submission: &TaskSubmission,
    ) -> Result<RemoteRepo, ProvisionError> {
        let known = self
            .known_repos
            .lock()
            .expect("known repo lock")
            .get(&submission.task)
            .cloned();

        if let Some(name) = known {
            return self
                .host
                .get_repository(&name)
                .await?
                .ok_or_else(|| ProvisionError::NotFound(submission.task.clone()));
        }

        // No in-process record (e.g., round 1 handled by a previous
        // process); probe the deterministic candidates in order.
        let base = Self::base_name(&submission.email, &submission.task);
        for attempt in 0..self.max_name_attempts {
            let name = Self::candidate(&base, attempt);
            if let Some(remote) = self.host.get_repository(&name).await? {
                self.known_repos
                    .lock()
                    .expect("known repo lock")
                    .insert(submission.task.clone(), remote.name.clone());
                return Ok(remote);
            }
        }

        Err(ProvisionError::NotFound(submission.task.clone()))
    }

    async fn clone_into_workspace(
        &self,
        remote: RemoteRepo,
    ) -> Result<RepositoryHandle, ProvisionError> {
        let local_path = self.base_dir.join(&remote.name);

        // A stale clone from an earlier round is replaced wholesale;
        // the remote is the source of truth.
        if local_path.exists() {
            std::fs::remove_dir_all(&local_path)?;
        }

        self.git
            .clone_repo(&remote.clone_url, &local_path)
            .await
            .map_err(|e| ProvisionError::Provision {
                name: remote.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(RepositoryHandle { remote, local_path })
    }
}
