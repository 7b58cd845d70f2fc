//! Task submission payload and identity types.
//!
//! A validated `TaskSubmission` is the unit of work handed to the
//! orchestrator by the request front door. The `(task, round, nonce)`
//! tuple forms the submission's identity and drives duplicate rejection
//! and working-path partitioning.

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// An attachment provided as a data URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment file name including extension.
    pub name: String,
    /// Data URI payload for the attachment.
    pub url: String,
}

/// Inbound task submission, already authenticated by the front door.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Submitter email address.
    pub email: String,
    /// Unique task identifier, also the seed for the repository name.
    pub task: String,
    /// Round index; round 1 scaffolds, later rounds generate code.
    pub round: u32,
    /// Nonce echoed back on evaluation; part of the submission identity.
    pub nonce: String,
    /// Short description of the requested application.
    pub brief: String,
    /// Evaluation checklist items.
    #[serde(default)]
    pub checks: Vec<String>,
    /// Callback URL that receives repository details.
    pub evaluation_url: String,
    /// Optional attachments encoded as data URIs.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl TaskSubmission {
    /// Validates the submission shape before any side effect occurs.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Validation` describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.task.is_empty() {
            return Err(TaskError::Validation("task name must not be empty".into()));
        }
        if !self
            .task
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(TaskError::Validation(format!(
                "task name '{}' contains characters unsafe for a repository name",
                self.task
            )));
        }
        if self.round == 0 {
            return Err(TaskError::Validation("round must be a positive integer".into()));
        }
        if self.nonce.is_empty() {
            return Err(TaskError::Validation("nonce must not be empty".into()));
        }
        if self.brief.trim().is_empty() {
            return Err(TaskError::Validation("brief must not be empty".into()));
        }
        if !self.evaluation_url.starts_with("http://") && !self.evaluation_url.starts_with("https://")
        {
            return Err(TaskError::Validation(format!(
                "evaluation_url '{}' is not an http(s) URL",
                self.evaluation_url
            )));
        }
        Ok(())
    }

    /// The identity tuple for this submission.
    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity {
            task: self.task.clone(),
            round: self.round,
            nonce: self.nonce.clone(),
        }
    }
}

/// Unique identity of one accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    /// Task name.
    pub task: String,
    /// Round index.
    pub round: u32,
    /// Submission nonce.
    pub nonce: String,
}

impl std::fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/r{}/{}", self.task, self.round, self.nonce)
    }
}

/// Terminal and transient states of an accepted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Task accepted; pipeline still running. Always resolves to a
    /// terminal state.
    AcceptedPending,
    /// Pipeline pushed a commit and notified the evaluation endpoint.
    Success {
        repo_name: String,
        commit: Option<String>,
    },
    /// Pipeline reached a terminal failure.
    Failed { reason: String },
}

impl TaskOutcome {
    /// Whether this outcome is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskOutcome::AcceptedPending)
    }

    /// Status string used in the evaluation notification payload.
    pub fn status_str(&self) -> &'static str {
        match self {
            TaskOutcome::AcceptedPending => "pending",
            TaskOutcome::Success { .. } => "success",
            TaskOutcome::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::AcceptedPending => write!(f, "pending"),
            TaskOutcome::Success { repo_name, commit } => match commit {
                Some(sha) => write!(f, "success ({} @ {})", repo_name, sha),
                None => write!(f, "success ({})", repo_name),
            },
            TaskOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}
