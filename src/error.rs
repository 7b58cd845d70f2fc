//! Error types for repoforge operations.
//!
//! Defines error types for all major subsystems:
//! - Task payload validation
//! - Attachment decoding
//! - Source-control host interactions and local git operations
//! - Repository provisioning
//! - Round routing
//! - LLM API interactions and the generation-repair loop
//! - Commit/push publishing
//! - Evaluation notifications

use thiserror::Error;

/// Errors raised while validating an inbound task payload.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid task payload: {0}")]
    Validation(String),
}

/// Errors that can occur while decoding task attachments.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Attachment '{name}' is not a valid data URI")]
    NotDataUri { name: String },

    #[error("Failed to decode attachment '{name}': {reason}")]
    Decode { name: String, reason: String },

    #[error("Attachment '{0}' has an unsafe file name")]
    UnsafeName(String),
}

impl AttachmentError {
    /// Name of the offending attachment.
    pub fn attachment_name(&self) -> &str {
        match self {
            AttachmentError::NotDataUri { name } => name,
            AttachmentError::Decode { name, .. } => name,
            AttachmentError::UnsafeName(name) => name,
        }
    }
}

/// Errors returned by the source-control host API.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Missing host token: GITHUB_TOKEN environment variable not set")]
    MissingToken,

    #[error("Missing host owner: GITHUB_OWNER environment variable not set")]
    MissingOwner,

    #[error("Repository name '{0}' is already taken")]
    NameTaken(String),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("Failed to parse host response: {0}")]
    Parse(String),

    #[error("Host API error ({code}): {message}")]
    Api { code: u16, message: String },
}

/// Errors raised by local git operations.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {command} failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Push rejected as non-fast-forward")]
    NonFastForward,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while provisioning a repository for a task.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Exhausted {attempts} attempts to find a free repository name for task '{task}'")]
    CollisionExhausted { task: String, attempts: u32 },

    #[error("No existing repository found for task '{0}'")]
    NotFound(String),

    #[error("Failed to provision repository '{name}': {reason}")]
    Provision { name: String, reason: String },

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the round router.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("Unsupported round index: {0}")]
    Unsupported(u32),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur during the generation-repair loop.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Continuation budget of {0} exceeded before the response completed")]
    ContinuationBudget(u32),

    #[error("Attempt budget of {0} exceeded before all checks passed")]
    AttemptBudget(u32),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Errors that can occur while committing and pushing task files.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Push conflict persisted after rebase retry: {0}")]
    Conflict(String),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while delivering the evaluation notification.
///
/// Notification failures after a successful push are logged, never fatal.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("Evaluation endpoint returned status {0}")]
    Status(u16),
}

/// Umbrella error for the task orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Task '{0}' is already in flight")]
    DuplicateSubmission(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Round(#[from] RoundError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}
