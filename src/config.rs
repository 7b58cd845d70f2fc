//! Configuration for the task orchestrator.
//!
//! Provides configuration options for repository provisioning, the
//! generation-repair loop, commit identity, concurrency limits and the
//! evaluation notification client.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::attachments::AttachmentPolicy;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    // Provisioning settings
    /// Base directory under which working clones are created, one
    /// subdirectory per repository name.
    pub base_dir: PathBuf,
    /// Maximum number of candidate repository names to probe before
    /// giving up on a collision-free name.
    pub max_name_attempts: u32,

    // Execution settings
    /// Maximum number of task pipelines running concurrently.
    pub max_concurrent_tasks: usize,

    // Commit identity
    /// Author name used for every commit.
    pub commit_author_name: String,
    /// Author email used for every commit.
    pub commit_author_email: String,
    /// Branch that receives pushes.
    pub default_branch: String,

    // Attachment settings
    /// Policy applied when an attachment fails to decode.
    pub attachment_policy: AttachmentPolicy,

    // Generation-repair loop settings
    /// Maximum number of generation attempts (initial draft included).
    pub max_attempts: u32,
    /// Maximum number of continuation calls per draft when the LLM
    /// truncates its response.
    pub max_continuations: u32,
    /// Whether a continuation call also consumes the attempt budget.
    pub continuation_counts_as_attempt: bool,

    // Notification settings
    /// Maximum delivery attempts for the evaluation notification.
    pub notify_max_retries: u32,
    /// Base delay for the notification backoff schedule.
    pub notify_base_delay: Duration,
    /// Per-request timeout for the evaluation notification.
    pub notify_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./workspaces"),
            max_name_attempts: 30,
            max_concurrent_tasks: 4,
            commit_author_name: "repoforge".to_string(),
            commit_author_email: "bot@repoforge.local".to_string(),
            default_branch: "main".to_string(),
            attachment_policy: AttachmentPolicy::SkipAndLog,
            max_attempts: 3,
            max_continuations: 3,
            continuation_counts_as_attempt: false,
            notify_max_retries: 5,
            notify_base_delay: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REPOFORGE_BASE_DIR`: Working clone base directory (default: ./workspaces)
    /// - `REPOFORGE_MAX_NAME_ATTEMPTS`: Repository name probes (default: 30)
    /// - `REPOFORGE_MAX_CONCURRENT_TASKS`: Concurrent pipelines (default: 4)
    /// - `REPOFORGE_COMMIT_AUTHOR_NAME`: Commit author name (default: repoforge)
    /// - `REPOFORGE_COMMIT_AUTHOR_EMAIL`: Commit author email (default: bot@repoforge.local)
    /// - `REPOFORGE_DEFAULT_BRANCH`: Push branch (default: main)
    /// - `REPOFORGE_ATTACHMENT_POLICY`: "skip" or "fatal" (default: skip)
    /// - `REPOFORGE_MAX_ATTEMPTS`: Generation attempt budget (default: 3)
    /// - `REPOFORGE_MAX_CONTINUATIONS`: Continuation budget per draft (default: 3)
    /// - `REPOFORGE_CONTINUATION_COUNTS_AS_ATTEMPT`: Count continuations against
    ///   the attempt budget (default: false)
    /// - `REPOFORGE_NOTIFY_MAX_RETRIES`: Notification attempts (default: 5)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REPOFORGE_BASE_DIR") {
            config.base_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("REPOFORGE_MAX_NAME_ATTEMPTS") {
            config.max_name_attempts = parse_env_value(&val, "REPOFORGE_MAX_NAME_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("REPOFORGE_MAX_CONCURRENT_TASKS") {
            config.max_concurrent_tasks = parse_env_value(&val, "REPOFORGE_MAX_CONCURRENT_TASKS")?;
        }

        if let Ok(val) = std::env::var("REPOFORGE_COMMIT_AUTHOR_NAME") {
            config.commit_author_name = val;
        }

        if let Ok(val) = std::env::var("REPOFORGE_COMMIT_AUTHOR_EMAIL") {
            config.commit_author_email = val;
        }

        if let Ok(val) = std::env::var("REPOFORGE_DEFAULT_BRANCH") {
            config.default_branch = val;
        }

        if let Ok(val) = std::env::var("REPOFORGE_ATTACHMENT_POLICY") {
            config.attachment_policy = match val.to_lowercase().as_str() {
                "skip" | "skip_and_log" => AttachmentPolicy::SkipAndLog,
                "fatal" => AttachmentPolicy::Fatal,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "REPOFORGE_ATTACHMENT_POLICY".to_string(),
                        message: format!("expected 'skip' or 'fatal', got '{}'", other),
                    })
                }
            };
        }

        if let Ok(val) = std::env::var("REPOFORGE_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "REPOFORGE_MAX_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("REPOFORGE_MAX_CONTINUATIONS") {
            config.max_continuations = parse_env_value(&val, "REPOFORGE_MAX_CONTINUATIONS")?;
        }

        if let Ok(val) = std::env::var("REPOFORGE_CONTINUATION_COUNTS_AS_ATTEMPT") {
            config.continuation_counts_as_attempt =
                parse_env_bool(&val, "REPOFORGE_CONTINUATION_COUNTS_AS_ATTEMPT")?;
        }

        if let Ok(val) = std::env::var("REPOFORGE_NOTIFY_MAX_RETRIES") {
            config.notify_max_retries = parse_env_value(&val, "REPOFORGE_NOTIFY_MAX_RETRIES")?;
        }

        Ok(config)
    }

    /// Sets the working clone base directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Sets the maximum number of repository name probes.
    pub fn with_max_name_attempts(mut self, attempts: u32) -> Self {
        self.max_name_attempts = attempts;
        self
    }

    /// Sets the maximum number of concurrent task pipelines.
    pub fn with_max_concurrent_tasks(mut self, tasks: usize) -> Self {
        self.max_concurrent_tasks = tasks;
        self
    }

    /// Sets the attachment decode failure policy.
    pub fn with_attachment_policy(mut self, policy: AttachmentPolicy) -> Self {
        self.attachment_policy = policy;
        self
    }

    /// Sets the generation attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the continuation budget per draft.
    pub fn with_max_continuations(mut self, continuations: u32) -> Self {
        self.max_continuations = continuations;
        self
    }

    /// Sets whether continuations consume the attempt budget.
    pub fn with_continuation_counts_as_attempt(mut self, counts: bool) -> Self {
        self.continuation_counts_as_attempt = counts;
        self
    }

    /// Sets the notification retry budget.
    pub fn with_notify_max_retries(mut self, retries: u32) -> Self {
        self.notify_max_retries = retries;
        self
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parses a boolean environment variable ("true"/"false"/"1"/"0").
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", other),
        }),
    }
}
