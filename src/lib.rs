//! repoforge: Task orchestration engine for LLM-generated repositories.
//!
//! This library provisions a repository per submitted coding task,
//! scaffolds it on the first round, drives a generate-check-repair
//! loop against an LLM on later rounds, publishes the result and
//! notifies an evaluation endpoint.

// Core modules
pub mod attachments;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod hosting;
pub mod llm;
pub mod notify;
pub mod orchestrator;
pub mod provision;
pub mod publish;
pub mod rounds;
pub mod task;

// Re-export commonly used error types
pub use error::{
    AttachmentError, GenerationError, GitError, HostError, LlmError, NotifyError,
    OrchestratorError, ProvisionError, PublishError, RoundError, TaskError,
};
