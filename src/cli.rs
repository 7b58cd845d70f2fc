//! Command-line interface for repoforge.
//!
//! Provides commands for submitting task payloads to the orchestrator
//! and for validating payloads without side effects.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::generation::BasicChecks;
use crate::hosting::GitHubHost;
use crate::llm::OpenAiClient;
use crate::orchestrator::Orchestrator;
use crate::task::TaskSubmission;

/// Task orchestration engine: provisions repositories, generates code,
/// publishes results.
#[derive(Parser)]
#[command(name = "repoforge")]
#[command(about = "Provision task repositories and drive LLM code generation rounds")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Submit one or more task payload files and wait for their outcomes.
    #[command(alias = "run")]
    Submit(SubmitArgs),

    /// Validate task payload files without touching the host.
    Validate(ValidateArgs),
}

/// Arguments for `repoforge submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// JSON task payload files; distinct identities run concurrently.
    #[arg(required = true)]
    pub task_files: Vec<String>,
}

/// Arguments for `repoforge validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// JSON task payload files to validate.
    #[arg(required = true)]
    pub task_files: Vec<String>,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Submit(args) => submit(args).await,
        Commands::Validate(args) => validate(args),
    }
}

fn load_submission(path: &str) -> anyhow::Result<TaskSubmission> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read task file '{}'", path))?;
    let submission: TaskSubmission = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse task file '{}'", path))?;
    Ok(submission)
}

async fn submit(args: SubmitArgs) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let host = Arc::new(GitHubHost::from_env()?);
    let llm = Arc::new(OpenAiClient::from_env()?);
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        host,
        llm,
        Arc::new(BasicChecks),
    )?);

    let mut accepted = 0usize;
    for path in &args.task_files {
        let submission = load_submission(path)?;
        let identity = submission.identity();
        match orchestrator.submit(submission) {
            Ok(_) => {
                info!(identity = %identity, file = path, "Submission accepted");
                accepted += 1;
            }
            Err(err) => warn!(identity = %identity, file = path, error = %err, "Submission rejected"),
        }
    }

    // Outcomes are delivered to each payload's evaluation URL; the CLI
    // only waits for the pipelines to drain.
    while orchestrator.in_flight_count() > 0 {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let stats = orchestrator.stats();
    info!(
        accepted,
        succeeded = stats.succeeded(),
        failed = stats.failed(),
        "All pipelines finished"
    );

    if stats.failed() > 0 {
        anyhow::bail!("{} of {} submissions failed", stats.failed(), accepted);
    }
    Ok(())
}

fn validate(args: ValidateArgs) -> anyhow::Result<()> {
    let mut invalid = 0usize;
    for path in &args.task_files {
        match load_submission(path).and_then(|s| {
            s.validate()?;
            Ok(s)
        }) {
            Ok(submission) => {
                info!(identity = %submission.identity(), file = path, "Payload is valid")
            }
            Err(err) => {
                warn!(file = path, error = %err, "Payload is invalid");
                invalid += 1;
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{} invalid payload(s)", invalid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_submission_roundtrip() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("task.json");
        std::fs::write(
            &path,
            r#"{
                "email": "s@example.com",
                "task": "todo-app",
                "round": 1,
                "nonce": "n1",
                "brief": "A todo app",
                "evaluation_url": "https://eval.example.com"
            }"#,
        )
        .expect("write");

        let submission = load_submission(path.to_str().unwrap()).expect("load");
        assert_eq!(submission.task, "todo-app");
        assert!(submission.validate().is_ok());
    }

    #[test]
    fn test_load_submission_rejects_malformed_json() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(load_submission(path.to_str().unwrap()).is_err());
    }
}
