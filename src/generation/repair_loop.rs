//! Bounded generate-check-repair loop.
//!
//! State machine: `Drafting → Checking → (Passed | Repairing)`, with
//! `Repairing` feeding the failing checks back into the next draft.
//! Attempts are strictly sequential because each repair prompt embeds
//! the previous attempt's check results. Two budgets bound the loop:
//! the attempt budget (drafts, initial draft included) and the
//! per-draft continuation budget. Exhaustion still carries the
//! best-so-far file set so a partial result can be committed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attachments::MaterializedFile;
use crate::error::GenerationError;
use crate::llm::{complete_full, CompletionClient, Message};
use crate::task::TaskSubmission;

use super::prompts;
use super::response::{parse_file_response, GeneratedFile};

/// Result of an individual declared check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Name of the check that was performed.
    pub check_name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Optional message with details about the check result.
    pub message: Option<String>,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            check_name: name.into(),
            passed: true,
            message: None,
        }
    }

    /// Create a failing check result with a reason.
    pub fn fail(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            check_name: name.into(),
            passed: false,
            message: Some(reason.into()),
        }
    }
}

/// Injected predicate set applied to each drafted file set.
///
/// Concrete check execution (lint tooling, browser checks) is an
/// external collaborator; the loop only consumes pass/fail results.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    /// Applies the declared checks to a drafted file set.
    async fn run_checks(&self, checks: &[String], files: &[GeneratedFile]) -> Vec<CheckResult>;
}

/// Structural default check runner.
///
/// A check that names a file (contains a dot, no spaces) passes when
/// the file set contains a matching path. Free-text checks cannot be
/// evaluated structurally and pass through. An empty file set fails
/// unconditionally.
pub struct BasicChecks;

#[async_trait]
impl CheckRunner for BasicChecks {
    async fn run_checks(&self, checks: &[String], files: &[GeneratedFile]) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(checks.len() + 1);

        if files.is_empty() {
            results.push(CheckResult::fail("file_set", "no files were generated"));
            return results;
        }
        results.push(CheckResult::pass("file_set"));

        for check in checks {
            let looks_like_file = check.contains('.') && !check.contains(' ');
            if looks_like_file {
                let found = files
                    .iter()
                    .any(|f| f.path == *check || f.path.ends_with(&format!("/{}", check)));
                if found {
                    results.push(CheckResult::pass(check.clone()));
                } else {
                    results.push(CheckResult::fail(
                        check.clone(),
                        format!("expected file '{}' was not generated", check),
                    ));
                }
            } else {
                // Not structurally evaluable here.
                results.push(CheckResult::pass(check.clone()));
            }
        }

        results
    }
}

/// Why the loop gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionReason {
    /// A draft stayed truncated past the continuation budget.
    ContinuationBudgetExceeded,
    /// Checks kept failing past the attempt budget.
    AttemptBudgetExceeded,
}

impl std::fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExhaustionReason::ContinuationBudgetExceeded => {
                write!(f, "continuation budget exceeded")
            }
            ExhaustionReason::AttemptBudgetExceeded => write!(f, "attempt budget exceeded"),
        }
    }
}

/// Terminal result of the generation-repair loop.
#[derive(Debug)]
pub enum LoopOutcome {
    /// All declared checks passed.
    Passed {
        files: Vec<GeneratedFile>,
        commit_message: Option<String>,
        attempts: u32,
    },
    /// A budget ran out; `files` is the best-so-far set (the last
    /// non-empty draft), possibly empty if no draft ever succeeded.
    Exhausted {
        reason: ExhaustionReason,
        files: Vec<GeneratedFile>,
        commit_message: Option<String>,
        attempts: u32,
    },
}

impl LoopOutcome {
    /// The file set to commit, regardless of how the loop ended.
    pub fn files(&self) -> &[GeneratedFile] {
        match self {
            LoopOutcome::Passed { files, .. } => files,
            LoopOutcome::Exhausted { files, .. } => files,
        }
    }

    /// The extracted commit message, when the model produced one.
    pub fn commit_message(&self) -> Option<&str> {
        match self {
            LoopOutcome::Passed { commit_message, .. } => commit_message.as_deref(),
            LoopOutcome::Exhausted { commit_message, .. } => commit_message.as_deref(),
        }
    }
}

/// Driver for the generate-check-repair state machine.
pub struct RepairLoop<'a> {
    client: &'a dyn CompletionClient,
    checks: &'a dyn CheckRunner,
    max_attempts: u32,
    max_continuations: u32,
    continuation_counts_as_attempt: bool,
}

impl<'a> RepairLoop<'a> {
    /// Creates a loop driver with the given budgets.
    pub fn new(
        client: &'a dyn CompletionClient,
        checks: &'a dyn CheckRunner,
        max_attempts: u32,
        max_continuations: u32,
        continuation_counts_as_attempt: bool,
    ) -> Self {
        Self {
            client,
            checks,
            max_attempts,
            max_continuations,
            continuation_counts_as_attempt,
        }
    }

    /// Runs the loop to a terminal state.
    ///
    /// Attempts are strictly ordered; attempt N's prompt embeds attempt
    /// N-1's failing checks. LLM transport failures (after the client's
    /// own bounded retries) count against the attempt budget.
    pub async fn run(
        &self,
        submission: &TaskSubmission,
        attachments: &[MaterializedFile],
        prior_instructions: Option<&str>,
    ) -> Result<LoopOutcome, GenerationError> {
        let mut attempts = 0u32;
        let mut best_files: Vec<GeneratedFile> = Vec::new();
        let mut best_commit_message: Option<String> = None;
        let mut last_failures: Vec<CheckResult> = Vec::new();

        loop {
            attempts += 1;

            let user_prompt = if last_failures.is_empty() {
                prompts::draft_prompt(submission, attachments, prior_instructions)
            } else {
                prompts::repair_prompt(submission, &last_failures, &best_files)
            };

            let messages = vec![
                Message::system(prompts::SYSTEM_PROMPT),
                Message::user(user_prompt),
            ];

            debug!(task = %submission.task, attempt = attempts, "Drafting");
            let text = match complete_full(self.client, messages, self.max_continuations).await {
                Ok((text, continuations)) => {
                    if self.continuation_counts_as_attempt && continuations > 0 {
                        attempts = attempts.saturating_add(continuations);
                        if attempts > self.max_attempts {
                            // The draft did assemble; it is still the
                            // best-so-far file set.
                            let parsed = parse_file_response(&text);
                            if !parsed.files.is_empty() {
                                best_files = parsed.files;
                                best_commit_message = parsed.commit_message;
                            }
                            warn!(
                                task = %submission.task,
                                attempts = attempts,
                                "Continuations consumed the attempt budget"
                            );
                            return Ok(LoopOutcome::Exhausted {
                                reason: ExhaustionReason::AttemptBudgetExceeded,
                                files: best_files,
                                commit_message: best_commit_message,
                                attempts,
                            });
                        }
                    }
                    text
                }
                Err(GenerationError::ContinuationBudget(budget)) => {
                    warn!(
                        task = %submission.task,
                        attempt = attempts,
                        budget = budget,
                        "Draft exhausted the continuation budget"
                    );
                    return Ok(LoopOutcome::Exhausted {
                        reason: ExhaustionReason::ContinuationBudgetExceeded,
                        files: best_files,
                        commit_message: best_commit_message,
                        attempts,
                    });
                }
                Err(GenerationError::Llm(err)) => {
                    // Transport retries are already exhausted inside the
                    // client; this failure consumes an attempt.
                    warn!(
                        task = %submission.task,
                        attempt = attempts,
                        error = %err,
                        "LLM call failed; counting as a failed attempt"
                    );
                    last_failures = vec![CheckResult::fail("llm", err.to_string())];
                    if attempts >= self.max_attempts {
                        return Ok(LoopOutcome::Exhausted {
                            reason: ExhaustionReason::AttemptBudgetExceeded,
                            files: best_files,
                            commit_message: best_commit_message,
                            attempts,
                        });
                    }
                    continue;
                }
                Err(other) => return Err(other),
            };

            let parsed = parse_file_response(&text);
            if !parsed.files.is_empty() {
                best_files = parsed.files.clone();
                best_commit_message = parsed.commit_message.clone();
            }

            let results = self.checks.run_checks(&submission.checks, &parsed.files).await;
            let failures: Vec<CheckResult> =
                results.into_iter().filter(|r| !r.passed).collect();

            if failures.is_empty() {
                info!(task = %submission.task, attempts = attempts, "All checks passed");
                return Ok(LoopOutcome::Passed {
                    files: best_files,
                    commit_message: best_commit_message,
                    attempts,
                });
            }

            debug!(
                task = %submission.task,
                attempt = attempts,
                failing = failures.len(),
                "Checks failed, entering repair"
            );

            if attempts >= self.max_attempts {
                warn!(
                    task = %submission.task,
                    attempts = attempts,
                    "Attempt budget exhausted, returning best-so-far file set"
                );
                return Ok(LoopOutcome::Exhausted {
                    reason: ExhaustionReason::AttemptBudgetExceeded,
                    files: best_files,
                    commit_message: best_commit_message,
                    attempts,
                });
            }

            last_failures = failures;
        }
    }
}
