//! Task orchestration pipeline.
//!
//! `submit` validates a submission, registers its identity and spawns
//! the pipeline, returning immediately. The pipeline provisions the
//! repository, runs the round handler, publishes the result and
//! reports the terminal outcome to the evaluation endpoint. Duplicate
//! identities are rejected before any remote side effect; distinct
//! identities run in parallel under a global concurrency bound.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::attachments::{materialize, MaterializedFile};
use crate::config::OrchestratorConfig;
use crate::error::{NotifyError, OrchestratorError};
use crate::generation::{CheckRunner, LoopOutcome, RepairLoop};
use crate::hosting::{GitClient, RepoHost, RepositoryHandle};
use crate::llm::CompletionClient;
use crate::notify::{EvaluationNotifier, EvaluationPayload};
use crate::provision::Provisioner;
use crate::publish::Publisher;
use crate::rounds::{self, RoundHandler};
use crate::task::{TaskIdentity, TaskOutcome, TaskSubmission};

/// Counters accumulated over the orchestrator's lifetime.
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl OrchestratorStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Mutable state the pipeline accumulates, kept outside the step
/// results so failure notifications can still carry repository details.
#[derive(Default)]
struct PipelineState {
    handle: Option<RepositoryHandle>,
    commit_sha: Option<String>,
}

/// The task orchestration engine.
pub struct Orchestrator {
    config: OrchestratorConfig,
    host: Arc<dyn RepoHost>,
    llm: Arc<dyn CompletionClient>,
    checks: Arc<dyn CheckRunner>,
    provisioner: Arc<Provisioner>,
    publisher: Arc<Publisher>,
    notifier: Arc<EvaluationNotifier>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<TaskIdentity>>>,
    completed: Arc<Mutex<HashSet<TaskIdentity>>>,
    /// One async lock per repository name: pipelines for the same task
    /// share a working tree and must not interleave between provision
    /// and publish.
    tree_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    stats: Arc<OrchestratorStats>,
}

impl Orchestrator {
    /// Wires the orchestrator from its collaborators and configuration.
    pub fn new(
        config: OrchestratorConfig,
        host: Arc<dyn RepoHost>,
        llm: Arc<dyn CompletionClient>,
        checks: Arc<dyn CheckRunner>,
    ) -> Result<Self, NotifyError> {
        let git = GitClient::new(
            config.commit_author_name.clone(),
            config.commit_author_email.clone(),
            config.default_branch.clone(),
        );
        let provisioner = Arc::new(Provisioner::new(
            host.clone(),
            git.clone(),
            config.base_dir.clone(),
            config.max_name_attempts,
        ));
        let publisher = Arc::new(Publisher::new(git));
        let notifier = Arc::new(EvaluationNotifier::new(
            config.notify_max_retries,
            config.notify_base_delay,
            config.notify_timeout,
        )?);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));

        Ok(Self {
            config,
            host,
            llm,
            checks,
            provisioner,
            publisher,
            notifier,
            semaphore,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            completed: Arc::new(Mutex::new(HashSet::new())),
            tree_locks: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(OrchestratorStats::default()),
        })
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    /// Number of pipelines currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in-flight lock").len()
    }

    /// Accepts a submission and spawns its pipeline.
    ///
    /// Validation and round classification happen before any side
    /// effect; a rejected submission never touches the host. Accepted
    /// submissions return `AcceptedPending` immediately and resolve to
    /// a terminal outcome through the evaluation notification.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSubmission` when the identity is already in
    /// flight or already completed during this process lifetime.
    pub fn submit(
        self: &Arc<Self>,
        submission: TaskSubmission,
    ) -> Result<TaskOutcome, OrchestratorError> {
        submission.validate()?;
        RoundHandler::for_round(submission.round)?;

        let identity = submission.identity();
        {
            let completed = self.completed.lock().expect("completed lock");
            let mut in_flight = self.in_flight.lock().expect("in-flight lock");
            if completed.contains(&identity) || !in_flight.insert(identity.clone()) {
                return Err(OrchestratorError::DuplicateSubmission(identity.to_string()));
            }
        }

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        info!(identity = %identity, "Accepted task submission");

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = orchestrator
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            orchestrator.run_pipeline(submission).await;
        });

        Ok(TaskOutcome::AcceptedPending)
    }

    async fn run_pipeline(&self, submission: TaskSubmission) {
        let identity = submission.identity();
        let mut state = PipelineState::default();

        let outcome = match self.execute(&submission, &mut state).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(identity = %identity, error = %err, "Pipeline failed");
                TaskOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };

        match &outcome {
            TaskOutcome::Success { .. } => {
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        let payload = self.build_payload(&submission, &outcome, &state);
        if let Err(err) = self.notifier.notify(&submission.evaluation_url, &payload).await {
            // A push that already happened stands regardless.
            warn!(identity = %identity, error = %err, "Evaluation notification failed");
        }

        {
            // Same lock order as submit.
            let mut completed = self.completed.lock().expect("completed lock");
            let mut in_flight = self.in_flight.lock().expect("in-flight lock");
            in_flight.remove(&identity);
            completed.insert(identity.clone());
        }

        info!(identity = %identity, outcome = %outcome, "Pipeline finished");
    }

    /// The working-tree lock for the repository this submission maps to.
    ///
    /// Keyed by the deterministic base name so all rounds and nonces of
    /// one task contend on the same lock.
    fn tree_lock(&self, submission: &TaskSubmission) -> Arc<tokio::sync::Mutex<()>> {
        let key = Provisioner::base_name(&submission.email, &submission.task);
        self.tree_locks
            .lock()
            .expect("tree lock map")
            .entry(key)
            .or_default()
            .clone()
    }

    async fn execute(
        &self,
        submission: &TaskSubmission,
        state: &mut PipelineState,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let handler = RoundHandler::for_round(submission.round)?;

        // Undecodable attachments abort before the repository exists.
        let attachments = materialize(&submission.attachments, self.config.attachment_policy)?;

        // Held through publish so another nonce for the same task cannot
        // replace the clone this pipeline is committing in.
        let tree_lock = self.tree_lock(submission);
        let _tree_guard = tree_lock.lock().await;

        let handle = self.provisioner.provision(submission).await?;
        state.handle = Some(handle.clone());

        let (commit_message, exhaustion) = match handler {
            RoundHandler::Scaffold => {
                rounds::write_scaffold(&handle.local_path, submission, &attachments)
                    .await
                    .map_err(crate::error::PublishError::Io)?;
                (format!("Set up task {}", submission.task), None)
            }
            RoundHandler::Generation => {
                self.run_generation(submission, &attachments, &handle).await?
            }
        };

        let push_url = self.host.push_url(&handle.remote);
        state.commit_sha = self
            .publisher
            .publish(&handle, &push_url, &commit_message)
            .await?;

        if let Some(reason) = exhaustion {
            return Ok(TaskOutcome::Failed { reason });
        }

        Ok(TaskOutcome::Success {
            repo_name: handle.remote.name.clone(),
            commit: state.commit_sha.clone(),
        })
    }

    /// Runs the generation round and writes the resulting file set.
    ///
    /// Returns the commit message and, when a budget ran out, the
    /// human-readable failure reason. An exhausted loop still writes
    /// and publishes its best-so-far file set.
    async fn run_generation(
        &self,
        submission: &TaskSubmission,
        attachments: &[MaterializedFile],
        handle: &RepositoryHandle,
    ) -> Result<(String, Option<String>), OrchestratorError> {
        let prior_instructions = rounds::read_prior_instructions(&handle.local_path);

        // Attachments land in the tree as well as in the prompt.
        rounds::write_attachments(&handle.local_path, attachments)
            .await
            .map_err(crate::error::PublishError::Io)?;

        let looper = RepairLoop::new(
            self.llm.as_ref(),
            self.checks.as_ref(),
            self.config.max_attempts,
            self.config.max_continuations,
            self.config.continuation_counts_as_attempt,
        );
        let outcome = looper
            .run(submission, attachments, prior_instructions.as_deref())
            .await?;

        rounds::write_generated(&handle.local_path, outcome.files())
            .await
            .map_err(crate::error::PublishError::Io)?;

        let default_message = format!("Generate task files (round {})", submission.round);
        let commit_message = outcome
            .commit_message()
            .map(str::to_string)
            .unwrap_or(default_message);

        let exhaustion = match &outcome {
            LoopOutcome::Passed { .. } => None,
            LoopOutcome::Exhausted { reason, attempts, .. } => Some(format!(
                "generation gave up after {} attempts: {}",
                attempts, reason
            )),
        };

        Ok((commit_message, exhaustion))
    }

    fn build_payload(
        &self,
        submission: &TaskSubmission,
        outcome: &TaskOutcome,
        state: &PipelineState,
    ) -> EvaluationPayload {
        let (repo_name, repo_url, repo_path) = match &state.handle {
            Some(handle) => (
                Some(handle.remote.name.clone()),
                Some(handle.remote.url.clone()),
                Some(format!("{}/{}", handle.remote.owner, handle.remote.name)),
            ),
            None => (None, None, None),
        };

        let reason = match outcome {
            TaskOutcome::Failed { reason } => Some(reason.clone()),
            _ => None,
        };

        EvaluationPayload {
            status: outcome.status_str().to_string(),
            task: submission.task.clone(),
            round: submission.round,
            nonce: submission.nonce.clone(),
            repo_name,
            repo_url,
            repo_path,
            commit_sha: state.commit_sha.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HostError, LlmError};
    use crate::generation::BasicChecks;
    use crate::hosting::RemoteRepo;
    use crate::llm::{Completion, Message};
    use async_trait::async_trait;
    use std::path::Path;
    use std::process::Command as StdCommand;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Host backed by real local bare repositories, one per name.
    struct LocalHost {
        root: std::path::PathBuf,
        repos: Mutex<HashSet<String>>,
    }

    impl LocalHost {
        fn new(root: &Path) -> Self {
            Self {
                root: root.to_path_buf(),
                repos: Mutex::new(HashSet::new()),
            }
        }

        fn bare_path(&self, name: &str) -> std::path::PathBuf {
            self.root.join(format!("{}.git", name))
        }

        fn remote(&self, name: &str) -> RemoteRepo {
            RemoteRepo {
                name: name.to_string(),
                owner: "local".to_string(),
                url: format!("https://example.com/local/{}", name),
                clone_url: self.bare_path(name).to_string_lossy().into_owned(),
            }
        }
    }

    #[async_trait]
    impl RepoHost for LocalHost {
        async fn create_repository(
            &self,
            name: &str,
            _description: &str,
        ) -> Result<RemoteRepo, HostError> {
            let mut repos = self.repos.lock().unwrap();
            if !repos.insert(name.to_string()) {
                return Err(HostError::NameTaken(name.to_string()));
            }
            let status = StdCommand::new("git")
                .args(["init", "--bare", "--initial-branch=main"])
                .arg(self.bare_path(name))
                .status()
                .expect("git init --bare");
            assert!(status.success());
            Ok(self.remote(name))
        }

        async fn repository_exists(&self, name: &str) -> Result<bool, HostError> {
            Ok(self.repos.lock().unwrap().contains(name))
        }

        async fn get_repository(&self, name: &str) -> Result<Option<RemoteRepo>, HostError> {
            if self.repos.lock().unwrap().contains(name) {
                Ok(Some(self.remote(name)))
            } else {
                Ok(None)
            }
        }
    }

    /// LLM client that returns a fixed response and counts calls; can
    /// optionally block until released so tests can observe in-flight
    /// state.
    struct TestLlm {
        response: String,
        calls: AtomicU64,
        gate: Option<Arc<Notify>>,
    }

    impl TestLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicU64::new(0),
                gate: None,
            }
        }

        fn gated(response: &str, gate: Arc<Notify>) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicU64::new(0),
                gate: Some(gate),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for TestLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<Completion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(Completion {
                text: self.response.clone(),
                truncated: false,
            })
        }
    }

    fn generation_response() -> String {
        "<files>\n<file path=\"index.html\"><![CDATA[<h1>Portfolio</h1>]]></file>\n\
         <file path=\"commit_message\"><![CDATA[Add portfolio landing page]]></file>\n</files>"
            .to_string()
    }

    fn submission(round: u32, nonce: &str) -> TaskSubmission {
        TaskSubmission {
            email: "s@example.com".to_string(),
            task: "portfolio-app".to_string(),
            round,
            nonce: nonce.to_string(),
            brief: "Build a portfolio website".to_string(),
            checks: vec!["index.html".to_string()],
            evaluation_url: "http://127.0.0.1:9".to_string(),
            attachments: Vec::new(),
        }
    }

    fn orchestrator(tmp: &TempDir, llm: Arc<dyn CompletionClient>) -> Arc<Orchestrator> {
        let host = Arc::new(LocalHost::new(&tmp.path().join("remotes")));
        std::fs::create_dir_all(tmp.path().join("remotes")).expect("remotes dir");
        let config = OrchestratorConfig::new()
            .with_base_dir(tmp.path().join("clones"))
            .with_notify_max_retries(0);
        Arc::new(
            Orchestrator::new(config, host, llm, Arc::new(BasicChecks)).expect("orchestrator"),
        )
    }

    async fn release_and_wait(orchestrator: &Orchestrator, gate: &Notify) {
        for _ in 0..500 {
            if orchestrator.in_flight_count() == 0 {
                return;
            }
            gate.notify_waiters();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("gated pipeline did not finish");
    }

    async fn wait_idle(orchestrator: &Orchestrator) {
        for _ in 0..500 {
            if orchestrator.in_flight_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("pipeline did not finish");
    }

    #[tokio::test]
    async fn test_round_one_scaffolds_without_llm() {
        let tmp = TempDir::new().expect("tempdir");
        let llm = Arc::new(TestLlm::new("unused"));
        let orch = orchestrator(&tmp, llm.clone());

        let mut sub = submission(1, "n1");
        sub.attachments.push(crate::task::Attachment {
            name: "notes.txt".to_string(),
            url: "data:text/plain,dark mode please".to_string(),
        });

        let outcome = orch.submit(sub).expect("submit");
        assert_eq!(outcome, TaskOutcome::AcceptedPending);
        wait_idle(&orch).await;

        // Scaffolding never consults the model.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        assert_eq!(orch.stats().succeeded(), 1);

        // The pushed tree carries the scaffold artifacts.
        let base = Provisioner::base_name("s@example.com", "portfolio-app");
        let git = GitClient::new("t", "t@t", "main");
        let verify = tmp.path().join("verify");
        let bare = tmp.path().join("remotes").join(format!("{}.git", base));
        git.clone_repo(&bare.to_string_lossy(), &verify)
            .await
            .expect("clone");
        assert!(verify.join("instructions.txt").exists());
        assert!(verify.join("LICENSE").exists());
        let notes = std::fs::read_to_string(verify.join("notes.txt")).expect("attachment");
        assert_eq!(notes, "dark mode please");
    }

    #[tokio::test]
    async fn test_generation_round_builds_on_scaffold() {
        let tmp = TempDir::new().expect("tempdir");
        let llm = Arc::new(TestLlm::new(&generation_response()));
        let orch = orchestrator(&tmp, llm.clone());

        orch.submit(submission(1, "n1")).expect("round 1");
        wait_idle(&orch).await;

        let mut round2 = submission(2, "n2");
        round2.attachments.push(crate::task::Attachment {
            name: "palette.txt".to_string(),
            url: "data:text/plain,navy and gold".to_string(),
        });
        orch.submit(round2).expect("round 2");
        wait_idle(&orch).await;

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.stats().succeeded(), 2);

        let base = Provisioner::base_name("s@example.com", "portfolio-app");
        let git = GitClient::new("t", "t@t", "main");
        let verify = tmp.path().join("verify");
        let bare = tmp.path().join("remotes").join(format!("{}.git", base));
        git.clone_repo(&bare.to_string_lossy(), &verify)
            .await
            .expect("clone");
        assert!(verify.join("index.html").exists());
        // Round 1 artifacts survive the generation round.
        assert!(verify.join("instructions.txt").exists());
        assert!(verify.join("LICENSE").exists());
        // The round 2 attachment is pushed alongside the generated files.
        let palette = std::fs::read_to_string(verify.join("palette.txt")).expect("attachment");
        assert_eq!(palette, "navy and gold");
    }

    #[tokio::test]
    async fn test_same_task_pipelines_serialize_on_working_tree() {
        let tmp = TempDir::new().expect("tempdir");
        let gate = Arc::new(Notify::new());
        let llm = Arc::new(TestLlm::gated(&generation_response(), gate.clone()));
        let orch = orchestrator(&tmp, llm.clone());

        orch.submit(submission(1, "n1")).expect("round 1");
        wait_idle(&orch).await;

        // Two generation submissions for the same task share one clone
        // directory; the second must wait for the first to publish.
        orch.submit(submission(2, "n2")).expect("first");
        orch.submit(submission(3, "n3")).expect("second");

        for _ in 0..500 {
            if llm.calls.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The second pipeline is parked on the tree lock, not the model.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.in_flight_count(), 2);

        release_and_wait(&orch, &gate).await;
        assert_eq!(orch.stats().succeeded(), 3);
        assert_eq!(orch.stats().failed(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected_while_in_flight() {
        let tmp = TempDir::new().expect("tempdir");
        let gate = Arc::new(Notify::new());
        let llm = Arc::new(TestLlm::gated(&generation_response(), gate.clone()));
        let orch = orchestrator(&tmp, llm);

        orch.submit(submission(1, "n1")).expect("round 1");
        wait_idle(&orch).await;

        orch.submit(submission(2, "n2")).expect("first");
        let err = orch.submit(submission(2, "n2")).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateSubmission(_)));

        // Keep notifying until the gated pipeline reaches its await and
        // drains.
        release_and_wait(&orch, &gate).await;

        // A completed identity stays rejected for the process lifetime.
        let err = orch.submit(submission(2, "n2")).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateSubmission(_)));

        // A fresh nonce is a new submission.
        orch.submit(submission(2, "n3")).expect("new nonce");
        release_and_wait(&orch, &gate).await;
    }

    #[tokio::test]
    async fn test_invalid_submission_rejected_without_side_effects() {
        let tmp = TempDir::new().expect("tempdir");
        let orch = orchestrator(&tmp, Arc::new(TestLlm::new("unused")));

        let mut bad = submission(1, "n1");
        bad.brief = String::new();
        assert!(orch.submit(bad).is_err());

        let zero_round = submission(0, "n2");
        assert!(orch.submit(zero_round).is_err());

        assert_eq!(orch.stats().submitted(), 0);
        assert_eq!(orch.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_generation_round_without_repository_fails() {
        let tmp = TempDir::new().expect("tempdir");
        let orch = orchestrator(&tmp, Arc::new(TestLlm::new(&generation_response())));

        // Round 2 with no round 1: provisioning must not create anything.
        orch.submit(submission(2, "n1")).expect("accepted");
        wait_idle(&orch).await;

        assert_eq!(orch.stats().failed(), 1);
        let remotes = std::fs::read_dir(tmp.path().join("remotes"))
            .expect("read dir")
            .count();
        assert_eq!(remotes, 0);
    }
}
