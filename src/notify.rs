//! Evaluation webhook delivery.
//!
//! Terminal outcomes, success and failure alike, are reported to the
//! submission's evaluation URL. Delivery is retried with bounded
//! exponential backoff; a delivery that still fails after the last
//! retry is logged by the caller and never reverts a push.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::NotifyError;

/// Payload posted to the evaluation endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationPayload {
    /// Terminal status, `"success"` or `"failed"`.
    pub status: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    /// `owner/name` slug of the repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    /// Human-readable failure reason, absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Client for the evaluation callback.
pub struct EvaluationNotifier {
    http_client: reqwest::Client,
    max_retries: u32,
    base_delay: Duration,
}

impl EvaluationNotifier {
    /// Creates a notifier with the given retry budget and request timeout.
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        Ok(Self {
            http_client,
            max_retries,
            base_delay,
        })
    }

    /// Delivers the payload, retrying transient failures with
    /// exponential backoff.
    pub async fn notify(
        &self,
        evaluation_url: &str,
        payload: &EvaluationPayload,
    ) -> Result<(), NotifyError> {
        let mut last_error = NotifyError::Request("no attempts made".to_string());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying notification");
                tokio::time::sleep(delay).await;
            }

            match self.try_notify(evaluation_url, payload).await {
                Ok(()) => {
                    debug!(url = evaluation_url, status = %payload.status, "Delivered evaluation notification");
                    return Ok(());
                }
                // 4xx responses are permanent; retrying cannot help.
                Err(NotifyError::Status(code)) if (400..500).contains(&code) => {
                    return Err(NotifyError::Status(code));
                }
                Err(err) => {
                    warn!(url = evaluation_url, attempt, error = %err, "Notification attempt failed");
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    async fn try_notify(
        &self,
        evaluation_url: &str,
        payload: &EvaluationPayload,
    ) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(evaluation_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}
