//! OpenAI-compatible completion client with continuation support.
//!
//! Transport failures are retried a small bounded number of times with
//! exponential backoff before surfacing to the generation loop. Server-side
//! truncation is reported through [`Completion::truncated`]; the
//! continuation loop in [`complete_full`] concatenates follow-up output
//! within a configured continuation budget.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GenerationError, LlmError};

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Prompt used to resume a truncated response.
const CONTINUATION_PROMPT: &str = "Please continue exactly where you left off.";

/// A message in a conversation with the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// One completion chunk from the service.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Whether the service truncated the output at its token limit.
    pub truncated: bool,
}

/// Trait for LLM services that can generate text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a completion for the given conversation.
    async fn complete(&self, messages: &[Message]) -> Result<Completion, LlmError>;
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct OpenAiClient {
    api_base: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
    http_client: Client,
}

impl OpenAiClient {
    /// Creates a new client with explicit configuration.
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_output_tokens: u32,
        request_timeout: Duration,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_output_tokens,
            http_client: Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `LLM_API_BASE`: API base URL (required)
    /// - `LLM_API_KEY`: bearer token (required)
    /// - `LLM_MODEL`: model name (defaults to "gpt-4o-mini")
    /// - `LLM_MAX_OUTPUT_TOKENS`: output token cap (defaults to 8192)
    /// - `LLM_REQUEST_TIMEOUT_SECS`: per-request timeout (defaults to 120)
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("LLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("LLM_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let max_output_tokens = env::var("LLM_MAX_OUTPUT_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8192);
        let timeout_secs = env::var("LLM_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        Ok(Self::new(
            api_base,
            api_key,
            model,
            max_output_tokens,
            Duration::from_secs(timeout_secs),
        ))
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Execute a request with exponential backoff retry logic.
    async fn execute_with_retry(&self, request: &ApiRequest<'_>) -> Result<Completion, LlmError> {
        let mut last_error = None;
        let url = format!("{}/chat/completions", self.api_base);

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                debug!(
                    attempt = attempt + 1,
                    delay_ms = delay_ms,
                    "Retrying LLM request after transient failure"
                );
            }

            match self.execute_request(&url, request).await {
                Ok(completion) => return Ok(completion),
                Err(err) => {
                    if is_transient_error(&err) {
                        warn!(
                            attempt = attempt + 1,
                            max_retries = MAX_RETRIES,
                            error = %err,
                            "Transient LLM error, will retry"
                        );
                        last_error = Some(err);
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LlmError::RequestFailed("Max retries exceeded with no error captured".to_string())
        }))
    }

    /// Execute a single request (no retry logic).
    async fn execute_request(
        &self,
        url: &str,
        request: &ApiRequest<'_>,
    ) -> Result<Completion, LlmError> {
        let http_response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                if status_code == 429 {
                    return Err(LlmError::RateLimited(error_response.error.message));
                }
                return Err(LlmError::ApiError {
                    code: status_code,
                    message: error_response.error.message,
                });
            }

            return Err(LlmError::ApiError {
                code: status_code,
                message: error_text,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("Response contained no choices".to_string()))?;

        let finish_reason = choice.finish_reason.unwrap_or_else(|| "stop".to_string());

        Ok(Completion {
            text: choice.message.content,
            truncated: finish_reason == "length",
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, LlmError> {
        let request = ApiRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_output_tokens,
        };
        self.execute_with_retry(&request).await
    }
}

/// Drives a completion to its natural end, requesting continuations for
/// truncated responses.
///
/// Returns the concatenated text and the number of continuation calls
/// consumed. Exceeding `max_continuations` surfaces
/// `GenerationError::ContinuationBudget`.
pub async fn complete_full(
    client: &dyn CompletionClient,
    mut messages: Vec<Message>,
    max_continuations: u32,
) -> Result<(String, u32), GenerationError> {
    let mut full_text = String::new();
    let mut continuations = 0u32;

    loop {
        let completion = client.complete(&messages).await.map_err(GenerationError::Llm)?;
        full_text.push_str(&completion.text);

        if !completion.truncated {
            return Ok((full_text, continuations));
        }

        if continuations >= max_continuations {
            warn!(
                continuations = continuations,
                "LLM response still truncated after exhausting continuation budget"
            );
            return Err(GenerationError::ContinuationBudget(max_continuations));
        }

        continuations += 1;
        debug!(continuation = continuations, "Requesting LLM continuation");
        messages.push(Message::assistant(completion.text));
        messages.push(Message::user(CONTINUATION_PROMPT));
    }
}

/// Whether an error is worth retrying at the transport level.
fn is_transient_error(err: &LlmError) -> bool {
    match err {
        LlmError::RequestFailed(_) | LlmError::RateLimited(_) => true,
        LlmError::ApiError { code, .. } => *code >= 500,
        _ => false,
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
