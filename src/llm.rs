//! Chat-completions client shared by the notes and LaTeX steps.
//!
//! Intentionally thin: all prompt engineering lives in [`crate::prompts`]
//! so it can change without touching retry or error-handling logic here.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx errors from LLM APIs are transient and frequent.
//! Exponential backoff (`retry_backoff_ms * 2^attempt`) avoids hammering a
//! recovering endpoint: with 500 ms base and 3 retries the wait sequence is
//! 500 ms → 1 s → 2 s, under 4 s of back-off per call. Authentication and
//! 4xx errors are not retried — they surface immediately.

use crate::config::PipelineConfig;
use crate::error::Talk2PdfError;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl ChatClient {
    /// Build a client from the config, resolving the API key from the
    /// config field or the `OPENROUTER_API_KEY` environment variable.
    pub fn new(config: &PipelineConfig) -> Result<Self, Talk2PdfError> {
        let api_key = config
            .openrouter_api_key
            .clone()
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or(Talk2PdfError::ApiKeyMissing {
                var: "OPENROUTER_API_KEY",
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| Talk2PdfError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// Run one system+user completion, retrying transient failures.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, Talk2PdfError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature: self.temperature,
        };

        let mut last_err: Option<String> = None;
        let mut rate_limited = false;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Chat API retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let response = self
                .http
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!("Chat API returned {status}, will retry");
                        rate_limited = status.as_u16() == 429;
                        last_err = Some(format!("HTTP {status}"));
                        continue;
                    }
                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Talk2PdfError::LlmApi {
                            message: format!("HTTP {status}: {}", truncate(&body, 300)),
                        });
                    }

                    let parsed: ChatResponse =
                        resp.json().await.map_err(|e| Talk2PdfError::LlmApi {
                            message: format!("Malformed response body: {e}"),
                        })?;

                    if let Some(usage) = &parsed.usage {
                        debug!("Chat completion used {} tokens ({})", usage.total_tokens, self.model);
                    }

                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or(Talk2PdfError::LlmApi {
                            message: "Response contained no choices".to_string(),
                        });
                }
                Err(e) => {
                    // Timeouts and connection resets are worth retrying;
                    // anything else likely repeats identically.
                    warn!("Chat API attempt {} failed: {e}", attempt + 1);
                    last_err = Some(e.to_string());
                    if !(e.is_timeout() || e.is_connect() || e.is_request()) {
                        break;
                    }
                }
            }
        }

        if rate_limited {
            return Err(Talk2PdfError::RateLimitExceeded {
                service: "chat completions".to_string(),
            });
        }
        Err(Talk2PdfError::LlmApi {
            message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
