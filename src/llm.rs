//! Text-understanding service boundary.
//!
//! The mood parser and the rationale generator only see the [`TextService`]
//! trait: prompt in, JSON object out, or a [`ServiceError`]. Callers never
//! trust the JSON; they validate it into their own types and fall back to
//! deterministic logic on any error.
//!
//! [`OpenAiClient`] talks to any OpenAI-compatible chat completions endpoint.
//! [`Unavailable`] is used for offline runs and when no API key is configured.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default deadline for a single service call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call options.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// Sampling temperature (0.0 = deterministic).
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Hard deadline for the whole call.
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl CompletionOptions {
    /// These options with the timeout cut to what is left of `deadline`.
    /// `None` once the deadline has passed.
    #[must_use]
    pub fn within(&self, deadline: &Deadline) -> Option<Self> {
        let remaining = deadline.remaining()?;
        Some(Self {
            timeout: self.timeout.min(remaining),
            ..self.clone()
        })
    }
}

/// Time budget shared by every text-service call of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }

    /// Time left, or `None` when nothing is.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }
}

/// Failures of the external text service. Never surfaced to pipeline callers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("text service unavailable")]
    Unavailable,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited")]
    RateLimited,

    #[error("request timeout")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Prompt-in, JSON-out text understanding.
pub trait TextService: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Send a system + user prompt pair and return the decoded JSON object.
    ///
    /// # Errors
    ///
    /// Any transport, status or decoding failure.
    fn complete_json(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<Value, ServiceError>;
}

/// A service that always fails with [`ServiceError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl TextService for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn complete_json(&self, _: &str, _: &str, _: &CompletionOptions) -> Result<Value, ServiceError> {
        Err(ServiceError::Unavailable)
    }
}

/// OpenAI-compatible chat completions client backed by `ureq`.
pub struct OpenAiClient {
    http_client: ureq::Agent,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// # Arguments
    /// * `base_url` - e.g. `https://api.openai.com/v1`
    /// * `model` - e.g. `gpt-4o-mini`
    /// * `api_key` - bearer token, if the endpoint needs one
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .build();

        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        }
    }
}

impl TextService for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete_json(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<Value, ServiceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        debug!(
            "Sending completion request to {} (model {}, timeout {:?})",
            url, self.model, options.timeout
        );

        let mut call = self.http_client.post(&url).timeout(options.timeout);
        if let Some(key) = &self.api_key {
            call = call.set("Authorization", &format!("Bearer {key}"));
        }

        let response = call.send_json(&request).map_err(|err| classify_failure(&err))?;
        let body: ChatResponse = response.into_json().map_err(|err| {
            if is_io_timeout(&err) {
                ServiceError::Timeout
            } else {
                ServiceError::InvalidResponse(format!("failed to decode completion: {err}"))
            }
        })?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::InvalidResponse("no choices in completion".to_string()))?;

        extract_json(&content)
    }
}

fn classify_failure(error: &ureq::Error) -> ServiceError {
    match error {
        ureq::Error::Status(code, _) => classify_status(*code, &error.to_string()),
        ureq::Error::Transport(transport) => {
            let lowered = transport.to_string().to_ascii_lowercase();
            if lowered.contains("timed out") || lowered.contains("timeout") {
                ServiceError::Timeout
            } else {
                warn!("Text service transport failure: {transport}");
                ServiceError::Connection(transport.to_string())
            }
        }
    }
}

fn classify_status(code: u16, message: &str) -> ServiceError {
    match code {
        429 => ServiceError::RateLimited,
        408 | 504 => ServiceError::Timeout,
        _ => ServiceError::Api { status: code, message: message.to_string() },
    }
}

fn is_io_timeout(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    ) || error.to_string().to_ascii_lowercase().contains("timed out")
}

/// Decode the JSON object in a completion, tolerating markdown code fences
/// and chatter around the object.
///
/// # Errors
///
/// [`ServiceError::InvalidResponse`] when no JSON object can be decoded.
pub fn extract_json(content: &str) -> Result<Value, ServiceError> {
    let trimmed = content.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');

    let candidate = match (start, end) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(ServiceError::InvalidResponse("no JSON object in completion".to_string())),
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(ServiceError::InvalidResponse("completion is not a JSON object".to_string())),
        Err(err) => Err(ServiceError::InvalidResponse(format!("malformed JSON: {err}"))),
    }
}

// OpenAI wire types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
