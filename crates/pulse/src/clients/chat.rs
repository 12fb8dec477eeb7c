//! Client for OpenAI-compatible chat-completion endpoints.
//!
//! Enrichment, classification and logic-graph generation all go through the [`LanguageModel`]
//! trait, so the pipeline can run against any endpoint that speaks the `/chat/completions`
//! protocol, or against an in-process double in tests.
//!
//! # Examples
//!
//! ```no_run
//! use pulse::{
//!   clients::{ChatClient, ChatRequest, LanguageModel},
//!   config::LlmConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LlmConfig { api_key: "sk-...".to_string(), ..LlmConfig::default() };
//! let client = ChatClient::new(&config)?;
//!
//! let request = ChatRequest::new("qwen-plus").user("Translate: Quantum sensing").temperature(0.3);
//! let completion = client.complete(&request).await?;
//! println!("{}", completion.content);
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::*;
use crate::config::LlmConfig;

/// A chat model the pipeline can send instructions to.
#[async_trait]
pub trait LanguageModel: Send + Sync {
  /// Sends one request and waits for the complete answer.
  async fn complete(&self, request: &ChatRequest) -> Result<Completion, PulseError>;
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  /// `system`, `user` or `assistant`
  pub role:    String,
  /// Message text
  pub content: String,
}

impl Message {
  /// A system instruction.
  pub fn system(content: impl Into<String>) -> Self {
    Self { role: "system".to_string(), content: content.into() }
  }

  /// A user turn.
  pub fn user(content: impl Into<String>) -> Self {
    Self { role: "user".to_string(), content: content.into() }
  }
}

/// Requested output format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
  /// Format name, e.g. `json_object`
  #[serde(rename = "type")]
  pub kind: String,
}

/// Body of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
  /// Model name
  pub model:           String,
  /// Conversation so far
  pub messages:        Vec<Message>,
  /// Sampling temperature
  #[serde(skip_serializing_if = "Option::is_none")]
  pub temperature:     Option<f32>,
  /// Upper bound on generated tokens
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_tokens:      Option<u32>,
  /// Structured output request
  #[serde(skip_serializing_if = "Option::is_none")]
  pub response_format: Option<ResponseFormat>,
  /// Provider extension that lets the model search the web before answering
  #[serde(skip_serializing_if = "Option::is_none")]
  pub enable_search:   Option<bool>,
}

impl ChatRequest {
  /// An empty request for `model`.
  pub fn new(model: impl Into<String>) -> Self {
    Self {
      model:           model.into(),
      messages:        Vec::new(),
      temperature:     None,
      max_tokens:      None,
      response_format: None,
      enable_search:   None,
    }
  }

  /// Appends a system message.
  pub fn system(mut self, content: impl Into<String>) -> Self {
    self.messages.push(Message::system(content));
    self
  }

  /// Appends a user message.
  pub fn user(mut self, content: impl Into<String>) -> Self {
    self.messages.push(Message::user(content));
    self
  }

  /// Sets the sampling temperature.
  pub fn temperature(mut self, temperature: f32) -> Self {
    self.temperature = Some(temperature);
    self
  }

  /// Caps the answer length.
  pub fn max_tokens(mut self, max_tokens: u32) -> Self {
    self.max_tokens = Some(max_tokens);
    self
  }

  /// Asks for a JSON object answer.
  pub fn json_output(mut self) -> Self {
    self.response_format = Some(ResponseFormat { kind: "json_object".to_string() });
    self
  }

  /// Lets the model search the web.
  pub fn with_search(mut self) -> Self {
    self.enable_search = Some(true);
    self
  }
}

/// The model's answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Completion {
  /// Final answer text
  pub content:   String,
  /// Reasoning trace, for reasoning models that expose one
  pub reasoning: Option<String>,
}

/// Internal representation of a chat-completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
  /// Candidate answers; only the first is used
  choices: Vec<Choice>,
}

/// One candidate answer.
#[derive(Debug, Deserialize)]
struct Choice {
  /// The generated message
  message: ResponseMessage,
}

/// The generated message of a [`Choice`].
#[derive(Debug, Deserialize)]
struct ResponseMessage {
  /// Answer text
  #[serde(default)]
  content:           Option<String>,
  /// Reasoning trace of reasoning models
  #[serde(default)]
  reasoning_content: Option<String>,
}

/// Client for an OpenAI-compatible chat endpoint.
///
/// Requests are bounded by [`LlmConfig::timeout_secs`]. Transport failures, timeouts, rate limits
/// and server errors are retried with exponential backoff; other client errors are not.
#[derive(Clone)]
pub struct ChatClient {
  /// Internal web client with the timeout applied.
  client:         reqwest::Client,
  /// Endpoint base URL without trailing slash.
  base_url:       String,
  /// Bearer token.
  api_key:        String,
  /// Timeout in seconds, kept for error reporting.
  timeout_secs:   u64,
  /// Retries after the first attempt.
  max_retries:    u32,
  /// Base backoff delay.
  retry_delay_ms: u64,
}

impl ChatClient {
  /// Creates a client from the model section of the configuration.
  pub fn new(config: &LlmConfig) -> Result<Self, PulseError> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;

    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      api_key: config.api_key.clone(),
      timeout_secs: config.timeout_secs,
      max_retries: config.max_retries,
      retry_delay_ms: config.retry_delay_ms,
    })
  }

  /// The endpoint base URL.
  pub fn base_url(&self) -> &str { &self.base_url }

  /// Executes a single attempt. The flag tells whether a retry may help.
  async fn execute(&self, request: &ChatRequest) -> Result<Completion, (PulseError, bool)> {
    let url = format!("{}/chat/completions", self.base_url);
    trace!(model = %request.model, messages = request.messages.len(), "Calling chat endpoint");

    let response = self
      .client
      .post(&url)
      .bearer_auth(&self.api_key)
      .json(request)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          (PulseError::Timeout(self.timeout_secs), true)
        } else {
          (PulseError::Network(e), true)
        }
      })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      let retryable = status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
      return Err((PulseError::ApiError(format!("{status}: {body}")), retryable));
    }

    let body: ChatResponse = response.json().await.map_err(|e| {
      (PulseError::InvalidResponse(format!("failed to parse chat response: {e}")), false)
    })?;

    let message = body
      .choices
      .into_iter()
      .next()
      .ok_or_else(|| (PulseError::InvalidResponse("response has no choices".to_string()), false))?
      .message;

    Ok(Completion {
      content:   message.content.unwrap_or_default(),
      reasoning: message.reasoning_content.filter(|r| !r.trim().is_empty()),
    })
  }
}

#[async_trait]
impl LanguageModel for ChatClient {
  async fn complete(&self, request: &ChatRequest) -> Result<Completion, PulseError> {
    let mut attempt = 0;
    loop {
      if attempt > 0 {
        let delay = Duration::from_millis(self.retry_delay_ms * 2_u64.pow(attempt - 1));
        warn!(model = %request.model, retry = attempt, delay_ms = delay.as_millis() as u64, "Retrying chat request");
        tokio::time::sleep(delay).await;
      }

      let start = Instant::now();
      match self.execute(request).await {
        Ok(completion) => {
          debug!(
            model = %request.model,
            latency_ms = start.elapsed().as_millis() as u64,
            chars = completion.content.chars().count(),
            "Chat request succeeded"
          );
          return Ok(completion);
        },
        Err((e, retryable)) => {
          warn!(model = %request.model, error = %e, attempt, "Chat request failed");
          if !retryable || attempt >= self.max_retries {
            return Err(e);
          }
          attempt += 1;
        },
      }
    }
  }
}
