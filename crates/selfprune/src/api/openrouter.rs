//! OpenAI-compatible chat-completions client (OpenRouter by default).

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::retry::{RetryConfig, is_transient_error};
use crate::agent::{ChatModel, ModelFuture, ModelReply, ModelRequest};
use crate::state::TokenUsage;

/// OpenRouter chat-completions endpoint.
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize, Debug)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiError>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

/// [`ChatModel`] over an OpenAI-compatible HTTP endpoint.
#[derive(Debug, Clone)]
pub struct OpenRouterModel {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryConfig,
}

impl OpenRouterModel {
    /// Client with a 120 s request timeout and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_timeout(api_key, Duration::from_secs(120))
    }

    /// Read the key from `OPENROUTER_KEY`.
    pub fn from_env() -> Result<Self, String> {
        let key = std::env::var("OPENROUTER_KEY").map_err(|_| "OPENROUTER_KEY not set".to_string())?;
        Self::new(key)
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("selfprune/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: OPENROUTER_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.7,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at another OpenAI-compatible endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body<'a>(&'a self, request: &'a ModelRequest) -> ChatBody<'a> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: &request.system,
        });
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: wire_role(m.role),
            content: &m.content,
        }));
        ChatBody {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    async fn send_once(&self, body: &ChatBody<'_>) -> Result<ModelReply, String> {
        let start = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("API HTTP {status}: {text}"));
        }
        parse_completion(&text)
    }
}

/// Tool results are sent as user turns: the outbound sequence carries no
/// call ids for the endpoint to match them against.
fn wire_role(role: crate::MessageRole) -> &'static str {
    match role {
        crate::MessageRole::System => "system",
        crate::MessageRole::User | crate::MessageRole::Tool => "user",
        crate::MessageRole::Assistant => "assistant",
    }
}

/// Extract reply text and usage from a chat-completions response body.
pub fn parse_completion(body: &str) -> Result<ModelReply, String> {
    let parsed: RawChatResponse =
        serde_json::from_str(body).map_err(|e| format!("failed to parse response: {e}"))?;

    if let Some(err) = parsed.error {
        return Err(format!("API error: {}", err.message));
    }

    let usage = parsed.usage.map_or_else(TokenUsage::default, |u| {
        TokenUsage::new(u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0))
    });
    let text = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    Ok(ModelReply { text, usage })
}

impl ChatModel for OpenRouterModel {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        Box::pin(async move {
            let body = self.body(request);
            debug!(
                "LLM request: model={}, messages={}, max_tokens={}",
                self.model,
                body.messages.len(),
                self.max_tokens
            );
            trace!(
                "Request payload size: {} bytes",
                serde_json::to_string(&body).map_or(0, |s| s.len())
            );

            let mut attempt = 0;
            loop {
                match self.send_once(&body).await {
                    Ok(reply) => return Ok(reply),
                    Err(e) if attempt < self.retry.max_retries && is_transient_error(&e) => {
                        let delay = self.retry.delay_for_attempt(attempt);
                        warn!("Transient model error (attempt {}): {e}; retrying in {delay:?}", attempt + 1);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}
