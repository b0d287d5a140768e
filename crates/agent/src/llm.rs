use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use concierge_core::config::{LlmConfig, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_JITTER_MS: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Everything a model needs for one reply.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub context_text: String,
    pub history: Vec<ChatTurn>,
    pub message: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// System prompt followed by the retrieved context, if any.
    pub fn system_text(&self) -> String {
        if self.context_text.trim().is_empty() {
            self.system_prompt.clone()
        } else {
            format!("{}\n\n{}", self.system_prompt, self.context_text)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub tokens_used: Option<u32>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm client configuration error: {0}")]
    Configuration(String),
    #[error("llm request failed: {0}")]
    Http(String),
    #[error("llm request timed out")]
    Timeout,
    #[error("llm provider rate limited the request")]
    RateLimited,
    #[error("llm provider rejected credentials")]
    Unauthorized,
    #[error("llm provider returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("could not decode llm response: {0}")]
    Decode(String),
    #[error("llm returned an empty completion")]
    EmptyCompletion,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout | Self::RateLimited => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Configuration(_) | Self::Unauthorized | Self::Decode(_) | Self::EmptyCompletion => {
                false
            }
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError>;
}

/// Builds the configured provider client.
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    let http = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .map_err(|error| LlmError::Configuration(error.to_string()))?;

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiCompatibleClient {
            http,
            name: "openai",
            endpoint: chat_completions_endpoint(
                config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
            ),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        }),
        LlmProvider::Ollama => {
            let base = config
                .base_url
                .as_deref()
                .ok_or_else(|| LlmError::Configuration("ollama requires a base url".to_string()))?;
            Arc::new(OpenAiCompatibleClient {
                http,
                name: "ollama",
                endpoint: chat_completions_endpoint(&ensure_v1(base)),
                api_key: None,
                model: config.model.clone(),
                max_retries: config.max_retries,
            })
        }
        LlmProvider::Anthropic => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                LlmError::Configuration("anthropic requires an api key".to_string())
            })?;
            Arc::new(AnthropicClient {
                http,
                endpoint: format!(
                    "{}/v1/messages",
                    config.base_url.as_deref().unwrap_or(ANTHROPIC_BASE_URL).trim_end_matches('/')
                ),
                api_key,
                model: config.model.clone(),
                max_retries: config.max_retries,
            })
        }
    };

    Ok(client)
}

fn chat_completions_endpoint(base: &str) -> String {
    format!("{}/chat/completions", base.trim_end_matches('/'))
}

fn ensure_v1(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or retries run out.
pub async fn with_retries<F, Fut>(
    provider: &str,
    max_retries: u32,
    mut attempt: F,
) -> Result<Generation, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Generation, LlmError>>,
{
    let mut tries = 0u32;
    loop {
        match attempt().await {
            Ok(generation) => return Ok(generation),
            Err(error) if error.is_retryable() && tries < max_retries => {
                let delay = backoff_delay(tries);
                warn!(
                    event_name = "llm.retry",
                    provider,
                    attempt = tries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "llm call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                tries += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
    Duration::from_millis(exponential + jitter)
}

fn map_transport_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Http(sanitize_api_error(&error.to_string()))
    }
}

fn map_status(status: reqwest::StatusCode, body: &str) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::Unauthorized,
        429 => LlmError::RateLimited,
        code => LlmError::Api { status: code, message: sanitize_api_error(body) },
    }
}

const SENSITIVE_MARKERS: &[&str] =
    &["api_key", "api-key", "apikey", "authorization", "bearer", "secret", "password"];

/// Keeps provider error text out of logs when it may echo credentials.
pub fn sanitize_api_error(error: &str) -> String {
    let lower = error.to_lowercase();
    if SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return "provider error withheld (may contain credentials)".to_string();
    }
    if lower.contains("connection refused") || lower.contains("failed to connect") {
        return "could not connect to the llm provider".to_string();
    }
    error.chars().take(200).collect()
}

// OpenAI-compatible chat completions (OpenAI, Ollama `/v1`).

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    total_tokens: u32,
}

pub struct OpenAiCompatibleClient {
    http: Client,
    name: &'static str,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl OpenAiCompatibleClient {
    fn body<'a>(&'a self, request: &'a GenerationRequest, system: &'a str) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatCompletionMessage { role: "system", content: system });
        messages.extend(request.history.iter().map(|turn| ChatCompletionMessage {
            role: match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            },
            content: &turn.content,
        }));
        messages.push(ChatCompletionMessage { role: "user", content: &request.message });

        ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    async fn attempt(&self, body: &ChatCompletionRequest<'_>) -> Result<Generation, LlmError> {
        let mut builder = self.http.post(&self.endpoint).json(body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status(status, &text));
        }

        parse_chat_completion(&text)
    }
}

fn parse_chat_completion(body: &str) -> Result<Generation, LlmError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|error| LlmError::Decode(error.to_string()))?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(LlmError::EmptyCompletion)?;

    Ok(Generation { text, tokens_used: parsed.usage.map(|usage| usage.total_tokens) })
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        let system = request.system_text();
        let body = self.body(request, &system);
        debug!(
            event_name = "llm.request",
            provider = self.name,
            model = %self.model,
            history_turns = request.history.len(),
            "sending chat completion"
        );
        with_retries(self.name, self.max_retries, || self.attempt(&body)).await
    }
}

// Anthropic messages API.

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<ChatCompletionMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicClient {
    http: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    max_retries: u32,
}

impl AnthropicClient {
    async fn attempt(&self, body: &AnthropicRequest<'_>) -> Result<Generation, LlmError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status(status, &text));
        }

        parse_anthropic(&text)
    }
}

fn parse_anthropic(body: &str) -> Result<Generation, LlmError> {
    let parsed: AnthropicResponse =
        serde_json::from_str(body).map_err(|error| LlmError::Decode(error.to_string()))?;
    let text = parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string();
    if text.is_empty() {
        return Err(LlmError::EmptyCompletion);
    }

    Ok(Generation {
        text,
        tokens_used: parsed.usage.map(|usage| usage.input_tokens + usage.output_tokens),
    })
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        let system = request.system_text();
        let mut messages: Vec<ChatCompletionMessage<'_>> = request
            .history
            .iter()
            .map(|turn| ChatCompletionMessage {
                role: match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                },
                content: &turn.content,
            })
            .collect();
        // The messages API requires the first turn to come from the user.
        while messages.first().map(|message| message.role == "assistant").unwrap_or(false) {
            messages.remove(0);
        }
        messages.push(ChatCompletionMessage { role: "user", content: &request.message });

        let body = AnthropicRequest {
            model: &self.model,
            system: &system,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        debug!(
            event_name = "llm.request",
            provider = "anthropic",
            model = %self.model,
            history_turns = request.history.len(),
            "sending messages request"
        );
        with_retries("anthropic", self.max_retries, || self.attempt(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use secrecy::SecretString;

    use concierge_core::config::{AppConfig, LlmProvider};

    use super::{
        build_client, ensure_v1, parse_anthropic, parse_chat_completion, sanitize_api_error,
        with_retries, Generation, LlmError,
    };

    #[test]
    fn parses_chat_completion_with_usage() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  Olá! "}}],"usage":{"total_tokens":42}}"#;
        let generation = parse_chat_completion(body).expect("parse");
        assert_eq!(generation, Generation { text: "Olá!".to_string(), tokens_used: Some(42) });
    }

    #[test]
    fn empty_choice_is_an_error() {
        let body = r#"{"choices":[{"message":{"content":""}}]}"#;
        assert!(matches!(parse_chat_completion(body), Err(LlmError::EmptyCompletion)));
    }

    #[test]
    fn parses_anthropic_text_blocks() {
        let body = r#"{"content":[{"type":"text","text":"Hello"},{"type":"text","text":" there"}],"usage":{"input_tokens":10,"output_tokens":5}}"#;
        let generation = parse_anthropic(body).expect("parse");
        assert_eq!(generation.text, "Hello there");
        assert_eq!(generation.tokens_used, Some(15));
    }

    #[test]
    fn ollama_base_gets_v1_suffix_once() {
        assert_eq!(ensure_v1("http://localhost:11434"), "http://localhost:11434/v1");
        assert_eq!(ensure_v1("http://localhost:11434/v1/"), "http://localhost:11434/v1");
    }

    #[test]
    fn sensitive_errors_are_withheld() {
        assert_eq!(
            sanitize_api_error("invalid api_key sk-123"),
            "provider error withheld (may contain credentials)"
        );
        assert_eq!(sanitize_api_error("model overloaded"), "model overloaded");
    }

    #[test]
    fn builds_client_for_each_provider() {
        let mut config = AppConfig::default().llm;
        let ollama = build_client(&config).expect("ollama client");
        assert_eq!(ollama.name(), "ollama");

        config.provider = LlmProvider::Anthropic;
        config.api_key = Some(SecretString::from("test-key".to_string()));
        assert_eq!(build_client(&config).expect("anthropic client").name(), "anthropic");

        config.provider = LlmProvider::OpenAi;
        assert_eq!(build_client(&config).expect("openai client").name(), "openai");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retries("test", 2, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::RateLimited)
                } else {
                    Ok(Generation { text: "ok".to_string(), tokens_used: None })
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retries("test", 5, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Generation, _>(LlmError::Unauthorized)
            }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Unauthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retries("test", 1, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Generation, _>(LlmError::Api { status: 503, message: "busy".to_string() })
            }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Api { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
