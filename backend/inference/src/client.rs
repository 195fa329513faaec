//! OpenAI-compatible chat-completions caller (LM Studio, Ollama, vLLM, ...).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde_json::{Map, Value};
use tracing::debug;

use logging::redact_sensitive_data;
use ultravision_core::{Batch, InferenceCaller, InferenceError, InferenceReply};
use ultravision_media::to_data_url;

use crate::messages::{build_body, build_messages, extract_text};

/// Error bodies are cut to this many characters before they are recorded.
const MAX_ERROR_BODY_CHARS: usize = 400;

/// Where to send requests.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Base URL without the `/v1` suffix, e.g. `http://localhost:1234`.
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

/// What to ask for.
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub system_prompt: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Extra fields merged into the request body.
    pub extra: Option<Map<String, Value>>,
}

/// Sends batches to `{api_base}/v1/chat/completions`.
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: Endpoint,
    prompt: PromptSettings,
}

impl ChatCompletionsClient {
    pub fn new(endpoint: Endpoint, prompt: PromptSettings) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(endpoint.timeout).build()?;
        Ok(Self { client, endpoint, prompt })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.endpoint.api_base.trim_end_matches('/'))
    }

    fn body_for(&self, batch: &Batch) -> Value {
        let urls: Vec<String> = batch
            .images
            .iter()
            .map(|img| to_data_url(img.mime(), &img.payload))
            .collect();
        let messages = build_messages(&self.prompt.system_prompt, &self.prompt.prompt, &urls);
        build_body(
            &self.endpoint.model,
            messages,
            self.prompt.temperature,
            self.prompt.max_tokens,
            self.prompt.extra.as_ref(),
        )
    }
}

#[async_trait]
impl InferenceCaller for ChatCompletionsClient {
    fn name(&self) -> &str {
        &self.endpoint.api_base
    }

    async fn send(&self, batch: &Batch) -> Result<InferenceReply, InferenceError> {
        let start = Instant::now();
        let body = self.body_for(batch);
        let api_key = if self.endpoint.api_key.is_empty() {
            "lm-studio"
        } else {
            self.endpoint.api_key.as_str()
        };

        debug!(batch = batch.index, images = batch.len(), model = %self.endpoint.model, "Sending chat completion");

        let response = self
            .client
            .post(self.url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &text));
        }

        let raw: Value = response.json().await.map_err(|e| InferenceError::ServerError {
            status: Some(status.as_u16()),
            message: format!("malformed response body: {e}"),
        })?;
        let text = extract_text(&raw);

        debug!(
            batch = batch.index,
            latency_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "Chat completion received"
        );
        Ok(InferenceReply { text, raw })
    }
}

/// Map an HTTP error status onto the dispatcher's failure classes.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> InferenceError {
    let message = format!(
        "{} {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        truncate_chars(&redact_sensitive_data(body), MAX_ERROR_BODY_CHARS)
    );
    match status {
        StatusCode::TOO_MANY_REQUESTS => InferenceError::RateLimited { retry_after, message },
        StatusCode::REQUEST_TIMEOUT => InferenceError::Timeout(message),
        s if s.is_server_error() => InferenceError::ServerError { status: Some(s.as_u16()), message },
        s => InferenceError::ClientError { status: Some(s.as_u16()), message },
    }
}

fn classify_transport(err: reqwest::Error) -> InferenceError {
    let message = redact_sensitive_data(&err.to_string());
    if err.is_timeout() {
        InferenceError::Timeout(message)
    } else if err.is_builder() {
        InferenceError::ClientError { status: None, message }
    } else {
        // Connect failures, resets, truncated bodies.
        InferenceError::ServerError { status: None, message }
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
