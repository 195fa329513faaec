//! Built-in defaults, applied after the file and environment layers.

use crate::schema::{
    BatchingConfig, EndpointConfig, LoggingConfig, OutputConfig, PromptConfig, RetryConfig,
    UltraVisionConfig,
};

pub const DEFAULT_API_BASE: &str = "http://localhost:1234";
/// LM Studio ignores the key but the header must be present.
pub const DEFAULT_API_KEY: &str = "lm-studio";
pub const DEFAULT_MODEL: &str = "qwen/qwen3-vl-8b";
pub const DEFAULT_TIMEOUT_SECS: u64 = 90;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a precise, concise vision assistant.";
pub const DEFAULT_USER_PROMPT: &str = "Describe the image succinctly with key details.";
pub const DEFAULT_MAX_TOKENS: u32 = 3000;
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

pub const DEFAULT_PER_REQUEST: usize = 1;
pub const DEFAULT_CONCURRENCY: usize = 2;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.7;
pub const DEFAULT_MAX_DELAY_MS: u64 = 25_000;
pub const DEFAULT_RATE_LIMIT_MULTIPLIER: f64 = 4.0;

pub const DEFAULT_FORMAT: &str = "jsonl";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Fill every unset field with its built-in default.
pub fn apply_all_defaults(config: UltraVisionConfig) -> UltraVisionConfig {
    let config = apply_endpoint_defaults(config);
    let config = apply_prompt_defaults(config);
    let config = apply_batching_defaults(config);
    let config = apply_retry_defaults(config);
    let config = apply_output_defaults(config);
    apply_logging_defaults(config)
}

fn apply_endpoint_defaults(mut config: UltraVisionConfig) -> UltraVisionConfig {
    let endpoint = config.endpoint.get_or_insert_with(EndpointConfig::default);
    endpoint.api_base.get_or_insert_with(|| DEFAULT_API_BASE.to_string());
    endpoint.api_key.get_or_insert_with(|| DEFAULT_API_KEY.to_string());
    endpoint.model.get_or_insert_with(|| DEFAULT_MODEL.to_string());
    endpoint.timeout_secs.get_or_insert(DEFAULT_TIMEOUT_SECS);
    endpoint.auto_discover.get_or_insert(false);
    endpoint.discover_hosts.get_or_insert_with(Vec::new);
    config
}

fn apply_prompt_defaults(mut config: UltraVisionConfig) -> UltraVisionConfig {
    let prompt = config.prompt.get_or_insert_with(PromptConfig::default);
    prompt.system_prompt.get_or_insert_with(|| DEFAULT_SYSTEM_PROMPT.to_string());
    prompt.prompt.get_or_insert_with(|| DEFAULT_USER_PROMPT.to_string());
    prompt.max_tokens.get_or_insert(DEFAULT_MAX_TOKENS);
    prompt.temperature.get_or_insert(DEFAULT_TEMPERATURE);
    config
}

fn apply_batching_defaults(mut config: UltraVisionConfig) -> UltraVisionConfig {
    let batching = config.batching.get_or_insert_with(BatchingConfig::default);
    batching.per_request.get_or_insert(DEFAULT_PER_REQUEST);
    batching.concurrency.get_or_insert(DEFAULT_CONCURRENCY);
    batching.recursive.get_or_insert(false);
    batching.patterns.get_or_insert_with(Vec::new);
    batching.autorotate.get_or_insert(false);
    config
}

fn apply_retry_defaults(mut config: UltraVisionConfig) -> UltraVisionConfig {
    let retry = config.retry.get_or_insert_with(RetryConfig::default);
    retry.max_attempts.get_or_insert(DEFAULT_MAX_ATTEMPTS);
    retry.base_delay_ms.get_or_insert(DEFAULT_BASE_DELAY_MS);
    retry.backoff_factor.get_or_insert(DEFAULT_BACKOFF_FACTOR);
    retry.max_delay_ms.get_or_insert(DEFAULT_MAX_DELAY_MS);
    retry.jitter.get_or_insert(true);
    retry.rate_limit_multiplier.get_or_insert(DEFAULT_RATE_LIMIT_MULTIPLIER);
    config
}

/// Output and failure-log paths stay unset here; they default from the format.
fn apply_output_defaults(mut config: UltraVisionConfig) -> UltraVisionConfig {
    let output = config.output.get_or_insert_with(OutputConfig::default);
    output.format.get_or_insert_with(|| DEFAULT_FORMAT.to_string());
    config
}

fn apply_logging_defaults(mut config: UltraVisionConfig) -> UltraVisionConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    logging.level.get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    config
}
