//! Config validation with field paths in every message.

use std::str::FromStr;

use crate::schema::UltraVisionConfig;
use thiserror::Error;
use ultravision_core::OutputFormat;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All error messages joined for a single fatal report.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &UltraVisionConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_endpoint(config, &mut report);
    validate_prompt(config, &mut report);
    validate_batching(config, &mut report);
    validate_retry(config, &mut report);
    validate_output(config, &mut report);
    report
}

fn validate_endpoint(config: &UltraVisionConfig, report: &mut ValidationReport) {
    let Some(endpoint) = &config.endpoint else { return };
    if let Some(base) = &endpoint.api_base {
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            report.error("endpoint.apiBase", format!("'{base}' must start with http:// or https://"));
        }
        if base.trim_end_matches('/').ends_with("/v1") {
            report.warn("endpoint.apiBase", "apiBase should not include /v1; it is appended automatically");
        }
    }
    if endpoint.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
        report.error("endpoint.model", "Model id cannot be empty");
    }
    if endpoint.timeout_secs == Some(0) {
        report.error("endpoint.timeoutSecs", "timeoutSecs must be >= 1");
    }
}

fn validate_prompt(config: &UltraVisionConfig, report: &mut ValidationReport) {
    let Some(prompt) = &config.prompt else { return };
    if prompt.max_tokens == Some(0) {
        report.error("prompt.maxTokens", "maxTokens must be >= 1");
    }
    if let Some(t) = prompt.temperature {
        if !(0.0..=2.0).contains(&t) {
            report.warn("prompt.temperature", format!("temperature {t} is outside the usual 0..2 range"));
        }
    }
}

fn validate_batching(config: &UltraVisionConfig, report: &mut ValidationReport) {
    let Some(batching) = &config.batching else { return };
    if batching.per_request == Some(0) {
        report.error("batching.perRequest", "perRequest must be >= 1");
    }
    if batching.concurrency == Some(0) {
        report.error("batching.concurrency", "concurrency must be >= 1");
    }
    if batching.max_side == Some(0) {
        report.error("batching.maxSide", "maxSide must be >= 1");
    }
    if let Some(patterns) = &batching.patterns {
        for (i, p) in patterns.iter().enumerate() {
            if glob::Pattern::new(p).is_err() {
                report.error(format!("batching.patterns[{i}]"), format!("Invalid glob pattern '{p}'"));
            }
        }
    }
}

fn validate_retry(config: &UltraVisionConfig, report: &mut ValidationReport) {
    let Some(retry) = &config.retry else { return };
    if retry.max_attempts == Some(0) {
        report.error("retry.maxAttempts", "maxAttempts must be >= 1");
    }
    if let Some(f) = retry.backoff_factor {
        if f < 1.0 {
            report.error("retry.backoffFactor", "backoffFactor must be >= 1.0");
        }
    }
    if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
        if max < base {
            report.warn("retry.maxDelayMs", "maxDelayMs is below baseDelayMs; every wait will be capped");
        }
    }
    if retry.rate_limit_multiplier.is_some_and(|m| m < 1.0) {
        report.error("retry.rateLimitMultiplier", "rateLimitMultiplier must be >= 1.0");
    }
}

fn validate_output(config: &UltraVisionConfig, report: &mut ValidationReport) {
    let Some(output) = &config.output else { return };
    if let Some(format) = &output.format {
        if OutputFormat::from_str(format).is_err() {
            report.error(
                "output.format",
                format!("Unknown output format '{format}'. Use jsonl, json, text, markdown or csv"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::apply_all_defaults;
    use crate::schema::{BatchingConfig, OutputConfig, RetryConfig};

    #[test]
    fn defaulted_config_is_valid() {
        let report = validate(&apply_all_defaults(UltraVisionConfig::default()));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn zero_limits_are_errors() {
        let cfg = UltraVisionConfig {
            batching: Some(BatchingConfig {
                per_request: Some(0),
                concurrency: Some(0),
                ..Default::default()
            }),
            retry: Some(RetryConfig {
                max_attempts: Some(0),
                backoff_factor: Some(0.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&cfg);
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["batching.perRequest", "batching.concurrency", "retry.maxAttempts", "retry.backoffFactor"]
        );
    }

    #[test]
    fn unknown_format_is_error() {
        let cfg = UltraVisionConfig {
            output: Some(OutputConfig {
                format: Some("xml".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&cfg);
        assert!(!report.is_valid());
        assert!(report.error_summary().contains("output.format"));
    }
}
