use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Fatal errors that abort a run.
#[derive(Debug, Error)]
pub enum UltraError {
    #[error("input root {path} is not a readable directory: {reason}")]
    RootUnreadable { path: PathBuf, reason: String },

    #[error("output writer failed for {path}: {source}")]
    Writer {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resume requires the jsonl output format, got '{0}'")]
    ResumeFormat(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UltraError {
    pub fn writer(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Writer { path: path.into(), source }
    }

    /// Usage-level errors get a distinct exit status from runtime failures.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            UltraError::RootUnreadable { .. } | UltraError::ResumeFormat(_) | UltraError::ConfigError(_)
        )
    }
}

/// Failure classes reported by an inference caller.
///
/// The dispatcher only looks at this classification, never at the wire
/// protocol behind it.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("server error{}: {message}", status_suffix(.status))]
    ServerError { status: Option<u16>, message: String },

    #[error("client error{}: {message}", status_suffix(.status))]
    ClientError { status: Option<u16>, message: String },

    #[error("rate limited: {message}")]
    RateLimited { retry_after: Option<Duration>, message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// What the dispatcher should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Transient,
    RateLimited,
    NonRetryable,
}

impl InferenceError {
    pub fn class(&self) -> RetryClass {
        match self {
            InferenceError::Timeout(_) | InferenceError::ServerError { .. } => RetryClass::Transient,
            InferenceError::RateLimited { .. } => RetryClass::RateLimited,
            InferenceError::ClientError { .. } => RetryClass::NonRetryable,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            InferenceError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Failure to read an individual image. Never fatal to the run.
#[derive(Debug, Error)]
#[error("cannot read {path}: {reason}")]
pub struct LoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl LoadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self { path: path.into(), reason: reason.to_string() }
    }
}
