//! Log Redaction Layer
//!
//! Scrubs API keys and bearer tokens from strings prior to logging or
//! persisting them in failure records.

use regex::Regex;
use std::sync::LazyLock;

static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(sk-[a-zA-Z0-9_\-]{16,})|(Bearer\s+[a-zA-Z0-9\-\._~+/]+=*)").unwrap());
static QUERY_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([?&](?:api_)?key=)[^&\s]+").unwrap());

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = API_KEY_RE.replace_all(input, "[REDACTED_TOKEN]");
    QUERY_KEY_RE.replace_all(&redacted, "${1}[REDACTED_TOKEN]").to_string()
}

/// Mask a configured secret for display, keeping a short prefix.
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() <= 6 {
        return "***".to_string();
    }
    let prefix: String = secret.chars().take(3).collect();
    format!("{prefix}***")
}
