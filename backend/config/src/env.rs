//! Environment handling for config values.
//!
//! Two concerns: `${VAR_NAME}` substitution inside string values of the YAML
//! file, and the `ULTRAVISION_*` variables that override file settings.
//! Only uppercase `[A-Z_][A-Z0-9_]*` names are substituted; `$${VAR}` escapes
//! to a literal `${VAR}`.

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::schema::{EndpointConfig, LoggingConfig, UltraVisionConfig};

pub const ENV_API_BASE: &str = "ULTRAVISION_API_BASE";
pub const ENV_API_KEY: &str = "ULTRAVISION_API_KEY";
pub const ENV_MODEL: &str = "ULTRAVISION_MODEL";
pub const ENV_LOG_LEVEL: &str = "ULTRAVISION_LOG_LEVEL";

/// Matches `${VAR}` and, via the optional leading `$`, its escaped form.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$)?\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

/// Error returned for missing env vars.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references in a config JSON value tree using the
/// process environment. Unset or empty variables are an error.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    substitute_value(value, &std::env::vars().collect(), "")
}

/// Substitute env vars using a provided map (useful for testing).
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "")
}

fn substitute_value(value: &Value, env: &HashMap<String, String>, path: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => {
            let result: Result<Vec<_>> = arr
                .iter()
                .enumerate()
                .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
                .collect();
            Ok(Value::Array(result?))
        }
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                let child_path = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                result.insert(k.clone(), substitute_value(v, env, &child_path)?);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, env: &HashMap<String, String>, path: &str) -> Result<String> {
    if !s.contains("${") {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &regex::Captures| {
        let var_name = &caps[2];
        if caps.get(1).is_some() {
            return format!("${{{var_name}}}");
        }
        match env.get(var_name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: var_name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    if let Some(err) = missing {
        bail!(err);
    }
    Ok(substituted.into_owned())
}

/// Check whether a string contains any unescaped env var references.
pub fn contains_env_var_reference(s: &str) -> bool {
    ENV_VAR_PATTERN.captures_iter(s).any(|caps| caps.get(1).is_none())
}

/// Apply `ULTRAVISION_*` overrides from the process environment.
pub fn apply_env_overrides(config: UltraVisionConfig) -> UltraVisionConfig {
    apply_env_overrides_with(config, &std::env::vars().collect())
}

/// Apply `ULTRAVISION_*` overrides from a provided map. Empty values are ignored.
pub fn apply_env_overrides_with(mut config: UltraVisionConfig, env: &HashMap<String, String>) -> UltraVisionConfig {
    let get = |key: &str| env.get(key).filter(|v| !v.trim().is_empty()).cloned();

    let (api_base, api_key, model) = (get(ENV_API_BASE), get(ENV_API_KEY), get(ENV_MODEL));
    if api_base.is_some() || api_key.is_some() || model.is_some() {
        let endpoint = config.endpoint.get_or_insert_with(EndpointConfig::default);
        if api_base.is_some() {
            endpoint.api_base = api_base;
        }
        if api_key.is_some() {
            endpoint.api_key = api_key;
        }
        if model.is_some() {
            endpoint.model = model;
        }
    }
    if let Some(level) = get(ENV_LOG_LEVEL) {
        config.logging.get_or_insert_with(LoggingConfig::default).level = Some(level);
    }
    config
}
