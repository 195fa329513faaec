//! UltraVision runtime configuration.
//!
//! Provides:
//! - Typed config schema (endpoint, prompt, batching, retry, output, logging)
//! - YAML loading from `--config` or the config directory
//! - `${ENV_VAR}` substitution and `ULTRAVISION_*` overrides
//! - Default value application
//! - Validation with field paths

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{
    apply_env_overrides, apply_env_overrides_with, contains_env_var_reference, resolve_env_vars,
    resolve_env_vars_with, MissingEnvVarError,
};
pub use io::{config_dir, config_file_path, load_config, parse_config};
pub use schema::UltraVisionConfig;
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Load a config file and layer env substitution, `ULTRAVISION_*` overrides
/// and defaults over it, then validate.
pub async fn load_and_prepare(path: &Path) -> Result<UltraVisionConfig> {
    let raw_config = load_config(path).await?;
    finalize_config(resolve_config(raw_config, path)?, path)
}

/// Substitute `${VAR}` references and apply `ULTRAVISION_*` overrides.
///
/// Callers with a higher-precedence layer (CLI flags) apply it to the result
/// before calling [`finalize_config`].
pub fn resolve_config(raw_config: UltraVisionConfig, path: &Path) -> Result<UltraVisionConfig> {
    let value: Value =
        serde_json::to_value(&raw_config).context("Failed to serialize config for processing")?;

    let value = resolve_env_vars(&value)
        .with_context(|| format!("Failed to resolve env vars in config {}", path.display()))?;

    let config: UltraVisionConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;

    Ok(apply_env_overrides(config))
}

/// Apply defaults and validate. Warnings are logged; any error fails.
pub fn finalize_config(config: UltraVisionConfig, path: &Path) -> Result<UltraVisionConfig> {
    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    if !report.is_valid() {
        for error in &report.errors {
            tracing::error!(path = %error.path, message = %error.message, "Config error");
        }
        bail!("invalid configuration ({}): {}", path.display(), report.error_summary());
    }

    Ok(config)
}
