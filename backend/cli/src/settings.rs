//! Command-line flags and their merge into the layered configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;

use ultravision_config::defaults::*;
use ultravision_config::schema::{
    BatchingConfig, EndpointConfig, LoggingConfig, OutputConfig, PromptConfig, RetryConfig,
};
use ultravision_config::UltraVisionConfig;
use ultravision_core::{OutputFormat, UltraError};
use ultravision_engine::{default_output_path, InputSource, RetryPolicy, RunOptions, DEFAULT_FAILURE_LOG};
use ultravision_inference::{Endpoint, PromptSettings};
use ultravision_media::TransformOptions;

#[derive(Parser, Debug, Clone)]
#[command(name = "ultravision")]
#[command(about = "UltraVision: batch a folder of images through a vision LLM")]
#[command(version)]
pub struct Cli {
    /// Directory containing images
    #[arg(required_unless_present = "replay_failures")]
    pub directory: Option<PathBuf>,

    /// Model id, e.g. qwen/qwen3-vl-8b
    #[arg(long)]
    pub model: Option<String>,

    /// Server base URL without /v1
    #[arg(long)]
    pub api_base: Option<String>,

    /// Bearer token (LM Studio ignores the value)
    #[arg(long)]
    pub api_key: Option<String>,

    /// User prompt
    #[arg(long)]
    pub prompt: Option<String>,

    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Images per API request
    #[arg(long)]
    pub per_request: Option<usize>,

    /// Scan subfolders
    #[arg(long)]
    pub recursive: bool,

    /// Glob patterns, e.g. *.png *.jpg
    #[arg(long, num_args = 1..)]
    pub patterns: Vec<String>,

    /// Max total images to process (0 = no limit)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Skip images already present in the JSONL output
    #[arg(long)]
    pub resume: bool,

    /// jsonl, json, text, markdown or csv
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Output file (defaults to outputs.<ext>)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Where to log failed batches
    #[arg(long)]
    pub fail_log: Option<PathBuf>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f64>,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Attempts per batch, first one included
    #[arg(long)]
    pub retries: Option<u32>,

    /// JSON object merged into the request body, e.g. {"top_p":0.9}
    #[arg(long, value_name = "JSON")]
    pub extra: Option<String>,

    /// Concurrent API calls
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Apply EXIF orientation before sending
    #[arg(long)]
    pub autorotate: bool,

    /// Downscale so max(width, height) <= N
    #[arg(long, value_name = "N")]
    pub max_side: Option<u32>,

    /// Config file (defaults to ~/.ultravision/config.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Find a local LM Studio / Ollama vision model and use it
    #[arg(long)]
    pub auto_discover: bool,

    /// Extra host to probe during discovery (repeatable)
    #[arg(long = "discover-host", value_name = "HOST")]
    pub discover_hosts: Vec<String>,

    /// Re-run the files listed in a failure log instead of scanning a directory
    #[arg(long, value_name = "PATH")]
    pub replay_failures: Option<PathBuf>,

    #[arg(long)]
    pub log_level: Option<String>,

    /// Directory for the daily-rolling JSON log file
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

/// Parse `--extra`: must be a JSON object.
pub fn parse_extra(raw: &str) -> Result<serde_json::Map<String, Value>, UltraError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(UltraError::ConfigError("invalid --extra JSON: extra must be a JSON object".into())),
        Err(e) => Err(UltraError::ConfigError(format!("invalid --extra JSON: {e}"))),
    }
}

/// Layer flags over the file/env config. Flags always win when present.
pub fn apply_cli_overrides(mut cfg: UltraVisionConfig, cli: &Cli) -> Result<UltraVisionConfig, UltraError> {
    let endpoint = cfg.endpoint.get_or_insert_with(EndpointConfig::default);
    set(&mut endpoint.api_base, cli.api_base.clone());
    set(&mut endpoint.api_key, cli.api_key.clone());
    set(&mut endpoint.model, cli.model.clone());
    set(&mut endpoint.timeout_secs, cli.timeout);
    if cli.auto_discover {
        endpoint.auto_discover = Some(true);
    }
    if !cli.discover_hosts.is_empty() {
        endpoint.discover_hosts = Some(cli.discover_hosts.clone());
    }

    let prompt = cfg.prompt.get_or_insert_with(PromptConfig::default);
    set(&mut prompt.prompt, cli.prompt.clone());
    set(&mut prompt.system_prompt, cli.system_prompt.clone());
    set(&mut prompt.max_tokens, cli.max_tokens);
    set(&mut prompt.temperature, cli.temperature);
    if let Some(raw) = &cli.extra {
        prompt.extra = Some(parse_extra(raw)?);
    }

    let batching = cfg.batching.get_or_insert_with(BatchingConfig::default);
    set(&mut batching.per_request, cli.per_request);
    set(&mut batching.concurrency, cli.concurrency);
    set(&mut batching.limit, cli.limit);
    set(&mut batching.max_side, cli.max_side);
    if cli.recursive {
        batching.recursive = Some(true);
    }
    if cli.autorotate {
        batching.autorotate = Some(true);
    }
    if !cli.patterns.is_empty() {
        batching.patterns = Some(cli.patterns.clone());
    }

    let retry = cfg.retry.get_or_insert_with(RetryConfig::default);
    set(&mut retry.max_attempts, cli.retries);

    let output = cfg.output.get_or_insert_with(OutputConfig::default);
    set(&mut output.format, cli.format.map(|f| f.as_str().to_string()));
    set(&mut output.path, cli.out.clone());
    set(&mut output.fail_log, cli.fail_log.clone());

    let logging = cfg.logging.get_or_insert_with(LoggingConfig::default);
    set(&mut logging.level, cli.log_level.clone());
    set(&mut logging.dir, cli.log_dir.clone());

    Ok(cfg)
}

fn set<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Everything `main` needs to build collaborators and start the run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub endpoint: Endpoint,
    pub prompt: PromptSettings,
    pub transform: TransformOptions,
    pub options: RunOptions,
    /// Hosts to probe besides localhost, when discovery is on.
    pub discovery: Option<Vec<String>>,
}

/// Turn a finalized config into run parameters.
pub fn build_plan(cfg: &UltraVisionConfig, cli: &Cli) -> Result<RunPlan, UltraError> {
    let endpoint_cfg = cfg.endpoint.clone().unwrap_or_default();
    let prompt_cfg = cfg.prompt.clone().unwrap_or_default();
    let batching = cfg.batching.clone().unwrap_or_default();
    let retry_cfg = cfg.retry.clone().unwrap_or_default();
    let output = cfg.output.clone().unwrap_or_default();

    let format_name = output.format.unwrap_or_else(|| DEFAULT_FORMAT.to_string());
    let format = OutputFormat::from_str(&format_name).map_err(UltraError::ConfigError)?;

    let input = match (&cli.replay_failures, &cli.directory) {
        (Some(log), _) => InputSource::FailureLog(log.clone()),
        (None, Some(root)) => InputSource::Directory {
            root: root.clone(),
            patterns: batching.patterns.unwrap_or_default(),
            recursive: batching.recursive.unwrap_or(false),
        },
        (None, None) => {
            return Err(UltraError::ConfigError("an input directory or --replay-failures is required".into()))
        }
    };

    let retry = RetryPolicy {
        max_attempts: retry_cfg.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
        base_delay_ms: retry_cfg.base_delay_ms.unwrap_or(DEFAULT_BASE_DELAY_MS),
        backoff_factor: retry_cfg.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR),
        max_delay_ms: retry_cfg.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS),
        jitter: retry_cfg.jitter.unwrap_or(true),
        rate_limit_multiplier: retry_cfg.rate_limit_multiplier.unwrap_or(DEFAULT_RATE_LIMIT_MULTIPLIER),
    };

    let options = RunOptions {
        input,
        per_request: batching.per_request.unwrap_or(DEFAULT_PER_REQUEST),
        limit: batching.limit.filter(|n| *n > 0),
        concurrency: batching.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
        retry,
        resume: cli.resume,
        format,
        output: output.path.unwrap_or_else(|| default_output_path(format)),
        fail_log: output.fail_log.unwrap_or_else(|| PathBuf::from(DEFAULT_FAILURE_LOG)),
    };

    let endpoint = Endpoint {
        api_base: endpoint_cfg.api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        api_key: endpoint_cfg.api_key.unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
        model: endpoint_cfg.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        timeout: Duration::from_secs(endpoint_cfg.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
    };

    let prompt = PromptSettings {
        system_prompt: prompt_cfg.system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        prompt: prompt_cfg.prompt.unwrap_or_else(|| DEFAULT_USER_PROMPT.to_string()),
        temperature: prompt_cfg.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        max_tokens: prompt_cfg.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        extra: prompt_cfg.extra,
    };

    let transform = TransformOptions {
        autorotate: batching.autorotate.unwrap_or(false),
        max_side: batching.max_side,
    };

    let discovery = endpoint_cfg
        .auto_discover
        .unwrap_or(false)
        .then(|| endpoint_cfg.discover_hosts.unwrap_or_default());

    Ok(RunPlan { endpoint, prompt, transform, options, discovery })
}

/// Point the endpoint at a discovered server. Explicit `--api-base` and
/// `--model` flags are left alone.
pub fn apply_discovered(endpoint: &mut Endpoint, cli: &Cli, target: Option<(String, String)>) -> bool {
    let Some((api_base, model)) = target else { return false };
    if cli.api_base.is_none() {
        endpoint.api_base = api_base;
    }
    if cli.model.is_none() {
        endpoint.model = model;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::Path;
    use ultravision_config::apply_all_defaults;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["ultravision"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    fn plan(cfg: UltraVisionConfig, args: &[&str]) -> Result<RunPlan, UltraError> {
        let cli = cli(args);
        let cfg = apply_all_defaults(apply_cli_overrides(cfg, &cli)?);
        build_plan(&cfg, &cli)
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_apply_without_flags_or_file() {
        let plan = plan(UltraVisionConfig::default(), &["imgs"]).unwrap();
        assert_eq!(plan.options.per_request, 1);
        assert_eq!(plan.options.concurrency, 2);
        assert_eq!(plan.options.retry.max_attempts, 5);
        assert_eq!(plan.options.format, OutputFormat::Jsonl);
        assert_eq!(plan.options.output, PathBuf::from("outputs.jsonl"));
        assert_eq!(plan.options.fail_log, PathBuf::from("failures.log"));
        assert_eq!(plan.endpoint.timeout, Duration::from_secs(90));
        assert_eq!(plan.prompt.max_tokens, 3000);
        assert!(plan.discovery.is_none());
    }

    #[test]
    fn flags_beat_file_values() {
        let file = UltraVisionConfig {
            endpoint: Some(EndpointConfig { model: Some("file-model".into()), ..Default::default() }),
            batching: Some(BatchingConfig { concurrency: Some(8), ..Default::default() }),
            ..Default::default()
        };
        let plan = plan(file, &["imgs", "--model", "cli-model", "--format", "md"]).unwrap();
        assert_eq!(plan.endpoint.model, "cli-model");
        assert_eq!(plan.options.concurrency, 8);
        assert_eq!(plan.options.output, PathBuf::from("outputs.md"));
    }

    #[test]
    fn extra_must_be_a_json_object() {
        let err = plan(UltraVisionConfig::default(), &["imgs", "--extra", "[1,2]"]).unwrap_err();
        assert!(err.is_usage());
        let err = plan(UltraVisionConfig::default(), &["imgs", "--extra", "{oops"]).unwrap_err();
        assert!(err.is_usage());

        let ok = plan(UltraVisionConfig::default(), &["imgs", "--extra", r#"{"top_p":0.9}"#]).unwrap();
        assert_eq!(ok.prompt.extra.unwrap()["top_p"], 0.9);
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let plan = plan(UltraVisionConfig::default(), &["imgs", "--limit", "0"]).unwrap();
        assert_eq!(plan.options.limit, None);
    }

    #[test]
    fn replay_replaces_the_directory_scan() {
        let plan = plan(UltraVisionConfig::default(), &["--replay-failures", "failures.log"]).unwrap();
        match plan.options.input {
            InputSource::FailureLog(p) => assert_eq!(p, Path::new("failures.log")),
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[test]
    fn discovery_collects_hosts() {
        let plan = plan(
            UltraVisionConfig::default(),
            &["imgs", "--auto-discover", "--discover-host", "10.0.0.5", "--discover-host", "10.0.0.6"],
        )
        .unwrap();
        assert_eq!(plan.discovery, Some(vec!["10.0.0.5".to_string(), "10.0.0.6".to_string()]));
    }

    #[test]
    fn unknown_format_is_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["ultravision", "imgs", "--format", "xml"]).is_err());
    }

    #[test]
    fn patterns_take_multiple_values() {
        let c = cli(&["imgs", "--patterns", "*.png", "*.jpg", "--recursive"]);
        assert_eq!(c.patterns, vec!["*.png", "*.jpg"]);
        assert!(c.recursive);
    }

    #[test]
    fn discovered_target_respects_explicit_flags() {
        let target = Some(("http://10.0.0.5:1234".to_string(), "qwen2.5-vl-7b".to_string()));

        let mut p = plan(UltraVisionConfig::default(), &["imgs", "--auto-discover"]).unwrap();
        assert!(apply_discovered(&mut p.endpoint, &cli(&["imgs"]), target.clone()));
        assert_eq!(p.endpoint.api_base, "http://10.0.0.5:1234");
        assert_eq!(p.endpoint.model, "qwen2.5-vl-7b");

        let flags = cli(&["imgs", "--model", "pinned"]);
        let mut p = plan(UltraVisionConfig::default(), &["imgs", "--model", "pinned"]).unwrap();
        assert!(apply_discovered(&mut p.endpoint, &flags, target));
        assert_eq!(p.endpoint.model, "pinned");
        assert_eq!(p.endpoint.api_base, "http://10.0.0.5:1234");

        assert!(!apply_discovered(&mut p.endpoint, &flags, None));
    }
}
