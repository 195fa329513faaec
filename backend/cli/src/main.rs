mod settings;
mod terminal_output;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use logging::{init_logger, mask_secret, redact_sensitive_data};
use ultravision_config::{config_dir, config_file_path, finalize_config, load_config, resolve_config};
use ultravision_core::UltraError;
use ultravision_discovery::VisionModelDiscovery;
use ultravision_engine::{BatchRun, RunSummary};
use ultravision_inference::ChatCompletionsClient;
use ultravision_media::FsImageLoader;

use settings::{apply_cli_overrides, apply_discovered, build_plan, Cli};
use terminal_output::{note_error, note_info, note_success, note_warn, render_summary};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(summary) => {
            report(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            note_error(&redact_sensitive_data(&format!("{e:#}")));
            if e.is_usage() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary, UltraError> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_file_path(&config_dir()));

    let cfg = load_config(&config_path).await.map_err(config_error)?;
    let cfg = resolve_config(cfg, &config_path).map_err(config_error)?;
    let cfg = apply_cli_overrides(cfg, &cli)?;

    let logging = cfg.logging.clone().unwrap_or_default();
    init_logger(logging.level.as_deref().unwrap_or("info"), logging.dir.as_deref());

    let cfg = finalize_config(cfg, &config_path).map_err(config_error)?;
    let mut plan = build_plan(&cfg, &cli)?;

    if let Some(hosts) = plan.discovery.take() {
        note_info("Looking for local vision models...");
        let report = VisionModelDiscovery::new().with_hosts(hosts).discover().await;
        if apply_discovered(&mut plan.endpoint, &cli, report.first_target()) {
            note_info(&format!("Using {} at {}", plan.endpoint.model, plan.endpoint.api_base));
        } else {
            note_warn("No vision models discovered; using the configured endpoint");
        }
    }

    info!(
        api_base = %plan.endpoint.api_base,
        model = %plan.endpoint.model,
        api_key = %mask_secret(&plan.endpoint.api_key),
        format = plan.options.format.as_str(),
        output = %plan.options.output.display(),
        "Starting run"
    );

    let caller = ChatCompletionsClient::new(plan.endpoint, plan.prompt).map_err(UltraError::Other)?;
    let loader = FsImageLoader::new().with_transform(plan.transform);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping submission");
            let _ = shutdown_tx.send(true);
        }
    });

    BatchRun::new(plan.options, Arc::new(caller), Arc::new(loader))
        .execute(shutdown_rx)
        .await
}

fn config_error(e: anyhow::Error) -> UltraError {
    UltraError::ConfigError(format!("{e:#}"))
}

fn report(summary: &RunSummary) {
    if summary.plan.discovered == 0 {
        note_warn("No matching images found");
    }
    print!("{}", render_summary(summary));

    if summary.dispatch.succeeded > 0 || summary.plan.accepted == 0 {
        note_success(&format!("Output: {}", summary.output.display()));
    }
    if summary.failures_recorded > 0 {
        note_warn(&format!(
            "{} failed batch(es) logged to {}",
            summary.failures_recorded,
            summary.fail_log.display()
        ));
    }
    if summary.interrupted() {
        note_warn("Run interrupted; in-flight batches were abandoned");
    }
}
