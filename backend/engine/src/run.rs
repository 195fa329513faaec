//! One end-to-end batch run.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use ultravision_core::{ImageLoader, InferenceCaller, OutputFormat, UltraError};

use crate::dispatcher::{DispatchStats, RetryingDispatcher};
use crate::failure::FailureSink;
use crate::planner::{discover_candidates, failed_candidates, BatchPlanner, PatternSet, PlanStats};
use crate::resume::ResumeIndex;
use crate::retry::RetryPolicy;
use crate::writer::ResultWriter;

/// Where candidate paths come from.
#[derive(Debug, Clone)]
pub enum InputSource {
    Directory {
        root: PathBuf,
        patterns: Vec<String>,
        recursive: bool,
    },
    /// Re-run the files named in an earlier failure log.
    FailureLog(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: InputSource,
    pub per_request: usize,
    pub limit: Option<usize>,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub resume: bool,
    pub format: OutputFormat,
    pub output: PathBuf,
    pub fail_log: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub plan: PlanStats,
    pub dispatch: DispatchStats,
    pub images_written: usize,
    pub failures_recorded: usize,
    pub output: PathBuf,
    pub fail_log: PathBuf,
}

impl RunSummary {
    pub fn interrupted(&self) -> bool {
        self.dispatch.interrupted
    }
}

pub struct BatchRun {
    options: RunOptions,
    caller: Arc<dyn InferenceCaller>,
    loader: Arc<dyn ImageLoader>,
    run_id: String,
}

impl BatchRun {
    pub fn new(options: RunOptions, caller: Arc<dyn InferenceCaller>, loader: Arc<dyn ImageLoader>) -> Self {
        Self {
            options,
            caller,
            loader,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Plan, dispatch and persist. Only fatal errors are returned; failed
    /// batches end up in the failure log and the summary.
    pub async fn execute(self, shutdown: watch::Receiver<bool>) -> Result<RunSummary, UltraError> {
        let opts = &self.options;
        if opts.resume && !opts.format.supports_resume() {
            return Err(UltraError::ResumeFormat(opts.format.to_string()));
        }

        let candidates = match &opts.input {
            InputSource::Directory { root, patterns, recursive } => {
                let patterns = PatternSet::new(patterns)?;
                discover_candidates(root, &patterns, *recursive)?
            }
            InputSource::FailureLog(path) => failed_candidates(path)?,
        };

        let resume = if opts.resume {
            ResumeIndex::load(&opts.output)?
        } else {
            ResumeIndex::empty()
        };

        info!(
            run_id = %self.run_id,
            candidates = candidates.len(),
            resumed = resume.len(),
            format = %opts.format,
            output = %opts.output.display(),
            "Run planned"
        );

        let mut writer = ResultWriter::open(&opts.output, opts.format, opts.resume)?;
        let mut sink = FailureSink::new(&opts.fail_log);
        let mut planner = BatchPlanner::new(
            candidates,
            self.loader.clone(),
            Arc::new(resume),
            opts.per_request,
            opts.limit,
        );
        let dispatcher = RetryingDispatcher::new(
            self.caller.clone(),
            opts.retry.clone(),
            opts.concurrency,
            self.run_id.clone(),
        );

        let mut images_written = 0usize;
        let outcome = dispatcher
            .run(
                &mut planner,
                |result| {
                    if result.success {
                        writer.write(&result)?;
                        images_written += result.files.len();
                    } else {
                        sink.record(&result);
                    }
                    Ok(())
                },
                shutdown,
            )
            .await;

        let dispatch = match outcome {
            Ok(stats) => stats,
            Err(e) => {
                if let Err(close_err) = writer.close() {
                    warn!(error = %close_err, "Closing output after fatal error also failed");
                }
                return Err(e);
            }
        };
        writer.close()?;

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            plan: planner.stats().clone(),
            dispatch,
            images_written,
            failures_recorded: sink.recorded(),
            output: opts.output.clone(),
            fail_log: opts.fail_log.clone(),
        };
        info!(
            run_id = %summary.run_id,
            succeeded = summary.dispatch.succeeded,
            failed = summary.dispatch.failed,
            images = summary.images_written,
            interrupted = summary.interrupted(),
            "Run finished"
        );
        Ok(summary)
    }
}
