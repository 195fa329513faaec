//! Bounded-concurrency dispatcher with per-batch retry and ordered fan-in.
//!
//! Batches are pulled from a [`BatchSource`] and handed to worker tasks on a
//! `JoinSet`, never more than `concurrency` at a time. Each worker owns its
//! batch's retry loop. Completions are re-sequenced by batch index before
//! reaching the delivery callback, so consumers always observe batch 0, 1, 2…
//! regardless of which worker finished first. Submission also pauses while
//! too many finished batches wait behind a slow one.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use logging::{EventLogger, RunEvent};
use ultravision_core::{Batch, BatchResult, InferenceCaller, UltraError};

use crate::reorder::ReorderBuffer;
use crate::retry::{RetryPolicy, RetryState};

/// Undelivered batches (running plus held for reordering) allowed per worker.
const REORDER_WINDOW_PER_WORKER: usize = 4;

/// Pull-based producer of batches, consumed one at a time.
#[async_trait]
pub trait BatchSource: Send {
    async fn next_batch(&mut self) -> Option<Batch>;
}

#[async_trait]
impl BatchSource for std::vec::IntoIter<Batch> {
    async fn next_batch(&mut self) -> Option<Batch> {
        self.next()
    }
}

/// Counters reported after dispatch ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Batches submitted but never delivered because of an interrupt.
    pub abandoned: u64,
    pub interrupted: bool,
}

pub struct RetryingDispatcher {
    caller: Arc<dyn InferenceCaller>,
    policy: RetryPolicy,
    concurrency: usize,
    run_id: String,
}

impl RetryingDispatcher {
    pub fn new(caller: Arc<dyn InferenceCaller>, policy: RetryPolicy, concurrency: usize, run_id: impl Into<String>) -> Self {
        Self {
            caller,
            policy,
            concurrency: concurrency.max(1),
            run_id: run_id.into(),
        }
    }

    /// Drive `source` to exhaustion, delivering every result in index order.
    ///
    /// An error from `deliver` is fatal: submission stops and in-flight work
    /// is dropped. Flipping `shutdown` to `true` stops submission; completions
    /// still queued behind an undelivered batch are discarded.
    pub async fn run<S, F>(
        &self,
        source: &mut S,
        mut deliver: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DispatchStats, UltraError>
    where
        S: BatchSource + ?Sized,
        F: FnMut(BatchResult) -> Result<(), UltraError>,
    {
        let mut stats = DispatchStats::default();
        let mut in_flight: JoinSet<BatchResult> = JoinSet::new();
        let mut reorder = ReorderBuffer::new();
        let mut exhausted = false;
        let window = self.concurrency.saturating_mul(REORDER_WINDOW_PER_WORKER);

        info!(caller = self.caller.name(), concurrency = self.concurrency, "Dispatch started");

        loop {
            if *shutdown.borrow() {
                stats.interrupted = true;
                break;
            }

            let has_slot = in_flight.len() < self.concurrency
                && in_flight.len() + reorder.pending_len() < window;
            if !exhausted && has_slot {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => continue,
                    next = source.next_batch() => {
                        match next {
                            Some(batch) => {
                                debug!(batch = batch.index, key = %batch.key(), images = batch.len(), "Submitting batch");
                                stats.submitted += 1;
                                in_flight.spawn(dispatch_with_retry(
                                    self.caller.clone(),
                                    self.policy.clone(),
                                    batch,
                                    self.run_id.clone(),
                                ));
                            }
                            None => exhausted = true,
                        }
                        continue;
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => continue,
                joined = in_flight.join_next() => {
                    let Some(joined) = joined else { continue };
                    let result = joined.map_err(|e| {
                        error!(error = %e, "Batch worker panicked");
                        UltraError::Other(anyhow!("batch worker failed: {e}"))
                    })?;
                    for ready in reorder.push(result.index, result) {
                        if ready.success {
                            stats.succeeded += 1;
                        } else {
                            stats.failed += 1;
                        }
                        deliver(ready)?;
                    }
                }
            }
        }

        if stats.interrupted {
            stats.abandoned = stats.submitted - stats.succeeded - stats.failed;
            warn!(abandoned = stats.abandoned, "Dispatch interrupted");
            in_flight.abort_all();
        }
        info!(
            submitted = stats.submitted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Dispatch finished"
        );
        Ok(stats)
    }
}

/// Resolves once shutdown is requested; pends forever if the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn dispatch_with_retry(
    caller: Arc<dyn InferenceCaller>,
    policy: RetryPolicy,
    batch: Batch,
    run_id: String,
) -> BatchResult {
    let mut state = RetryState::default();
    loop {
        let attempt = state.attempt + 1;
        EventLogger::log_event(
            &run_id,
            RunEvent::AttemptStarted { batch: batch.index, attempt, images: batch.len() },
        );

        match caller.send(&batch).await {
            Ok(reply) => {
                EventLogger::log_event(&run_id, RunEvent::BatchCompleted { batch: batch.index, attempts: attempt });
                return BatchResult::succeeded(&batch, reply.text, reply.raw, attempt);
            }
            Err(err) => {
                let delay = state.record_failure(&policy, &err);
                EventLogger::log_event(
                    &run_id,
                    RunEvent::AttemptFailed {
                        batch: batch.index,
                        attempt,
                        error: err.to_string(),
                        retry_in_ms: delay.map(|d| d.as_millis() as u64),
                    },
                );
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        EventLogger::log_event(
                            &run_id,
                            RunEvent::BatchFailed {
                                batch: batch.index,
                                key: batch.key(),
                                attempts: attempt,
                                error: err.to_string(),
                            },
                        );
                        return BatchResult::failed(&batch, err.to_string(), attempt);
                    }
                }
            }
        }
    }
}
