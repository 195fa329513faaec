//! Run Event Logger
//!
//! Structured progress events (attempts, retries, completions) emitted through
//! `tracing` under the `run_events` target, so the file layer records them as
//! NDJSON alongside ordinary log lines.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::redact::redact_sensitive_data;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    AttemptStarted {
        batch: u64,
        attempt: u32,
        images: usize,
    },
    AttemptFailed {
        batch: u64,
        attempt: u32,
        error: String,
        retry_in_ms: Option<u64>,
    },
    BatchCompleted {
        batch: u64,
        attempts: u32,
    },
    BatchFailed {
        batch: u64,
        /// Member fingerprints joined with `+`.
        key: String,
        attempts: u32,
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct RunEventEntry<'a> {
    pub run_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub event: RunEvent,
}

pub struct EventLogger;

impl EventLogger {
    /// Log a run event, scrubbing any error text first.
    pub fn log_event(run_id: &str, mut event: RunEvent) {
        let failure = match &mut event {
            RunEvent::AttemptFailed { error, .. } | RunEvent::BatchFailed { error, .. } => {
                *error = redact_sensitive_data(error);
                true
            }
            _ => false,
        };

        let entry = RunEventEntry {
            run_id,
            timestamp: Utc::now(),
            event,
        };
        let json = serde_json::to_string(&entry).unwrap_or_default();

        if failure {
            warn!(target: "run_events", event = %json, "Run event");
        } else {
            info!(target: "run_events", event = %json, "Run event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let entry = RunEventEntry {
            run_id: "r1",
            timestamp: Utc::now(),
            event: RunEvent::AttemptFailed {
                batch: 2,
                attempt: 1,
                error: "timeout".into(),
                retry_in_ms: Some(1000),
            },
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["event"]["type"], "attempt_failed");
        assert_eq!(value["event"]["batch"], 2);
        assert_eq!(value["run_id"], "r1");
    }

    #[test]
    fn failed_batches_carry_their_content_key() {
        let event = RunEvent::BatchFailed {
            batch: 3,
            key: "aa+bb".into(),
            attempts: 5,
            error: "server error (503): busy".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "batch_failed");
        assert_eq!(value["key"], "aa+bb");
    }
}
