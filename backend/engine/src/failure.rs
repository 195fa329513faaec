//! Failure log: one JSON line per permanently failed batch.
//!
//! The file is created on the first failure only, and problems writing it are
//! logged rather than propagated.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use ultravision_core::BatchResult;

use crate::writer::{ensure_parent, OutputRecord};

/// Default failure log location.
pub const DEFAULT_FAILURE_LOG: &str = "failures.log";

/// An output line record plus why and when the batch gave up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(flatten)]
    pub record: OutputRecord,
    pub batch: u64,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn from_result(result: &BatchResult) -> Self {
        Self {
            record: OutputRecord::from_result(result),
            batch: result.index,
            attempts: result.attempts,
            error: result.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            failed_at: Utc::now(),
        }
    }
}

pub struct FailureSink {
    path: PathBuf,
    file: Option<File>,
    recorded: usize,
    dropped: usize,
}

impl FailureSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: None, recorded: 0, dropped: 0 }
    }

    /// Append a record for a failed batch. Never fails the run.
    pub fn record(&mut self, result: &BatchResult) {
        warn!(
            batch = result.index,
            attempts = result.attempts,
            files = %result.files.join(", "),
            error = result.error.as_deref().unwrap_or(""),
            "Batch failed permanently"
        );
        match self.try_record(&FailureRecord::from_result(result)) {
            Ok(()) => self.recorded += 1,
            Err(e) => {
                self.dropped += 1;
                error!(path = %self.path.display(), error = %e, "Could not write failure log");
            }
        }
    }

    fn try_record(&mut self, record: &FailureRecord) -> anyhow::Result<()> {
        if self.file.is_none() {
            ensure_parent(&self.path)?;
            self.file = Some(File::create(&self.path)?);
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        if let Some(file) = self.file.as_mut() {
            file.write_all(&line)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Records successfully written.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Records lost to I/O errors.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
