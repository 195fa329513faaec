//! Result writers, one per output format.
//!
//! Every writer flushes after each record so a crash loses at most the record
//! being written. The JSON array format is the exception: it buffers in memory
//! and publishes the file atomically on close.

mod json_array;
mod jsonl;
mod tabular;
mod text;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ultravision_core::{BatchResult, ImageMeta, OutputFormat, UltraError};

pub use json_array::JsonArrayWriter;
pub use jsonl::JsonLinesWriter;
pub use tabular::CsvWriter;
pub use text::{TextStyle, TextWriter};

/// One persisted batch, as it appears in JSONL and JSON outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub files: Vec<String>,
    pub text: String,
    pub raw: Value,
    pub meta: Vec<ImageMeta>,
}

impl OutputRecord {
    pub fn from_result(result: &BatchResult) -> Self {
        Self {
            files: result.files.clone(),
            text: result.text.clone(),
            raw: result.raw.clone().unwrap_or(Value::Null),
            meta: result.metas.clone(),
        }
    }
}

/// Writer for the configured output format.
pub enum ResultWriter {
    JsonLines(JsonLinesWriter),
    Json(JsonArrayWriter),
    Text(TextWriter),
    Csv(CsvWriter),
}

impl ResultWriter {
    /// Open `path` for `format`. `append` keeps existing JSONL content; every
    /// other format starts from an empty artifact.
    pub fn open(path: &Path, format: OutputFormat, append: bool) -> Result<Self, UltraError> {
        ensure_parent(path)?;
        let writer = match format {
            OutputFormat::Jsonl => Self::JsonLines(JsonLinesWriter::open(path, append)?),
            OutputFormat::Json => Self::Json(JsonArrayWriter::open(path)?),
            OutputFormat::Text => Self::Text(TextWriter::open(path, TextStyle::Plain)?),
            OutputFormat::Markdown => Self::Text(TextWriter::open(path, TextStyle::Markdown)?),
            OutputFormat::Csv => Self::Csv(CsvWriter::open(path)?),
        };
        Ok(writer)
    }

    /// Persist one successful batch.
    pub fn write(&mut self, result: &BatchResult) -> Result<(), UltraError> {
        match self {
            Self::JsonLines(w) => w.write(&OutputRecord::from_result(result)),
            Self::Json(w) => {
                w.push(OutputRecord::from_result(result));
                Ok(())
            }
            Self::Text(w) => w.write(result),
            Self::Csv(w) => w.write(result),
        }
    }

    /// Finish the artifact. For JSON this is when the file appears.
    pub fn close(self) -> Result<(), UltraError> {
        match self {
            Self::JsonLines(w) => w.close(),
            Self::Json(w) => w.close(),
            Self::Text(w) => w.close(),
            Self::Csv(w) => w.close(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::JsonLines(w) => w.path(),
            Self::Json(w) => w.path(),
            Self::Text(w) => w.path(),
            Self::Csv(w) => w.path(),
        }
    }
}

/// Default output file name for a format: `outputs.<ext>`.
pub fn default_output_path(format: OutputFormat) -> PathBuf {
    PathBuf::from(format!("outputs.{}", format.extension()))
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), UltraError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| UltraError::writer(path, e))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn result(index: u64, files: &[&str], text: &str) -> BatchResult {
        let metas = files
            .iter()
            .map(|f| ImageMeta {
                file: f.to_string(),
                size_bytes: 3,
                mime: "image/png".into(),
                sha256: format!("sha-{f}"),
                width: Some(4),
                height: Some(2),
                mode: Some("RGB".into()),
            })
            .collect();
        BatchResult {
            index,
            files: files.iter().map(|f| f.to_string()).collect(),
            metas,
            text: text.into(),
            raw: Some(serde_json::json!({"id": index})),
            success: true,
            attempts: 1,
            error: None,
        }
    }
}
