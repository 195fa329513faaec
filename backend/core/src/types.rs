use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Per-image metadata as persisted in output records.
///
/// `sha256` is always the digest of the raw file bytes. `width`/`height`/`mode`
/// describe the payload that was actually sent, which differs from the file on
/// disk when autorotate or downscaling is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub file: String,
    pub size_bytes: u64,
    pub mime: String,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// A discovered image, ready to be sent.
///
/// Created once by the loader and never mutated afterwards. The payload is
/// reference-counted so handing an `ImageRef` to a worker task is cheap.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub path: PathBuf,
    pub meta: ImageMeta,
    pub payload: Bytes,
}

impl ImageRef {
    pub fn fingerprint(&self) -> &str {
        &self.meta.sha256
    }

    pub fn mime(&self) -> &str {
        &self.meta.mime
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An ordered group of images sent together in one inference call.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Monotonic submission index, starting at 0.
    pub index: u64,
    pub images: Vec<ImageRef>,
}

impl Batch {
    pub fn new(index: u64, images: Vec<ImageRef>) -> Self {
        Self { index, images }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Composite key: member fingerprints joined with `+`, in batch order.
    pub fn key(&self) -> String {
        self.images
            .iter()
            .map(ImageRef::fingerprint)
            .collect::<Vec<_>>()
            .join("+")
    }

    pub fn files(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|img| img.path.display().to_string())
            .collect()
    }

    pub fn metas(&self) -> Vec<ImageMeta> {
        self.images.iter().map(|img| img.meta.clone()).collect()
    }
}

/// Outcome of dispatching one batch, success or permanent failure.
///
/// Payload bytes are dropped at this point; only the metadata travels on to
/// the writer or the failure sink.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub index: u64,
    pub files: Vec<String>,
    pub metas: Vec<ImageMeta>,
    pub text: String,
    pub raw: Option<serde_json::Value>,
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

impl BatchResult {
    pub fn succeeded(batch: &Batch, text: String, raw: serde_json::Value, attempts: u32) -> Self {
        Self {
            index: batch.index,
            files: batch.files(),
            metas: batch.metas(),
            text,
            raw: Some(raw),
            success: true,
            attempts,
            error: None,
        }
    }

    pub fn failed(batch: &Batch, error: String, attempts: u32) -> Self {
        Self {
            index: batch.index,
            files: batch.files(),
            metas: batch.metas(),
            text: String::new(),
            raw: None,
            success: false,
            attempts,
            error: Some(error),
        }
    }
}

/// Output serialization formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Json,
    Text,
    Markdown,
    Csv,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Jsonl,
        OutputFormat::Json,
        OutputFormat::Text,
        OutputFormat::Markdown,
        OutputFormat::Csv,
    ];

    /// File extension used for the default output path.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Json => "json",
            OutputFormat::Text => "txt",
            OutputFormat::Markdown => "md",
            OutputFormat::Csv => "csv",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
            OutputFormat::Markdown => "markdown",
            OutputFormat::Csv => "csv",
        }
    }

    /// Only the line-record format can be scanned back for resume.
    pub fn supports_resume(self) -> bool {
        matches!(self, OutputFormat::Jsonl)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonl" => Ok(OutputFormat::Jsonl),
            "json" => Ok(OutputFormat::Json),
            "text" | "txt" => Ok(OutputFormat::Text),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!(
                "unknown output format '{other}' (expected jsonl, json, text, markdown or csv)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str, sha: &str) -> ImageRef {
        ImageRef {
            path: PathBuf::from(name),
            meta: ImageMeta {
                file: name.to_string(),
                size_bytes: 3,
                mime: "image/png".into(),
                sha256: sha.into(),
                width: None,
                height: None,
                mode: None,
            },
            payload: Bytes::from_static(b"abc"),
        }
    }

    #[test]
    fn batch_key_joins_fingerprints_in_order() {
        let batch = Batch::new(0, vec![image("a.png", "aa"), image("b.png", "bb")]);
        assert_eq!(batch.key(), "aa+bb");
        assert_eq!(batch.files(), vec!["a.png", "b.png"]);
    }

    #[test]
    fn failed_result_carries_metadata_but_no_text() {
        let batch = Batch::new(4, vec![image("a.png", "aa")]);
        let result = BatchResult::failed(&batch, "boom".into(), 3);
        assert!(!result.success);
        assert_eq!(result.index, 4);
        assert_eq!(result.metas[0].sha256, "aa");
        assert!(result.raw.is_none());
    }

    #[test]
    fn output_format_parses_aliases() {
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!("TXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("yaml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Text.extension(), "txt");
    }

    #[test]
    fn meta_omits_missing_dimensions() {
        let meta = image("a.png", "aa").meta;
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("width").is_none());
        assert_eq!(json["sha256"], "aa");
    }
}
