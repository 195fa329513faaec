use std::fs::File;
use std::path::{Path, PathBuf};

use ultravision_core::{BatchResult, UltraError};

const HEADER: [&str; 7] = ["files", "sha256", "mime", "size_bytes", "width", "height", "text"];

/// One row per batch. Metadata columns describe the batch's first image.
pub struct CsvWriter {
    path: PathBuf,
    out: csv::Writer<File>,
}

impl CsvWriter {
    pub fn open(path: &Path) -> Result<Self, UltraError> {
        let file = File::create(path).map_err(|e| UltraError::writer(path, e))?;
        let mut out = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        out.write_record(HEADER).map_err(|e| UltraError::writer(path, e.into()))?;
        let mut writer = Self { path: path.to_path_buf(), out };
        writer.flush()?;
        Ok(writer)
    }

    pub fn write(&mut self, result: &BatchResult) -> Result<(), UltraError> {
        let first = result.metas.first();
        let opt = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
        let row = [
            result.files.join(", "),
            first.map(|m| m.sha256.clone()).unwrap_or_default(),
            first.map(|m| m.mime.clone()).unwrap_or_default(),
            first.map(|m| m.size_bytes.to_string()).unwrap_or_default(),
            opt(first.and_then(|m| m.width)),
            opt(first.and_then(|m| m.height)),
            result.text.replace(['\r', '\n'], " ").trim().to_string(),
        ];
        self.out
            .write_record(&row)
            .map_err(|e| UltraError::writer(&self.path, e.into()))?;
        self.flush()
    }

    pub fn close(mut self) -> Result<(), UltraError> {
        self.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&mut self) -> Result<(), UltraError> {
        self.out.flush().map_err(|e| UltraError::writer(&self.path, e))
    }
}
