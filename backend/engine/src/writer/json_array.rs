use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use ultravision_core::UltraError;

use super::OutputRecord;

/// Buffers records and writes a single JSON array on close.
///
/// A stale file from an earlier run is removed at open, so the path either
/// does not exist or holds a complete array.
pub struct JsonArrayWriter {
    path: PathBuf,
    records: Vec<OutputRecord>,
}

impl JsonArrayWriter {
    pub fn open(path: &Path) -> Result<Self, UltraError> {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale JSON output"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(UltraError::writer(path, e)),
        }
        Ok(Self { path: path.to_path_buf(), records: Vec::new() })
    }

    pub fn push(&mut self, record: OutputRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write to a sibling temp file, then rename over the target.
    pub fn close(self) -> Result<(), UltraError> {
        let tmp_path = tmp_path_for(&self.path);
        let err = |e: std::io::Error| UltraError::writer(&self.path, e);

        let file = File::create(&tmp_path).map_err(err)?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, &self.records).map_err(|e| err(e.into()))?;
        out.write_all(b"\n").map_err(err)?;
        let file = out.into_inner().map_err(|e| err(e.into_error()))?;
        file.sync_all().map_err(err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(err)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
