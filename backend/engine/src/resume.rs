//! Resume index: fingerprints of every image already present in a JSONL output.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

use ultravision_core::UltraError;

#[derive(Deserialize)]
struct RecordMeta {
    #[serde(default)]
    meta: Vec<MetaFingerprint>,
}

#[derive(Deserialize)]
struct MetaFingerprint {
    #[serde(default)]
    sha256: Option<String>,
}

/// Read-only set of fingerprints, built once before submission starts.
#[derive(Debug, Clone, Default)]
pub struct ResumeIndex {
    fingerprints: HashSet<String>,
}

impl ResumeIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from an existing JSONL output. A missing file is an empty index;
    /// lines that do not parse are skipped.
    pub fn load(path: &Path) -> Result<Self, UltraError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No previous output; resume index empty");
                return Ok(Self::empty());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("reading resume source {}", path.display()))
                    .into())
            }
        };
        let index = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("reading resume source {}", path.display()))?;
        info!(path = %path.display(), fingerprints = index.len(), "Loaded resume index");
        Ok(index)
    }

    /// Scan JSONL lines. Only I/O failures are errors; malformed lines
    /// (including a truncated final line) contribute nothing.
    pub fn from_reader(mut reader: impl BufRead) -> std::io::Result<Self> {
        let mut fingerprints = HashSet::new();
        let mut line = Vec::new();
        let mut skipped = 0usize;
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_slice::<RecordMeta>(trimmed) {
                Ok(record) => fingerprints.extend(record.meta.into_iter().filter_map(|m| m.sha256)),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(skipped, "Ignored unparseable lines in resume source");
        }
        Ok(Self { fingerprints })
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn collects_fingerprints_from_every_record() {
        let data = concat!(
            r#"{"files":["a.png","b.png"],"text":"x","raw":{},"meta":[{"sha256":"aa"},{"sha256":"bb"}]}"#,
            "\n",
            r#"{"files":["c.png"],"text":"y","raw":{},"meta":[{"sha256":"cc"}]}"#,
            "\n",
        );
        let index = ResumeIndex::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.contains("aa") && index.contains("bb") && index.contains("cc"));
    }

    #[test]
    fn skips_garbage_and_truncated_lines() {
        let data = concat!(
            "not json\n",
            "\n",
            r#"{"files":[],"meta":[{"sha256":"aa"},{"file":"no-hash"}]}"#,
            "\n",
            r#"{"files":["c.png"],"meta":[{"sha2"#,
        );
        let index = ResumeIndex::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains("aa"));
    }

    #[test]
    fn missing_file_is_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = ResumeIndex::load(&dir.path().join("nope.jsonl")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(&path, "{\"meta\":[{\"sha256\":\"ff\"}]}\n").unwrap();
        let index = ResumeIndex::load(&path).unwrap();
        assert!(index.contains("ff"));
    }
}
