use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use ultravision_core::UltraError;

use super::OutputRecord;

/// One JSON object per line. The only format that supports resume.
pub struct JsonLinesWriter {
    path: PathBuf,
    file: File,
}

impl JsonLinesWriter {
    pub fn open(path: &Path, append: bool) -> Result<Self, UltraError> {
        let err = |e: std::io::Error| UltraError::writer(path, e);
        let file = if append {
            let mut file = OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(path)
                .map_err(err)?;
            repair_trailing_newline(&mut file).map_err(err)?;
            file
        } else {
            File::create(path).map_err(err)?
        };
        Ok(Self { path: path.to_path_buf(), file })
    }

    pub fn write(&mut self, record: &OutputRecord) -> Result<(), UltraError> {
        let mut line = serde_json::to_vec(record).map_err(|e| UltraError::writer(&self.path, e.into()))?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|_| self.file.flush())
            .map_err(|e| UltraError::writer(&self.path, e))
    }

    pub fn close(mut self) -> Result<(), UltraError> {
        self.file.flush().map_err(|e| UltraError::writer(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A previous run killed mid-line leaves no newline at EOF; start on a fresh
/// line so the partial record stays isolated and ignorable.
fn repair_trailing_newline(file: &mut File) -> std::io::Result<()> {
    if file.metadata()?.len() == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        debug!("Appending newline after truncated final record");
        file.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::result;
    use super::*;

    fn record(i: u64, text: &str) -> OutputRecord {
        OutputRecord::from_result(&result(i, &["a.png"], text))
    }

    #[test]
    fn writes_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut w = JsonLinesWriter::open(&path, false).unwrap();
        w.write(&record(0, "one")).unwrap();
        w.write(&record(1, "two\nlines")).unwrap();
        w.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["files"][0], "a.png");
        assert_eq!(first["text"], "one");
        assert_eq!(first["meta"][0]["sha256"], "sha-a.png");
    }

    #[test]
    fn file_parses_after_every_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut w = JsonLinesWriter::open(&path, false).unwrap();

        for i in 0..5u64 {
            w.write(&record(i, &format!("text {i}\nwith \"quotes\""))).unwrap();

            let content = std::fs::read_to_string(&path).unwrap();
            assert!(content.ends_with('\n'));
            let parsed: Vec<serde_json::Value> = content
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect();
            assert_eq!(parsed.len() as u64, i + 1);
            assert_eq!(parsed[i as usize]["raw"]["id"], i);
        }
        drop(w);
    }

    #[test]
    fn truncates_without_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(&path, "old\n").unwrap();
        JsonLinesWriter::open(&path, false).unwrap().close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn append_repairs_a_torn_final_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(&path, "{\"files\":[\"a\"]}\n{\"files\":[\"b").unwrap();

        let mut w = JsonLinesWriter::open(&path, true).unwrap();
        w.write(&record(2, "fresh")).unwrap();
        w.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let last = content.lines().last().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(last).unwrap();
        assert_eq!(parsed["text"], "fresh");
        assert_eq!(content.lines().count(), 3);
    }
}
