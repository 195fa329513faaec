use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ultravision_core::{BatchResult, UltraError};

/// Human-readable layouts sharing one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    /// `# a.png, b.png` header, then the text.
    Plain,
    /// `### Files` / `### Output` sections separated by rules.
    Markdown,
}

pub struct TextWriter {
    path: PathBuf,
    style: TextStyle,
    out: BufWriter<File>,
}

impl TextWriter {
    pub fn open(path: &Path, style: TextStyle) -> Result<Self, UltraError> {
        let file = File::create(path).map_err(|e| UltraError::writer(path, e))?;
        Ok(Self { path: path.to_path_buf(), style, out: BufWriter::new(file) })
    }

    pub fn write(&mut self, result: &BatchResult) -> Result<(), UltraError> {
        let block = render(self.style, result);
        self.out
            .write_all(block.as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|e| UltraError::writer(&self.path, e))
    }

    pub fn close(mut self) -> Result<(), UltraError> {
        self.out.flush().map_err(|e| UltraError::writer(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn render(style: TextStyle, result: &BatchResult) -> String {
    match style {
        TextStyle::Plain => format!("# {}\n{}\n\n", result.files.join(", "), result.text),
        TextStyle::Markdown => {
            let files: String = result.files.iter().map(|f| format!("- {f}\n")).collect();
            format!("### Files\n{files}\n### Output\n{}\n\n---\n\n", result.text.trim())
        }
    }
}
