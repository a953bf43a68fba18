use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::engine::CancelToken;
use crate::error::ToolError;
use crate::tool::{ExternalTool, ToolInput, ToolReport};

/// Scans text files for characters outside of ASCII.
///
/// Each input may be a file or a directory, directories are searched
/// recursively for files with one of the configured extensions.
#[derive(Debug, Clone)]
pub struct AsciiValidator {
    extensions: Vec<String>,
}

impl AsciiValidator {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    fn files(&self, input: &Utf8Path) -> Result<Vec<Utf8PathBuf>, String> {
        if input.is_file() {
            return Ok(vec![input.to_path_buf()]);
        }

        let pattern = format!("{}/**/*", glob::Pattern::escape(input.as_str()));
        let mut files = Vec::new();

        for entry in glob::glob(&pattern).map_err(|e| e.to_string())? {
            let path = entry.map_err(|e| e.to_string())?;
            let path = Utf8PathBuf::try_from(path).map_err(|e| e.to_string())?;

            let wanted = path
                .extension()
                .is_some_and(|ext| self.extensions.iter().any(|e| e == ext));

            if wanted && path.is_file() {
                files.push(path);
            }
        }

        Ok(files)
    }
}

impl Default for AsciiValidator {
    fn default() -> Self {
        Self::new(["js", "mjs", "cjs", "ts", "md"])
    }
}

impl ExternalTool for AsciiValidator {
    fn name(&self) -> &str {
        "ascii-validator"
    }

    fn run(&self, input: &ToolInput, cancel: &CancelToken) -> Result<ToolReport, ToolError> {
        let mut error = ToolError::new(self.name());
        let mut scanned = 0;

        for root in &input.inputs {
            let files = match self.files(root) {
                Ok(files) => files,
                Err(e) => {
                    error.errors.push(format!("{root}: {e}"));
                    continue;
                }
            };

            for file in files {
                if cancel.is_cancelled() {
                    return Err(error.with_error("Cancelled"));
                }

                match fs::read(&file) {
                    Ok(bytes) => error.errors.extend(scan(&file, &bytes)),
                    Err(e) => error.errors.push(format!("{file}: {e}")),
                }
                scanned += 1;
            }
        }

        tracing::debug!("scanned {} file(s) for non-ASCII characters", scanned);

        if error.errors.is_empty() {
            Ok(ToolReport::default())
        } else {
            Err(error)
        }
    }
}

/// Returns one diagnostic per non-ASCII character, as `path:line:column`.
fn scan(path: &Utf8Path, bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut found = Vec::new();

    for (row, line) in text.lines().enumerate() {
        for (col, c) in line.chars().enumerate() {
            if !c.is_ascii() {
                found.push(format!(
                    "{path}:{}:{}: non-ASCII character U+{:04X}",
                    row + 1,
                    col + 1,
                    c as u32
                ));
            }
        }
    }

    found
}
