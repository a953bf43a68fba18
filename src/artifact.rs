//! Writing generated files.

use std::fs;
use std::io::{self, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ArtifactWriteError;

/// Contents of the generated version marker module.
pub fn version_marker(version: &str) -> String {
    format!("export const VERSION = \"{version}\";\n")
}

/// Writes artifacts below a root directory. Relative paths are resolved
/// against the root, absolute paths are used as they are.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: Utf8PathBuf,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn resolve(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    /// Replaces the file at `path` with `content`, creating parent
    /// directories as needed. The file is flushed and closed before this
    /// returns, on success and on error alike.
    pub fn write(
        &self,
        path: impl AsRef<Utf8Path>,
        content: impl AsRef<[u8]>,
    ) -> Result<Utf8PathBuf, ArtifactWriteError> {
        let path = self.resolve(path);

        match write_file(&path, content.as_ref()) {
            Ok(()) => {
                tracing::debug!("wrote {}", path);
                Ok(path)
            }
            Err(cause) => Err(ArtifactWriteError { path, cause }),
        }
    }
}

fn write_file(path: &Utf8Path, content: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let mut writer = BufWriter::new(fs::File::create(path)?);
    writer.write_all(content)?;

    let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.sync_all()
}
