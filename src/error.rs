use std::fmt::{Display, Formatter};

use camino::Utf8PathBuf;
use thiserror::Error;

/// Problems with the shape of the task graph. These are detected before any
/// task runs, and a pipeline that hits one never starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task '{task}' depends on '{dependency}', which is not registered yet")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{0}' is not part of the graph")]
    UnknownTask(String),

    #[error("Output '{path}' is declared by both '{first}' and '{second}'")]
    DuplicateOutput {
        path: Utf8PathBuf,
        first: String,
        second: String,
    },

    #[error("Output '{path}' of '{second}' overlaps '{other}' of '{first}', which it does not depend on")]
    OverlappingOutputs {
        path: Utf8PathBuf,
        other: Utf8PathBuf,
        first: String,
        second: String,
    },

    #[error("Dependency cycle detected through task '{0}'")]
    CycleDetected(String),
}

/// A generated file could not be written.
#[derive(Debug, Error)]
#[error("Couldn't write artifact '{path}'.\n{cause}")]
pub struct ArtifactWriteError {
    pub path: Utf8PathBuf,
    #[source]
    pub cause: std::io::Error,
}

#[derive(Debug, Error)]
pub enum ManifestReadError {
    #[error("Couldn't read manifest '{path}'.\n{source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Manifest '{path}' is not valid JSON.\n{source}")]
    Malformed {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },

    #[error("Manifest '{0}' has no string field 'version'")]
    MissingVersion(Utf8PathBuf),
}

/// Diagnostics reported by an external tool which failed. The errors are
/// kept verbatim, warnings collected on the way are carried along so the
/// caller can surface both.
#[derive(Debug, Clone, Default)]
pub struct ToolError {
    pub tool: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ToolError {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }
}

impl Display for ToolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tool '{}' reported {} error(s)", self.tool, self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ToolError {}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error("File watcher disconnected")]
    Disconnected,

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[derive(Debug, Error)]
pub enum KumitateError {
    #[error("Invalid task graph.\n{0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Couldn't read config file '{path}'.\n{source}")]
    ConfigRead {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Config file '{path}' is malformed.\n{source}")]
    ConfigFormat {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}
