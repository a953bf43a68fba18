//! External collaborators of the pipeline.
//!
//! Every step whose content algorithm lives elsewhere (bundling,
//! transpiling, minifying, generating entries and documentation, scanning
//! for stray characters) is reached through [`ExternalTool`]. The pipeline
//! only cares about the files going in, the files coming out, and the
//! diagnostics reported on the way.

mod ascii;
mod command;

use std::collections::BTreeMap;

use camino::Utf8PathBuf;

use crate::engine::{CancelToken, Completion};
use crate::error::ToolError;

pub use crate::tool::ascii::AsciiValidator;
pub use crate::tool::command::{CommandTool, ToolCommand};

/// Whether a tool runs inside the orchestrator or in a fresh process per
/// invocation. This is a deployment choice, results are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    InProcess,
    Subprocess,
}

/// Files handed to a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolInput {
    pub inputs: Vec<Utf8PathBuf>,
    pub output: Utf8PathBuf,
    /// Named values a tool may refer to, e.g. `banner` or `symbols`.
    pub extra: BTreeMap<&'static str, String>,
}

impl ToolInput {
    pub fn new(inputs: impl IntoIterator<Item = Utf8PathBuf>, output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            output: output.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.extra.insert(key, value.into());
        self
    }
}

/// What a successful tool invocation produced.
#[derive(Debug, Clone, Default)]
pub struct ToolReport {
    pub artifacts: Vec<Utf8PathBuf>,
    pub warnings: Vec<String>,
}

/// A single external unit of work.
pub trait ExternalTool: Send + Sync {
    fn name(&self) -> &str;

    fn isolation(&self) -> Isolation {
        Isolation::InProcess
    }

    /// Runs the tool. Implementations which spawn processes should watch
    /// `cancel` and terminate their child once it is triggered.
    fn run(&self, input: &ToolInput, cancel: &CancelToken) -> Result<ToolReport, ToolError>;
}

/// Converts the result of a tool into the outcome of the task owning it:
/// warnings alone make a warning, any error makes a failure.
pub fn complete(result: Result<ToolReport, ToolError>) -> anyhow::Result<Completion> {
    match result {
        Ok(report) => Ok(Completion::from_warnings(report.warnings)),
        Err(error) => {
            for warning in &error.warnings {
                tracing::warn!("{}: {}", error.tool, warning);
            }
            Err(error.into())
        }
    }
}
