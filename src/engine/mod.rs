mod graph;
mod plan;
mod runner;

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;

pub use crate::engine::graph::{TaskDef, TaskGraph};
pub use crate::engine::plan::{ExecutionPlan, Stage};
pub use crate::engine::runner::{Outcome, RunReport, RunStatus, Scheduler, TaskRecord};
#[cfg(feature = "live")]
pub use crate::engine::runner::watch;

/// The body of a task. It receives a [`TaskContext`] and either completes,
/// possibly with warnings, or returns an error which fails the task.
pub type Action = Arc<dyn Fn(&TaskContext) -> anyhow::Result<Completion> + Send + Sync>;

/// What a task action reports when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Success,
    Warning(Vec<String>),
}

impl Completion {
    /// Success when the list is empty, otherwise a warning carrying it.
    pub fn from_warnings(warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            Completion::Success
        } else {
            Completion::Warning(warnings)
        }
    }
}

/// A single named node in the [`TaskGraph`].
pub struct Task {
    pub(crate) name: Cow<'static, str>,
    pub(crate) depends_on: Vec<Cow<'static, str>>,
    pub(crate) outputs: Vec<Utf8PathBuf>,
    pub(crate) action: Action,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends_on(&self) -> impl Iterator<Item = &str> {
        self.depends_on.iter().map(AsRef::as_ref)
    }

    pub fn outputs(&self) -> &[Utf8PathBuf] {
        &self.outputs
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Data handed to a running task.
pub struct TaskContext<'a> {
    pub name: &'a str,
    pub cancel: &'a CancelToken,
    pub span: tracing::Span,
}

/// Cooperative cancellation flag shared between the scheduler, the watch
/// loop and the tools they run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
