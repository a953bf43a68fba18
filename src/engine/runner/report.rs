use std::fmt::{Display, Formatter, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;

use crate::engine::TaskGraph;

/// Terminal state of a task within one run.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The run ended, or was cancelled, before the task started.
    NotRun,
    Success,
    Warning(Vec<String>),
    Failure(Arc<anyhow::Error>),
    /// Not started because the named task failed upstream.
    Skipped(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::NotRun => "not run",
            Outcome::Success => "ok",
            Outcome::Warning(_) => "warning",
            Outcome::Failure(_) => "failed",
            Outcome::Skipped(_) => "skipped",
        }
    }

    /// First line of whatever the task reported.
    fn headline(&self) -> Option<String> {
        match self {
            Outcome::Warning(warnings) => warnings.first().cloned(),
            Outcome::Failure(e) => format!("{e:#}").lines().next().map(str::to_string),
            Outcome::Skipped(cause) => Some(format!("{cause} failed")),
            Outcome::NotRun | Outcome::Success => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub name: String,
    pub outcome: Outcome,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl TaskRecord {
    pub(crate) fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::NotRun,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        Some(self.finished_at?.duration_since(self.started_at?))
    }
}

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Warning,
    Failure,
    Cancelled,
}

/// Record of a single [`Scheduler::run`](crate::Scheduler::run) invocation,
/// one entry per planned task in plan order.
#[derive(Debug, Clone)]
pub struct RunReport {
    records: Vec<TaskRecord>,
    started_at: Instant,
    finished_at: Instant,
    cancelled: bool,
}

impl RunReport {
    pub(crate) fn new(records: Vec<TaskRecord>, started_at: Instant, cancelled: bool) -> Self {
        Self {
            records,
            started_at,
            finished_at: Instant::now(),
            cancelled,
        }
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    pub fn get(&self, name: &str) -> Option<&TaskRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.get(name).map(|record| &record.outcome)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter().filter(|r| r.outcome.is_failure())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter().filter(|r| r.outcome.is_skipped())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn duration(&self) -> Duration {
        self.finished_at.duration_since(self.started_at)
    }

    pub fn status(&self) -> RunStatus {
        if self.failed().next().is_some() {
            RunStatus::Failure
        } else if self.cancelled {
            RunStatus::Cancelled
        } else if self
            .records
            .iter()
            .any(|r| matches!(r.outcome, Outcome::Warning(_)))
        {
            RunStatus::Warning
        } else {
            RunStatus::Success
        }
    }

    /// True when nothing failed and the run was not cancelled.
    pub fn is_success(&self) -> bool {
        matches!(self.status(), RunStatus::Success | RunStatus::Warning)
    }

    /// Renders the graph as a Mermaid diagram, coloured by outcome.
    ///
    /// * **Green**: Success
    /// * **Yellow**: Warning
    /// * **Red**: Failure
    /// * **Grey**: Skipped or not part of this run
    pub fn render_mermaid(&self, graph: &TaskGraph) -> String {
        let mut f = String::new();
        writeln!(f, "graph LR").unwrap();

        for index in graph.graph.node_indices() {
            let name = graph.graph[index].name();
            let record = self.get(name);

            let (label, color) = match record.map(|r| &r.outcome) {
                Some(Outcome::Success) => ("ok", "#90EE90"),
                Some(Outcome::Warning(_)) => ("warning", "#FFD700"),
                Some(Outcome::Failure(_)) => ("failed", "#FF6347"),
                Some(Outcome::Skipped(_)) => ("skipped", "#D3D3D3"),
                Some(Outcome::NotRun) | None => ("not run", "#D3D3D3"),
            };

            let timing = record
                .and_then(TaskRecord::duration)
                .map(|d| format!(" {d:.2?}"))
                .unwrap_or_default();

            let name = name.replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\\n{}{}\"]", index.index(), name, label, timing).unwrap();
            writeln!(f, "    style {} fill:{}", index.index(), color).unwrap();
        }

        for edge in graph.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )
            .unwrap();
        }

        f
    }
}

impl Display for RunReport {
    /// Per-task summary followed by the overall verdict.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self
            .records
            .iter()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0);

        for record in &self.records {
            let label = record.outcome.label();
            let label = match record.outcome {
                Outcome::Success => style(label).green(),
                Outcome::Warning(_) => style(label).yellow(),
                Outcome::Failure(_) => style(label).red(),
                Outcome::Skipped(_) | Outcome::NotRun => style(label).dim(),
            };

            let duration = record
                .duration()
                .map(|d| format!("{d:.2?}"))
                .unwrap_or_else(|| String::from("-"));

            write!(f, "  {:<width$}  {:<8}  {:>10}", record.name, label, duration)?;
            if let Some(headline) = record.outcome.headline() {
                write!(f, "  {headline}")?;
            }
            writeln!(f)?;
        }

        let failed = self.failed().count();
        let skipped = self.skipped().count();
        let verdict = match self.status() {
            RunStatus::Success => style("success").green().bold(),
            RunStatus::Warning => style("success with warnings").yellow().bold(),
            RunStatus::Failure => style("failure").red().bold(),
            RunStatus::Cancelled => style("cancelled").dim().bold(),
        };

        write!(
            f,
            "{verdict} in {:.2?} ({} task(s), {failed} failed, {skipped} skipped)",
            self.duration(),
            self.records.len()
        )
    }
}
