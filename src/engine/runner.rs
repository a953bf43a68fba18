mod report;
#[cfg(feature = "live")]
pub mod watch;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{CancelToken, Completion, ExecutionPlan, Task, TaskContext, TaskGraph};

pub use report::{Outcome, RunReport, RunStatus, TaskRecord};

/// Executes [`ExecutionPlan`]s against a [`TaskGraph`].
///
/// Stages are barriers: a stage starts only once every task of the previous
/// one reached a terminal outcome. Inside a stage every task gets its own
/// worker. When a task fails, the tasks depending on it are skipped while
/// unrelated tasks keep running, so a single invocation reports as much as
/// it can. Failed tasks are never retried.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scheduler which stops starting new stages, and lets running
    /// tools know they should terminate, once `cancel` is triggered.
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn run(&self, graph: &TaskGraph, plan: &ExecutionPlan) -> RunReport {
        let started_at = Instant::now();
        let mut records: Vec<TaskRecord> = plan.order().map(TaskRecord::pending).collect();
        let position: HashMap<&str, usize> = plan
            .order()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();

        if plan.is_empty() {
            return RunReport::new(records, started_at, false);
        }

        // Failed or skipped task -> the failed task at the root of it.
        let mut blocked: HashMap<&str, &str> = HashMap::new();
        let mut cancelled = false;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(plan.width())
            .thread_name(|i| format!("kumitate-worker-{i}"))
            .build();
        if let Err(e) = &pool {
            tracing::warn!("couldn't build worker pool, falling back to the global one: {e}");
        }

        let root_span = tracing::span!(Level::INFO, "run");
        root_span.pb_set_length(plan.len() as u64);
        root_span.pb_set_style(&crate::utils::get_style_run());
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        for (i, stage) in plan.stages().iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!("run cancelled before stage {}", i + 1);
                cancelled = true;
                break;
            }

            let mut runnable: Vec<&Task> = Vec::with_capacity(stage.len());
            for name in stage.tasks() {
                let Some(task) = graph.get(name) else {
                    let error = anyhow::anyhow!("Task '{name}' is not part of the graph");
                    records[position[name]].outcome = Outcome::Failure(Arc::new(error));
                    blocked.insert(name, name);
                    root_span.pb_inc(1);
                    continue;
                };

                match task.depends_on().find_map(|dep| blocked.get(dep).copied()) {
                    Some(cause) => {
                        tracing::warn!("skipping {name}, {cause} failed");
                        records[position[name]].outcome = Outcome::Skipped(cause.to_string());
                        blocked.insert(name, cause);
                        root_span.pb_inc(1);
                    }
                    None => runnable.push(task),
                }
            }

            tracing::debug!("stage {}: running {} task(s)", i + 1, runnable.len());
            let run_stage = || {
                runnable
                    .par_iter()
                    .map(|task| execute(task, &self.cancel, &root_span))
                    .collect::<Vec<_>>()
            };
            let results = match &pool {
                Ok(pool) => pool.install(run_stage),
                Err(_) => run_stage(),
            };

            for (task, record) in runnable.into_iter().zip(results) {
                if record.outcome.is_failure() {
                    blocked.insert(task.name(), task.name());
                }
                records[position[task.name()]] = record;
                root_span.pb_inc(1);
            }
        }

        let report = RunReport::new(records, started_at, cancelled);
        tracing::info!("run finished in {:.2?}", report.duration());
        report
    }
}

fn execute(task: &Task, cancel: &CancelToken, parent: &Span) -> TaskRecord {
    let span = tracing::span!(parent: parent, Level::INFO, "task", name = task.name());
    span.pb_set_style(&crate::utils::get_style_task());
    span.pb_set_message(&format!("Running {}", task.name()));
    let _enter = span.enter();

    let context = TaskContext {
        name: task.name(),
        cancel,
        span: span.clone(),
    };

    let started_at = Instant::now();

    // A panicking task only touches its own outputs, the shared state it
    // can see is read-only.
    let action = &*task.action;
    let result = match std::panic::catch_unwind(AssertUnwindSafe(|| action(&context))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panicked: {s}")
            } else {
                String::from("Task panicked with unknown payload")
            };

            Err(anyhow::anyhow!(msg))
        }
    };

    let finished_at = Instant::now();
    let elapsed = finished_at.duration_since(started_at);

    let outcome = match result {
        Ok(Completion::Success) => {
            tracing::info!("{} finished in {:.2?}", task.name(), elapsed);
            Outcome::Success
        }
        Ok(Completion::Warning(warnings)) => {
            for warning in &warnings {
                tracing::warn!("{}: {}", task.name(), warning);
            }
            Outcome::Warning(warnings)
        }
        Err(e) => {
            tracing::error!("{} failed: {:#}", task.name(), e);
            Outcome::Failure(Arc::new(e))
        }
    };

    TaskRecord {
        name: task.name().to_string(),
        outcome,
        started_at: Some(started_at),
        finished_at: Some(finished_at),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn ok(_: &TaskContext) -> anyhow::Result<Completion> {
        Ok(Completion::Success)
    }

    fn fail(_: &TaskContext) -> anyhow::Result<Completion> {
        anyhow::bail!("boom")
    }

    fn run(graph: &TaskGraph) -> RunReport {
        let plan = graph.compute_plan().unwrap();
        Scheduler::new().run(graph, &plan)
    }

    #[test]
    fn test_runs_every_task_in_stage_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = TaskGraph::new();

        for (name, deps) in [
            ("a", &[][..]),
            ("b", &["a"][..]),
            ("c", &["a"][..]),
            ("d", &["b", "c"][..]),
        ] {
            let log = log.clone();
            graph
                .add_task(name, deps, move |ctx| {
                    log.lock().unwrap().push(ctx.name.to_string());
                    Ok(Completion::Success)
                })
                .unwrap();
        }

        let report = run(&graph);
        assert_eq!(report.status(), RunStatus::Success);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], "a");
        assert_eq!(log[3], "d");
        for name in ["a", "b", "c", "d"] {
            assert!(matches!(report.outcome(name), Some(Outcome::Success)));
        }
    }

    #[test]
    fn test_failure_skips_dependents_only() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", &[], fail).unwrap();
        graph.add_task("b", &["a"], ok).unwrap();
        graph.add_task("c", &["b"], ok).unwrap();
        graph.add_task("x", &[], ok).unwrap();
        graph.add_task("y", &["x"], ok).unwrap();

        let report = run(&graph);

        assert!(matches!(report.outcome("a"), Some(Outcome::Failure(_))));
        assert!(matches!(report.outcome("b"), Some(Outcome::Skipped(cause)) if cause == "a"));
        assert!(matches!(report.outcome("c"), Some(Outcome::Skipped(cause)) if cause == "a"));
        assert!(matches!(report.outcome("x"), Some(Outcome::Success)));
        assert!(matches!(report.outcome("y"), Some(Outcome::Success)));
        assert_eq!(report.status(), RunStatus::Failure);
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.skipped().count(), 2);
    }

    #[test]
    fn test_skipped_tasks_never_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut graph = TaskGraph::new();
        graph.add_task("a", &[], fail).unwrap();
        let c = counter.clone();
        graph
            .add_task("b", &["a"], move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Completion::Success)
            })
            .unwrap();

        let report = run(&graph);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        let record = report.get("b").unwrap();
        assert!(record.started_at.is_none());
    }

    #[test]
    fn test_warning_keeps_run_green() {
        let mut graph = TaskGraph::new();
        graph
            .add_task("a", &[], |_| {
                Ok(Completion::Warning(vec!["deprecated option".into()]))
            })
            .unwrap();
        graph.add_task("b", &["a"], ok).unwrap();

        let report = run(&graph);
        assert!(matches!(report.outcome("a"), Some(Outcome::Warning(w)) if w.len() == 1));
        assert!(matches!(report.outcome("b"), Some(Outcome::Success)));
        assert_eq!(report.status(), RunStatus::Warning);
        assert!(report.is_success());
    }

    #[test]
    fn test_panic_becomes_failure() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", &[], |_| panic!("exploded")).unwrap();
        graph.add_task("b", &["a"], ok).unwrap();

        let report = run(&graph);
        match report.outcome("a") {
            Some(Outcome::Failure(e)) => assert!(e.to_string().contains("exploded")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(report.outcome("b"), Some(Outcome::Skipped(_))));
    }

    #[test]
    fn test_stage_runs_concurrently() {
        let arrived = Arc::new(AtomicUsize::new(0));
        let mut graph = TaskGraph::new();

        for name in ["left", "right"] {
            let arrived = arrived.clone();
            graph
                .add_task(name, &[], move |_| {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while arrived.load(Ordering::SeqCst) < 2 {
                        if Instant::now() > deadline {
                            anyhow::bail!("sibling never started");
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Ok(Completion::Success)
                })
                .unwrap();
        }

        let report = run(&graph);
        assert_eq!(report.status(), RunStatus::Success);
    }

    #[test]
    fn test_later_stage_sees_earlier_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.js");
        let mut graph = TaskGraph::new();

        let p = path.clone();
        graph
            .add_task("write", &[], move |_| {
                std::fs::write(&p, "bundle")?;
                Ok(Completion::Success)
            })
            .unwrap();
        let p = path.clone();
        graph
            .add_task("read", &["write"], move |_| {
                anyhow::ensure!(std::fs::read_to_string(&p)? == "bundle");
                Ok(Completion::Success)
            })
            .unwrap();

        assert_eq!(run(&graph).status(), RunStatus::Success);
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", &[], ok).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let plan = graph.compute_plan().unwrap();
        let report = Scheduler::with_cancel(cancel).run(&graph, &plan);

        assert!(matches!(report.outcome("a"), Some(Outcome::NotRun)));
        assert_eq!(report.status(), RunStatus::Cancelled);
        assert!(!report.is_success());
    }

    #[test]
    fn test_cancel_stops_later_stages() {
        let cancel = CancelToken::new();
        let mut graph = TaskGraph::new();
        graph
            .add_task("a", &[], |ctx| {
                ctx.cancel.cancel();
                Ok(Completion::Success)
            })
            .unwrap();
        graph.add_task("b", &["a"], ok).unwrap();

        let plan = graph.compute_plan().unwrap();
        let report = Scheduler::with_cancel(cancel).run(&graph, &plan);

        assert!(matches!(report.outcome("a"), Some(Outcome::Success)));
        assert!(matches!(report.outcome("b"), Some(Outcome::NotRun)));
        assert!(report.is_cancelled());
    }

    #[test]
    fn test_empty_plan() {
        let graph = TaskGraph::new();
        let report = run(&graph);
        assert_eq!(report.records().len(), 0);
        assert_eq!(report.status(), RunStatus::Success);
    }
}
