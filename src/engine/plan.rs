use std::fmt::{Display, Formatter};

/// A set of tasks which can run at the same time. None of them depends on
/// another member of the stage, and all of their dependencies belong to
/// earlier stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    tasks: Vec<String>,
}

impl Stage {
    pub(crate) fn new(tasks: impl IntoIterator<Item = String>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Ordered stages produced by [`TaskGraph::compute_plan`](crate::TaskGraph::compute_plan).
/// Reading the stages front to back yields a topological order of the tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    stages: Vec<Stage>,
}

impl ExecutionPlan {
    pub(crate) fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// All tasks in execution order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().flat_map(Stage::tasks)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.order().any(|task| task == name)
    }

    /// Number of tasks in the plan.
    pub fn len(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the widest stage, which bounds the worker pool.
    pub fn width(&self) -> usize {
        self.stages.iter().map(Stage::len).max().unwrap_or(0)
    }
}

impl Display for ExecutionPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            writeln!(f, "stage {}: {}", i + 1, stage.tasks.join(", "))?;
        }
        Ok(())
    }
}
