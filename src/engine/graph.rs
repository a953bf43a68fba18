use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::engine::{Completion, ExecutionPlan, Stage, Task, TaskContext};
use crate::error::ConfigurationError;

/// The dependency graph of a build.
///
/// Tasks are registered in dependency order: every dependency named by a
/// task has to be registered before the task itself, so the graph rejects
/// forward references instead of resolving them later. Each registered
/// output path can belong to at most one task, which is what allows the
/// tasks of a single stage to run in parallel without coordination.
///
/// # Example
///
/// ```rust
/// use kumitate::{Completion, TaskGraph};
///
/// let mut graph = TaskGraph::new();
/// graph.add_task("bundle", &[], |_| Ok(Completion::Success)).unwrap();
/// graph.add_task("minify", &["bundle"], |_| Ok(Completion::Success)).unwrap();
///
/// let plan = graph.compute_plan().unwrap();
/// assert_eq!(plan.stages().len(), 2);
/// ```
#[derive(Default)]
pub struct TaskGraph {
    pub(crate) graph: Graph<Task, ()>,
    index: HashMap<Cow<'static, str>, NodeIndex>,
    outputs: HashMap<Utf8PathBuf, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the definition of a new task.
    pub fn task(&mut self, name: impl Into<Cow<'static, str>>) -> TaskDef<'_> {
        TaskDef {
            graph: self,
            name: name.into(),
            depends_on: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Registers a task with no declared outputs.
    pub fn add_task<F>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        depends_on: &[&'static str],
        action: F,
    ) -> Result<(), ConfigurationError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<Completion> + Send + Sync + 'static,
    {
        self.task(name)
            .depends_on(depends_on.iter().copied())
            .run(action)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&index| &self.graph[index])
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_indices().map(|index| &self.graph[index])
    }

    /// Computes the staged plan for the whole graph.
    pub fn compute_plan(&self) -> Result<ExecutionPlan, ConfigurationError> {
        let nodes = self.graph.node_indices().collect();
        self.stages(&nodes)
    }

    /// Computes the staged plan for the subgraph induced by `subset`.
    /// Dependencies that fall outside the subset are not part of the plan
    /// and do not hold back the tasks that name them.
    pub fn plan_for<I, S>(&self, subset: I) -> Result<ExecutionPlan, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut nodes = HashSet::new();
        for name in subset {
            let name = name.as_ref();
            match self.index.get(name) {
                Some(&index) => nodes.insert(index),
                None => return Err(ConfigurationError::UnknownTask(name.to_string())),
            };
        }
        self.stages(&nodes)
    }

    /// Kahn's algorithm, peeled one round at a time. Every node whose
    /// in-degree drops to zero in the same round lands in the same stage.
    fn stages(&self, nodes: &HashSet<NodeIndex>) -> Result<ExecutionPlan, ConfigurationError> {
        let mut in_degree: HashMap<NodeIndex, usize> = nodes
            .iter()
            .map(|&index| {
                (
                    index,
                    self.graph
                        .neighbors_directed(index, Direction::Incoming)
                        .filter(|dep| nodes.contains(dep))
                        .count(),
                )
            })
            .collect();

        let mut ready: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&index, _)| index)
            .collect();
        ready.sort();

        let mut stages = Vec::new();
        let mut placed = 0;

        while !ready.is_empty() {
            let mut next = Vec::new();
            for &index in &ready {
                for dependent in self.graph.neighbors_directed(index, Direction::Outgoing) {
                    if let Some(degree) = in_degree.get_mut(&dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }

            placed += ready.len();
            stages.push(Stage::new(
                ready.iter().map(|&index| self.graph[index].name.to_string()),
            ));

            next.sort();
            ready = next;
        }

        if placed < nodes.len() {
            return Err(ConfigurationError::CycleDetected(self.find_cycle(nodes)));
        }

        Ok(ExecutionPlan::new(stages))
    }

    /// Names a task which sits on a cycle among `nodes`.
    fn find_cycle(&self, nodes: &HashSet<NodeIndex>) -> String {
        petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.iter().all(|index| nodes.contains(index)))
            .find(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .and_then(|scc| scc.into_iter().min())
            .map(|index| self.graph[index].name.to_string())
            .unwrap_or_default()
    }

    /// Whether `task` is one of `sources` or a transitive dependency of one.
    fn precedes(&self, task: NodeIndex, sources: &[NodeIndex]) -> bool {
        sources
            .iter()
            .any(|&source| petgraph::algo::has_path_connecting(&self.graph, task, source, None))
    }

    /// Adds an edge without the registration-order checks.
    #[cfg(test)]
    pub(crate) fn link_unchecked(&mut self, from: &str, to: &str) {
        let source = self.index[from];
        let target = self.index[to];
        let name = self.graph[source].name.clone();
        self.graph[target].depends_on.push(name);
        self.graph.add_edge(source, target, ());
    }
}

impl std::fmt::Display for TaskGraph {
    /// Renders the graph as a Mermaid diagram.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].name.replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

/// Lexically drops `.` components and folds `..` into its parent, so that
/// spellings of the same artifact compare equal.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut normal = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if matches!(normal.components().next_back(), Some(Utf8Component::Normal(_))) {
                    normal.pop();
                } else {
                    normal.push("..");
                }
            }
            other => normal.push(other),
        }
    }
    normal
}

/// Builder returned by [`TaskGraph::task`].
pub struct TaskDef<'a> {
    graph: &'a mut TaskGraph,
    name: Cow<'static, str>,
    depends_on: Vec<Cow<'static, str>>,
    outputs: Vec<Utf8PathBuf>,
}

impl<'a> TaskDef<'a> {
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        for name in names {
            let name = name.into();
            if !self.depends_on.contains(&name) {
                self.depends_on.push(name);
            }
        }
        self
    }

    /// Declares artifacts this task writes. No other task may declare them.
    pub fn outputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.outputs.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Validates the definition and inserts the task into the graph.
    pub fn run<F>(self, action: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<Completion> + Send + Sync + 'static,
    {
        let TaskDef {
            graph,
            name,
            depends_on,
            outputs,
        } = self;

        if graph.index.contains_key(&name) {
            return Err(ConfigurationError::DuplicateTask(name.into_owned()));
        }

        let mut sources = Vec::with_capacity(depends_on.len());
        for dependency in &depends_on {
            match graph.index.get(dependency) {
                Some(&index) => sources.push(index),
                None => {
                    return Err(ConfigurationError::UnknownDependency {
                        task: name.into_owned(),
                        dependency: dependency.to_string(),
                    });
                }
            }
        }

        let outputs: Vec<Utf8PathBuf> = outputs.iter().map(|path| normalize(path)).collect();

        let mut seen = HashSet::new();
        for path in &outputs {
            if let Some(&owner) = graph.outputs.get(path) {
                return Err(ConfigurationError::DuplicateOutput {
                    path: path.clone(),
                    first: graph.graph[owner].name.to_string(),
                    second: name.into_owned(),
                });
            }
            if !seen.insert(path) {
                return Err(ConfigurationError::DuplicateOutput {
                    path: path.clone(),
                    first: name.to_string(),
                    second: name.into_owned(),
                });
            }

            // a path inside another task's output must be written after it
            for (other, &owner) in &graph.outputs {
                let nested = path.starts_with(other) || other.starts_with(path);
                if nested && !graph.precedes(owner, &sources) {
                    return Err(ConfigurationError::OverlappingOutputs {
                        path: path.clone(),
                        other: other.clone(),
                        first: graph.graph[owner].name.to_string(),
                        second: name.into_owned(),
                    });
                }
            }
        }

        let index = graph.graph.add_node(Task {
            name: name.clone(),
            depends_on,
            outputs: outputs.clone(),
            action: Arc::new(action),
        });

        for source in sources {
            graph.graph.add_edge(source, index, ());
        }
        for path in outputs {
            graph.outputs.insert(path, index);
        }
        graph.index.insert(name, index);

        Ok(())
    }
}
