//! Core graph type and mutation surface
//!
//! A [`Graph`] stores named tasks connected by labelled links that express
//! data dependencies. Updating a task implicitly updates its transitive
//! dependencies, executing whatever is stale and reusing every cached output
//! that is still valid. All three evaluation disciplines (static, dynamic,
//! streaming) share the mutation surface defined here; only
//! [`update`](Graph::update) behaves differently per [`EvaluationMode`] (see
//! the `update` module).
//!
//! # Invalidation
//!
//! Every structural mutation funnels through one primitive:
//! [`mark_unfinished`](Graph::mark_unfinished) expands the mutated set by its
//! downstream consumers, resets each member to
//! [`TaskState::Unfinished`](crate::TaskState::Unfinished) with its cached
//! output cleared, and fires `on_changed` once. That single rule maintains
//! the core invariant: a task can only be finished while everything it
//! depends on is finished.
//!
//! # Example
//!
//! ```rust
//! use calcgraph_core::{constant, custom, Graph, InputLabel};
//! use serde_json::json;
//!
//! let graph = Graph::new_static();
//! graph.add_task("a", constant(2)).unwrap();
//! graph.add_task("b", custom(|_, _, inputs, _| {
//!     let upstream = inputs.getone(InputLabel::None)?;
//!     Ok(json!(upstream.as_i64().unwrap_or(0) + 1))
//! })).unwrap();
//! graph.add_links("a", ["b"]).unwrap();
//!
//! assert_eq!(graph.output("b").unwrap(), 3);
//!
//! // Changing "a" invalidates "b"; the next output re-executes both.
//! graph.set_task("a", constant(10));
//! assert_eq!(graph.output("b").unwrap(), 11);
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;

use petgraph::stable_graph::EdgeIndex;
use serde::{Deserialize, Serialize};

use crate::signal::{Event, Signal, Signals};
use crate::task::{
    automatic_dependencies, constant, evaluate, evaluate_with, InputLabel, SymbolFn, TaskFn,
    TaskName, TaskRecord, TaskState, Value,
};
use crate::topology::Topology;
use crate::error::{Error, Result};

/// The evaluation discipline a graph applies during updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationMode {
    /// Bottom-up snapshot evaluation over the whole dependency closure.
    Static,
    /// Pull-based recursion: upstream tasks execute on demand, from inside
    /// the downstream task function.
    Dynamic,
    /// Pull-based recursion with extent-parameterised caching.
    Streaming,
}

/// One link, as reported by [`Graph::links`]: data flows from `source` into
/// `target` under the `input` label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Upstream producer.
    pub source: TaskName,
    /// Downstream consumer.
    pub target: TaskName,
    /// Label under which `target` receives the value.
    pub input: InputLabel,
}

/// Target half of a link being created: the consumer task plus the input
/// label. Converts from a bare name (unlabelled link) or a `(name, label)`
/// pair, so call sites read like the thing they build:
///
/// ```rust
/// use calcgraph_core::{null, Graph};
///
/// let graph = Graph::new_static();
/// for name in ["a", "z"] {
///     graph.add_task(name, null()).unwrap();
/// }
/// graph.add_links("a", [("z", "left")]).unwrap();
/// graph.add_links("a", ["z"]).unwrap(); // parallel, unlabelled
/// assert_eq!(graph.links_from("a").len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    /// Consumer task.
    pub target: TaskName,
    /// Input label carried by the new link.
    pub input: InputLabel,
}

impl From<&str> for LinkTarget {
    fn from(target: &str) -> Self {
        LinkTarget {
            target: target.to_string(),
            input: InputLabel::None,
        }
    }
}

impl From<String> for LinkTarget {
    fn from(target: String) -> Self {
        LinkTarget {
            target,
            input: InputLabel::None,
        }
    }
}

impl From<(&str, &str)> for LinkTarget {
    fn from((target, input): (&str, &str)) -> Self {
        LinkTarget {
            target: target.to_string(),
            input: InputLabel::from(input),
        }
    }
}

impl From<(&str, InputLabel)> for LinkTarget {
    fn from((target, input): (&str, InputLabel)) -> Self {
        LinkTarget {
            target: target.to_string(),
            input,
        }
    }
}

impl From<(String, InputLabel)> for LinkTarget {
    fn from((target, input): (String, InputLabel)) -> Self {
        LinkTarget { target, input }
    }
}

/// A computational graph: named tasks, labelled dependency links, cached
/// outputs, and the signals observers subscribe to.
///
/// The public surface takes `&self` throughout: state lives behind interior
/// mutability so that input providers can re-enter the graph during dynamic
/// updates. The type is deliberately not `Send`/`Sync`: an instance belongs
/// to one thread, and callers wanting cross-thread access must serialise
/// externally.
pub struct Graph {
    mode: EvaluationMode,
    pub(crate) topology: RefCell<Topology>,
    pub(crate) signals: Signals,
}

impl Graph {
    /// Create an empty graph with the given evaluation discipline.
    pub fn new(mode: EvaluationMode) -> Self {
        Graph {
            mode,
            topology: RefCell::new(Topology::new()),
            signals: Signals::new(),
        }
    }

    /// Create an empty static graph.
    pub fn new_static() -> Self {
        Graph::new(EvaluationMode::Static)
    }

    /// Create an empty dynamic graph.
    pub fn new_dynamic() -> Self {
        Graph::new(EvaluationMode::Dynamic)
    }

    /// Create an empty streaming graph.
    pub fn new_streaming() -> Self {
        Graph::new(EvaluationMode::Streaming)
    }

    /// The evaluation discipline this graph applies.
    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// True when updates are pull-based (dynamic and streaming graphs).
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self.mode,
            EvaluationMode::Dynamic | EvaluationMode::Streaming
        )
    }

    /// True when updates accept extents (streaming graphs).
    pub fn is_streaming(&self) -> bool {
        self.mode == EvaluationMode::Streaming
    }

    /// True when a task with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.topology.borrow().contains(name)
    }

    /// The name of every task in the graph.
    pub fn tasks(&self) -> HashSet<TaskName> {
        self.topology.borrow().names().cloned().collect()
    }

    /// The current state of a task.
    pub fn state(&self, name: &str) -> Result<TaskState> {
        let topology = self.topology.borrow();
        topology
            .node(name)
            .and_then(|node| topology.task(node))
            .map(|record| record.state)
            .ok_or_else(|| Error::MissingTask(name.to_string()))
    }

    /// Add a task. Fails with [`Error::DuplicateTask`] when the name is
    /// taken; use [`set_task`](Self::set_task) for upserts. Pass
    /// [`null()`](crate::null) when the task needs no function.
    pub fn add_task(&self, name: impl Into<TaskName>, function: TaskFn) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(Error::DuplicateTask(name));
        }
        self.set_task(name, function);
        Ok(())
    }

    /// Add a task, or replace an existing task's function. The task (and its
    /// downstream consumers) become unfinished only when the new function
    /// differs from the old one, so re-setting the same `constant(v)` is
    /// free.
    pub fn set_task(&self, name: impl Into<TaskName>, function: TaskFn) {
        let name = name.into();
        let invalidate = {
            let mut topology = self.topology.borrow_mut();
            match topology.node(&name) {
                Some(node) => match topology.task_mut(node) {
                    Some(record) => {
                        let changed = record.function != function;
                        record.function = function;
                        changed
                    }
                    None => false,
                },
                None => {
                    topology.insert(TaskRecord::new(name.clone(), function));
                    true
                }
            }
        };
        if invalidate {
            self.mark_unfinished([name]);
        }
    }

    /// Remove the named tasks along with every incident link. Downstream
    /// consumers become unfinished. Names not in the graph are ignored.
    pub fn clear_tasks<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<TaskName> = {
            let topology = self.topology.borrow();
            names
                .into_iter()
                .map(|name| name.as_ref().to_string())
                .filter(|name| topology.contains(name))
                .collect()
        };
        self.invalidate(&names, TaskState::Unfinished);
        {
            let mut topology = self.topology.borrow_mut();
            for name in &names {
                topology.remove(name);
            }
        }
        self.signals.changed.emit(self, &Event::Changed);
    }

    /// Empty the graph.
    pub fn clear_all_tasks(&self) {
        let names = self.tasks();
        self.clear_tasks(names);
    }

    /// Add links from the producer `source` to each of `targets`. Calling
    /// this repeatedly creates parallel links; see
    /// [`set_links`](Self::set_links) for the idempotent alternative. Every
    /// referenced task must exist; nothing is mutated otherwise.
    pub fn add_links<I, T>(&self, source: impl AsRef<str>, targets: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<LinkTarget>,
    {
        let source = source.as_ref();
        let targets: Vec<LinkTarget> = targets.into_iter().map(Into::into).collect();
        let invalidated: Vec<TaskName> = {
            let mut topology = self.topology.borrow_mut();
            let source_node = topology
                .node(source)
                .ok_or_else(|| Error::MissingTask(source.to_string()))?;
            let mut resolved = Vec::new();
            for link in &targets {
                let target_node = topology
                    .node(&link.target)
                    .ok_or_else(|| Error::MissingTask(link.target.clone()))?;
                resolved.push((target_node, link.input.clone()));
            }
            for (target_node, input) in resolved {
                topology.add_edge(target_node, source_node, input);
            }
            targets.into_iter().map(|link| link.target).collect()
        };
        self.mark_unfinished(invalidated);
        Ok(())
    }

    /// Replace *all* links originating at the producer `source` with links to
    /// `targets`. Previously-connected consumers and the new targets all
    /// become unfinished. Every referenced task must exist; nothing is
    /// mutated otherwise.
    pub fn set_links<I, T>(&self, source: impl AsRef<str>, targets: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<LinkTarget>,
    {
        let source = source.as_ref();
        let targets: Vec<LinkTarget> = targets.into_iter().map(Into::into).collect();
        let invalidated: HashSet<TaskName> = {
            let mut topology = self.topology.borrow_mut();
            let source_node = topology
                .node(source)
                .ok_or_else(|| Error::MissingTask(source.to_string()))?;
            let mut resolved = Vec::new();
            for link in &targets {
                let target_node = topology
                    .node(&link.target)
                    .ok_or_else(|| Error::MissingTask(link.target.clone()))?;
                resolved.push((target_node, link.input.clone()));
            }

            let mut invalidated = HashSet::new();
            for (edge, target_node) in topology.in_edges(source_node) {
                if let Some(record) = topology.task(target_node) {
                    invalidated.insert(record.name.clone());
                }
                topology.remove_edge(edge);
            }
            for (target_node, input) in resolved {
                topology.add_edge(target_node, source_node, input);
            }
            invalidated.extend(targets.into_iter().map(|link| link.target));
            invalidated
        };
        self.mark_unfinished(invalidated);
        Ok(())
    }

    /// Remove every parallel link between the producer `source` and the
    /// consumer `target`. `source` and its downstream consumers (including
    /// `target`, through the links about to be removed) become unfinished.
    pub fn clear_links(&self, source: &str, target: &str) -> Result<()> {
        {
            let topology = self.topology.borrow();
            if !topology.contains(source) {
                return Err(Error::MissingTask(source.to_string()));
            }
            if !topology.contains(target) {
                return Err(Error::MissingTask(target.to_string()));
            }
        }
        // Invalidate before detaching, so the propagation still flows
        // through the links being removed.
        self.mark_unfinished([source]);
        let mut topology = self.topology.borrow_mut();
        if let (Some(source_node), Some(target_node)) =
            (topology.node(source), topology.node(target))
        {
            for edge in topology.edges_between(target_node, source_node) {
                topology.remove_edge(edge);
            }
        }
        Ok(())
    }

    /// Rename a task in place, preserving every incident link and the labels
    /// on them. The renamed task and its downstream consumers become
    /// unfinished. Fails when `oldname` is absent or `newname` is taken.
    pub fn rename_task(&self, oldname: &str, newname: &str) -> Result<()> {
        {
            let topology = self.topology.borrow();
            if !topology.contains(oldname) {
                return Err(Error::MissingTask(oldname.to_string()));
            }
            if topology.contains(newname) {
                return Err(Error::DuplicateTask(newname.to_string()));
            }
        }
        self.topology.borrow_mut().rename(oldname, newname);
        self.mark_unfinished([newname]);
        self.signals
            .task_renamed
            .emit(self, &Event::TaskRenamed { oldname, newname });
        Ok(())
    }

    /// Every link in the graph, as normalized [`Link`] records. Ordering is
    /// unspecified.
    pub fn links(&self) -> Vec<Link> {
        let topology = self.topology.borrow();
        topology
            .edges()
            .filter_map(|(target, source, input)| {
                let source = topology.task(source)?.name.clone();
                let target = topology.task(target)?.name.clone();
                Some(Link {
                    source,
                    target,
                    input: input.clone(),
                })
            })
            .collect()
    }

    /// Every link whose producer is `name`.
    pub fn links_from(&self, name: &str) -> Vec<Link> {
        self.links()
            .into_iter()
            .filter(|link| link.source == name)
            .collect()
    }

    /// Create (or update) a parameter task holding `value` and wire it into
    /// `target` under `input`, in one step.
    pub fn set_parameter(
        &self,
        target: &str,
        input: impl Into<InputLabel>,
        source: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.set_task(source, constant(value));
        self.set_links(
            source,
            [LinkTarget {
                target: target.to_string(),
                input: input.into(),
            }],
        )
    }

    /// Install a task that evaluates `code` with implicit-dependency
    /// tracking: tasks read through `out()` become upstream dependencies, so
    /// later changes to them re-evaluate the expression.
    pub fn set_expression(&self, name: impl Into<TaskName>, code: impl Into<String>) {
        self.set_task(name, automatic_dependencies(evaluate(code)));
    }

    /// Like [`set_expression`](Self::set_expression), with a caller-supplied
    /// symbol binding replacing the builtin symbols.
    pub fn set_expression_with(
        &self,
        name: impl Into<TaskName>,
        code: impl Into<String>,
        symbols: SymbolFn,
    ) {
        self.set_task(name, automatic_dependencies(evaluate_with(code, symbols)));
    }

    /// Mark the named tasks, and every downstream consumer, unfinished,
    /// clearing their cached outputs. This is the canonical invalidation
    /// primitive; it is idempotent, ignores names not in the graph, and
    /// fires `on_changed` once.
    pub fn mark_unfinished<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.invalidate(names, TaskState::Unfinished);
        self.signals.changed.emit(self, &Event::Changed);
    }

    /// Mark every task in the graph unfinished.
    pub fn mark_all_unfinished(&self) {
        let names = self.tasks();
        self.mark_unfinished(names);
    }

    /// Like [`mark_unfinished`](Self::mark_unfinished), but the affected
    /// tasks become [`TaskState::Failed`].
    pub fn mark_failed<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.invalidate(names, TaskState::Failed);
        self.signals.changed.emit(self, &Event::Changed);
    }

    /// Mark every task in the graph failed.
    pub fn mark_all_failed(&self) {
        let names = self.tasks();
        self.mark_failed(names);
    }

    fn invalidate<I, S>(&self, names: I, state: TaskState)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut topology = self.topology.borrow_mut();
        let mut pending: HashSet<_> = names
            .into_iter()
            .filter_map(|name| topology.node(name.as_ref()))
            .collect();
        for node in pending.clone() {
            pending.extend(topology.ancestors(node));
        }
        for node in pending {
            if let Some(record) = topology.task_mut(node) {
                record.state = state;
                record.output = None;
                record.extent = None;
            }
        }
    }

    /// Signal fired whenever a mutation left part of the graph unfinished
    /// (or failed), after task states have settled.
    pub fn on_changed(&self) -> &Signal {
        &self.signals.changed
    }

    /// Signal fired when a cycle is detected during an update.
    pub fn on_cycle(&self) -> &Signal {
        &self.signals.cycle
    }

    /// Signal fired just before a task function is invoked.
    pub fn on_execute(&self) -> &Signal {
        &self.signals.execute
    }

    /// Signal fired when a task function fails.
    pub fn on_failed(&self) -> &Signal {
        &self.signals.failed
    }

    /// Signal fired when a task function returns successfully.
    pub fn on_finished(&self) -> &Signal {
        &self.signals.finished
    }

    /// Signal fired after a task is renamed.
    pub fn on_task_renamed(&self) -> &Signal {
        &self.signals.task_renamed
    }

    /// Signal fired for each task visited during an update, whether or not
    /// it executes.
    pub fn on_update(&self) -> &Signal {
        &self.signals.update
    }

    /// Remove this task's tracker-owned (`Implicit`-labelled) upstream
    /// links. Explicit links are untouched, and no invalidation runs: this
    /// is edge-store surgery reserved for the implicit-dependency tracker.
    pub(crate) fn clear_implicit_links(&self, name: &str) {
        let mut topology = self.topology.borrow_mut();
        if let Some(node) = topology.node(name) {
            let implicit: Vec<EdgeIndex> = topology
                .out_edges(node)
                .into_iter()
                .filter(|(_, _, input)| *input == InputLabel::Implicit)
                .map(|(edge, _, _)| edge)
                .collect();
            for edge in implicit {
                topology.remove_edge(edge);
            }
        }
    }

    /// Add a tracker-owned link from `name` to its discovered dependency
    /// `source`, without invalidation.
    pub(crate) fn add_implicit_link(&self, name: &str, source: &str) {
        let mut topology = self.topology.borrow_mut();
        if let (Some(task), Some(dependency)) = (topology.node(name), topology.node(source)) {
            topology.add_edge(task, dependency, InputLabel::Implicit);
        }
    }

    /// Names of every task `name` transitively depends on.
    pub(crate) fn descendants_of(&self, name: &str) -> HashSet<TaskName> {
        let topology = self.topology.borrow();
        match topology.node(name) {
            None => HashSet::new(),
            Some(node) => topology
                .descendants(node)
                .into_iter()
                .filter_map(|descendant| topology.task(descendant).map(|record| record.name.clone()))
                .collect(),
        }
    }

    /// Run `action` against the named task's record, if it exists.
    pub(crate) fn with_task<R>(
        &self,
        name: &str,
        action: impl FnOnce(&mut TaskRecord) -> R,
    ) -> Option<R> {
        let mut topology = self.topology.borrow_mut();
        let node = topology.node(name)?;
        topology.task_mut(node).map(action)
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("mode", &self.mode)
            .field("tasks", &self.topology.borrow().len())
            .finish()
    }
}
