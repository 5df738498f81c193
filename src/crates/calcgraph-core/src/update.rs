//! Update strategies
//!
//! One `update` entry point, three disciplines behind it:
//!
//! - **Static**: snapshot-driven and bottom-up. The dependency closure of
//!   the update root is walked in DFS post-order, so every producer executes
//!   before its consumers, and each task function receives its inputs as
//!   already-computed snapshots. A cycle scan runs first and reports through
//!   `on_cycle`; the pass itself still proceeds (DFS visits each node once,
//!   so it terminates, and a task whose upstream is unreachable sees a null
//!   input).
//! - **Dynamic**: pull-based. A task executes when stale, and its input
//!   providers recursively update the upstream tasks *from inside the task
//!   function*. Inputs a function never reads are upstream subgraphs that
//!   never run. A per-task `updating` flag breaks recursion cycles,
//!   reporting through `on_cycle`.
//! - **Streaming**: dynamic plus a caller-supplied *extent* naming the
//!   subset of the output being requested. The cache hit condition tightens
//!   to "finished *and* cached for this exact extent"; the engine never
//!   subsets outputs itself, it only carries the token to the task function.
//!
//! Failure handling is uniform: the failing task's error is reported through
//! `on_failed`, every task between the failure and the update root becomes
//! [`TaskState::Failed`], `on_changed` fires, and the originating error is
//! returned to the caller unchanged.

use crate::error::{Error, Result};
use crate::graph::{EvaluationMode, Graph};
use crate::inputs::{NamedInputs, Provider};
use crate::signal::Event;
use crate::task::{Extent, TaskName, TaskState, Value};

impl Graph {
    /// Bring `name` and its transitive dependencies up to date, executing
    /// whatever is stale. Any error raised by a task function is returned
    /// from here, after the affected subgraph has been marked failed.
    pub fn update(&self, name: &str) -> Result<()> {
        self.update_with(name, None)
    }

    /// Extent-carrying form of [`update`](Self::update). Passing `Some`
    /// extent requires a streaming graph; static and dynamic graphs fail
    /// with [`Error::ExtentUnsupported`].
    pub fn update_with(&self, name: &str, extent: Option<Extent>) -> Result<()> {
        if extent.is_some() && !self.is_streaming() {
            return Err(Error::ExtentUnsupported);
        }
        if !self.contains(name) {
            return Err(Error::MissingTask(name.to_string()));
        }
        match self.mode() {
            EvaluationMode::Static => self.update_static(name),
            EvaluationMode::Dynamic | EvaluationMode::Streaming => {
                self.update_pull(name, extent.as_ref())
            }
        }
    }

    /// Retrieve the output of a task, updating it (and its dependencies)
    /// first so the returned value is guaranteed current. Tasks that produce
    /// nothing yield [`Value::Null`].
    pub fn output(&self, name: &str) -> Result<Value> {
        self.output_with(name, None)
    }

    /// Extent-carrying form of [`output`](Self::output).
    pub fn output_with(&self, name: &str, extent: Option<Extent>) -> Result<Value> {
        self.update_with(name, extent)?;
        Ok(self.cached_output(name))
    }

    fn cached_output(&self, name: &str) -> Value {
        let topology = self.topology.borrow();
        topology
            .node(name)
            .and_then(|node| topology.task(node))
            .and_then(|record| record.output.clone())
            .unwrap_or(Value::Null)
    }

    /// Update an upstream producer on behalf of an input provider, and hand
    /// back its output.
    pub(crate) fn pull(&self, source: &str, extent: Option<&Extent>) -> Result<Value> {
        self.update_pull(source, extent)?;
        Ok(self.cached_output(source))
    }

    fn update_static(&self, root: &str) -> Result<()> {
        let cycle_start = {
            let topology = self.topology.borrow();
            topology
                .node(root)
                .and_then(|node| topology.find_cycle_from(node))
                .and_then(|node| topology.task(node).map(|record| record.name.clone()))
        };
        if let Some(name) = cycle_start {
            self.signals
                .cycle
                .emit(self, &Event::Cycle { name: name.as_str() });
        }

        let order: Vec<TaskName> = {
            let topology = self.topology.borrow();
            match topology.node(root) {
                None => Vec::new(),
                Some(node) => topology
                    .dfs_postorder(node)
                    .into_iter()
                    .filter_map(|node| topology.task(node).map(|record| record.name.clone()))
                    .collect(),
            }
        };

        let mut failure: Option<(TaskName, Error)> = None;
        for name in &order {
            let name = name.as_str();
            self.signals.update.emit(
                self,
                &Event::Update {
                    name,
                    extent: None,
                },
            );

            let pending = {
                let topology = self.topology.borrow();
                topology
                    .node(name)
                    .and_then(|node| topology.task(node))
                    .map(|record| (record.state, record.function.clone()))
            };
            let Some((state, function)) = pending else {
                continue;
            };
            if failure.is_some() || state == TaskState::Finished {
                continue;
            }

            let inputs = self.snapshot_inputs(name);
            self.signals.execute.emit(
                self,
                &Event::Execute {
                    name,
                    inputs: &inputs,
                    extent: None,
                },
            );
            match function.call(self, name, &inputs, None) {
                Ok(output) => {
                    self.with_task(name, |record| {
                        record.output = Some(output.clone());
                        record.state = TaskState::Finished;
                    });
                    self.signals.finished.emit(
                        self,
                        &Event::Finished {
                            name,
                            output: &output,
                        },
                    );
                }
                Err(error) => {
                    self.signals.failed.emit(
                        self,
                        &Event::Failed {
                            name,
                            error: &error,
                        },
                    );
                    failure = Some((name.to_string(), error));
                }
            }
        }

        let Some((failed, error)) = failure else {
            return Ok(());
        };
        {
            let mut topology = self.topology.borrow_mut();
            if let (Some(failed_node), Some(root_node)) =
                (topology.node(&failed), topology.node(root))
            {
                // Everything on a path from the failure to the update root.
                let mut affected = topology.ancestors(failed_node);
                affected.insert(failed_node);
                let mut scope = topology.descendants(root_node);
                scope.insert(root_node);
                affected.retain(|node| scope.contains(node));
                for node in affected {
                    if let Some(record) = topology.task_mut(node) {
                        record.state = TaskState::Failed;
                        record.output = None;
                        record.extent = None;
                    }
                }
            }
        }
        self.signals.changed.emit(self, &Event::Changed);
        Err(error)
    }

    fn update_pull(&self, name: &str, extent: Option<&Extent>) -> Result<()> {
        let entered = self.with_task(name, |record| {
            if record.updating {
                false
            } else {
                record.updating = true;
                true
            }
        });
        match entered {
            None => return Err(Error::MissingTask(name.to_string())),
            Some(false) => {
                self.signals.cycle.emit(self, &Event::Cycle { name });
                return Ok(());
            }
            Some(true) => {}
        }

        self.signals.update.emit(self, &Event::Update { name, extent });

        let pending = self.with_task(name, |record| {
            let stale =
                record.state != TaskState::Finished || record.extent.as_ref() != extent;
            (stale, record.function.clone())
        });
        let Some((stale, function)) = pending else {
            return Err(Error::MissingTask(name.to_string()));
        };

        if stale {
            let inputs = self.pull_inputs(name);
            self.signals.execute.emit(
                self,
                &Event::Execute {
                    name,
                    inputs: &inputs,
                    extent,
                },
            );
            self.with_task(name, |record| {
                record.extent = extent.cloned();
            });
            match function.call(self, name, &inputs, extent) {
                Ok(output) => {
                    self.with_task(name, |record| {
                        record.output = Some(output.clone());
                        record.state = TaskState::Finished;
                    });
                    self.signals.finished.emit(
                        self,
                        &Event::Finished {
                            name,
                            output: &output,
                        },
                    );
                }
                Err(error) => {
                    self.with_task(name, |record| {
                        record.extent = None;
                        record.output = None;
                        record.state = TaskState::Failed;
                    });
                    self.signals.failed.emit(
                        self,
                        &Event::Failed {
                            name,
                            error: &error,
                        },
                    );
                    self.with_task(name, |record| {
                        record.updating = false;
                    });
                    return Err(error);
                }
            }
        }

        self.with_task(name, |record| {
            record.updating = false;
        });
        Ok(())
    }

    /// Build the inputs view for a static execution: each provider snapshots
    /// the upstream task's cached output (guaranteed finished by the
    /// post-order invariant, unless structurally unreachable).
    fn snapshot_inputs(&self, name: &str) -> NamedInputs<'_> {
        let topology = self.topology.borrow();
        let entries = match topology.node(name) {
            None => Vec::new(),
            Some(node) => topology
                .out_edges(node)
                .into_iter()
                .map(|(_, source, input)| {
                    let value = topology
                        .task(source)
                        .and_then(|record| record.output.clone())
                        .unwrap_or(Value::Null);
                    (input, Provider::Cached(value))
                })
                .collect(),
        };
        NamedInputs::new(self, entries)
    }

    /// Build the inputs view for a pull-based execution: each provider
    /// re-enters the graph and updates the upstream task when forced.
    fn pull_inputs(&self, name: &str) -> NamedInputs<'_> {
        let topology = self.topology.borrow();
        let entries = match topology.node(name) {
            None => Vec::new(),
            Some(node) => topology
                .out_edges(node)
                .into_iter()
                .filter_map(|(_, source, input)| {
                    topology
                        .task(source)
                        .map(|record| (input, Provider::Pull(record.name.clone())))
                })
                .collect(),
        };
        NamedInputs::new(self, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{constant, custom, raise};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record_events(graph: &Graph) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for signal in [
            graph.on_update(),
            graph.on_execute(),
            graph.on_finished(),
            graph.on_failed(),
            graph.on_cycle(),
        ] {
            let sink = Rc::clone(&log);
            let kind = signal.name();
            signal.connect(move |_, event| {
                let name = match event {
                    Event::Update { name, .. } => name,
                    Event::Execute { name, .. } => name,
                    Event::Finished { name, .. } => name,
                    Event::Failed { name, .. } => name,
                    Event::Cycle { name } => name,
                    _ => return,
                };
                sink.borrow_mut().push(format!("{kind}:{name}"));
            });
        }
        log
    }

    #[test]
    fn test_static_update_is_bottom_up() {
        let graph = Graph::new_static();
        graph.add_task("a", constant(1)).unwrap();
        graph
            .add_task(
                "b",
                custom(|_, _, inputs, _| {
                    let value = inputs.getone(crate::InputLabel::None)?;
                    Ok(json!(value.as_i64().unwrap_or(0) * 10))
                }),
            )
            .unwrap();
        graph.add_links("a", ["b"]).unwrap();

        let log = record_events(&graph);
        assert_eq!(graph.output("b").unwrap(), json!(10));
        assert_eq!(
            *log.borrow(),
            vec![
                "on_update:a",
                "on_execute:a",
                "on_finished:a",
                "on_update:b",
                "on_execute:b",
                "on_finished:b",
            ]
        );
    }

    #[test]
    fn test_second_update_is_a_no_op_beyond_on_update() {
        let graph = Graph::new_static();
        graph.add_task("a", constant(1)).unwrap();
        graph.update("a").unwrap();

        let log = record_events(&graph);
        graph.update("a").unwrap();
        assert_eq!(*log.borrow(), vec!["on_update:a"]);
    }

    #[test]
    fn test_static_failure_marks_the_path_to_the_root() {
        let graph = Graph::new_static();
        graph.add_task("a", constant(1)).unwrap();
        graph.add_task("b", raise("boom")).unwrap();
        graph.add_task("c", crate::task::consume()).unwrap();
        graph.add_links("a", ["b"]).unwrap();
        graph.add_links("b", ["c"]).unwrap();

        let error = graph.update("c").unwrap_err();
        assert!(matches!(
            error,
            Error::TaskFailed { ref task, ref message } if task == "b" && message == "boom"
        ));
        assert_eq!(graph.state("a").unwrap(), TaskState::Finished);
        assert_eq!(graph.state("b").unwrap(), TaskState::Failed);
        assert_eq!(graph.state("c").unwrap(), TaskState::Failed);
    }

    #[test]
    fn test_failure_outside_the_update_root_scope_stays_contained() {
        // d depends on b, but updating c must not mark d failed.
        let graph = Graph::new_static();
        graph.add_task("b", raise("boom")).unwrap();
        graph.add_task("c", crate::task::consume()).unwrap();
        graph.add_task("d", crate::task::consume()).unwrap();
        graph.add_links("b", ["c", "d"]).unwrap();

        assert!(graph.update("c").is_err());
        assert_eq!(graph.state("c").unwrap(), TaskState::Failed);
        // d was invalidated by nothing; it simply never ran.
        assert_eq!(graph.state("d").unwrap(), TaskState::Unfinished);
    }

    #[test]
    fn test_dynamic_update_pulls_through_providers() {
        let graph = Graph::new_dynamic();
        graph.add_task("a", constant(5)).unwrap();
        graph
            .add_task(
                "b",
                custom(|_, _, inputs, _| {
                    let value = inputs.getone(crate::InputLabel::None)?;
                    Ok(json!(value.as_i64().unwrap_or(0) + 1))
                }),
            )
            .unwrap();
        graph.add_links("a", ["b"]).unwrap();

        let log = record_events(&graph);
        assert_eq!(graph.output("b").unwrap(), json!(6));
        // b starts executing before a is even visited.
        assert_eq!(
            *log.borrow(),
            vec![
                "on_update:b",
                "on_execute:b",
                "on_update:a",
                "on_execute:a",
                "on_finished:a",
                "on_finished:b",
            ]
        );
    }

    #[test]
    fn test_dynamic_failure_propagates_the_root_cause() {
        let graph = Graph::new_dynamic();
        graph.add_task("a", raise("root cause")).unwrap();
        graph.add_task("b", crate::task::passthrough(crate::InputLabel::None)).unwrap();
        graph.add_links("a", ["b"]).unwrap();

        let error = graph.output("b").unwrap_err();
        assert!(matches!(
            error,
            Error::TaskFailed { ref task, .. } if task == "a"
        ));
        assert_eq!(graph.state("a").unwrap(), TaskState::Failed);
        assert_eq!(graph.state("b").unwrap(), TaskState::Failed);
    }

    #[test]
    fn test_dynamic_cycle_breaks_with_a_signal() {
        let graph = Graph::new_dynamic();
        graph.add_task("a", crate::task::consume()).unwrap();
        graph.add_task("b", crate::task::consume()).unwrap();
        graph.add_links("a", ["b"]).unwrap();
        graph.add_links("b", ["a"]).unwrap();

        let log = record_events(&graph);
        graph.update("a").unwrap();
        assert!(log.borrow().iter().any(|line| line.starts_with("on_cycle:")));
    }

    #[test]
    fn test_extent_requires_a_streaming_graph() {
        let graph = Graph::new_dynamic();
        graph.add_task("a", constant(1)).unwrap();
        assert!(matches!(
            graph.update_with("a", Some(json!("slice"))),
            Err(Error::ExtentUnsupported)
        ));
        assert!(matches!(
            graph.output_with("a", Some(json!("slice"))),
            Err(Error::ExtentUnsupported)
        ));
    }

    #[test]
    fn test_streaming_caches_per_extent() {
        let graph = Graph::new_streaming();
        graph
            .add_task("a", crate::task::array(json!([0, 1, 2, 3])))
            .unwrap();

        let extent = crate::task::ArrayExtent::range(0, 2);
        assert_eq!(
            graph.output_with("a", Some(extent.clone())).unwrap(),
            json!([0, 1])
        );

        let log = record_events(&graph);
        // Same extent again: cache hit, no execution.
        assert_eq!(
            graph.output_with("a", Some(extent)).unwrap(),
            json!([0, 1])
        );
        assert_eq!(*log.borrow(), vec!["on_update:a"]);

        // Different extent: cache miss, re-executes.
        assert_eq!(
            graph
                .output_with("a", Some(crate::task::ArrayExtent::range(2, 4)))
                .unwrap(),
            json!([2, 3])
        );
        assert!(log.borrow().contains(&"on_execute:a".to_string()));
    }

    #[test]
    fn test_update_requires_the_task_to_exist() {
        let graph = Graph::new_static();
        assert!(matches!(
            graph.update("ghost"),
            Err(Error::MissingTask(name)) if name == "ghost"
        ));
        assert!(graph.output("ghost").is_err());
    }

    #[test]
    fn test_static_cycle_scan_is_informational() {
        let graph = Graph::new_static();
        graph.add_task("a", crate::task::null()).unwrap();
        graph.add_task("b", crate::task::null()).unwrap();
        graph.add_links("a", ["b"]).unwrap();
        graph.add_links("b", ["a"]).unwrap();

        let log = record_events(&graph);
        graph.update("a").unwrap();
        assert!(log.borrow().iter().any(|line| line.starts_with("on_cycle:")));
        assert_eq!(graph.state("a").unwrap(), TaskState::Finished);
        assert_eq!(graph.state("b").unwrap(), TaskState::Finished);
    }
}
