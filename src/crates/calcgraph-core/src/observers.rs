//! Built-in observers
//!
//! Observers subscribe to a graph's signals and react to the update
//! lifecycle without ever mutating graph state:
//!
//! - [`Logger`] emits structured `tracing` events for each lifecycle signal.
//! - [`PerformanceMonitor`] measures wall-clock execution time per task.
//! - [`UpdatedTasks`] accumulates the set of tasks visited by updates; the
//!   implicit-dependency tracker uses one internally, and tests use it as a
//!   probe.
//!
//! Each observer holds the [`SlotId`]s of its subscriptions and can be
//! detached from the graph again with its `disconnect` method. Observer
//! state lives behind `Rc<RefCell<..>>` so the subscribed closures and the
//! handle you keep share it.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::graph::Graph;
use crate::signal::{Event, SlotId};
use crate::task::TaskName;

/// Options controlling how much payload [`Logger`] includes per line.
#[derive(Debug, Clone, Copy)]
pub struct LoggerOptions {
    /// Include the failure in `on_failed` lines.
    pub log_exceptions: bool,
    /// Include the inputs view in `on_execute` lines.
    pub log_inputs: bool,
    /// Include the produced output in `on_finished` lines.
    pub log_outputs: bool,
    /// Include the extent in `on_execute` lines, on streaming graphs.
    pub log_extents: bool,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        LoggerOptions {
            log_exceptions: true,
            log_inputs: true,
            log_outputs: true,
            log_extents: true,
        }
    }
}

/// Logs graph events through `tracing`.
///
/// Useful for debugging and pedagogy: updates, executions, finishes, cycles
/// at `info` level, failures at `error` level.
///
/// ```rust
/// use calcgraph_core::{constant, Graph, Logger};
///
/// let graph = Graph::new_static();
/// let _logger = Logger::new(&graph);
/// graph.set_task("a", constant(1));
/// graph.update("a").unwrap();
/// ```
#[derive(Debug)]
pub struct Logger {
    options: LoggerOptions,
    slots: Vec<(&'static str, SlotId)>,
}

impl Logger {
    /// Attach a logger with default options to every lifecycle signal.
    pub fn new(graph: &Graph) -> Self {
        Logger::with_options(graph, LoggerOptions::default())
    }

    /// Attach a logger with the given options.
    pub fn with_options(graph: &Graph, options: LoggerOptions) -> Self {
        let mut slots = Vec::new();

        slots.push((
            "on_update",
            graph.on_update().connect(|_, event| {
                if let Event::Update { name, .. } = event {
                    tracing::info!(task = %name, "task updating");
                }
            }),
        ));

        let execute_options = options;
        slots.push((
            "on_execute",
            graph.on_execute().connect(move |graph, event| {
                if let Event::Execute {
                    name,
                    inputs,
                    extent,
                } = event
                {
                    match (
                        execute_options.log_inputs,
                        execute_options.log_extents && graph.is_streaming(),
                    ) {
                        (true, true) => tracing::info!(
                            task = %name,
                            inputs = ?inputs,
                            extent = ?extent,
                            "task executing"
                        ),
                        (true, false) => {
                            tracing::info!(task = %name, inputs = ?inputs, "task executing")
                        }
                        (false, true) => {
                            tracing::info!(task = %name, extent = ?extent, "task executing")
                        }
                        (false, false) => tracing::info!(task = %name, "task executing"),
                    }
                }
            }),
        ));

        let finished_options = options;
        slots.push((
            "on_finished",
            graph.on_finished().connect(move |_, event| {
                if let Event::Finished { name, output } = event {
                    if finished_options.log_outputs {
                        tracing::info!(task = %name, output = %output, "task finished");
                    } else {
                        tracing::info!(task = %name, "task finished");
                    }
                }
            }),
        ));

        let failed_options = options;
        slots.push((
            "on_failed",
            graph.on_failed().connect(move |_, event| {
                if let Event::Failed { name, error } = event {
                    if failed_options.log_exceptions {
                        tracing::error!(task = %name, error = %error, "task failed");
                    } else {
                        tracing::error!(task = %name, "task failed");
                    }
                }
            }),
        ));

        slots.push((
            "on_cycle",
            graph.on_cycle().connect(|_, event| {
                if let Event::Cycle { name } = event {
                    tracing::info!(task = %name, "cycle detected");
                }
            }),
        ));

        Logger { options, slots }
    }

    /// The options this logger was built with.
    pub fn options(&self) -> LoggerOptions {
        self.options
    }

    /// Detach from every signal this logger subscribed to.
    pub fn disconnect(&self, graph: &Graph) {
        for (signal, slot) in &self.slots {
            match *signal {
                "on_update" => graph.on_update().disconnect(*slot),
                "on_execute" => graph.on_execute().disconnect(*slot),
                "on_finished" => graph.on_finished().disconnect(*slot),
                "on_failed" => graph.on_failed().disconnect(*slot),
                _ => graph.on_cycle().disconnect(*slot),
            };
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    started: Option<Instant>,
    tasks: HashMap<TaskName, Vec<Duration>>,
}

/// Measures wall-clock execution time per task.
///
/// Stamps the clock on `on_execute` and appends the elapsed interval to the
/// task's series on `on_finished` / `on_failed`. The stamp is a single slot,
/// so on dynamic graphs, where executions nest, the series of an outer
/// task measures from the moment its *innermost* upstream started.
pub struct PerformanceMonitor {
    state: Rc<RefCell<MonitorState>>,
    execute_slot: SlotId,
    finished_slot: SlotId,
    failed_slot: SlotId,
}

impl PerformanceMonitor {
    /// Attach a monitor to the graph's execution signals.
    pub fn new(graph: &Graph) -> Self {
        let state = Rc::new(RefCell::new(MonitorState::default()));

        let on_execute = Rc::clone(&state);
        let execute_slot = graph.on_execute().connect(move |_, event| {
            if let Event::Execute { .. } = event {
                on_execute.borrow_mut().started = Some(Instant::now());
            }
        });

        let on_finished = Rc::clone(&state);
        let finished_slot = graph.on_finished().connect(move |_, event| {
            if let Event::Finished { name, .. } = event {
                record_elapsed(&on_finished, name);
            }
        });

        let on_failed = Rc::clone(&state);
        let failed_slot = graph.on_failed().connect(move |_, event| {
            if let Event::Failed { name, .. } = event {
                record_elapsed(&on_failed, name);
            }
        });

        PerformanceMonitor {
            state,
            execute_slot,
            finished_slot,
            failed_slot,
        }
    }

    /// Execution-time series per task, in execution order, since creation or
    /// the last [`reset`](Self::reset).
    pub fn tasks(&self) -> HashMap<TaskName, Vec<Duration>> {
        self.state.borrow().tasks.clone()
    }

    /// Clear the recorded series.
    pub fn reset(&self) {
        let mut state = self.state.borrow_mut();
        state.tasks.clear();
        state.started = None;
    }

    /// Detach from every signal this monitor subscribed to.
    pub fn disconnect(&self, graph: &Graph) {
        graph.on_execute().disconnect(self.execute_slot);
        graph.on_finished().disconnect(self.finished_slot);
        graph.on_failed().disconnect(self.failed_slot);
    }
}

fn record_elapsed(state: &Rc<RefCell<MonitorState>>, name: &str) {
    let mut state = state.borrow_mut();
    let elapsed = state
        .started
        .map(|started| started.elapsed())
        .unwrap_or_default();
    state.tasks.entry(name.to_string()).or_default().push(elapsed);
}

/// Accumulates the names of tasks visited by updates.
pub struct UpdatedTasks {
    tasks: Rc<RefCell<HashSet<TaskName>>>,
    slot: SlotId,
}

impl UpdatedTasks {
    /// Attach to the graph's `on_update` signal.
    pub fn new(graph: &Graph) -> Self {
        let tasks = Rc::new(RefCell::new(HashSet::new()));
        let sink = Rc::clone(&tasks);
        let slot = graph.on_update().connect(move |_, event| {
            if let Event::Update { name, .. } = event {
                sink.borrow_mut().insert(name.to_string());
            }
        });
        UpdatedTasks { tasks, slot }
    }

    /// Every task updated since this observer was created.
    pub fn tasks(&self) -> HashSet<TaskName> {
        self.tasks.borrow().clone()
    }

    /// Detach from the `on_update` signal.
    pub fn disconnect(&self, graph: &Graph) {
        graph.on_update().disconnect(self.slot);
    }
}
