//! # calcgraph-core: computational graph execution engine
//!
//! A library for building and executing directed graphs of named *tasks*.
//! Each task carries a function and is wired to other tasks through labelled
//! *links* that express data dependencies. Ask any task for its
//! [`output`](Graph::output) and the engine resolves the transitive
//! dependency closure, executes what is stale, and reuses every cached
//! result that is still valid. Mutating the graph (replacing a function,
//! rewiring a link, renaming a task) invalidates exactly the downstream
//! tasks that depended on what changed.
//!
//! ## Evaluation disciplines
//!
//! One mutation surface, three [`EvaluationMode`]s:
//!
//! - **Static** ([`Graph::new_static`]): the dependency closure is walked
//!   bottom-up in dependency order and task functions receive their inputs
//!   as plain, already-computed values.
//! - **Dynamic** ([`Graph::new_dynamic`]): inputs are thunks that update
//!   the upstream task *when forced*, from inside the downstream function.
//!   Inputs a function never reads are upstream subgraphs that never run.
//! - **Streaming** ([`Graph::new_streaming`]): dynamic, plus an opaque
//!   *extent* naming the subset of the output being requested; caching is
//!   per-extent.
//!
//! ## Quick start
//!
//! ```rust
//! use calcgraph_core::{constant, custom, Graph, InputLabel};
//! use serde_json::json;
//!
//! let graph = Graph::new_static();
//! graph.add_task("price", constant(40)).unwrap();
//! graph.add_task("tax", constant(2)).unwrap();
//! graph.add_task("total", custom(|_, _, inputs, _| {
//!     let price = inputs.getone("price")?;
//!     let tax = inputs.getone("tax")?;
//!     Ok(json!(price.as_i64().unwrap_or(0) + tax.as_i64().unwrap_or(0)))
//! })).unwrap();
//! graph.add_links("price", [("total", "price")]).unwrap();
//! graph.add_links("tax", [("total", "tax")]).unwrap();
//!
//! assert_eq!(graph.output("total").unwrap(), 42);
//!
//! // Mutations invalidate downstream consumers, and only them.
//! graph.set_task("tax", constant(5));
//! assert_eq!(graph.output("total").unwrap(), 45);
//! ```
//!
//! ## Expressions and implicit dependencies
//!
//! [`Graph::set_expression`] installs a task that evaluates a small
//! expression language; `out("task")` calls read other tasks' outputs and
//! are tracked as implicit dependencies, so invalidation keeps working even
//! though no explicit link was declared:
//!
//! ```rust
//! use calcgraph_core::{constant, Graph};
//!
//! let graph = Graph::new_static();
//! graph.set_task("x", constant(7));
//! graph.set_expression("doubled", "out('x') * 2");
//! assert_eq!(graph.output("doubled").unwrap(), 14);
//!
//! graph.set_task("x", constant(8));
//! assert_eq!(graph.output("doubled").unwrap(), 16);
//! ```
//!
//! ## Observation
//!
//! Every graph exposes a set of typed [`Signal`]s (`on_update`,
//! `on_execute`, `on_finished`, `on_failed`, `on_changed`, `on_cycle`,
//! `on_task_renamed`) with synchronous, registration-ordered dispatch.
//! Built-in observers cover the common cases: [`Logger`] (structured
//! `tracing` events), [`PerformanceMonitor`] (per-task wall-clock series),
//! and [`UpdatedTasks`] (visited-task probe).
//!
//! ## Threading
//!
//! The engine is single-threaded by contract: no parallelism inside an
//! update, no event loop, callbacks on the calling thread. A [`Graph`] is
//! not `Send`; wrap access in your own serialisation if you need it off the
//! creating thread.

pub mod error;
pub mod expression;
pub mod graph;
pub mod inputs;
pub mod observers;
pub mod signal;
pub mod task;

mod topology;
mod update;

pub use error::{Error, Result};
pub use expression::SymbolScope;
pub use graph::{EvaluationMode, Graph, Link, LinkTarget};
pub use inputs::{InputValue, NamedInputs};
pub use observers::{Logger, LoggerOptions, PerformanceMonitor, UpdatedTasks};
pub use signal::{Event, Signal, SlotId};
pub use task::{
    array, automatic_dependencies, constant, consume, custom, delay, evaluate, evaluate_with,
    null, passthrough, raise, ArrayExtent, CustomFn, Extent, InputLabel, SymbolFn, TaskFn,
    TaskName, TaskState, Value,
};
