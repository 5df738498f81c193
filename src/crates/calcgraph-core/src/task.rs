//! Task-state primitives and task-function factories
//!
//! A *task* is a named vertex in a [`Graph`](crate::Graph). It carries a
//! [`TaskFn`] (the computation), a [`TaskState`], and the cached output of
//! its most recent successful execution. Links between tasks carry an
//! [`InputLabel`] naming the input through which the downstream task receives
//! the upstream value.
//!
//! Task outputs are opaque [`serde_json::Value`]s, aliased here as [`Value`];
//! a task that produces nothing returns [`Value::Null`]. Streaming extents
//! are the same type, aliased as [`Extent`]; to the engine an extent is
//! nothing but an equality-compared token.
//!
//! Task functions are modelled as a small sum type rather than bare closures
//! so that [`Graph::set_task`](crate::Graph::set_task) can compare the new
//! function against the old one structurally and skip invalidation when
//! nothing changed: two `constant(5)`s are equal, two `evaluate("a + b")`s
//! are equal, and user closures compare by identity.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expression::{self, SymbolScope};
use crate::graph::Graph;
use crate::inputs::NamedInputs;
use crate::observers::UpdatedTasks;

/// Unique task identifier. Any string works; names are compared for equality.
pub type TaskName = String;

/// Opaque task output value.
pub type Value = serde_json::Value;

/// Opaque streaming extent token. The engine only ever compares extents for
/// equality; interpreting one is entirely up to the task function (see
/// [`ArrayExtent`] for the slicing convention used by [`array`] tasks).
pub type Extent = serde_json::Value;

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// The task is out-of-date and will execute during the next update.
    Unfinished,
    /// The task or one of its dependencies failed during the last update.
    Failed,
    /// The task executed successfully during the last update.
    Finished,
}

/// Label carried by a link, naming the input through which the downstream
/// task receives the upstream output.
///
/// `Implicit` is reserved for links created by the implicit-dependency
/// tracker as a side effect of expression evaluation; the tracker deletes
/// and recreates only its own links, never user-declared ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputLabel {
    /// An unlabelled link.
    #[default]
    None,
    /// A link labelled with an arbitrary name.
    Named(String),
    /// A tracker-owned link recording an implicit dependency.
    Implicit,
}

impl fmt::Display for InputLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputLabel::None => write!(f, "the unlabelled input"),
            InputLabel::Named(name) => write!(f, "input '{name}'"),
            InputLabel::Implicit => write!(f, "the implicit-dependency input"),
        }
    }
}

impl From<&str> for InputLabel {
    fn from(name: &str) -> Self {
        InputLabel::Named(name.to_string())
    }
}

impl From<String> for InputLabel {
    fn from(name: String) -> Self {
        InputLabel::Named(name)
    }
}

impl From<Option<&str>> for InputLabel {
    fn from(name: Option<&str>) -> Self {
        match name {
            None => InputLabel::None,
            Some(name) => InputLabel::Named(name.to_string()),
        }
    }
}

/// Signature shared by custom task functions: `(graph, name, inputs, extent)`.
pub type TaskClosure =
    dyn Fn(&Graph, &str, &NamedInputs<'_>, Option<&Extent>) -> Result<Value>;

/// Callable that produces extra symbol bindings for an expression task, from
/// the same `(graph, name, inputs, extent)` context a task function sees.
pub type SymbolFn = Rc<dyn Fn(&Graph, &str, &NamedInputs<'_>, Option<&Extent>) -> Vec<(String, Value)>>;

/// A user-supplied task function. Clones share the underlying closure and
/// compare equal; independently-created closures never do.
#[derive(Clone)]
pub struct CustomFn(Rc<TaskClosure>);

impl CustomFn {
    fn ptr_eq(&self, other: &CustomFn) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.0) as *const u8,
            Rc::as_ptr(&other.0) as *const u8,
        )
    }
}

/// The computation attached to a task.
///
/// Built-in variants carry their configuration as data, which makes equality
/// structural; [`Graph::set_task`](crate::Graph::set_task) relies on this to
/// decide whether replacing a task's function invalidates it.
#[derive(Clone)]
pub enum TaskFn {
    /// Does nothing; returns null. The default for tasks added without a
    /// function.
    Null,
    /// Returns a fixed value.
    Constant(Value),
    /// Returns a fixed array, sliced by the requested extent when present.
    Array(Value),
    /// Sleeps for a fixed duration, then returns null. Testing aid.
    Delay(Duration),
    /// Returns the single upstream value arriving under the given label,
    /// forwarding the requested extent upstream.
    Passthrough(InputLabel),
    /// Always fails with the given message. Testing aid.
    Raise(String),
    /// Forces every input, ignores the values, returns null. Useful for
    /// driving upstream evaluation on dynamic graphs.
    Consume,
    /// Evaluates an expression; `out("task")` calls inside the expression
    /// read (and update) other tasks' outputs.
    Expression {
        /// Expression source text. Two expression functions are equal iff
        /// their sources are equal.
        code: String,
        /// Optional replacement for the builtin symbol bindings.
        symbols: Option<SymbolFn>,
    },
    /// Wraps another function with implicit-dependency tracking: each
    /// execution rebuilds this task's `Implicit`-labelled links from the
    /// set of tasks the wrapped function actually read.
    Tracked(Box<TaskFn>),
    /// A user-supplied closure.
    Custom(CustomFn),
}

impl Default for TaskFn {
    fn default() -> Self {
        TaskFn::Null
    }
}

impl PartialEq for TaskFn {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TaskFn::Null, TaskFn::Null) => true,
            (TaskFn::Constant(a), TaskFn::Constant(b)) => a == b,
            (TaskFn::Array(a), TaskFn::Array(b)) => a == b,
            (TaskFn::Delay(a), TaskFn::Delay(b)) => a == b,
            (TaskFn::Passthrough(a), TaskFn::Passthrough(b)) => a == b,
            (TaskFn::Raise(a), TaskFn::Raise(b)) => a == b,
            (TaskFn::Consume, TaskFn::Consume) => true,
            (TaskFn::Expression { code: a, .. }, TaskFn::Expression { code: b, .. }) => a == b,
            (TaskFn::Tracked(a), TaskFn::Tracked(b)) => a == b,
            (TaskFn::Custom(a), TaskFn::Custom(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFn::Null => write!(f, "null"),
            TaskFn::Constant(value) => write!(f, "constant({value})"),
            TaskFn::Array(value) => write!(f, "array({value})"),
            TaskFn::Delay(duration) => write!(f, "delay({duration:?})"),
            TaskFn::Passthrough(input) => write!(f, "passthrough({input})"),
            TaskFn::Raise(message) => write!(f, "raise({message:?})"),
            TaskFn::Consume => write!(f, "consume"),
            TaskFn::Expression { code, .. } => write!(f, "evaluate({code:?})"),
            TaskFn::Tracked(inner) => write!(f, "automatic_dependencies({inner:?})"),
            TaskFn::Custom(_) => write!(f, "custom(..)"),
        }
    }
}

impl TaskFn {
    /// Run the task function. Called by the update strategies with the view
    /// of inputs appropriate to the graph's evaluation mode.
    pub(crate) fn call(
        &self,
        graph: &Graph,
        name: &str,
        inputs: &NamedInputs<'_>,
        extent: Option<&Extent>,
    ) -> Result<Value> {
        match self {
            TaskFn::Null => Ok(Value::Null),
            TaskFn::Constant(value) => Ok(value.clone()),
            TaskFn::Array(value) => match extent {
                None => Ok(value.clone()),
                Some(extent) => ArrayExtent::apply(extent, value).ok_or_else(|| {
                    Error::task_failed(name, format!("extent {extent} cannot index {value}"))
                }),
            },
            TaskFn::Delay(duration) => {
                std::thread::sleep(*duration);
                Ok(Value::Null)
            }
            TaskFn::Passthrough(input) => inputs.getone_with(input.clone(), extent),
            TaskFn::Raise(message) => Err(Error::task_failed(name, message.clone())),
            TaskFn::Consume => {
                for value in inputs.values() {
                    value.force()?;
                }
                Ok(Value::Null)
            }
            TaskFn::Expression { code, symbols } => {
                let extra = symbols.as_ref().map(|f| f(graph, name, inputs, extent));
                let scope = GraphScope {
                    graph,
                    name,
                    extent,
                    extra,
                };
                expression::evaluate(code, &scope)
            }
            TaskFn::Tracked(inner) => {
                // Rebuild only the links this tracker owns; explicit
                // user-declared links stay untouched.
                graph.clear_implicit_links(name);
                let recorder = UpdatedTasks::new(graph);
                let result = inner.call(graph, name, inputs, extent);
                let recorded = recorder.tasks();
                recorder.disconnect(graph);
                if result.is_ok() {
                    let mut dependencies = recorded;
                    for descendant in graph.descendants_of(name) {
                        dependencies.remove(&descendant);
                    }
                    dependencies.remove(name);
                    for source in dependencies {
                        graph.add_implicit_link(name, &source);
                    }
                }
                result
            }
            TaskFn::Custom(custom) => (custom.0)(graph, name, inputs, extent),
        }
    }
}

/// Symbol scope handed to expression tasks: builtin bindings for `name` and
/// `extent` (unless replaced by a caller-supplied [`SymbolFn`]) plus the
/// `out("task")` helper, which reads another task's output through
/// [`Graph::output`](crate::Graph::output) and thereby records an implicit
/// dependency.
struct GraphScope<'a> {
    graph: &'a Graph,
    name: &'a str,
    extent: Option<&'a Extent>,
    extra: Option<Vec<(String, Value)>>,
}

impl SymbolScope for GraphScope<'_> {
    fn variable(&self, identifier: &str) -> Option<Value> {
        if let Some(extra) = &self.extra {
            return extra
                .iter()
                .find(|(name, _)| name == identifier)
                .map(|(_, value)| value.clone());
        }
        match identifier {
            "name" => Some(Value::String(self.name.to_string())),
            "extent" => Some(self.extent.cloned().unwrap_or(Value::Null)),
            _ => None,
        }
    }

    fn call(&self, function: &str, args: &[Value]) -> Result<Value> {
        match function {
            "out" => match args {
                [Value::String(task)] => self.graph.output(task),
                _ => Err(Error::Expression(
                    "out() takes a single task name".to_string(),
                )),
            },
            other => Err(Error::Expression(format!("unknown function '{other}'"))),
        }
    }
}

/// Internal per-task record stored as the node weight in the graph topology.
#[derive(Debug, Clone)]
pub(crate) struct TaskRecord {
    pub(crate) name: TaskName,
    pub(crate) function: TaskFn,
    pub(crate) state: TaskState,
    pub(crate) output: Option<Value>,
    pub(crate) extent: Option<Extent>,
    pub(crate) updating: bool,
}

impl TaskRecord {
    pub(crate) fn new(name: TaskName, function: TaskFn) -> Self {
        TaskRecord {
            name,
            function,
            state: TaskState::Unfinished,
            output: None,
            extent: None,
            updating: false,
        }
    }
}

/// Task function that does nothing and returns null.
///
/// This is the default for [`Graph::add_task`](crate::Graph::add_task) when
/// no function is wanted.
pub fn null() -> TaskFn {
    TaskFn::Null
}

/// Task function that always returns `value`.
///
/// The workhorse for parameter tasks:
///
/// ```rust
/// use calcgraph_core::{constant, Graph};
///
/// let graph = Graph::new_static();
/// graph.set_task("theta", constant(3));
/// assert_eq!(graph.output("theta").unwrap(), 3);
/// ```
pub fn constant(value: impl Into<Value>) -> TaskFn {
    TaskFn::Constant(value.into())
}

/// Task function that returns `value`, sliced by the requested extent when
/// one is present. Compatible with extents produced by [`ArrayExtent`].
pub fn array(value: impl Into<Value>) -> TaskFn {
    TaskFn::Array(value.into())
}

/// Task function that sleeps for `duration` and returns null. Testing aid.
pub fn delay(duration: Duration) -> TaskFn {
    TaskFn::Delay(duration)
}

/// Task function that returns the single upstream value arriving under
/// `input`, forwarding the requested extent upstream. Useful for temporarily
/// bypassing a task.
pub fn passthrough(input: impl Into<InputLabel>) -> TaskFn {
    TaskFn::Passthrough(input.into())
}

/// Task function that always fails with `message`. Testing aid.
pub fn raise(message: impl Into<String>) -> TaskFn {
    TaskFn::Raise(message.into())
}

/// Task function that forces every input and returns null.
pub fn consume() -> TaskFn {
    TaskFn::Consume
}

/// Task function that evaluates `code` with the builtin symbols (`name`,
/// `extent`, and the `out()` helper).
///
/// Combine with [`automatic_dependencies`] (or use
/// [`Graph::set_expression`](crate::Graph::set_expression), which does so for
/// you) when the expression reads other tasks' outputs.
pub fn evaluate(code: impl Into<String>) -> TaskFn {
    TaskFn::Expression {
        code: code.into(),
        symbols: None,
    }
}

/// Like [`evaluate`], with a caller-supplied symbol binding replacing the
/// builtins.
pub fn evaluate_with(code: impl Into<String>, symbols: SymbolFn) -> TaskFn {
    TaskFn::Expression {
        code: code.into(),
        symbols: Some(symbols),
    }
}

/// Wrap `function` with implicit-dependency tracking.
///
/// Per execution the wrapper deletes this task's `Implicit`-labelled links,
/// records every task updated while the wrapped function runs, and creates a
/// fresh `Implicit` link to each recorded task that isn't already upstream.
/// Those links are what keep invalidation correct: when a task read via
/// `out()` changes, the expression task becomes unfinished and re-evaluates
/// on the next update.
pub fn automatic_dependencies(function: TaskFn) -> TaskFn {
    TaskFn::Tracked(Box::new(function))
}

/// Task function backed by an arbitrary closure.
///
/// ```rust
/// use calcgraph_core::{constant, custom, Graph, InputLabel};
/// use serde_json::json;
///
/// let graph = Graph::new_static();
/// graph.set_task("a", constant(2));
/// graph.set_task("b", custom(|_graph, _name, inputs, _extent| {
///     let a = inputs.getone(InputLabel::None)?;
///     Ok(json!(a.as_i64().unwrap_or(0) * 3))
/// }));
/// graph.add_links("a", ["b"]).unwrap();
/// assert_eq!(graph.output("b").unwrap(), 6);
/// ```
pub fn custom(
    function: impl Fn(&Graph, &str, &NamedInputs<'_>, Option<&Extent>) -> Result<Value> + 'static,
) -> TaskFn {
    TaskFn::Custom(CustomFn(Rc::new(function)))
}

/// Typed helper for building the extents understood by [`array`] tasks.
///
/// An [`array`] task interprets its extent as an index or a slice over the
/// stored array:
///
/// ```rust
/// use calcgraph_core::{array, ArrayExtent, Graph};
/// use serde_json::json;
///
/// let graph = Graph::new_streaming();
/// graph.set_task("samples", array(json!([0, 1, 2, 3, 4])));
/// let head = graph.output_with("samples", Some(ArrayExtent::range(0, 2))).unwrap();
/// assert_eq!(head, json!([0, 1]));
/// ```
///
/// Negative positions count from the end of the array, as do negative slice
/// bounds; out-of-range slice bounds clamp instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayExtent {
    /// A single element.
    Index(i64),
    /// A half-open slice with optional bounds and stride.
    Range {
        /// First position included; defaults to the start of the array.
        #[serde(default)]
        start: Option<i64>,
        /// First position excluded; defaults to the end of the array.
        #[serde(default)]
        stop: Option<i64>,
        /// Stride between positions; defaults to 1, must be positive.
        #[serde(default)]
        step: Option<i64>,
    },
}

impl ArrayExtent {
    /// Extent selecting the single element at `index`.
    pub fn index(index: i64) -> Extent {
        ArrayExtent::Index(index).into_extent()
    }

    /// Extent selecting the half-open slice `[start, stop)`.
    pub fn range(start: i64, stop: i64) -> Extent {
        ArrayExtent::Range {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
        .into_extent()
    }

    /// Extent selecting everything from `start` to the end.
    pub fn range_from(start: i64) -> Extent {
        ArrayExtent::Range {
            start: Some(start),
            stop: None,
            step: None,
        }
        .into_extent()
    }

    /// Extent selecting everything up to (excluding) `stop`.
    pub fn range_to(stop: i64) -> Extent {
        ArrayExtent::Range {
            start: None,
            stop: Some(stop),
            step: None,
        }
        .into_extent()
    }

    /// Extent selecting a strided slice.
    pub fn strided(start: Option<i64>, stop: Option<i64>, step: i64) -> Extent {
        ArrayExtent::Range {
            start,
            stop,
            step: Some(step),
        }
        .into_extent()
    }

    fn into_extent(self) -> Extent {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Apply an extent to an array value. Returns `None` when the extent
    /// isn't one of ours, the value isn't an array, or an index is out of
    /// range.
    pub fn apply(extent: &Extent, value: &Value) -> Option<Value> {
        let parsed: ArrayExtent = serde_json::from_value(extent.clone()).ok()?;
        let items = value.as_array()?;
        let len = items.len() as i64;
        match parsed {
            ArrayExtent::Index(index) => {
                let index = if index < 0 { len + index } else { index };
                if (0..len).contains(&index) {
                    Some(items[index as usize].clone())
                } else {
                    None
                }
            }
            ArrayExtent::Range { start, stop, step } => {
                let step = step.unwrap_or(1);
                if step <= 0 {
                    return None;
                }
                let clamp = |position: i64| -> i64 {
                    let position = if position < 0 { len + position } else { position };
                    position.clamp(0, len)
                };
                let start = clamp(start.unwrap_or(0));
                let stop = clamp(stop.unwrap_or(len));
                let mut selected = Vec::new();
                let mut position = start;
                while position < stop {
                    selected.push(items[position as usize].clone());
                    position += step;
                }
                Some(Value::Array(selected))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_equality_is_structural() {
        assert_eq!(constant(5), constant(5));
        assert_ne!(constant(5), constant(6));
        assert_eq!(array(json!([1, 2])), array(json!([1, 2])));
        assert_eq!(passthrough("x"), passthrough("x"));
        assert_ne!(passthrough("x"), passthrough("y"));
        assert_eq!(evaluate("a + b"), evaluate("a + b"));
        assert_ne!(evaluate("a + b"), evaluate("a - b"));
        assert_eq!(null(), null());
        assert_ne!(null(), constant(Value::Null));
        assert_eq!(
            automatic_dependencies(evaluate("1")),
            automatic_dependencies(evaluate("1"))
        );
    }

    #[test]
    fn test_custom_equality_is_identity() {
        let f = custom(|_, _, _, _| Ok(Value::Null));
        let g = custom(|_, _, _, _| Ok(Value::Null));
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn test_array_extent_index() {
        let data = json!([10, 20, 30]);
        assert_eq!(
            ArrayExtent::apply(&ArrayExtent::index(1), &data),
            Some(json!(20))
        );
        assert_eq!(
            ArrayExtent::apply(&ArrayExtent::index(-1), &data),
            Some(json!(30))
        );
        assert_eq!(ArrayExtent::apply(&ArrayExtent::index(3), &data), None);
    }

    #[test]
    fn test_array_extent_range() {
        let data = json!([0, 1, 2, 3, 4, 5]);
        assert_eq!(
            ArrayExtent::apply(&ArrayExtent::range(1, 4), &data),
            Some(json!([1, 2, 3]))
        );
        assert_eq!(
            ArrayExtent::apply(&ArrayExtent::range_from(4), &data),
            Some(json!([4, 5]))
        );
        assert_eq!(
            ArrayExtent::apply(&ArrayExtent::range_to(-4), &data),
            Some(json!([0, 1]))
        );
        assert_eq!(
            ArrayExtent::apply(&ArrayExtent::strided(None, None, 2), &data),
            Some(json!([0, 2, 4]))
        );
    }

    #[test]
    fn test_array_extent_clamps_out_of_range_slices() {
        let data = json!([0, 1, 2]);
        assert_eq!(
            ArrayExtent::apply(&ArrayExtent::range(1, 100), &data),
            Some(json!([1, 2]))
        );
        assert_eq!(
            ArrayExtent::apply(&ArrayExtent::range(5, 9), &data),
            Some(json!([]))
        );
    }

    #[test]
    fn test_extent_rejects_non_arrays() {
        assert_eq!(ArrayExtent::apply(&ArrayExtent::index(0), &json!(5)), None);
        assert_eq!(ArrayExtent::apply(&json!("bogus"), &json!([1])), None);
    }

    #[test]
    fn test_input_label_conversions() {
        assert_eq!(InputLabel::from("x"), InputLabel::Named("x".to_string()));
        assert_eq!(InputLabel::from(None), InputLabel::None);
        assert_eq!(InputLabel::default(), InputLabel::None);
    }
}
