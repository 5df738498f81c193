//! Named inputs view handed to task functions
//!
//! A [`NamedInputs`] is a read-only multi-map over the links arriving at the
//! task being executed: one `(label, provider)` entry per incoming link, in
//! link-insertion order, with parallel links under the same label appearing
//! as distinct entries.
//!
//! Values are *providers*, not plain data. On a static graph each provider
//! holds a snapshot of the upstream task's cached output, taken when the view
//! was built; forcing it returns the snapshot immediately. On dynamic and
//! streaming graphs each provider re-enters the graph and updates the
//! upstream task on demand, which is precisely what makes those disciplines
//! pull-based: an input a task never reads is an upstream subgraph that never
//! executes.

use std::fmt;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::task::{Extent, InputLabel, TaskName, Value};

/// How an input value is obtained when forced.
#[derive(Debug, Clone)]
pub(crate) enum Provider {
    /// Snapshot of the upstream output, taken when the view was built.
    Cached(Value),
    /// Update the named upstream task on each force and return its output.
    Pull(TaskName),
}

/// An unforced input value. Call [`force`](InputValue::force) (or
/// [`force_with`](InputValue::force_with) on a streaming graph) to obtain the
/// upstream output.
pub struct InputValue<'a> {
    graph: &'a Graph,
    provider: &'a Provider,
}

impl InputValue<'_> {
    /// Obtain the upstream value, requesting no particular extent.
    pub fn force(&self) -> Result<Value> {
        self.force_with(None)
    }

    /// Obtain the upstream value, requesting the given extent. Providers are
    /// idempotent within an update pass: the upstream task executes at most
    /// once per (pass, extent).
    pub fn force_with(&self, extent: Option<&Extent>) -> Result<Value> {
        match self.provider {
            Provider::Cached(value) => Ok(value.clone()),
            Provider::Pull(source) => self.graph.pull(source, extent),
        }
    }
}

impl fmt::Debug for InputValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Provider::Cached(value) => write!(f, "{value}"),
            Provider::Pull(source) => write!(f, "<- {source}"),
        }
    }
}

/// Read-only multi-map of the inputs arriving at a task.
pub struct NamedInputs<'a> {
    graph: &'a Graph,
    entries: Vec<(InputLabel, Provider)>,
}

impl<'a> NamedInputs<'a> {
    pub(crate) fn new(graph: &'a Graph, entries: Vec<(InputLabel, Provider)>) -> Self {
        NamedInputs { graph, entries }
    }

    /// True when at least one link carries `label`.
    pub fn contains(&self, label: impl Into<InputLabel>) -> bool {
        !self.matching(&label.into()).is_empty()
    }

    /// Total number of incoming links.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the task has no incoming links.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The value under `label`, or `None` when no link matches. Fails with
    /// [`Error::AmbiguousInput`] when several links match.
    pub fn get(&self, label: impl Into<InputLabel>) -> Result<Option<Value>> {
        self.get_with(label, None)
    }

    /// Extent-carrying form of [`get`](Self::get).
    pub fn get_with(
        &self,
        label: impl Into<InputLabel>,
        extent: Option<&Extent>,
    ) -> Result<Option<Value>> {
        let label = label.into();
        match self.matching(&label).as_slice() {
            [] => Ok(None),
            [index] => self.force_entry(*index, extent).map(Some),
            _ => Err(Error::AmbiguousInput(label)),
        }
    }

    /// The value under `label`. Fails with [`Error::MissingInput`] when no
    /// link matches and [`Error::AmbiguousInput`] when several do.
    pub fn getone(&self, label: impl Into<InputLabel>) -> Result<Value> {
        self.getone_with(label, None)
    }

    /// Extent-carrying form of [`getone`](Self::getone).
    pub fn getone_with(
        &self,
        label: impl Into<InputLabel>,
        extent: Option<&Extent>,
    ) -> Result<Value> {
        let label = label.into();
        match self.matching(&label).as_slice() {
            [] => Err(Error::MissingInput(label)),
            [index] => self.force_entry(*index, extent),
            _ => Err(Error::AmbiguousInput(label)),
        }
    }

    /// Every value under `label`, in link order. Empty when none match.
    pub fn getall(&self, label: impl Into<InputLabel>) -> Result<Vec<Value>> {
        self.getall_with(label, None)
    }

    /// Extent-carrying form of [`getall`](Self::getall).
    pub fn getall_with(
        &self,
        label: impl Into<InputLabel>,
        extent: Option<&Extent>,
    ) -> Result<Vec<Value>> {
        self.matching(&label.into())
            .into_iter()
            .map(|index| self.force_entry(index, extent))
            .collect()
    }

    /// The label of every incoming link, in link order. The same label may
    /// appear more than once.
    pub fn keys(&self) -> impl Iterator<Item = &InputLabel> {
        self.entries.iter().map(|(label, _)| label)
    }

    /// The unforced value of every incoming link, in the same order as
    /// [`keys`](Self::keys).
    pub fn values(&self) -> impl Iterator<Item = InputValue<'_>> {
        self.entries
            .iter()
            .map(|(_, provider)| self.value(provider))
    }

    /// Labels and unforced values, paired.
    pub fn items(&self) -> impl Iterator<Item = (&InputLabel, InputValue<'_>)> {
        self.entries
            .iter()
            .map(|(label, provider)| (label, self.value(provider)))
    }

    fn matching(&self, label: &InputLabel) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, (key, _))| key == label)
            .map(|(index, _)| index)
            .collect()
    }

    fn force_entry(&self, index: usize, extent: Option<&Extent>) -> Result<Value> {
        self.value(&self.entries[index].1).force_with(extent)
    }

    fn value<'b>(&'b self, provider: &'b Provider) -> InputValue<'b> {
        InputValue {
            graph: self.graph,
            provider,
        }
    }
}

impl fmt::Debug for NamedInputs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (label, provider) in &self.entries {
            map.entry(&format_args!("{label}"), &format_args!("{provider:?}"));
        }
        map.finish()
    }
}
