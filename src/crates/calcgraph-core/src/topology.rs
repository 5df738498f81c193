//! Directed multigraph substrate
//!
//! Thin wrapper around a petgraph [`StableDiGraph`] keyed by task name.
//! Edges point from a task to the tasks it depends on (target → source), so
//! in storage terms *ancestors* of a node are its downstream consumers and
//! *descendants* are its upstream producers. Parallel edges between the same
//! pair of nodes coexist and are individually addressable by [`EdgeIndex`].
//!
//! Stable indices matter here: removing a task must not shift the indices of
//! the survivors, and renaming a task is a node-weight update rather than a
//! copy of the whole store.

use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{DfsPostOrder, EdgeRef, IntoEdgeReferences};
use petgraph::Direction;

use crate::task::{InputLabel, TaskName, TaskRecord};

#[derive(Debug)]
pub(crate) struct Topology {
    graph: StableDiGraph<TaskRecord, InputLabel>,
    index: HashMap<TaskName, NodeIndex>,
}

impl Topology {
    pub(crate) fn new() -> Self {
        Topology {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub(crate) fn node(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    pub(crate) fn task(&self, node: NodeIndex) -> Option<&TaskRecord> {
        self.graph.node_weight(node)
    }

    pub(crate) fn task_mut(&mut self, node: NodeIndex) -> Option<&mut TaskRecord> {
        self.graph.node_weight_mut(node)
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &TaskName> {
        self.index.keys()
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn insert(&mut self, record: TaskRecord) -> NodeIndex {
        let name = record.name.clone();
        let node = self.graph.add_node(record);
        self.index.insert(name, node);
        node
    }

    /// Remove a node along with every incident edge.
    pub(crate) fn remove(&mut self, name: &str) {
        if let Some(node) = self.index.remove(name) {
            self.graph.remove_node(node);
        }
    }

    /// Rename a node in place; incident edges and their labels are untouched.
    pub(crate) fn rename(&mut self, oldname: &str, newname: &str) {
        if let Some(node) = self.index.remove(oldname) {
            if let Some(record) = self.graph.node_weight_mut(node) {
                record.name = newname.to_string();
            }
            self.index.insert(newname.to_string(), node);
        }
    }

    /// Add an edge from `target` to its dependency `source`.
    pub(crate) fn add_edge(
        &mut self,
        target: NodeIndex,
        source: NodeIndex,
        input: InputLabel,
    ) -> EdgeIndex {
        self.graph.add_edge(target, source, input)
    }

    pub(crate) fn remove_edge(&mut self, edge: EdgeIndex) {
        self.graph.remove_edge(edge);
    }

    /// Out-edges of `node` (its dependencies), as
    /// `(edge, source, label)` triples in edge-insertion order.
    pub(crate) fn out_edges(&self, node: NodeIndex) -> Vec<(EdgeIndex, NodeIndex, InputLabel)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| (edge.id(), edge.target(), edge.weight().clone()))
            .collect();
        // petgraph yields newest-first; callers expect insertion order.
        edges.reverse();
        edges
    }

    /// In-edges of `node` (links that use it as their upstream producer),
    /// as `(edge, target)` pairs in edge-insertion order.
    pub(crate) fn in_edges(&self, node: NodeIndex) -> Vec<(EdgeIndex, NodeIndex)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|edge| (edge.id(), edge.source()))
            .collect();
        edges.reverse();
        edges
    }

    /// Every edge in the store as `(target, source, label)`, in insertion
    /// order.
    pub(crate) fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex, &InputLabel)> {
        self.graph
            .edge_references()
            .map(|edge| (edge.source(), edge.target(), edge.weight()))
    }

    /// Every parallel edge between `target` and `source`.
    pub(crate) fn edges_between(&self, target: NodeIndex, source: NodeIndex) -> Vec<EdgeIndex> {
        self.graph
            .edges_directed(target, Direction::Outgoing)
            .filter(|edge| edge.target() == source)
            .map(|edge| edge.id())
            .collect()
    }

    /// Nodes with a path *to* `node`: the downstream consumers that depend
    /// on it, transitively. Excludes `node` itself.
    pub(crate) fn ancestors(&self, node: NodeIndex) -> HashSet<NodeIndex> {
        self.reachable(node, Direction::Incoming)
    }

    /// Nodes reachable *from* `node`: the upstream producers it depends on,
    /// transitively. Excludes `node` itself.
    pub(crate) fn descendants(&self, node: NodeIndex) -> HashSet<NodeIndex> {
        self.reachable(node, Direction::Outgoing)
    }

    fn reachable(&self, start: NodeIndex, direction: Direction) -> HashSet<NodeIndex> {
        let mut seen = HashSet::new();
        seen.insert(start);
        let mut stack: Vec<NodeIndex> = self.graph.neighbors_directed(start, direction).collect();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.graph.neighbors_directed(node, direction));
            }
        }
        seen.remove(&start);
        seen
    }

    /// Depth-first post-order over the dependency closure of `start`:
    /// producers are emitted before the consumers that depend on them, so the
    /// sequence is a valid bottom-up execution order.
    pub(crate) fn dfs_postorder(&self, start: NodeIndex) -> Vec<NodeIndex> {
        let mut dfs = DfsPostOrder::new(&self.graph, start);
        let mut order = Vec::new();
        while let Some(node) = dfs.next(&self.graph) {
            order.push(node);
        }
        order
    }

    /// Search the dependency closure of `start` for a cycle. Returns the
    /// first node of one cycle, or `None` when the closure is acyclic.
    pub(crate) fn find_cycle_from(&self, start: NodeIndex) -> Option<NodeIndex> {
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let mut marks: HashMap<NodeIndex, u8> = HashMap::new();
        marks.insert(start, GRAY);
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = vec![(start, self.successors(start))];

        loop {
            let next = match stack.last_mut() {
                None => return None,
                Some((_, pending)) => pending.pop(),
            };
            match next {
                Some(node) => match marks.get(&node).copied() {
                    Some(GRAY) => return Some(node),
                    Some(_) => {}
                    None => {
                        marks.insert(node, GRAY);
                        let successors = self.successors(node);
                        stack.push((node, successors));
                    }
                },
                None => {
                    if let Some((node, _)) = stack.pop() {
                        marks.insert(node, BLACK);
                    }
                }
            }
        }
    }

    fn successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect()
    }
}
