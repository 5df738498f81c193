//! Signal bus
//!
//! Each [`Graph`](crate::Graph) owns one [`Signal`] per lifecycle event.
//! Dispatch is synchronous: emitting invokes every subscriber on the calling
//! thread, in registration order, before returning. The slot list is
//! snapshotted at the start of each emit, so a subscriber may connect or
//! disconnect slots (including its own) without disturbing the dispatch in
//! progress; such changes take effect from the next emit.
//!
//! Subscribers receive the emitting graph and an [`Event`] payload. A panic
//! inside a subscriber unwinds through `emit` and out of the operation that
//! triggered it; the bus makes no attempt to contain observer failures.
//!
//! Per executed task the engine guarantees the order
//! `Update` ≺ `Execute` ≺ (`Finished` xor `Failed`), and `Changed` fires at
//! most once per structural mutation, after task states have settled.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::graph::Graph;
use crate::inputs::NamedInputs;
use crate::task::{Extent, Value};

/// Payload delivered to signal subscribers.
#[derive(Debug)]
pub enum Event<'a> {
    /// Part of the graph became unfinished (or failed) after a mutation.
    Changed,
    /// A task was visited during an update, whether or not it will execute.
    Update {
        /// Task being visited.
        name: &'a str,
        /// Extent requested from the task, on streaming graphs.
        extent: Option<&'a Extent>,
    },
    /// A task function is about to be invoked.
    Execute {
        /// Task being executed.
        name: &'a str,
        /// The inputs view handed to the task function.
        inputs: &'a NamedInputs<'a>,
        /// Extent requested from the task, on streaming graphs.
        extent: Option<&'a Extent>,
    },
    /// A task function returned successfully.
    Finished {
        /// Task that finished.
        name: &'a str,
        /// The output just produced and cached.
        output: &'a Value,
    },
    /// A task function failed.
    Failed {
        /// Task that failed.
        name: &'a str,
        /// The failure, about to be propagated to the update caller.
        error: &'a Error,
    },
    /// A cycle was detected during an update.
    Cycle {
        /// First task of the detected cycle.
        name: &'a str,
    },
    /// A task was renamed.
    TaskRenamed {
        /// Name before the rename.
        oldname: &'a str,
        /// Name after the rename.
        newname: &'a str,
    },
}

/// Handle identifying one subscription on one [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Subscriber = Rc<dyn Fn(&Graph, &Event<'_>)>;

/// A named synchronous signal with an ordered subscriber list.
pub struct Signal {
    name: &'static str,
    slots: RefCell<Vec<(SlotId, Subscriber)>>,
    next_id: Cell<u64>,
}

impl Signal {
    pub(crate) fn new(name: &'static str) -> Self {
        Signal {
            name,
            slots: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    /// The signal's name, e.g. `"on_update"`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of connected subscribers.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    /// True when no subscriber is connected.
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Subscribe. The returned [`SlotId`] disconnects exactly this
    /// subscription.
    pub fn connect(&self, subscriber: impl Fn(&Graph, &Event<'_>) + 'static) -> SlotId {
        let id = SlotId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let subscriber: Subscriber = Rc::new(subscriber);
        self.slots.borrow_mut().push((id, subscriber));
        id
    }

    /// Unsubscribe. Returns whether the slot was still connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|(slot, _)| *slot != id);
        slots.len() != before
    }

    pub(crate) fn emit(&self, graph: &Graph, event: &Event<'_>) {
        let subscribers: Vec<Subscriber> = self
            .slots
            .borrow()
            .iter()
            .map(|(_, subscriber)| Rc::clone(subscriber))
            .collect();
        for subscriber in subscribers {
            subscriber(graph, event);
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("slots", &self.len())
            .finish()
    }
}

/// The full set of signals owned by a graph.
#[derive(Debug)]
pub(crate) struct Signals {
    pub(crate) changed: Signal,
    pub(crate) cycle: Signal,
    pub(crate) execute: Signal,
    pub(crate) failed: Signal,
    pub(crate) finished: Signal,
    pub(crate) task_renamed: Signal,
    pub(crate) update: Signal,
}

impl Signals {
    pub(crate) fn new() -> Self {
        Signals {
            changed: Signal::new("on_changed"),
            cycle: Signal::new("on_cycle"),
            execute: Signal::new("on_execute"),
            failed: Signal::new("on_failed"),
            finished: Signal::new("on_finished"),
            task_renamed: Signal::new("on_task_renamed"),
            update: Signal::new("on_update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn test_subscribers_run_in_registration_order() {
        let graph = Graph::new_static();
        let order = Rc::new(RefCell::new(Vec::new()));

        let first = Rc::clone(&order);
        graph.on_changed().connect(move |_, _| first.borrow_mut().push(1));
        let second = Rc::clone(&order);
        graph.on_changed().connect(move |_, _| second.borrow_mut().push(2));

        graph.set_task("a", crate::task::null());
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let graph = Graph::new_static();
        let count = Rc::new(Cell::new(0));

        let counter = Rc::clone(&count);
        let slot = graph.on_changed().connect(move |_, _| {
            counter.set(counter.get() + 1);
        });

        graph.set_task("a", crate::task::null());
        assert_eq!(count.get(), 1);

        assert!(graph.on_changed().disconnect(slot));
        assert!(!graph.on_changed().disconnect(slot));
        graph.set_task("b", crate::task::null());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_connect_during_dispatch_takes_effect_next_emit() {
        let graph = Graph::new_static();
        let graph_signals_count = Rc::new(Cell::new(0));

        let counter = Rc::clone(&graph_signals_count);
        graph.on_changed().connect(move |g, _| {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                let nested = Rc::clone(&counter);
                g.on_changed().connect(move |_, _| {
                    nested.set(nested.get() + 10);
                });
            }
        });

        graph.set_task("a", crate::task::null());
        assert_eq!(graph_signals_count.get(), 1);
        graph.set_task("b", crate::task::null());
        assert_eq!(graph_signals_count.get(), 12);
    }
}
