//! Property tests: the state-machine invariants must survive arbitrary
//! mutation sequences, not just the happy paths the scenario tests walk.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use calcgraph_core::{constant, null, Event, Graph, InputLabel, TaskState};
use proptest::prelude::*;

/// A mutation or update drawn from a small task-name pool, so sequences
/// collide often enough to exercise duplicates, replacements, and cycles.
#[derive(Debug, Clone)]
enum Op {
    AddTask(u8),
    SetTask(u8, i64),
    AddLink(u8, u8, Option<u8>),
    SetLinks(u8, u8),
    ClearLinks(u8, u8),
    ClearTask(u8),
    Rename(u8, u8),
    MarkUnfinished(u8),
    Update(u8),
}

const POOL: u8 = 6;

fn task_name(index: u8) -> String {
    format!("t{}", index % POOL)
}

fn label(index: Option<u8>) -> InputLabel {
    match index {
        None => InputLabel::None,
        Some(index) => InputLabel::from(format!("in{}", index % 3).as_str()),
    }
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..POOL).prop_map(Op::AddTask),
        (0..POOL, -100i64..100).prop_map(|(name, value)| Op::SetTask(name, value)),
        (0..POOL, 0..POOL, proptest::option::of(0u8..3))
            .prop_map(|(source, target, input)| Op::AddLink(source, target, input)),
        (0..POOL, 0..POOL).prop_map(|(source, target)| Op::SetLinks(source, target)),
        (0..POOL, 0..POOL).prop_map(|(source, target)| Op::ClearLinks(source, target)),
        (0..POOL).prop_map(Op::ClearTask),
        (0..POOL, 0..POOL).prop_map(|(old, new)| Op::Rename(old, new)),
        (0..POOL).prop_map(Op::MarkUnfinished),
        (0..POOL).prop_map(Op::Update),
    ]
}

/// Structural errors (missing/duplicate tasks) and task failures are legal
/// outcomes for random operations; the invariants must hold either way.
fn apply(graph: &Graph, op: &Op) {
    match op {
        Op::AddTask(name) => {
            let _ = graph.add_task(task_name(*name), null());
        }
        Op::SetTask(name, value) => {
            graph.set_task(task_name(*name), constant(*value));
        }
        Op::AddLink(source, target, input) => {
            let _ = graph.add_links(
                task_name(*source),
                [(task_name(*target), label(*input))],
            );
        }
        Op::SetLinks(source, target) => {
            let _ = graph.set_links(task_name(*source), [task_name(*target)]);
        }
        Op::ClearLinks(source, target) => {
            let _ = graph.clear_links(&task_name(*source), &task_name(*target));
        }
        Op::ClearTask(name) => {
            graph.clear_tasks([task_name(*name)]);
        }
        Op::Rename(old, new) => {
            let _ = graph.rename_task(&task_name(*old), &task_name(*new));
        }
        Op::MarkUnfinished(name) => {
            graph.mark_unfinished([task_name(*name)]);
        }
        Op::Update(name) => {
            let _ = graph.update(&task_name(*name));
        }
    }
}

/// A finished task may only depend on finished tasks. Returns the first
/// violating link, if any.
fn finished_depends_on_finished(graph: &Graph) -> Option<String> {
    for link in graph.links() {
        let source = graph.state(&link.source);
        let target = graph.state(&link.target);
        if let (Ok(source_state), Ok(target_state)) = (source, target) {
            if source_state != TaskState::Finished && target_state == TaskState::Finished {
                return Some(format!(
                    "{} is finished but its dependency {} is {:?}",
                    link.target, link.source, source_state
                ));
            }
        }
    }
    None
}

/// Tasks reachable upstream from `root` through the link relation,
/// including `root` itself.
fn upstream_closure(graph: &Graph, root: &str) -> HashSet<String> {
    let mut producers: HashMap<String, Vec<String>> = HashMap::new();
    for link in graph.links() {
        producers.entry(link.target).or_default().push(link.source);
    }
    let mut closure = HashSet::new();
    let mut stack = vec![root.to_string()];
    while let Some(name) = stack.pop() {
        if closure.insert(name.clone()) {
            if let Some(sources) = producers.get(&name) {
                stack.extend(sources.iter().cloned());
            }
        }
    }
    closure
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn invariants_hold_under_random_mutation_sequences(
        ops in proptest::collection::vec(arb_op(), 1..40)
    ) {
        let graph = Graph::new_static();
        for op in &ops {
            apply(&graph, op);

            // Invariant: no finished task depends on an unfinished one.
            prop_assert_eq!(finished_depends_on_finished(&graph), None);

            // Invariant: a successful update finishes the whole closure.
            if let Op::Update(index) = op {
                let root = task_name(*index);
                if graph.contains(&root) && graph.update(&root).is_ok() {
                    for name in upstream_closure(&graph, &root) {
                        prop_assert_eq!(graph.state(&name).unwrap(), TaskState::Finished);
                    }
                }
            }
        }
    }

    #[test]
    fn repeated_updates_do_not_reexecute(
        ops in proptest::collection::vec(arb_op(), 1..30),
        root in 0..POOL,
    ) {
        let graph = Graph::new_static();
        for op in &ops {
            apply(&graph, op);
        }
        let root = task_name(root);
        if !graph.contains(&root) || graph.update(&root).is_err() {
            return Ok(());
        }

        let executions = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&executions);
        graph.on_execute().connect(move |_, event| {
            if let Event::Execute { .. } = event {
                counter.set(counter.get() + 1);
            }
        });

        graph.update(&root).unwrap();
        prop_assert_eq!(executions.get(), 0);
    }

    #[test]
    fn mark_unfinished_is_idempotent(
        ops in proptest::collection::vec(arb_op(), 1..30),
        victim in 0..POOL,
    ) {
        let graph = Graph::new_static();
        for op in &ops {
            apply(&graph, op);
        }
        let victim = task_name(victim);

        graph.mark_unfinished([&victim]);
        let first: HashMap<String, TaskState> = graph
            .tasks()
            .into_iter()
            .map(|name| {
                let state = graph.state(&name).unwrap();
                (name, state)
            })
            .collect();

        graph.mark_unfinished([&victim]);
        let second: HashMap<String, TaskState> = graph
            .tasks()
            .into_iter()
            .map(|name| {
                let state = graph.state(&name).unwrap();
                (name, state)
            })
            .collect();

        prop_assert_eq!(first, second);
    }

    #[test]
    fn set_links_is_reflected_by_links(
        targets in proptest::collection::vec((0..POOL, proptest::option::of(0u8..3)), 0..6)
    ) {
        let graph = Graph::new_static();
        for index in 0..POOL {
            graph.add_task(task_name(index), null()).unwrap();
        }
        let source = task_name(0);

        let wanted: Vec<(String, InputLabel)> = targets
            .iter()
            .map(|(target, input)| (task_name(*target), label(*input)))
            .collect();
        graph.set_links(&source, wanted.clone()).unwrap();

        let mut expected: Vec<(String, InputLabel)> = wanted;
        let mut actual: Vec<(String, InputLabel)> = graph
            .links_from(&source)
            .into_iter()
            .map(|link| (link.target, link.input))
            .collect();
        expected.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        actual.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        prop_assert_eq!(expected, actual);
    }

    #[test]
    fn rename_preserves_links_up_to_substitution(
        links in proptest::collection::vec((0..POOL, 0..POOL, proptest::option::of(0u8..3)), 0..8)
    ) {
        let graph = Graph::new_static();
        for index in 0..POOL {
            graph.add_task(task_name(index), null()).unwrap();
        }
        for (source, target, input) in &links {
            graph
                .add_links(task_name(*source), [(task_name(*target), label(*input))])
                .unwrap();
        }

        let before: Vec<(String, String, InputLabel)> = graph
            .links()
            .into_iter()
            .map(|link| (link.source, link.target, link.input))
            .collect();

        graph.rename_task("t0", "fresh").unwrap();

        let substitute = |name: String| -> String {
            if name == "t0" {
                "fresh".to_string()
            } else {
                name
            }
        };
        let mut expected: Vec<(String, String, InputLabel)> = before
            .into_iter()
            .map(|(source, target, input)| (substitute(source), substitute(target), input))
            .collect();
        let mut actual: Vec<(String, String, InputLabel)> = graph
            .links()
            .into_iter()
            .map(|link| (link.source, link.target, link.input))
            .collect();
        expected.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        actual.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        prop_assert_eq!(expected, actual);
    }
}
