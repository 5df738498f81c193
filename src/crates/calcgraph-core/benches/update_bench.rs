//! Benchmarks for update passes over a linear dependency chain: cold
//! (everything invalidated) versus cached (pure traversal, no execution).

use calcgraph_core::{constant, custom, Graph, InputLabel};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

const CHAIN_LENGTH: usize = 100;

fn chain(graph: &Graph, length: usize) -> String {
    graph.add_task("t0", constant(1)).unwrap();
    for index in 1..length {
        graph
            .add_task(
                format!("t{index}"),
                custom(|_, _, inputs, _| {
                    let upstream = inputs.getone(InputLabel::None)?;
                    Ok(json!(upstream.as_i64().unwrap_or(0) + 1))
                }),
            )
            .unwrap();
        graph
            .add_links(format!("t{}", index - 1), [format!("t{index}")])
            .unwrap();
    }
    format!("t{}", length - 1)
}

fn bench_static_updates(c: &mut Criterion) {
    let graph = Graph::new_static();
    let tail = chain(&graph, CHAIN_LENGTH);

    c.bench_function("static_chain_cold_update", |b| {
        b.iter(|| {
            graph.mark_all_unfinished();
            graph.update(black_box(&tail)).unwrap();
        })
    });

    graph.update(&tail).unwrap();
    c.bench_function("static_chain_cached_update", |b| {
        b.iter(|| graph.update(black_box(&tail)).unwrap())
    });
}

fn bench_dynamic_updates(c: &mut Criterion) {
    let graph = Graph::new_dynamic();
    let tail = chain(&graph, CHAIN_LENGTH);

    c.bench_function("dynamic_chain_cold_update", |b| {
        b.iter(|| {
            graph.mark_all_unfinished();
            graph.update(black_box(&tail)).unwrap();
        })
    });
}

criterion_group!(benches, bench_static_updates, bench_dynamic_updates);
criterion_main!(benches);
