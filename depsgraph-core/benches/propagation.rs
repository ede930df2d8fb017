//! Propagation over graphs with many thousands of operations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use depsgraph_core::graph::{ComponentKind, OperationCode, OperationHandle};
use depsgraph_core::{DataBlockId, DataCategory, Depsgraph};

/// Objects with a chain of transform steps each, every object parented to the previous one.
fn build(objects: usize, steps: usize) -> (Depsgraph, Vec<OperationHandle>) {
    let mut graph = Depsgraph::default();
    let mut roots = Vec::with_capacity(objects);
    let mut previous_last: Option<OperationHandle> = None;

    for raw in 0..objects {
        let node = graph.add_id_node(DataBlockId::new(DataCategory::Object, raw as u64), false);
        let transform = graph
            .add_component(node, ComponentKind::Transform, "")
            .expect("fresh node");
        let mut previous: Option<OperationHandle> = None;
        for step in 0..steps {
            let op = graph
                .add_operation(transform, OperationCode::Operation, &format!("step{step}"), -1)
                .expect("fresh component");
            if let Some(prev) = previous {
                graph.add_relation(prev, op, "step", false).expect("live nodes");
            }
            previous = Some(op);
            if step == 0 {
                roots.push(op);
                if let Some(parent) = previous_last {
                    graph.add_relation(parent, op, "parent", false).expect("live nodes");
                }
            }
        }
        previous_last = previous;
    }
    (graph, roots)
}

fn propagate_from_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate_from_root");
    for objects in [100usize, 1_000, 5_000] {
        let (mut graph, roots) = build(objects, 4);
        group.bench_with_input(BenchmarkId::from_parameter(objects * 4), &roots, |b, roots| {
            b.iter(|| {
                graph.add_entry_tag(roots[0]);
                black_box(graph.propagate());
            });
        });
    }
    group.finish();
}

fn propagate_scattered_tags(c: &mut Criterion) {
    let (mut graph, roots) = build(2_000, 4);
    c.bench_function("propagate_scattered_tags", |b| {
        b.iter(|| {
            for root in roots.iter().step_by(97) {
                graph.add_entry_tag(*root);
            }
            black_box(graph.propagate());
        });
    });
}

/// A two-operation cycle feeding a long chain; everything behind it is blocked.
fn propagate_behind_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate_behind_cycle");
    for chain in [1_000usize, 4_000, 16_000] {
        let mut graph = Depsgraph::default();
        let node = graph.add_id_node(DataBlockId::new(DataCategory::Object, 0), false);
        let component = graph
            .add_component(node, ComponentKind::Transform, "")
            .expect("fresh node");
        let a = graph
            .add_operation(component, OperationCode::Operation, "a", -1)
            .expect("fresh component");
        let b = graph
            .add_operation(component, OperationCode::Operation, "b", -1)
            .expect("fresh component");
        graph.add_relation(a, b, "a -> b", false).expect("live nodes");
        graph.add_relation(b, a, "b -> a", false).expect("live nodes");
        let mut previous = b;
        for step in 0..chain {
            let op = graph
                .add_operation(component, OperationCode::Operation, &format!("chain{step}"), -1)
                .expect("fresh component");
            graph.add_relation(previous, op, "chain", false).expect("live nodes");
            previous = op;
        }

        group.bench_with_input(BenchmarkId::from_parameter(chain), &a, |bench, &a| {
            bench.iter(|| {
                graph.add_entry_tag(a);
                black_box(graph.propagate());
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    propagate_from_root,
    propagate_scattered_tags,
    propagate_behind_cycle
);
criterion_main!(benches);
