//! Compile-time cost of a linear chain of nodes, at a few chain lengths.

use async_trait::async_trait;
use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};

use bspgraph::graph::GraphBuilder;
use bspgraph::node::{Node, NodeContext, NodeError, NodeOutput};
use bspgraph::state::State;
use bspgraph::types::NodeKind;

struct NoopNode;

#[async_trait]
impl Node for NoopNode {
    async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::None)
    }
}

fn chain_node_ids(count: usize) -> Vec<NodeKind> {
    (0..count)
        .map(|i| NodeKind::Custom(format!("node-{i}")))
        .collect()
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_compile");

    for &count in &[10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("linear_chain_{count}_nodes"), |b| {
            b.iter_batched(
                || chain_node_ids(count),
                |ids| {
                    let mut builder = GraphBuilder::new();
                    for id in &ids {
                        builder = builder.add_node(id.clone(), NoopNode);
                    }
                    builder = builder.with_entry_point(ids[0].clone());
                    for pair in ids.windows(2) {
                        builder = builder.add_edge(pair[0].clone(), pair[1].clone());
                    }
                    builder.compile().expect("valid graph")
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
