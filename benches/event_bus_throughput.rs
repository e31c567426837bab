//! Throughput of publishing events through the broadcast hub and draining
//! them back out through a subscriber, at a few batch sizes.

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use bspgraph::event_bus::EventBus;
use bspgraph::event_bus::Event;

fn runtime() -> Runtime {
    Runtime::new().expect("tokio runtime")
}

fn bench_publish_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_bus_throughput");

    for &count in &[100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_function(format!("publish_and_drain_{count}"), |b| {
            b.to_async(runtime()).iter_batched(
                || {
                    let bus = EventBus::with_sinks(Vec::new());
                    let emitter = bus.get_emitter();
                    let stream = bus.subscribe();
                    (bus, emitter, stream)
                },
                |(bus, emitter, mut stream)| async move {
                    for step in 0..count {
                        emitter
                            .emit(Event::node_message_with_meta(
                                "bench-node",
                                step,
                                "bench",
                                "tick",
                            ))
                            .expect("emit");
                    }
                    for _ in 0..count {
                        stream.recv().await.expect("recv");
                    }
                    drop(bus);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_publish_and_drain);
criterion_main!(benches);
