//! Benchmarks for a single iteration's four-phase dispatch cost across
//! different model-agent population sizes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use caxton_platform::agent::ModelAgent;
use caxton_platform::config::ServerConfig;
use caxton_platform::server::Server;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

fn bench_iteration_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("run_iteration");
    for population in [1, 10, 50, 200].iter() {
        group.bench_with_input(
            BenchmarkId::new("model_agents", population),
            population,
            |b, &population| {
                b.to_async(&rt).iter(|| async {
                    let server = Server::new(ServerConfig::testing());
                    for _ in 0..population {
                        let counter = Arc::new(AtomicU32::new(0));
                        server.spawn_model(ModelAgent::new(
                            Arc::new(|_| true),
                            Arc::new(move || {
                                let n = counter.fetch_add(1, Ordering::SeqCst);
                                Bytes::from(vec![n as u8])
                            }),
                        ));
                    }
                    black_box(server.run_iteration(0).await.unwrap());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_iteration_dispatch);
criterion_main!(benches);
