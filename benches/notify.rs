use std::sync::Arc;

use criterion::{black_box, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};

use registry_cache::{CacheLocation, Endpoint, NotifyListener, Registry, RegistryConfig};

fn bench_notify(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify");
    for &subscriptions in &[1_usize, 16, 256] {
        let config = RegistryConfig {
            cache_file: CacheLocation::Disabled,
            sync_save: true,
            ..RegistryConfig::default()
        };
        let registry_url = Endpoint::new("zookeeper", "127.0.0.1", 2181, "registry");
        let registry = Registry::new(registry_url, config).expect("registry");
        for idx in 0..subscriptions {
            let url = Endpoint::new("consumer", "10.0.0.1", 0, format!("com.example.Service{idx}"));
            let listener: Arc<dyn NotifyListener> =
                Arc::new(|urls: &[Endpoint]| -> anyhow::Result<()> {
                    black_box(urls.len());
                    Ok(())
                });
            registry.subscribe(&url, listener).expect("subscribe");
        }
        let batch: Vec<Endpoint> = (0..32)
            .map(|port| Endpoint::new("grpc", "10.0.0.9", 50_000 + port, "com.example.Service0"))
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(subscriptions),
            &batch,
            |b, batch| b.iter(|| registry.notify(black_box(batch))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_notify);
criterion_main!(benches);
