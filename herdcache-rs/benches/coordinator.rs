use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use herdcache::average::Average;
use herdcache::coordinator::Coordinator;
use herdcache::scope::Scope;
use herdcache::source::DataSource;
use herdcache::store::{CacheStore, MemoryStore};

struct Echo;

#[async_trait]
impl DataSource<u32, String> for Echo {
    async fn populate(&self, key: &u32) -> anyhow::Result<Option<String>> {
        Ok(Some(key.to_string()))
    }

    async fn populate_batch(
        &self,
        keys: &[u32],
        positions: &[usize],
    ) -> anyhow::Result<Vec<Option<String>>> {
        Ok(positions
            .iter()
            .map(|position| Some(keys[*position].to_string()))
            .collect())
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn coordinator(store: Arc<MemoryStore<u32, String>>) -> Coordinator<u32, String> {
    Coordinator::<u32, String>::builder(Scope::new("bench"))
        .store(store)
        .source(Arc::new(Echo))
        .build()
        .unwrap()
}

fn hit_benchmarks(c: &mut Criterion) {
    let rt = runtime();
    let store = Arc::new(MemoryStore::<u32, String>::new());
    rt.block_on(async {
        for key in 0..64 {
            store
                .set(&key, &key.to_string(), Duration::from_secs(60))
                .await
                .unwrap();
        }
    });
    let coordinator = coordinator(store);

    c.bench_function("find (hit)", |b| {
        b.iter(|| rt.block_on(async { black_box(coordinator.find(&42).await.unwrap()) }))
    });

    let keys: Vec<u32> = (0..64).collect();
    c.bench_function("batch_find 64 keys (hit)", |b| {
        b.iter(|| rt.block_on(async { black_box(coordinator.batch_find(&keys).await.unwrap()) }))
    });

    c.bench_function("find_by_no_lock (hit)", |b| {
        b.iter(|| {
            rt.block_on(async { black_box(coordinator.find_by_no_lock(&42).await.unwrap()) })
        })
    });
}

fn miss_benchmarks(c: &mut Criterion) {
    let rt = runtime();
    let store = Arc::new(MemoryStore::<u32, String>::new());
    let coordinator = coordinator(store.clone());

    c.bench_function("find (miss)", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.delete(&42).await.unwrap();
                black_box(coordinator.find(&42).await.unwrap())
            })
        })
    });

    c.bench_function("recording populate durations", |b| {
        let avg = Average::new();
        b.iter(|| avg.add_duration(black_box(Duration::from_micros(42))));

        black_box(avg);
    });
}

criterion_group!(benches, hit_benchmarks, miss_benchmarks);
criterion_main!(benches);
