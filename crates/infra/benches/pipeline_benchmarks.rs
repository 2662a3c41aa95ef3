use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::time::Duration;

use byteme_core::{ExecutionOutcome, Job, StatusFrame, Submission};
use byteme_infra::queue::{InMemoryJobQueue, JobQueue};
use byteme_infra::result_store::{InMemoryResultStore, ResultStore};

const TTL: Duration = Duration::from_secs(3600);

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn bench_submission_intake(c: &mut Criterion) {
    let mut group = c.benchmark_group("submission_intake");

    for code_len in [32usize, 1024, 64 * 1024] {
        let code = "x".repeat(code_len);
        let text = serde_json::json!({"code": code, "timestamp": "1712345678901"}).to_string();
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse_and_encode", code_len), &text, |b, text| {
            b.iter(|| {
                let submission = Submission::parse(black_box(text)).unwrap();
                Job::new(submission).encode().unwrap()
            });
        });
    }

    group.finish();
}

fn bench_queue_round_trip(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("in_memory_queue");

    for batch_size in [1u64, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(BenchmarkId::new("publish_fetch_ack", batch_size), &batch_size, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let queue = InMemoryJobQueue::default();
                    for i in 0..n {
                        queue
                            .publish(&Job::new(Submission::new("print(1)", i.to_string())))
                            .await
                            .unwrap();
                    }
                    while let Some(delivery) = queue.fetch("bench", Duration::ZERO).await.unwrap() {
                        queue.ack(&delivery).await.unwrap();
                    }
                })
            });
        });
    }

    group.finish();
}

fn bench_result_poll(c: &mut Criterion) {
    let rt = runtime();
    let store = InMemoryResultStore::new();
    let outcome = ExecutionOutcome::new("hi\n".repeat(100), "", 0).to_json().unwrap();
    rt.block_on(store.set("result:bench", &outcome, TTL)).unwrap();

    let mut group = c.benchmark_group("result_poll");
    group.bench_function("hit_to_completed_frame", |b| {
        b.iter(|| {
            rt.block_on(async {
                let raw = store.get(black_box("result:bench")).await.unwrap().unwrap();
                let outcome = ExecutionOutcome::from_json(&raw).unwrap();
                StatusFrame::completed(&outcome).to_json().unwrap()
            })
        });
    });
    group.bench_function("miss", |b| {
        b.iter(|| rt.block_on(store.get(black_box("result:absent"))).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_submission_intake, bench_queue_round_trip, bench_result_poll);
criterion_main!(benches);
