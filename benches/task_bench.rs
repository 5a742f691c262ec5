//! Benchmarks for task execution and pipeline dispatch.
//!
//! Benchmarks cover:
//! - Admission control acquire/release
//! - Task start-to-completion through the worker pool
//! - Pipeline dispatch through forwarding handlers into heap storage
//! - Source-id filter rewriting

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use async_trait::async_trait;
use geohub_core::config::WorkerPoolConfig;
use geohub_core::core::{TaskContext, TaskFault, TaskLimiter, TaskScheduler, TaskWork, WorkerPool};
use geohub_core::handlers::source_id::rewrite_filter;
use geohub_core::handlers::{HeapStorage, TagHandler};
use geohub_core::model::{Feature, PropertyFilter, Request, RequestOp, WriteMode};
use geohub_core::pipeline::{EventHandler, EventPipeline};
use serde_json::json;
use tokio::runtime::Runtime;

struct Noop;

#[async_trait]
impl TaskWork for Noop {
    type Output = u64;

    async fn execute(&mut self, _ctx: &TaskContext) -> Result<u64, TaskFault> {
        Ok(1)
    }
}

fn scheduler() -> TaskScheduler {
    TaskScheduler::new(
        Arc::new(TaskLimiter::new(10_000)),
        Arc::new(WorkerPool::new(WorkerPoolConfig::new()).unwrap()),
    )
}

// ============================================================================
// Admission and tasks
// ============================================================================

fn bench_limiter_acquire_release(c: &mut Criterion) {
    let limiter = Arc::new(TaskLimiter::new(1_000).with_principal_limit(100));
    c.bench_function("limiter_acquire_release", |b| {
        b.iter(|| {
            let slot = limiter.try_acquire(false, Some("app-1")).unwrap();
            black_box(&slot);
        });
    });
}

fn bench_task_start_to_done(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_start_to_done");

    for batch in [1_u64, 16, 128] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let scheduler = scheduler();
            b.iter(|| {
                let handles: Vec<_> = (0..batch)
                    .map(|i| {
                        scheduler
                            .task(Noop, TaskContext::new(format!("bench-{i}")))
                            .start()
                            .unwrap()
                    })
                    .collect();
                for handle in handles {
                    black_box(handle.wait_blocking().unwrap());
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Pipelines
// ============================================================================

fn pipeline(depth: usize) -> EventPipeline {
    let mut handlers: Vec<Arc<dyn EventHandler>> = (0..depth)
        .map(|i| {
            Arc::new(TagHandler::new(format!("tags-{i}"), vec![format!("t{i}")], Vec::new()))
                as Arc<dyn EventHandler>
        })
        .collect();
    handlers.push(Arc::new(HeapStorage::new("heap").with_spaces(["bench"])));
    EventPipeline::new(handlers).unwrap()
}

fn bench_pipeline_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_dispatch");

    for depth in [0_usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let pipeline = pipeline(depth);
            b.to_async(Runtime::new().unwrap()).iter(|| {
                let pipeline = &pipeline;
                async move {
                    let request = Request::new(
                        "bench",
                        RequestOp::Write {
                            features: vec![Feature::new("f").with_point(1.0, 2.0)],
                            mode: WriteMode::Upsert,
                        },
                    );
                    let ctx = TaskContext::for_request(&request);
                    black_box(pipeline.send_upstream(&ctx, request).await.is_success())
                }
            });
        });
    }
    group.finish();
}

fn bench_rewrite_filter(c: &mut Criterion) {
    let source = || PropertyFilter::Eq {
        path: vec![
            "properties".into(),
            "@ns:com:here:mom:meta".into(),
            "sourceId".into(),
        ],
        value: json!("survey"),
    };
    let filter = PropertyFilter::And {
        children: vec![
            source(),
            PropertyFilter::Or {
                children: vec![source(), PropertyFilter::Exists { path: vec!["name".into()] }],
            },
        ],
    };
    c.bench_function("rewrite_source_id_filter", |b| {
        b.iter(|| {
            let mut filter = filter.clone();
            black_box(rewrite_filter(&mut filter))
        });
    });
}

criterion_group!(task_benches, bench_limiter_acquire_release, bench_task_start_to_done);

criterion_group!(pipeline_benches, bench_pipeline_dispatch, bench_rewrite_filter);

criterion_main!(task_benches, pipeline_benches);
