//! Ingestion hot path benchmark
//!
//! Measures the cost of folding events into the pipeline: line decoding,
//! filtering, pending-call matching, call-tree updates and the throttle
//! decision.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench ingest_throughput
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use trueflow::config::{FilterRules, PipelineConfig};
use trueflow::event::TraceEvent;
use trueflow::filter::EventFilter;
use trueflow::pipeline::EventIngestionPipeline;

/// Call/return pairs nested `depth` deep
fn nested_events(depth: usize) -> Vec<TraceEvent> {
    let mut events = Vec::with_capacity(depth * 2);
    for d in 0..depth {
        events.push(
            TraceEvent::call(&d.to_string(), "bench.module", &format!("fn_{d}"), d as f64)
                .with_location("/srv/app/bench.py", d as u32)
                .with_correlation("bench"),
        );
    }
    for d in (0..depth).rev() {
        events.push(
            TraceEvent::ret(&d.to_string(), "bench.module", &format!("fn_{d}"), (depth + d) as f64)
                .with_correlation("bench"),
        );
    }
    events
}

fn bench_parse_line(c: &mut Criterion) {
    let line = TraceEvent::call("42", "app.orders", "checkout", 1.5)
        .with_location("/srv/app/orders.py", 120)
        .with_correlation("req-7")
        .to_json_line();

    c.bench_function("parse_trace_line", |b| {
        b.iter(|| TraceEvent::parse_line(black_box(&line)))
    });
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_nested");
    let config = PipelineConfig {
        max_root_calls: 10,
        ..PipelineConfig::default()
    };

    for depth in [1usize, 10, 100] {
        let events = nested_events(depth);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &events, |b, events| {
            let pipeline = EventIngestionPipeline::headless(&config);
            b.iter(|| {
                for event in events {
                    pipeline.ingest(black_box(event));
                }
            });
        });
    }
    group.finish();
}

fn bench_filtered_ingest(c: &mut Criterion) {
    let filter = EventFilter::from_rules(&FilterRules {
        exclude_patterns: vec![r"^/usr/lib/.*".to_string(), r".*_test\.py$".to_string()],
        ..FilterRules::default()
    })
    .expect("valid bench filter");
    let pipeline = EventIngestionPipeline::headless(&PipelineConfig::default());
    pipeline.set_filter(filter);

    let excluded = TraceEvent::call("1", "json.decoder", "decode", 0.0)
        .with_location("/usr/lib/python3/site-packages/json/decoder.py", 10);

    c.bench_function("ingest_excluded_event", |b| {
        b.iter(|| pipeline.ingest(black_box(&excluded)))
    });
}

criterion_group!(benches, bench_parse_line, bench_ingest, bench_filtered_ingest);
criterion_main!(benches);
