//! Refresh sampling and throttling as seen by a pipeline host

mod utils;

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use trueflow::config::PipelineConfig;
use trueflow::dispatch::{ImmediateDispatcher, UiQueue};
use trueflow::event::{EventType, TraceEvent};
use trueflow::filter::EventFilter;
use trueflow::pipeline::EventIngestionPipeline;
use trueflow::sink::TraceEventSink;
use utils::wait_until;

#[derive(Default)]
struct RefreshLog {
    at: Mutex<Vec<Instant>>,
    cycles: Mutex<usize>,
}

impl TraceEventSink for RefreshLog {
    fn on_refresh(&self) {
        self.at.lock().push(Instant::now());
    }

    fn on_cycle_complete(&self, _event: &TraceEvent) {
        *self.cycles.lock() += 1;
    }
}

fn pipeline(sample_rate: u64, throttle_interval_ms: u64) -> (Arc<EventIngestionPipeline>, Arc<RefreshLog>) {
    let log = Arc::new(RefreshLog::default());
    let config = PipelineConfig {
        sample_rate,
        throttle_interval_ms,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(EventIngestionPipeline::new(
        &config,
        EventFilter::all(),
        Arc::new(ImmediateDispatcher),
        log.clone(),
    ));
    (pipeline, log)
}

fn event(i: usize) -> TraceEvent {
    TraceEvent::call(&i.to_string(), "app", "tick", i as f64)
}

#[test]
fn test_one_in_n_events_is_eligible() {
    let (pipeline, log) = pipeline(10, 0);
    for i in 0..1000 {
        pipeline.ingest(&event(i));
    }
    let throttle = pipeline.throttle_stats();
    assert_eq!(throttle.events_seen, 1000);
    assert_eq!(throttle.eligible, 100);
    assert_eq!(log.at.lock().len(), 100);
}

#[test]
fn test_burst_yields_one_immediate_and_one_deferred_refresh() {
    let (pipeline, log) = pipeline(1, 300);
    let start = Instant::now();
    for i in 0..50 {
        pipeline.ingest(&event(i));
    }

    let throttle = pipeline.throttle_stats();
    assert_eq!(throttle.immediate, 1);
    assert_eq!(throttle.deferred, 1);
    assert_eq!(throttle.suppressed, 48);

    assert!(wait_until(Duration::from_secs(3), || log.at.lock().len() == 2));
    let at = log.at.lock().clone();
    // The deferred refresh waits out the rest of the interval
    assert!(at[1].duration_since(start) >= Duration::from_millis(250));
    assert!(at[1].duration_since(at[0]) >= Duration::from_millis(250));

    thread::sleep(Duration::from_millis(200));
    assert_eq!(log.at.lock().len(), 2);
}

#[test]
fn test_cycle_complete_forces_eligibility() {
    let (pipeline, log) = pipeline(1000, 0);
    pipeline.ingest(&event(1));
    assert!(log.at.lock().is_empty());

    let cycle = TraceEvent {
        event_type: EventType::CycleComplete,
        ..TraceEvent::default()
    };
    pipeline.ingest(&cycle);

    assert_eq!(log.at.lock().len(), 1);
    assert_eq!(*log.cycles.lock(), 1);
}

#[test]
fn test_refreshes_run_on_pumping_thread() {
    let queue = UiQueue::new();
    let log = Arc::new(RefreshLog::default());
    let config = PipelineConfig {
        sample_rate: 1,
        throttle_interval_ms: 0,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(EventIngestionPipeline::new(
        &config,
        EventFilter::all(),
        Arc::new(queue.clone()),
        log.clone(),
    ));

    let producer = {
        let pipeline = Arc::clone(&pipeline);
        thread::spawn(move || {
            for i in 0..5 {
                pipeline.ingest(&event(i));
            }
        })
    };
    producer.join().unwrap();

    assert!(log.at.lock().is_empty());
    assert_eq!(queue.pump(), 5);
    assert_eq!(log.at.lock().len(), 5);
}

#[test]
fn test_concurrent_ingest_keeps_counts_exact() {
    let (pipeline, _log) = pipeline(7, 0);
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                for i in 0..250 {
                    let id = format!("{t}-{i}");
                    pipeline.ingest(&TraceEvent::call(&id, "app", "work", i as f64));
                    pipeline.ingest(&TraceEvent::ret(&id, "app", "work", i as f64 + 0.5));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stats = pipeline.stats();
    assert_eq!(stats.calls, 1000);
    assert_eq!(stats.returns, 1000);
    assert_eq!(stats.completed_calls, 1000);
    assert_eq!(stats.pending_calls, 0);
    assert_eq!(pipeline.throttle_stats().eligible, 2000 / 7);
}
