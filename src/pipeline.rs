//! Event ingestion pipeline
//!
//! Consumes trace events from one or more socket clients, filters them, and
//! updates every aggregate: pending calls, call trees, per-function
//! durations and call counts, the dead-code registry and the recent-event
//! buffer. Host notifications are sampled and throttled, then marshaled onto
//! the host UI thread through a [`UiDispatcher`].
//!
//! `ingest` never blocks on host work: it takes short-lived locks, and
//! anything meant for the host is queued on the dispatcher.

use crate::call_stack::{CallStackReconstructor, CallTraceNode, EntryPointGroup, ReturnOutcome};
use crate::config::PipelineConfig;
use crate::dead_code::{DeadCodeEngine, DeadCodeReport};
use crate::dispatch::{ImmediateDispatcher, UiDispatcher};
use crate::event::{EventType, TraceEvent};
use crate::filter::EventFilter;
use crate::function_profiler::{DurationPercentiles, FunctionProfiler, FunctionStats, PerformanceReport};
use crate::pending::PendingCallMap;
use crate::ring_buffer::EventRingBuffer;
use crate::sink::{DisconnectReason, NullSink, TraceEventSink};
use crate::throttle::{NotificationThrottle, Notify};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Counters and sizes for status displays
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub events_received: u64,
    pub events_filtered: u64,
    pub calls: u64,
    pub returns: u64,
    pub completed_calls: u64,
    pub total_duration_ms: f64,
    pub mismatched_returns: u64,
    pub orphaned_frames: u64,
    pub depth_limited_calls: u64,
    /// Stacks dropped by the live-stack cap or a stale sweep
    pub dropped_stacks: u64,
    pub pending_calls: usize,
    pub pending_evicted: u64,
    pub root_calls: usize,
    pub active_stacks: usize,
    pub buffered_events: usize,
    pub buffer_evicted: u64,
    pub registry_snapshots: u64,
    pub refreshes: u64,
}

/// Aggregates updated together under one lock per event
#[derive(Debug)]
struct Aggregates {
    pending: PendingCallMap,
    stacks: CallStackReconstructor,
    profiler: FunctionProfiler,
    dead_code: DeadCodeEngine,
    last_sweep: Option<f64>,
}

/// Throttle plus the path to the host
struct Notifier {
    throttle: NotificationThrottle,
    dispatcher: Arc<dyn UiDispatcher>,
    host: Arc<dyn TraceEventSink>,
    refreshes: AtomicU64,
}

impl Notifier {
    fn apply(self: &Arc<Self>, decision: Notify) {
        match decision {
            Notify::Immediate => self.refresh(),
            Notify::Deferred(delay) => {
                let notifier = Arc::clone(self);
                let spawned = thread::Builder::new()
                    .name("trueflow-deferred-refresh".to_string())
                    .spawn(move || {
                        thread::sleep(delay);
                        notifier.throttle.fire_deferred(notifier.throttle.now_ms());
                        notifier.refresh();
                    });
                if let Err(e) = spawned {
                    warn!(error = %e, "failed to schedule deferred refresh, refreshing now");
                    self.throttle.fire_deferred(self.throttle.now_ms());
                    self.refresh();
                }
            }
            Notify::NotEligible | Notify::Suppressed => {}
        }
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let host = Arc::clone(&self.host);
        self.dispatcher.dispatch(Box::new(move || host.on_refresh()));
    }

    fn forward(&self, task: impl FnOnce(&dyn TraceEventSink) + Send + 'static) {
        let host = Arc::clone(&self.host);
        self.dispatcher.dispatch(Box::new(move || task(host.as_ref())));
    }
}

pub struct EventIngestionPipeline {
    filter: RwLock<EventFilter>,
    buffer: EventRingBuffer,
    aggregates: Mutex<Aggregates>,
    notifier: Arc<Notifier>,
    sweep_interval: f64,
    forward_events: AtomicBool,
    events_received: AtomicU64,
    events_filtered: AtomicU64,
    calls: AtomicU64,
    returns: AtomicU64,
}

impl EventIngestionPipeline {
    pub fn new(
        config: &PipelineConfig,
        filter: EventFilter,
        dispatcher: Arc<dyn UiDispatcher>,
        host: Arc<dyn TraceEventSink>,
    ) -> Self {
        Self {
            filter: RwLock::new(filter),
            buffer: EventRingBuffer::new(config.event_buffer_capacity.max(1)),
            aggregates: Mutex::new(Aggregates {
                pending: PendingCallMap::new(
                    config.pending_max_age_secs,
                    config.pending_max_entries.max(1),
                ),
                stacks: CallStackReconstructor::new(config.max_root_calls, config.max_stack_depth)
                    .with_max_stacks(config.max_active_stacks)
                    .with_stale_after(config.pending_max_age_secs),
                profiler: FunctionProfiler::new(config.max_durations_per_function),
                dead_code: DeadCodeEngine::new(),
                last_sweep: None,
            }),
            notifier: Arc::new(Notifier {
                throttle: NotificationThrottle::new(config.sample_rate, config.throttle_interval_ms),
                dispatcher,
                host,
                refreshes: AtomicU64::new(0),
            }),
            sweep_interval: config.pending_sweep_interval_secs,
            forward_events: AtomicBool::new(false),
            events_received: AtomicU64::new(0),
            events_filtered: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            returns: AtomicU64::new(0),
        }
    }

    /// Pipeline with no host attached; callbacks are dropped
    pub fn headless(config: &PipelineConfig) -> Self {
        Self::new(
            config,
            EventFilter::all(),
            Arc::new(ImmediateDispatcher),
            Arc::new(NullSink),
        )
    }

    /// Also forward every retained event to the host's `on_trace_received`
    pub fn forward_events(&self, enabled: bool) {
        self.forward_events.store(enabled, Ordering::Relaxed);
    }

    pub fn set_filter(&self, filter: EventFilter) {
        *self.filter.write() = filter;
    }

    /// Fold one event into every aggregate
    pub fn ingest(&self, event: &TraceEvent) {
        self.events_received.fetch_add(1, Ordering::Relaxed);

        if !self.filter.read().should_keep(event) {
            self.events_filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.buffer.push(event.to_json_line());

        match &event.event_type {
            EventType::Call => self.on_call(event),
            t if t.closes_call() => self.on_return(event),
            EventType::FunctionRegistry => self.on_registry(event),
            _ => {}
        }

        if self.forward_events.load(Ordering::Relaxed) {
            let event = event.clone();
            self.notifier.forward(move |host| host.on_trace_received(&event));
        }

        let now = self.notifier.throttle.now_ms();
        let decision = if event.event_type == EventType::CycleComplete {
            let cycle = event.clone();
            self.notifier.forward(move |host| host.on_cycle_complete(&cycle));
            match self.notifier.throttle.on_event(now) {
                Notify::NotEligible => self.notifier.throttle.check(now),
                decision => decision,
            }
        } else {
            self.notifier.throttle.on_event(now)
        };
        self.notifier.apply(decision);
    }

    fn on_call(&self, event: &TraceEvent) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let key = event.function_key();

        let mut agg = self.aggregates.lock();
        if let Some(evicted) = agg.pending.insert(&event.call_id, &key, event.timestamp) {
            debug!(call_id = %evicted.call_id, function = %evicted.function_key, "pending call evicted at capacity");
        }
        agg.profiler.record_call(&key, &event.file, event.line);
        agg.stacks.on_call(event);
        Self::maybe_sweep(&mut agg, event.timestamp, self.sweep_interval);
    }

    fn on_return(&self, event: &TraceEvent) {
        self.returns.fetch_add(1, Ordering::Relaxed);

        let mut agg = self.aggregates.lock();
        let pending = if event.call_id.is_empty() {
            None
        } else {
            agg.pending.remove(&event.call_id)
        };
        let outcome = agg.stacks.on_return(event);

        match (pending, outcome) {
            (Some(call), _) => {
                let duration = (event.timestamp - call.timestamp).max(0.0);
                agg.profiler.record_duration(&call.function_key, duration);
            }
            // Call id missing from the wire: attribute the matched frame's duration
            (None, ReturnOutcome::Matched { duration: Some(duration), .. }) => {
                agg.profiler.record_duration(&event.function_key(), duration);
            }
            (None, _) => {
                debug!(call_id = %event.call_id, function = %event.function_key(), "return without matching call");
            }
        }
        Self::maybe_sweep(&mut agg, event.timestamp, self.sweep_interval);
    }

    fn on_registry(&self, event: &TraceEvent) {
        let entries = event.registry_entries();
        info!(functions = entries.len(), "function registry received");
        self.aggregates.lock().dead_code.load_registry(entries.clone());
        self.notifier.forward(move |host| host.on_registry(&entries));
    }

    fn maybe_sweep(agg: &mut Aggregates, now: f64, interval: f64) {
        match agg.last_sweep {
            None => agg.last_sweep = Some(now),
            Some(last) if now - last >= interval => {
                let evicted = agg.pending.sweep(now);
                if !evicted.is_empty() {
                    debug!(evicted = evicted.len(), "swept stale pending calls");
                }
                let stacks = agg.stacks.sweep(now);
                if stacks > 0 {
                    debug!(stacks, "swept stale call stacks");
                }
                agg.last_sweep = Some(now);
            }
            Some(_) => {}
        }
    }

    pub fn dead_code_report(&self) -> DeadCodeReport {
        let agg = self.aggregates.lock();
        agg.dead_code.report(&agg.profiler)
    }

    /// Retained root call trees, oldest first
    pub fn call_trees(&self) -> Vec<CallTraceNode> {
        self.aggregates.lock().stacks.roots()
    }

    pub fn call_trees_for(&self, correlation_id: &str) -> Vec<CallTraceNode> {
        self.aggregates.lock().stacks.roots_for(correlation_id)
    }

    pub fn full_stack_view(&self) -> Vec<EntryPointGroup> {
        self.aggregates.lock().stacks.full_stack_view()
    }

    pub fn performance_report(&self, top_n: usize) -> PerformanceReport {
        self.aggregates.lock().profiler.report(top_n)
    }

    pub fn function_stats(&self, function_key: &str) -> Option<FunctionStats> {
        self.aggregates.lock().profiler.get(function_key).cloned()
    }

    pub fn percentiles(&self, function_key: &str) -> Option<DurationPercentiles> {
        self.aggregates.lock().profiler.percentiles(function_key)
    }

    /// Newest `limit` serialized events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<String> {
        self.buffer.recent(limit)
    }

    pub fn pending_calls(&self) -> usize {
        self.aggregates.lock().pending.len()
    }

    pub fn stats(&self) -> PipelineStats {
        let agg = self.aggregates.lock();
        let stack = agg.stacks.stats();
        let buffer = self.buffer.stats();
        PipelineStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            completed_calls: agg.profiler.completed_calls(),
            total_duration_ms: agg.profiler.total_duration() * 1000.0,
            mismatched_returns: stack.mismatched_returns,
            orphaned_frames: stack.orphaned_frames,
            depth_limited_calls: stack.depth_limited_calls,
            dropped_stacks: stack.evicted_stacks + stack.stale_stacks,
            pending_calls: agg.pending.len(),
            pending_evicted: agg.pending.evicted_total(),
            root_calls: agg.stacks.root_count(),
            active_stacks: agg.stacks.active_stacks(),
            buffered_events: buffer.current_size,
            buffer_evicted: buffer.total_evicted,
            registry_snapshots: agg.dead_code.snapshots_received(),
            refreshes: self.notifier.refreshes.load(Ordering::Relaxed),
        }
    }

    /// Throttle decisions so far
    pub fn throttle_stats(&self) -> crate::throttle::ThrottleStats {
        self.notifier.throttle.stats()
    }

    /// Drop all aggregate state, keeping the filter
    pub fn reset(&self) {
        {
            let mut agg = self.aggregates.lock();
            agg.pending.clear();
            agg.stacks.clear();
            agg.profiler.clear();
            agg.dead_code.clear();
            agg.last_sweep = None;
        }
        self.buffer.clear();
        self.notifier.throttle.reset();
        for c in [&self.events_received, &self.events_filtered, &self.calls, &self.returns] {
            c.store(0, Ordering::Relaxed);
        }
        info!("pipeline state cleared");
        self.notifier.refresh();
    }

    /// Print the function timing summary to stderr
    pub fn print_summary(&self, limit: usize) {
        self.aggregates.lock().profiler.print_summary(limit);
    }
}

impl TraceEventSink for EventIngestionPipeline {
    fn on_trace_received(&self, event: &TraceEvent) {
        self.ingest(event);
    }

    fn on_connected(&self, peer: &str) {
        let peer = peer.to_string();
        self.notifier.forward(move |host| host.on_connected(&peer));
    }

    fn on_disconnected(&self, reason: &DisconnectReason) {
        let reason = reason.clone();
        self.notifier.forward(move |host| host.on_disconnected(&reason));
        // Final state is rendered even if the throttle would hold it back
        self.notifier.refresh();
    }

    fn on_error(&self, error: &str) {
        let error = error.to_string();
        self.notifier.forward(move |host| host.on_error(&error));
    }
}

impl std::fmt::Debug for EventIngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIngestionPipeline")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterRules;
    use crate::event::RegistryEntry;

    fn config() -> PipelineConfig {
        PipelineConfig {
            sample_rate: 1,
            throttle_interval_ms: 0,
            ..PipelineConfig::default()
        }
    }

    #[derive(Default)]
    struct Recorder {
        refreshes: AtomicU64,
        cycles: AtomicU64,
        registries: AtomicU64,
        received: AtomicU64,
        disconnects: Mutex<Vec<DisconnectReason>>,
    }

    impl TraceEventSink for Recorder {
        fn on_trace_received(&self, _event: &TraceEvent) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }
        fn on_refresh(&self) {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_cycle_complete(&self, _event: &TraceEvent) {
            self.cycles.fetch_add(1, Ordering::SeqCst);
        }
        fn on_registry(&self, _entries: &[RegistryEntry]) {
            self.registries.fetch_add(1, Ordering::SeqCst);
        }
        fn on_disconnected(&self, reason: &DisconnectReason) {
            self.disconnects.lock().push(reason.clone());
        }
    }

    fn recorded(config: &PipelineConfig) -> (EventIngestionPipeline, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let pipeline = EventIngestionPipeline::new(
            config,
            EventFilter::all(),
            Arc::new(ImmediateDispatcher),
            recorder.clone(),
        );
        (pipeline, recorder)
    }

    #[test]
    fn test_call_return_builds_tree_and_durations() {
        let pipeline = EventIngestionPipeline::headless(&config());
        pipeline.ingest(&TraceEvent::call("1", "m", "funcA", 1.0).with_correlation("x"));
        pipeline.ingest(&TraceEvent::call("2", "m", "funcB", 1.5).with_correlation("x"));
        pipeline.ingest(&TraceEvent::ret("2", "m", "funcB", 2.0).with_correlation("x"));
        pipeline.ingest(&TraceEvent::ret("1", "m", "funcA", 4.0).with_correlation("x"));

        let trees = pipeline.call_trees();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].function, "funcA");
        assert_eq!(trees[0].duration, Some(3.0));
        assert_eq!(trees[0].children.len(), 1);
        assert_eq!(trees[0].children[0].duration, Some(0.5));

        let stats = pipeline.stats();
        assert_eq!(stats.completed_calls, 2);
        assert!((stats.total_duration_ms - 3500.0).abs() < 1e-6);
        assert_eq!(stats.pending_calls, 0);
        assert_eq!(pipeline.function_stats("m.funcB").unwrap().total_time, 0.5);
    }

    #[test]
    fn test_filtered_events_touch_no_state() {
        let mut rules = FilterRules::none();
        rules.exclude_modules = vec!["vendor".to_string()];
        let pipeline = EventIngestionPipeline::headless(&config());
        pipeline.set_filter(EventFilter::from_rules(&rules).unwrap());

        pipeline.ingest(&TraceEvent::call("1", "vendor.lib", "f", 0.0));
        pipeline.ingest(&TraceEvent::ret("1", "vendor.lib", "f", 1.0));

        let stats = pipeline.stats();
        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.events_filtered, 2);
        assert_eq!(stats.calls, 0);
        assert_eq!(stats.buffered_events, 0);
        assert!(pipeline.call_trees().is_empty());
        assert_eq!(pipeline.dead_code_report().total_called, 0);
    }

    #[test]
    fn test_registry_drives_dead_code() {
        let (pipeline, recorder) = recorded(&config());
        pipeline.ingest(&TraceEvent::call("1", "m", "A", 0.0));
        assert_eq!(pipeline.dead_code_report().dead_percentage, 0.0);

        pipeline.ingest(&TraceEvent::registry(
            &[
                RegistryEntry::new("m", "A"),
                RegistryEntry::new("m", "B"),
                RegistryEntry::new("m", "C"),
            ],
            1.0,
        ));
        let report = pipeline.dead_code_report();
        assert_eq!(
            report.dead.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["m.B", "m.C"]
        );
        assert_eq!(recorder.registries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sampling_limits_refreshes() {
        let cfg = PipelineConfig {
            sample_rate: 10,
            throttle_interval_ms: 0,
            ..PipelineConfig::default()
        };
        let (pipeline, recorder) = recorded(&cfg);
        for i in 0..1000 {
            pipeline.ingest(&TraceEvent::call(&i.to_string(), "m", "f", i as f64));
        }
        assert_eq!(recorder.refreshes.load(Ordering::SeqCst), 100);
        // Sampling never drops data
        assert_eq!(pipeline.stats().calls, 1000);
        assert_eq!(pipeline.function_stats("m.f").unwrap().call_count, 1000);
    }

    #[test]
    fn test_cycle_complete_forces_check() {
        let cfg = PipelineConfig {
            sample_rate: 1000,
            throttle_interval_ms: 0,
            ..PipelineConfig::default()
        };
        let (pipeline, recorder) = recorded(&cfg);
        let mut cycle = TraceEvent::default();
        cycle.event_type = EventType::CycleComplete;
        pipeline.ingest(&cycle);

        assert_eq!(recorder.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.cycles.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_orphaned_calls_are_swept() {
        let cfg = PipelineConfig {
            pending_max_age_secs: 10.0,
            pending_sweep_interval_secs: 5.0,
            ..config()
        };
        let pipeline = EventIngestionPipeline::headless(&cfg);
        pipeline.ingest(&TraceEvent::call("lost", "m", "f", 0.0));
        pipeline.ingest(&TraceEvent::call("a", "m", "g", 20.0));
        pipeline.ingest(&TraceEvent::ret("a", "m", "g", 21.0));

        let stats = pipeline.stats();
        assert_eq!(stats.pending_calls, 0);
        assert_eq!(stats.pending_evicted, 1);
    }

    #[test]
    fn test_quiet_stacks_are_swept_with_pending_calls() {
        let cfg = PipelineConfig {
            pending_max_age_secs: 10.0,
            pending_sweep_interval_secs: 5.0,
            ..config()
        };
        let pipeline = EventIngestionPipeline::headless(&cfg);
        for i in 0..20 {
            let corr = format!("worker-{i}");
            pipeline.ingest(&TraceEvent::call(&corr, "m", "stuck", 0.0).with_correlation(&corr));
        }
        assert_eq!(pipeline.stats().active_stacks, 20);

        pipeline.ingest(&TraceEvent::call("a", "m", "g", 20.0).with_correlation("live"));
        pipeline.ingest(&TraceEvent::ret("a", "m", "g", 21.0).with_correlation("live"));

        let stats = pipeline.stats();
        assert_eq!(stats.active_stacks, 0);
        assert_eq!(stats.dropped_stacks, 20);
        assert_eq!(stats.pending_calls, 0);
    }

    #[test]
    fn test_deep_recursion_is_aggregated_past_depth_cap() {
        let cfg = PipelineConfig {
            max_stack_depth: 10,
            max_active_stacks: 4,
            ..config()
        };
        let pipeline = EventIngestionPipeline::headless(&cfg);
        for i in 0..100 {
            pipeline.ingest(&TraceEvent::call(&i.to_string(), "m", "recurse", i as f64));
        }
        for i in (0..100).rev() {
            pipeline.ingest(&TraceEvent::ret(&i.to_string(), "m", "recurse", 200.0));
        }
        for i in 0..10 {
            let corr = format!("c{i}");
            pipeline.ingest(&TraceEvent::call(&corr, "m", "f", 300.0).with_correlation(&corr));
        }

        let stats = pipeline.stats();
        assert_eq!(stats.depth_limited_calls, 90);
        assert_eq!(stats.completed_calls, 100);
        assert_eq!(stats.mismatched_returns, 0);
        assert_eq!(stats.active_stacks, 4);
        assert_eq!(stats.dropped_stacks, 6);
        assert_eq!(pipeline.function_stats("m.recurse").unwrap().call_count, 100);
    }

    #[test]
    fn test_mismatched_return_is_tolerated() {
        let pipeline = EventIngestionPipeline::headless(&config());
        pipeline.ingest(&TraceEvent::ret("nope", "m", "f", 1.0));
        let stats = pipeline.stats();
        assert_eq!(stats.mismatched_returns, 1);
        assert_eq!(stats.completed_calls, 0);
    }

    #[test]
    fn test_negative_duration_clamped() {
        let pipeline = EventIngestionPipeline::headless(&config());
        pipeline.ingest(&TraceEvent::call("1", "m", "f", 5.0));
        pipeline.ingest(&TraceEvent::ret("1", "m", "f", 4.0));
        assert_eq!(pipeline.function_stats("m.f").unwrap().total_time, 0.0);
    }

    #[test]
    fn test_recent_events_are_serialized_lines() {
        let pipeline = EventIngestionPipeline::headless(&config());
        for i in 0..5 {
            pipeline.ingest(&TraceEvent::call(&i.to_string(), "m", "f", 0.0));
        }
        let recent = pipeline.recent_events(2);
        assert_eq!(recent.len(), 2);
        let last = TraceEvent::parse_line(&recent[1]).unwrap();
        assert_eq!(last.call_id, "4");
    }

    #[test]
    fn test_forwarding_and_disconnect() {
        let (pipeline, recorder) = recorded(&config());
        pipeline.ingest(&TraceEvent::call("1", "m", "f", 0.0));
        assert_eq!(recorder.received.load(Ordering::SeqCst), 0);

        pipeline.forward_events(true);
        pipeline.ingest(&TraceEvent::call("2", "m", "f", 0.0));
        assert_eq!(recorder.received.load(Ordering::SeqCst), 1);

        let before = recorder.refreshes.load(Ordering::SeqCst);
        pipeline.on_disconnected(&DisconnectReason::Closed);
        assert_eq!(recorder.disconnects.lock().as_slice(), &[DisconnectReason::Closed]);
        assert_eq!(recorder.refreshes.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_reset_clears_aggregates() {
        let pipeline = EventIngestionPipeline::headless(&config());
        pipeline.ingest(&TraceEvent::call("1", "m", "f", 0.0));
        pipeline.ingest(&TraceEvent::ret("1", "m", "f", 1.0));
        pipeline.reset();

        let stats = pipeline.stats();
        assert_eq!(stats.calls, 0);
        assert_eq!(stats.completed_calls, 0);
        assert_eq!(stats.root_calls, 0);
        assert_eq!(stats.buffered_events, 0);
        assert!(pipeline.function_stats("m.f").is_none());
    }
}
