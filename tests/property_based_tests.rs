//! Property-based tests for the streaming aggregates

use proptest::prelude::*;
use trueflow::config::PipelineConfig;
use trueflow::event::TraceEvent;
use trueflow::pipeline::EventIngestionPipeline;
use trueflow::ring_buffer::EventRingBuffer;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_durations_never_negative(
        pairs in prop::collection::vec((0.0f64..1000.0, -500.0f64..500.0), 1..50),
    ) {
        // Property: out-of-order timestamps clamp to zero instead of going negative
        let pipeline = EventIngestionPipeline::headless(&PipelineConfig::default());
        for (i, (start, delta)) in pairs.iter().enumerate() {
            let id = i.to_string();
            pipeline.ingest(&TraceEvent::call(&id, "m", "f", *start));
            pipeline.ingest(&TraceEvent::ret(&id, "m", "f", start + delta));
        }

        let stats = pipeline.function_stats("m.f").unwrap();
        prop_assert_eq!(stats.completed, pairs.len() as u64);
        prop_assert!(stats.total_time >= 0.0);
        prop_assert!(stats.min_time.unwrap_or(0.0) >= 0.0);
        prop_assert!(stats.durations.iter().all(|d| *d >= 0.0));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_ring_buffer_keeps_newest_in_order(
        capacity in 1usize..64,
        count in 0usize..200,
    ) {
        // Property: the buffer holds the last `capacity` entries, oldest first
        let buffer = EventRingBuffer::new(capacity);
        for i in 0..count {
            buffer.push(i.to_string());
        }

        let kept = buffer.snapshot();
        let expected: Vec<String> = (count.saturating_sub(capacity)..count)
            .map(|i| i.to_string())
            .collect();
        prop_assert_eq!(kept, expected);
        prop_assert!(buffer.len() <= capacity);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_trace_line_decoder_never_panics(line in ".{0,200}") {
        // Property: arbitrary text either decodes or is rejected, never panics
        let _ = TraceEvent::parse_line(&line);
    }

    #[test]
    fn prop_call_counts_match_calls(
        functions in prop::collection::vec("[a-c]", 1..40),
    ) {
        // Property: every retained call is counted under its function key
        let pipeline = EventIngestionPipeline::headless(&PipelineConfig::default());
        for (i, f) in functions.iter().enumerate() {
            pipeline.ingest(&TraceEvent::call(&i.to_string(), "m", f, i as f64));
        }
        let total: u64 = ["a", "b", "c"]
            .iter()
            .filter_map(|f| pipeline.function_stats(&format!("m.{f}")))
            .map(|s| s.call_count)
            .sum();
        prop_assert_eq!(total, functions.len() as u64);
    }
}
