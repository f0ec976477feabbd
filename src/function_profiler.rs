//! Function-level call counts and duration statistics
//!
//! Aggregates per `module.function` key:
//! - call count (every observed call, completed or not)
//! - completed count, total/min/max duration
//! - a bounded window of recent durations for percentiles
//! - the first source location the function was observed at

use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Statistics for a single function
#[derive(Debug, Clone, Default)]
pub struct FunctionStats {
    /// Number of calls observed
    pub call_count: u64,
    /// Number of calls whose return was matched
    pub completed: u64,
    /// Sum of completed durations (seconds)
    pub total_time: f64,
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
    /// Most recent durations (seconds), oldest first
    pub durations: VecDeque<f64>,
    /// First dynamically observed location
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl FunctionStats {
    pub fn average_time(&self) -> Option<f64> {
        (self.completed > 0).then(|| self.total_time / self.completed as f64)
    }
}

/// Percentiles over a function's recent duration window (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationPercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// One row of the performance report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionTiming {
    pub function_key: String,
    pub calls: u64,
    pub completed: u64,
    pub total_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
}

/// Whole-run performance figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub total_calls: u64,
    pub completed_calls: u64,
    pub total_duration_ms: f64,
    pub functions: Vec<FunctionTiming>,
}

/// Tracks function-level profiling statistics
#[derive(Debug)]
pub struct FunctionProfiler {
    /// Map from function key to statistics
    stats: HashMap<String, FunctionStats>,
    window: usize,
    completed_calls: u64,
    total_duration: f64,
}

impl FunctionProfiler {
    /// Create a profiler keeping at most `window` recent durations per function
    pub fn new(window: usize) -> Self {
        Self {
            stats: HashMap::new(),
            window: window.max(1),
            completed_calls: 0,
            total_duration: 0.0,
        }
    }

    /// Count a call, remembering where the function was first seen
    pub fn record_call(&mut self, function_key: &str, file: &str, line: u32) {
        let entry = self.entry(function_key);
        entry.call_count += 1;
        if entry.file.is_none() && !file.is_empty() {
            entry.file = Some(file.to_string());
            entry.line = Some(line);
        }
    }

    /// Record the duration of a completed call (seconds)
    pub fn record_duration(&mut self, function_key: &str, duration: f64) {
        let window = self.window;
        let entry = self.entry(function_key);
        entry.completed += 1;
        entry.total_time += duration;
        entry.min_time = Some(entry.min_time.map_or(duration, |m| m.min(duration)));
        entry.max_time = Some(entry.max_time.map_or(duration, |m| m.max(duration)));
        if entry.durations.len() == window {
            entry.durations.pop_front();
        }
        entry.durations.push_back(duration);

        self.completed_calls += 1;
        self.total_duration += duration;
    }

    pub fn get(&self, function_key: &str) -> Option<&FunctionStats> {
        self.stats.get(function_key)
    }

    pub fn call_count(&self, function_key: &str) -> u64 {
        self.stats.get(function_key).map_or(0, |s| s.call_count)
    }

    /// Function keys with at least one recorded call
    pub fn called_functions(&self) -> impl Iterator<Item = &str> {
        self.stats
            .iter()
            .filter(|(_, s)| s.call_count > 0)
            .map(|(k, _)| k.as_str())
    }

    pub fn stats_map(&self) -> &HashMap<String, FunctionStats> {
        &self.stats
    }

    pub fn completed_calls(&self) -> u64 {
        self.completed_calls
    }

    /// Seconds summed over every completed call
    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    /// Percentiles over the recent duration window
    pub fn percentiles(&self, function_key: &str) -> Option<DurationPercentiles> {
        let stats = self.stats.get(function_key)?;
        if stats.durations.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = stats.durations.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Some(DurationPercentiles {
            p50: calculate_percentile(&sorted, 50.0),
            p90: calculate_percentile(&sorted, 90.0),
            p95: calculate_percentile(&sorted, 95.0),
            p99: calculate_percentile(&sorted, 99.0),
        })
    }

    /// The `n` functions with the highest total time, slowest first
    pub fn top_by_total_time(&self, n: usize) -> Vec<(&str, &FunctionStats)> {
        let mut sorted: Vec<_> = self.stats.iter().collect();
        sorted.sort_by(|a, b| {
            b.1.total_time
                .partial_cmp(&a.1.total_time)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.call_count.cmp(&a.1.call_count))
                .then_with(|| a.0.cmp(b.0))
        });
        sorted.truncate(n);
        sorted.into_iter().map(|(k, s)| (k.as_str(), s)).collect()
    }

    /// Functions sorted by total time (descending), at most `limit` rows
    pub fn report(&self, limit: usize) -> PerformanceReport {
        let functions = self
            .top_by_total_time(limit)
            .into_iter()
            .map(|(key, stats)| FunctionTiming {
                function_key: key.to_string(),
                calls: stats.call_count,
                completed: stats.completed,
                total_ms: stats.total_time * 1000.0,
                avg_ms: stats.average_time().unwrap_or(0.0) * 1000.0,
                min_ms: stats.min_time.unwrap_or(0.0) * 1000.0,
                max_ms: stats.max_time.unwrap_or(0.0) * 1000.0,
                p95_ms: self.percentiles(key).map_or(0.0, |p| p.p95 * 1000.0),
            })
            .collect();

        PerformanceReport {
            total_calls: self.stats.values().map(|s| s.call_count).sum(),
            completed_calls: self.completed_calls,
            total_duration_ms: self.total_duration * 1000.0,
            functions,
        }
    }

    pub fn clear(&mut self) {
        self.stats.clear();
        self.completed_calls = 0;
        self.total_duration = 0.0;
    }

    /// Print function timing summary to stderr
    pub fn print_summary(&self, limit: usize) {
        if self.stats.is_empty() {
            eprintln!("\nNo function profiling data collected.");
            return;
        }

        let report = self.report(limit);

        eprintln!("\n╔════════════════════════════════════════════════════════════════════════════════╗");
        eprintln!("║  Function Timing Summary (sorted by total time)                               ║");
        eprintln!("╚════════════════════════════════════════════════════════════════════════════════╝");
        eprintln!();
        eprintln!(
            "{:<50} {:>10} {:>12} {:>12} {:>12}",
            "Function", "Calls", "Total (ms)", "Avg (ms)", "P95 (ms)"
        );
        eprintln!("{}", "─".repeat(100));

        for row in &report.functions {
            eprintln!(
                "{:<50} {:>10} {:>12.3} {:>12.3} {:>12.3}",
                row.function_key, row.calls, row.total_ms, row.avg_ms, row.p95_ms
            );
        }

        eprintln!("{}", "─".repeat(100));
        eprintln!(
            "{:<50} {:>10} {:>12.3}",
            "total", report.total_calls, report.total_duration_ms
        );
    }

    fn entry(&mut self, function_key: &str) -> &mut FunctionStats {
        self.stats.entry(function_key.to_string()).or_default()
    }
}

impl Default for FunctionProfiler {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Calculate percentile from sorted data (linear interpolation)
fn calculate_percentile(sorted_data: &[f64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    if sorted_data.len() == 1 {
        return sorted_data[0];
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower]
    } else {
        let weight = index - lower as f64;
        sorted_data[lower] * (1.0 - weight) + sorted_data[upper] * weight
    }
}
