//! Dead code classification
//!
//! `defined` is the latest `function_registry` snapshot, `called` is every
//! function key with at least one recorded call, and `dead = defined - called`.
//! Reports are recomputed from scratch on every request.
//!
//! Until a registry arrives the defined set is the called set itself, so the
//! report shows 0% dead over the dynamically observed functions.

use crate::event::RegistryEntry;
use crate::function_profiler::FunctionProfiler;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Liveness and location for one function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionStatus {
    pub function_key: String,
    pub call_count: u64,
    pub alive: bool,
    /// Present in the registry snapshot
    pub defined: bool,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Snapshot of the defined/called/dead sets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadCodeReport {
    pub total_defined: usize,
    pub total_called: usize,
    pub dead_count: usize,
    pub dead_percentage: f64,
    pub has_registry: bool,
    pub dead: BTreeSet<String>,
    /// Defined and called functions, sorted by key
    pub functions: Vec<FunctionStatus>,
}

impl DeadCodeReport {
    pub fn is_dead(&self, function_key: &str) -> bool {
        self.dead.contains(function_key)
    }
}

/// Holds the static registry and classifies functions against call counts
#[derive(Debug, Default)]
pub struct DeadCodeEngine {
    registry: Option<BTreeMap<String, RegistryEntry>>,
    snapshots_received: u64,
}

impl DeadCodeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the defined set with a new registry snapshot (last wins)
    pub fn load_registry(&mut self, entries: Vec<RegistryEntry>) {
        let registry = entries
            .into_iter()
            .map(|entry| (entry.function_key(), entry))
            .collect();
        self.registry = Some(registry);
        self.snapshots_received += 1;
    }

    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    pub fn defined_count(&self) -> usize {
        self.registry.as_ref().map_or(0, BTreeMap::len)
    }

    pub fn snapshots_received(&self) -> u64 {
        self.snapshots_received
    }

    pub fn clear(&mut self) {
        self.registry = None;
        self.snapshots_received = 0;
    }

    /// Classify every known function against the profiler's call counts
    pub fn report(&self, profiler: &FunctionProfiler) -> DeadCodeReport {
        let called: BTreeSet<String> = profiler.called_functions().map(str::to_string).collect();

        let Some(registry) = &self.registry else {
            let functions = called
                .iter()
                .map(|key| self.status(key, profiler))
                .collect();
            return DeadCodeReport {
                total_defined: called.len(),
                total_called: called.len(),
                dead_count: 0,
                dead_percentage: 0.0,
                has_registry: false,
                dead: BTreeSet::new(),
                functions,
            };
        };

        let dead: BTreeSet<String> = registry
            .keys()
            .filter(|key| !called.contains(*key))
            .cloned()
            .collect();

        let all_keys: BTreeSet<&String> = registry.keys().chain(called.iter()).collect();
        let functions = all_keys
            .into_iter()
            .map(|key| self.status(key, profiler))
            .collect();

        let total_defined = registry.len();
        let dead_percentage = if total_defined == 0 {
            0.0
        } else {
            dead.len() as f64 / total_defined as f64 * 100.0
        };

        DeadCodeReport {
            total_defined,
            total_called: called.len(),
            dead_count: dead.len(),
            dead_percentage,
            has_registry: true,
            dead,
            functions,
        }
    }

    fn status(&self, key: &str, profiler: &FunctionProfiler) -> FunctionStatus {
        let stats = profiler.get(key);
        let call_count = stats.map_or(0, |s| s.call_count);
        let static_entry = self.registry.as_ref().and_then(|r| r.get(key));

        // Registry location first, first observed call site as fallback
        let (file, line) = match static_entry {
            Some(entry) if entry.file.is_some() => (entry.file.clone(), entry.line),
            _ => (
                stats.and_then(|s| s.file.clone()),
                stats.and_then(|s| s.line),
            ),
        };

        FunctionStatus {
            function_key: key.to_string(),
            call_count,
            alive: call_count > 0,
            defined: static_entry.is_some(),
            file,
            line,
        }
    }
}
