//! Include/exclude filtering for trace events
//!
//! Applied before any aggregation: a dropped event never reaches counts,
//! durations, trees or the dead-code sets. Supports:
//! - Excluded folders: substring of the event's `file`
//! - Excluded file suffixes: e.g. `_test.py`, `.generated.ts`
//! - Excluded modules: substring of the event's `module`
//! - Regex patterns: tested against `file`, `module` and `module.function`
//! - Include-only whitelist: when non-empty, everything else is dropped
//!
//! `function_registry` and `cycle_complete` events always pass.

use crate::config::FilterRules;
use crate::error::{Result, TraceFlowError};
use crate::event::{function_key, TraceEvent};
use regex::{Regex, RegexSet};

/// Compiled filter that decides which events are aggregated
#[derive(Debug, Clone)]
pub struct EventFilter {
    exclude_folders: Vec<String>,
    exclude_suffixes: Vec<String>,
    exclude_modules: Vec<String>,
    /// None when no patterns are configured
    patterns: Option<RegexSet>,
    include_only: Vec<String>,
}

impl EventFilter {
    /// Create a filter that keeps every event
    pub fn all() -> Self {
        Self {
            exclude_folders: Vec::new(),
            exclude_suffixes: Vec::new(),
            exclude_modules: Vec::new(),
            patterns: None,
            include_only: Vec::new(),
        }
    }

    /// Compile a rule set; fails on the first invalid regex
    pub fn from_rules(rules: &FilterRules) -> Result<Self> {
        for pattern in &rules.exclude_patterns {
            Regex::new(pattern).map_err(|source| TraceFlowError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }

        let patterns = if rules.exclude_patterns.is_empty() {
            None
        } else {
            Some(RegexSet::new(&rules.exclude_patterns).map_err(|source| {
                TraceFlowError::InvalidPattern {
                    pattern: rules.exclude_patterns.join(" | "),
                    source,
                }
            })?)
        };

        Ok(Self {
            exclude_folders: normalized(&rules.exclude_folders),
            exclude_suffixes: normalized(&rules.exclude_file_suffixes),
            exclude_modules: non_empty(&rules.exclude_modules),
            patterns,
            include_only: non_empty(&rules.include_only),
        })
    }

    /// Check if an event should be aggregated
    pub fn should_keep(&self, event: &TraceEvent) -> bool {
        if event.event_type.bypasses_filter() {
            return true;
        }
        self.matches(&event.module, &event.function, &event.file)
    }

    /// Check a function location against the rules
    pub fn matches(&self, module: &str, function: &str, file: &str) -> bool {
        let file = file.replace('\\', "/");

        if self.exclude_folders.iter().any(|f| file.contains(f.as_str())) {
            return false;
        }
        if self.exclude_suffixes.iter().any(|s| file.ends_with(s.as_str())) {
            return false;
        }
        if self.exclude_modules.iter().any(|m| module.contains(m.as_str())) {
            return false;
        }

        let key = function_key(module, function);
        if let Some(set) = &self.patterns {
            if set.is_match(&file) || set.is_match(module) || set.is_match(&key) {
                return false;
            }
        }

        if self.include_only.is_empty() {
            return true;
        }
        self.include_only.iter().any(|inc| {
            module.contains(inc.as_str()) || file.contains(inc.as_str()) || key.contains(inc.as_str())
        })
    }

    /// True when no rule can drop an event
    pub fn is_pass_through(&self) -> bool {
        self.exclude_folders.is_empty()
            && self.exclude_suffixes.is_empty()
            && self.exclude_modules.is_empty()
            && self.patterns.is_none()
            && self.include_only.is_empty()
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

fn non_empty(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalized(items: &[String]) -> Vec<String> {
    non_empty(items)
        .into_iter()
        .map(|s| s.replace('\\', "/"))
        .collect()
}
