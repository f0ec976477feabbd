//! TOML configuration for the trace client, ingestion pipeline and hub link
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.
//!
//! # Example TOML
//! ```toml
//! [trace]
//! host = "127.0.0.1"
//! port = 5678
//!
//! [filter]
//! exclude_folders = ["site-packages", "venv"]
//! exclude_patterns = ["^test_.*"]
//! include_only = []
//!
//! [pipeline]
//! sample_rate = 10
//! throttle_interval_ms = 2000
//!
//! [hub]
//! url = "ws://127.0.0.1:5680"
//! max_reconnect_attempts = 5
//! autostart_command = ["python", "-m", "trueflow_mcp_hub"]
//! ```

use crate::error::{Result, TraceFlowError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceFlowConfig {
    pub trace: TraceSourceConfig,
    pub filter: FilterRules,
    pub pipeline: PipelineConfig,
    pub hub: HubConfig,
}

impl TraceFlowConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TraceFlowConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRUEFLOW_HOST`, `TRUEFLOW_PORT` and `TRUEFLOW_HUB_URL`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(host) = lookup("TRUEFLOW_HOST").filter(|h| !h.is_empty()) {
            self.trace.host = host;
        }
        if let Some(port) = lookup("TRUEFLOW_PORT").and_then(|p| p.trim().parse().ok()) {
            self.trace.port = port;
        }
        if let Some(url) = lookup("TRUEFLOW_HUB_URL").filter(|u| !u.is_empty()) {
            self.hub.url = url;
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.sample_rate == 0 {
            return Err(TraceFlowError::InvalidConfig(
                "pipeline.sample_rate must be >= 1".to_string(),
            ));
        }
        for (name, value) in [
            ("pipeline.event_buffer_capacity", p.event_buffer_capacity),
            ("pipeline.max_root_calls", p.max_root_calls),
            ("pipeline.max_stack_depth", p.max_stack_depth),
            ("pipeline.max_active_stacks", p.max_active_stacks),
            ("pipeline.max_durations_per_function", p.max_durations_per_function),
            ("pipeline.pending_max_entries", p.pending_max_entries),
            ("hub.rpc_workers", self.hub.rpc_workers),
        ] {
            if value == 0 {
                return Err(TraceFlowError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        url::Url::parse(&self.hub.url).map_err(|e| {
            TraceFlowError::InvalidConfig(format!("hub.url '{}': {e}", self.hub.url))
        })?;
        // Surface bad regexes at load time rather than on first event
        crate::filter::EventFilter::from_rules(&self.filter)?;
        Ok(())
    }
}

/// Where the traced process serves its event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSourceConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
}

impl Default for TraceSourceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5678,
            connect_timeout_ms: 3000,
        }
    }
}

/// Include/exclude rules applied to `call`/`return` events before aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRules {
    /// Substrings of `file` that drop the event
    pub exclude_folders: Vec<String>,
    /// Suffixes of `file` that drop the event
    pub exclude_file_suffixes: Vec<String>,
    /// Substrings of `module` that drop the event
    pub exclude_modules: Vec<String>,
    /// Regexes tested against `file`, `module` and the function key
    pub exclude_patterns: Vec<String>,
    /// When non-empty, only events whose module, file or function key contains
    /// one of these entries are kept
    pub include_only: Vec<String>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            exclude_folders: default_exclude_folders(),
            exclude_file_suffixes: Vec::new(),
            exclude_modules: default_exclude_modules(),
            exclude_patterns: Vec::new(),
            include_only: Vec::new(),
        }
    }
}

impl FilterRules {
    /// Rules that keep everything
    pub fn none() -> Self {
        Self {
            exclude_folders: Vec::new(),
            exclude_file_suffixes: Vec::new(),
            exclude_modules: Vec::new(),
            exclude_patterns: Vec::new(),
            include_only: Vec::new(),
        }
    }
}

fn default_exclude_folders() -> Vec<String> {
    [
        "site-packages",
        "dist-packages",
        "/venv/",
        "/.venv/",
        "__pycache__",
        "node_modules",
        "<frozen",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exclude_modules() -> Vec<String> {
    ["java.", "javax.", "jdk.", "sun.", "kotlin.", "importlib._bootstrap"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Sampling, throttling and retention limits for the ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Every Nth retained event may trigger a refresh notification
    pub sample_rate: u64,
    /// Minimum spacing between refresh notifications
    pub throttle_interval_ms: u64,
    /// Serialized recent events kept for inspection
    pub event_buffer_capacity: usize,
    /// Root calls kept across all correlation ids
    pub max_root_calls: usize,
    /// Calls nested deeper than this are aggregated but not added to trees
    pub max_stack_depth: usize,
    /// Live correlation stacks; the least recently called is dropped first
    pub max_active_stacks: usize,
    /// Recent durations kept per function for percentiles
    pub max_durations_per_function: usize,
    /// Pending calls and stacks with no call for this long (event time) are swept
    pub pending_max_age_secs: f64,
    pub pending_max_entries: usize,
    pub pending_sweep_interval_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 10,
            throttle_interval_ms: 2000,
            event_buffer_capacity: 10_000,
            max_root_calls: 100,
            max_stack_depth: 1000,
            max_active_stacks: 10_000,
            max_durations_per_function: 1000,
            pending_max_age_secs: 300.0,
            pending_max_entries: 100_000,
            pending_sweep_interval_secs: 30.0,
        }
    }
}

/// Hub link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Retry N waits N x this delay
    pub reconnect_base_delay_ms: u64,
    /// Wait after launching a companion hub before the single retry
    pub hub_startup_delay_ms: u64,
    /// Command that starts a companion hub; `None` disables auto-start
    pub autostart_command: Option<Vec<String>>,
    pub project_name: String,
    pub project_path: PathBuf,
    pub ide: String,
    pub capabilities: Vec<String>,
    /// Threads that run `rpc_request` handlers
    pub rpc_workers: usize,
    /// Publish `trace_update` summaries on every pipeline refresh
    pub publish_updates: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5680".to_string(),
            connect_timeout_ms: 3000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 2000,
            hub_startup_delay_ms: 2000,
            autostart_command: None,
            project_name: "trueflow".to_string(),
            project_path: PathBuf::from("."),
            ide: "trueflow-cli".to_string(),
            capabilities: vec![
                "trace".to_string(),
                "dead_code".to_string(),
                "performance".to_string(),
                "call_trees".to_string(),
            ],
            rpc_workers: 2,
            publish_updates: false,
        }
    }
}
