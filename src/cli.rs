//! CLI argument parsing for trueflow

use crate::config::TraceFlowConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "trueflow")]
#[command(version)]
#[command(
    about = "Live call-graph, dead code and timing view of a traced process",
    long_about = None
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Trace socket host (overrides config and TRUEFLOW_HOST)
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Trace socket port (overrides config and TRUEFLOW_PORT)
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Join the coordination hub and answer trace queries
    #[arg(long = "hub")]
    pub hub: bool,

    /// Hub WebSocket URL (implies --hub)
    #[arg(long = "hub-url", value_name = "URL")]
    pub hub_url: Option<String>,

    /// Every Nth event may trigger a refresh
    #[arg(long = "sample-rate", value_name = "N")]
    pub sample_rate: Option<u64>,

    /// Minimum milliseconds between refreshes
    #[arg(long = "throttle-ms", value_name = "MS")]
    pub throttle_ms: Option<u64>,

    /// Drop events whose file path contains this folder (repeatable)
    #[arg(long = "exclude-folder", value_name = "FOLDER")]
    pub exclude_folders: Vec<String>,

    /// Keep only events matching this module or path fragment (repeatable)
    #[arg(long = "include", value_name = "MODULE")]
    pub include: Vec<String>,

    /// Print the function timing table and dead-code report on disconnect
    #[arg(short = 's', long = "summary")]
    pub summary: bool,

    /// Number of functions shown in the summary table
    #[arg(long = "top", value_name = "N", default_value = "20")]
    pub top: usize,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Whether the hub link was requested on the command line
    pub fn hub_enabled(&self) -> bool {
        self.hub || self.hub_url.is_some()
    }

    /// Layer command-line flags over a loaded configuration
    pub fn apply_to(&self, config: &mut TraceFlowConfig) {
        if let Some(host) = &self.host {
            config.trace.host = host.clone();
        }
        if let Some(port) = self.port {
            config.trace.port = port;
        }
        if let Some(url) = &self.hub_url {
            config.hub.url = url.clone();
        }
        if let Some(rate) = self.sample_rate {
            config.pipeline.sample_rate = rate;
        }
        if let Some(ms) = self.throttle_ms {
            config.pipeline.throttle_interval_ms = ms;
        }
        config
            .filter
            .exclude_folders
            .extend(self.exclude_folders.iter().cloned());
        config.filter.include_only.extend(self.include.iter().cloned());
    }
}
