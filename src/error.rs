//! Error type shared by the trace client, pipeline configuration and hub link

use thiserror::Error;

/// Errors surfaced by fallible TrueFlow operations.
///
/// Malformed wire input never produces one of these: bad trace lines and bad
/// hub frames are logged and dropped where they are read.
#[derive(Error, Debug)]
pub enum TraceFlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Hub error: {0}")]
    Hub(String),

    #[error("Not connected")]
    NotConnected,
}

/// Result type for TrueFlow operations
pub type Result<T> = std::result::Result<T, TraceFlowError>;
