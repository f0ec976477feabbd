//! TrueFlow - streaming execution-trace ingestion and hub coordination
//!
//! This library connects to a traced process's event socket, folds the
//! call/return stream into call trees, duration statistics and dead-code
//! sets under sampling and throttling limits, and links running instances
//! through a WebSocket hub for pub/sub and RPC queries.

pub mod call_stack;
pub mod cli;
pub mod client;
pub mod config;
pub mod dead_code;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod function_profiler;
pub mod hub;
pub mod pending;
pub mod pipeline;
pub mod ring_buffer;
pub mod service;
pub mod sink;
pub mod throttle;

pub use error::{Result, TraceFlowError};
