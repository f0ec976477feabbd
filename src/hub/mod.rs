//! Hub coordination: pub/sub and RPC between running instances
//!
//! - `message`: wire format and known message types
//! - `state`: connection states and reconnect backoff
//! - `rpc`: request id correlation
//! - `launcher`: companion hub start-up
//! - `client`: the WebSocket client tying these together

pub mod client;
pub mod launcher;
pub mod message;
pub mod rpc;
pub mod state;

pub use client::{HandlerId, HubClient, HubResponder};
pub use launcher::{CommandLauncher, HubLauncher, NoLauncher};
pub use message::{types, HubMessage, RegisterPayload};
pub use rpc::{PendingRpcs, RpcCall};
pub use state::{ConnectionState, ReconnectPolicy};
