//! Request/response correlation
//!
//! Each outgoing `rpc_request` registers a one-slot channel under its
//! request id. An incoming `rpc_response` resolves only the entry with the
//! same id. Nothing expires on its own: an unanswered request stays in the
//! table until the caller discards it.

use super::message::HubMessage;
use crate::error::{Result, TraceFlowError};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Random 128-bit id, hex encoded
pub fn new_request_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

#[derive(Debug, Default)]
pub struct PendingRpcs {
    waiting: Mutex<HashMap<String, Sender<HubMessage>>>,
}

impl PendingRpcs {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, request_id: &str) -> Receiver<HubMessage> {
        let (tx, rx) = channel::bounded(1);
        self.waiting.lock().insert(request_id.to_string(), tx);
        rx
    }

    /// Deliver a response to its waiter; false when nobody waits for its id
    pub fn resolve(&self, response: HubMessage) -> bool {
        let Some(request_id) = response.request_id.as_deref() else {
            return false;
        };
        let Some(tx) = self.waiting.lock().remove(request_id) else {
            return false;
        };
        tx.send(response).is_ok()
    }

    /// Forget a request; a late response is then ignored
    pub fn cancel(&self, request_id: &str) -> bool {
        self.waiting.lock().remove(request_id).is_some()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.waiting.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for one outstanding request
#[derive(Debug)]
pub struct RpcCall {
    request_id: String,
    rx: Receiver<HubMessage>,
    table: Arc<PendingRpcs>,
}

impl RpcCall {
    pub(crate) fn register(table: &Arc<PendingRpcs>, request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            rx: table.register(request_id),
            table: Arc::clone(table),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Block until the response arrives
    pub fn wait(self) -> Result<HubMessage> {
        self.rx
            .recv()
            .map_err(|_| TraceFlowError::Hub(format!("request {} was dropped", self.request_id)))
    }

    /// Block up to `timeout`; on timeout the request stays pending
    pub fn wait_timeout(&self, timeout: Duration) -> Result<HubMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) => Err(TraceFlowError::Timeout(timeout.as_millis() as u64)),
            Err(RecvTimeoutError::Disconnected) => Err(TraceFlowError::Hub(format!(
                "request {} was dropped",
                self.request_id
            ))),
        }
    }

    /// The response if it has already arrived
    pub fn try_take(&self) -> Option<HubMessage> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Stop waiting; a response arriving later is ignored
    pub fn discard(self) {
        self.table.cancel(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn response(id: &str) -> HubMessage {
        HubMessage::rpc_response(id, json!({"ok": id}))
    }

    #[test]
    fn test_request_ids_are_unique_hex() {
        let a = new_request_id();
        let b = new_request_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolves_only_matching_id() {
        let table = Arc::new(PendingRpcs::new());
        let call = RpcCall::register(&table, "r1");

        assert!(!table.resolve(response("r2")));
        assert!(call.try_take().is_none());
        assert!(table.is_pending("r1"));

        assert!(table.resolve(response("r1")));
        let msg = call.try_take().unwrap();
        assert_eq!(msg.data, json!({"ok": "r1"}));
        assert!(table.is_empty());
    }

    #[test]
    fn test_response_without_id_is_ignored() {
        let table = Arc::new(PendingRpcs::new());
        let _call = RpcCall::register(&table, "r1");
        assert!(!table.resolve(HubMessage::new("rpc_response")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_wait_blocks_until_resolved() {
        let table = Arc::new(PendingRpcs::new());
        let call = RpcCall::register(&table, "r1");
        let resolver = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                table.resolve(response("r1"))
            })
        };
        let msg = call.wait().unwrap();
        assert_eq!(msg.request_id.as_deref(), Some("r1"));
        assert!(resolver.join().unwrap());
    }

    #[test]
    fn test_wait_timeout_leaves_request_pending() {
        let table = Arc::new(PendingRpcs::new());
        let call = RpcCall::register(&table, "slow");
        let err = call.wait_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TraceFlowError::Timeout(20)));
        assert!(table.is_pending("slow"));

        call.discard();
        assert!(!table.is_pending("slow"));
        assert!(!table.resolve(response("slow")));
    }
}
