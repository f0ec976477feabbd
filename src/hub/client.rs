//! WebSocket hub client
//!
//! Registers this process with the hub, routes incoming messages to
//! type-keyed handlers and correlates RPC responses by request id.
//!
//! The client owns a small tokio runtime. Each session runs a writer task fed
//! by an unbounded channel and a supervisor task that reads frames and, after
//! an unexpected close, reconnects with linear backoff until the attempt
//! budget is spent. A manual `disconnect()` or `connect()` bumps the session
//! generation, which cancels the previous supervisor.
//!
//! Handlers for `rpc_request` run on a background [`WorkerPool`]; all other
//! handlers go through the host [`UiDispatcher`].

use super::launcher::{CommandLauncher, HubLauncher, NoLauncher};
use super::message::{types, HubMessage, RegisterPayload};
use super::rpc::{new_request_id, PendingRpcs, RpcCall};
use super::state::{ConnectionState, ReconnectPolicy};
use crate::config::HubConfig;
use crate::dispatch::{UiDispatcher, WorkerPool};
use crate::error::{Result, TraceFlowError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsRead = SplitStream<WsStream>;
type WsWrite = SplitSink<WsStream, Message>;

pub type HandlerId = u64;
pub type MessageHandler = Arc<dyn Fn(&HubMessage) + Send + Sync>;

struct Registration {
    id: HandlerId,
    message_type: String,
    handler: MessageHandler,
}

struct Shared {
    config: HubConfig,
    instance_id: String,
    policy: ReconnectPolicy,
    state: Mutex<ConnectionState>,
    handlers: RwLock<Vec<Registration>>,
    next_handler: AtomicU64,
    rpcs: Arc<PendingRpcs>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    generation: watch::Sender<u64>,
    attempts: AtomicU32,
    dispatcher: Arc<dyn UiDispatcher>,
    workers: WorkerPool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        let previous = *state;
        if previous != next {
            debug!(from = %previous, to = %next, "hub state change");
            *state = next;
        }
    }

    fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn bump_generation(&self) -> u64 {
        self.generation.send_modify(|g| *g += 1);
        self.current_generation()
    }

    fn send(&self, message: HubMessage) -> bool {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref().filter(|_| self.state().is_connected()) else {
            warn!(message_type = %message.message_type, "hub not connected, dropping message");
            return false;
        };
        if tx.send(Message::Text(message.stamped().to_json())).is_err() {
            warn!("hub writer closed, dropping message");
            return false;
        }
        true
    }

    fn respond(&self, request: &HubMessage, result: Value) -> bool {
        let Some(request_id) = request.request_id.as_deref() else {
            warn!(command = ?request.command, "cannot respond to a request without request_id");
            return false;
        };
        let mut response = HubMessage::rpc_response(request_id, result);
        response.from_project = Some(self.instance_id.clone());
        self.send(response)
    }

    async fn establish(&self) -> Result<WsStream> {
        let url = self.config.url.as_str();
        let timeout_ms = self.config.connect_timeout_ms;
        let (ws, _) = tokio::time::timeout(Duration::from_millis(timeout_ms), connect_async(url))
            .await
            .map_err(|_| TraceFlowError::Timeout(timeout_ms))?
            .map_err(|e| TraceFlowError::Connect {
                addr: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(ws)
    }

    /// Move to `next` unless `generation` has been superseded
    ///
    /// Checked under the outbound lock, which `disconnect()` also holds while
    /// it bumps the generation.
    fn set_state_for(&self, generation: u64, next: ConnectionState) -> bool {
        let _outbound = self.outbound.lock();
        if self.current_generation() != generation {
            return false;
        }
        self.set_state(next);
        true
    }

    /// Install the writer, announce ourselves, hand back the read half
    ///
    /// Returns `None` and closes the socket when `generation` was superseded
    /// while the handshake ran.
    fn start_session(&self, ws: WsStream, generation: u64) -> Option<WsRead> {
        let (write, read) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write, rx));

        {
            let mut outbound = self.outbound.lock();
            if self.current_generation() != generation {
                debug!("hub session superseded during handshake");
                return None;
            }
            *outbound = Some(tx);
            self.attempts.store(0, Ordering::SeqCst);
            self.set_state(ConnectionState::Connected);
        }
        info!(url = %self.config.url, instance = %self.instance_id, "connected to hub");

        let payload = RegisterPayload::new(
            &self.instance_id,
            &self.config.project_name,
            &self.config.project_path,
            &self.config.ide,
            &self.config.capabilities,
        );
        self.send(HubMessage::register(&payload));
        Some(read)
    }

    async fn drive(self: Arc<Self>, mut read: WsRead, generation: u64) {
        loop {
            let reason = self.read_loop(&mut read, generation).await;
            {
                let mut outbound = self.outbound.lock();
                if self.current_generation() == generation {
                    outbound.take();
                }
            }
            if self.current_generation() != generation {
                debug!("hub session ended");
                return;
            }
            warn!(%reason, "hub connection lost");
            match self.reconnect(generation).await {
                Some(next) => read = next,
                None => return,
            }
        }
    }

    async fn read_loop(&self, read: &mut WsRead, generation: u64) -> String {
        let mut cancel = self.generation.subscribe();
        let current = *cancel.borrow();
        if current != generation {
            return "superseded".to_string();
        }
        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(_))) | None => return "closed by hub".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return e.to_string(),
                },
                _ = cancel.changed() => return "disconnected".to_string(),
            }
        }
    }

    async fn reconnect(&self, generation: u64) -> Option<WsRead> {
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                if self.set_state_for(generation, ConnectionState::PermanentlyDisconnected) {
                    info!(attempts = attempt - 1, "hub reconnect attempts exhausted");
                }
                return None;
            };

            if !self.set_state_for(generation, ConnectionState::Connecting) {
                return None;
            }
            info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling hub reconnect");
            tokio::time::sleep(delay).await;
            if self.current_generation() != generation {
                return None;
            }

            match self.establish().await {
                Ok(ws) => return self.start_session(ws, generation),
                Err(e) => debug!(attempt, error = %e, "hub reconnect failed"),
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let message = match HubMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "dropping malformed hub message");
                return;
            }
        };

        if message.is_type(types::RPC_RESPONSE) && self.rpcs.resolve(message.clone()) {
            debug!(request_id = ?message.request_id, "rpc response correlated");
        }

        let handlers: Vec<MessageHandler> = self
            .handlers
            .read()
            .iter()
            .filter(|r| r.message_type == message.message_type || r.message_type == types::WILDCARD)
            .map(|r| Arc::clone(&r.handler))
            .collect();
        if handlers.is_empty() {
            return;
        }

        let message = Arc::new(message);
        if message.is_type(types::RPC_REQUEST) {
            for handler in handlers {
                let message = Arc::clone(&message);
                let queued = self.workers.execute(Box::new(move || {
                    if catch_unwind(AssertUnwindSafe(|| handler(message.as_ref()))).is_err() {
                        warn!(command = ?message.command, "rpc handler panicked");
                    }
                }));
                if !queued {
                    warn!("rpc worker pool is shut down, dropping request");
                }
            }
        } else {
            self.dispatcher.dispatch(Box::new(move || {
                for handler in &handlers {
                    handler(message.as_ref());
                }
            }));
        }
    }
}

async fn write_loop(mut write: WsWrite, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = write.send(message).await {
            warn!(error = %e, "hub send failed");
            break;
        }
    }
    let _ = write.close().await;
}

pub struct HubClient {
    shared: Arc<Shared>,
    launcher: Arc<dyn HubLauncher>,
    runtime: Option<tokio::runtime::Runtime>,
}

impl HubClient {
    pub fn new(
        config: HubConfig,
        dispatcher: Arc<dyn UiDispatcher>,
        launcher: Arc<dyn HubLauncher>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("trueflow-hub")
            .enable_all()
            .build()?;

        let (generation, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            instance_id: format!("trueflow-{:016x}", rand::random::<u64>()),
            policy: ReconnectPolicy::new(
                config.max_reconnect_attempts,
                Duration::from_millis(config.reconnect_base_delay_ms),
            ),
            state: Mutex::new(ConnectionState::Disconnected),
            handlers: RwLock::new(Vec::new()),
            next_handler: AtomicU64::new(1),
            rpcs: Arc::new(PendingRpcs::new()),
            outbound: Mutex::new(None),
            generation,
            attempts: AtomicU32::new(0),
            dispatcher,
            workers: WorkerPool::new("trueflow-rpc", config.rpc_workers.max(1)),
            config,
        });

        Ok(Self {
            shared,
            launcher,
            runtime: Some(runtime),
        })
    }

    /// Client whose launcher comes from `autostart_command`
    pub fn from_config(config: HubConfig, dispatcher: Arc<dyn UiDispatcher>) -> Result<Self> {
        let launcher: Arc<dyn HubLauncher> = match config
            .autostart_command
            .as_deref()
            .and_then(CommandLauncher::from_argv)
        {
            Some(launcher) => Arc::new(launcher),
            None => Arc::new(NoLauncher),
        };
        Self::new(config, dispatcher, launcher)
    }

    /// Connect, starting the companion hub once if it is unreachable
    ///
    /// An unreachable hub gets one retry after the start-up delay, whether or
    /// not the launcher started anything. Returns true when already
    /// connected. Never waits longer than two connect timeouts plus the hub
    /// start-up delay.
    pub fn connect(&self) -> bool {
        if self.shared.state().is_connected() {
            return true;
        }
        let Some(runtime) = &self.runtime else {
            return false;
        };

        let generation = {
            let _outbound = self.shared.outbound.lock();
            let generation = self.shared.bump_generation();
            self.shared.set_state(ConnectionState::Connecting);
            generation
        };
        self.shared.attempts.store(0, Ordering::SeqCst);

        let ws = match runtime.block_on(self.shared.establish()) {
            Ok(ws) => ws,
            Err(e) => {
                info!(error = %e, "hub unreachable, starting companion hub");
                if let Err(e) = self.launcher.launch() {
                    info!(error = %e, "no companion hub started, retrying once");
                }
                std::thread::sleep(Duration::from_millis(self.shared.config.hub_startup_delay_ms));
                match runtime.block_on(self.shared.establish()) {
                    Ok(ws) => ws,
                    Err(e) => {
                        warn!(error = %e, "hub still unreachable after start-up delay");
                        self.shared.set_state_for(generation, ConnectionState::Disconnected);
                        return false;
                    }
                }
            }
        };

        let shared = Arc::clone(&self.shared);
        let Some(read) = runtime.block_on(async move { shared.start_session(ws, generation) }) else {
            return false;
        };
        runtime.spawn(Arc::clone(&self.shared).drive(read, generation));
        true
    }

    /// Close the connection without reconnecting
    pub fn disconnect(&self) {
        let had_connection = {
            let mut outbound = self.shared.outbound.lock();
            self.shared.bump_generation();
            self.shared.set_state(ConnectionState::Disconnected);
            outbound.take().is_some()
        };
        if had_connection {
            info!("disconnected from hub");
        }
    }

    /// Best-effort send; false (with a warning) when not connected
    pub fn send(&self, message: HubMessage) -> bool {
        self.shared.send(message)
    }

    /// Send a pub/sub message
    pub fn publish(&self, message_type: &str, data: Value) -> bool {
        self.responder().publish(message_type, data)
    }

    /// Send an `rpc_request` and return a handle for its response
    ///
    /// The request stays pending until answered or discarded, even if the
    /// send itself was dropped.
    pub fn request(&self, target: &str, command: &str, args: Value) -> RpcCall {
        let request_id = new_request_id();
        let call = RpcCall::register(&self.shared.rpcs, &request_id);
        let mut message = HubMessage::rpc_request(target, command, args, &request_id);
        message.from_project = Some(self.shared.instance_id.clone());
        self.shared.send(message);
        call
    }

    /// Answer an `rpc_request`, echoing its request id
    pub fn respond(&self, request: &HubMessage, result: Value) -> bool {
        self.shared.respond(request, result)
    }

    /// Register a handler for one message type (or `*`)
    pub fn on(
        &self,
        message_type: &str,
        handler: impl Fn(&HubMessage) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.shared.next_handler.fetch_add(1, Ordering::Relaxed);
        self.shared.handlers.write().push(Registration {
            id,
            message_type: message_type.to_string(),
            handler: Arc::new(handler),
        });
        id
    }

    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.shared.handlers.write();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    /// Handle for handlers that need to reply without owning the client
    pub fn responder(&self) -> HubResponder {
        HubResponder {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().is_connected()
    }

    pub fn instance_id(&self) -> &str {
        &self.shared.instance_id
    }

    pub fn pending_rpc_count(&self) -> usize {
        self.shared.rpcs.len()
    }

    pub fn url(&self) -> &str {
        &self.shared.config.url
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("url", &self.shared.config.url)
            .field("instance_id", &self.shared.instance_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Weak sending handle; safe to capture inside handlers
#[derive(Clone)]
pub struct HubResponder {
    shared: Weak<Shared>,
}

impl HubResponder {
    pub fn send(&self, message: HubMessage) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.send(message),
            None => false,
        }
    }

    pub fn publish(&self, message_type: &str, data: Value) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut message = HubMessage::new(message_type).with_data(data);
        message.from_project = Some(shared.instance_id.clone());
        shared.send(message)
    }

    pub fn respond(&self, request: &HubMessage, result: Value) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.respond(request, result),
            None => false,
        }
    }
}

impl std::fmt::Debug for HubResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubResponder")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}
