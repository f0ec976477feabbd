// Integration test utilities
//
// Loopback trace servers and a relaying WebSocket hub

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Poll `cond` every 10ms until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Port that was free a moment ago
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("bind ephemeral port")
}

/// One-connection trace server driven by a script
pub struct TraceServer {
    pub port: u16,
    handle: JoinHandle<Vec<String>>,
}

impl TraceServer {
    /// Accept one client, run `script` against the stream, then close it.
    /// The script also sees the command lines received so far. Returns every
    /// command line the client sent.
    pub fn spawn<F>(script: F) -> Self
    where
        F: FnOnce(&mut TcpStream, &Mutex<Vec<String>>) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind trace server");
        let port = listener.local_addr().expect("local addr").port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept trace client");
            let commands = Arc::new(Mutex::new(Vec::new()));
            let reader = {
                let read_half = stream.try_clone().expect("clone stream");
                let commands = Arc::clone(&commands);
                thread::spawn(move || {
                    for line in BufReader::new(read_half).lines() {
                        match line {
                            Ok(line) => commands.lock().push(line),
                            Err(_) => break,
                        }
                    }
                })
            };
            script(&mut stream, &commands);
            let _ = stream.shutdown(std::net::Shutdown::Both);
            let _ = reader.join();
            let lines = commands.lock().clone();
            lines
        });
        Self { port, handle }
    }

    /// Wait for the script to finish
    pub fn join(self) -> Vec<String> {
        self.handle.join().expect("trace server thread")
    }
}

/// Write each line plus a newline
pub fn write_lines(stream: &mut TcpStream, lines: &[String]) {
    for line in lines {
        stream.write_all(line.as_bytes()).expect("write line");
        stream.write_all(b"\n").expect("write newline");
    }
    stream.flush().expect("flush");
}

type Peers = Arc<Mutex<Vec<(usize, mpsc::UnboundedSender<Message>)>>>;

/// Minimal hub: records every text frame and relays it to the other peers
pub struct RelayHub {
    pub port: u16,
    received: Arc<Mutex<Vec<(usize, Value)>>>,
    peers: Peers,
    connections: Arc<AtomicUsize>,
    runtime: Runtime,
}

impl RelayHub {
    pub fn start() -> Self {
        Self::start_with_limit(usize::MAX)
    }

    /// Stop listening after `limit` connections have been accepted
    pub fn start_with_limit(limit: usize) -> Self {
        let runtime = Runtime::new().expect("hub runtime");
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .expect("bind hub");
        let port = listener.local_addr().expect("hub addr").port();
        Self::serve(runtime, listener, port, limit, None)
    }

    /// Every connection after the first waits `delay` before its handshake
    pub fn start_stalling(delay: Duration) -> Self {
        let runtime = Runtime::new().expect("hub runtime");
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .expect("bind hub");
        let port = listener.local_addr().expect("hub addr").port();
        Self::serve(runtime, listener, port, usize::MAX, Some(delay))
    }

    /// Hub on a fixed port, for auto-start tests
    pub fn start_on(port: u16) -> Self {
        let runtime = Runtime::new().expect("hub runtime");
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind(("127.0.0.1", port)))
            .expect("bind hub on port");
        Self::serve(runtime, listener, port, usize::MAX, None)
    }

    fn serve(
        runtime: Runtime,
        listener: tokio::net::TcpListener,
        port: u16,
        limit: usize,
        stall: Option<Duration>,
    ) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let peers: Peers = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        {
            let received = Arc::clone(&received);
            let peers = Arc::clone(&peers);
            let connections = Arc::clone(&connections);
            runtime.spawn(async move {
                let mut accepted = 0;
                while accepted < limit {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    accepted += 1;
                    let id = connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(handle_peer(
                        id,
                        stream,
                        stall.filter(|_| id > 0),
                        Arc::clone(&received),
                        Arc::clone(&peers),
                    ));
                }
            });
        }

        Self {
            port,
            received,
            peers,
            connections,
            runtime,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Every frame received so far, tagged with its connection number
    pub fn received(&self) -> Vec<(usize, Value)> {
        self.received.lock().clone()
    }

    pub fn received_of_type(&self, message_type: &str) -> Vec<(usize, Value)> {
        self.received()
            .into_iter()
            .filter(|(_, v)| v["type"] == message_type)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Send a frame to every connected peer
    pub fn broadcast(&self, value: &Value) {
        for (_, tx) in self.peers.lock().iter() {
            let _ = tx.send(Message::Text(value.to_string()));
        }
    }

    /// Close every connection from the hub side
    pub fn kick_all(&self) {
        self.peers.lock().clear();
    }

    pub fn shutdown(self) {
        self.kick_all();
        self.runtime.shutdown_background();
    }
}

async fn handle_peer(
    id: usize,
    stream: tokio::net::TcpStream,
    stall: Option<Duration>,
    received: Arc<Mutex<Vec<(usize, Value)>>>,
    peers: Peers,
) {
    if let Some(delay) = stall {
        tokio::time::sleep(delay).await;
    }
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    peers.lock().push((id, tx));

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if write.send(message).await.is_err() {
                return;
            }
        }
        let _ = write.close().await;
    });

    while let Some(Ok(frame)) = read.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        received.lock().push((id, value));
        for (peer, tx) in peers.lock().iter() {
            if *peer != id {
                let _ = tx.send(Message::Text(text.clone()));
            }
        }
    }
    peers.lock().retain(|(peer, _)| *peer != id);
}
