//! Trace socket client
//!
//! Holds one TCP connection to a tracer that streams newline-delimited JSON
//! events. Each connection gets a dedicated reader thread that parses lines
//! and hands events to a [`TraceEventSink`]. Bad lines, including lines
//! longer than the line cap, are logged and skipped; only EOF or a transport
//! error ends the connection.
//!
//! The client never reconnects on its own.

use crate::error::{Result, TraceFlowError};
use crate::event::TraceEvent;
use crate::sink::{DisconnectReason, TraceEventSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest trace line accepted by default (1 MiB)
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Control messages understood by the tracer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Stop emitting events
    Pause,
    Resume,
    /// Ask for a fresh `function_registry` snapshot
    GetRegistry,
    /// Flush trace files on the tracer side
    Finalize,
}

impl ClientCommand {
    pub fn to_json_line(self) -> String {
        let mut line = serde_json::to_string(&self).unwrap_or_default();
        line.push('\n');
        line
    }
}

/// Per-connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub lines_read: u64,
    pub events_parsed: u64,
    pub parse_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lines_read: AtomicU64,
    events_parsed: AtomicU64,
    parse_errors: AtomicU64,
}

struct Connection {
    stream: TcpStream,
    reader: Option<JoinHandle<()>>,
    closing: Arc<AtomicBool>,
    peer: String,
}

pub struct TraceSocketClient {
    sink: Arc<dyn TraceEventSink>,
    connect_timeout: Duration,
    max_line_bytes: usize,
    conn: Mutex<Option<Connection>>,
    connected: Arc<AtomicBool>,
    counters: Mutex<Arc<Counters>>,
}

impl TraceSocketClient {
    pub fn new(sink: Arc<dyn TraceEventSink>, connect_timeout: Duration) -> Self {
        Self {
            sink,
            connect_timeout,
            max_line_bytes: MAX_LINE_BYTES,
            conn: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            counters: Mutex::new(Arc::new(Counters::default())),
        }
    }

    /// Skip lines longer than `max` bytes instead of buffering them
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max.max(1);
        self
    }

    /// Open a connection and start reading events
    ///
    /// Any previous connection is closed first. On failure no lifecycle
    /// callback fires.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.disconnect();

        let addr = format!("{host}:{port}");
        let stream = self.open(host, port, &addr)?;
        let _ = stream.set_nodelay(true);
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.clone());
        let read_half = stream.try_clone()?;

        let counters = Arc::new(Counters::default());
        *self.counters.lock() = Arc::clone(&counters);
        let closing = Arc::new(AtomicBool::new(false));

        self.connected.store(true, Ordering::SeqCst);
        info!(peer = %peer, "connected to trace server");
        self.sink.on_connected(&peer);

        let reader = {
            let sink = Arc::clone(&self.sink);
            let closing = Arc::clone(&closing);
            let connected = Arc::clone(&self.connected);
            let max_line = self.max_line_bytes;
            thread::Builder::new()
                .name(format!("trueflow-trace-{peer}"))
                .spawn(move || read_loop(read_half, max_line, sink, counters, closing, connected))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                let _ = stream.shutdown(Shutdown::Both);
                self.sink.on_disconnected(&DisconnectReason::Error(e.to_string()));
                return Err(e.into());
            }
        };

        *self.conn.lock() = Some(Connection {
            stream,
            reader: Some(reader),
            closing,
            peer,
        });
        Ok(())
    }

    fn open(&self, host: &str, port: u16, addr: &str) -> Result<TcpStream> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| TraceFlowError::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        let mut last_error = String::from("no addresses resolved");
        for candidate in addrs {
            match TcpStream::connect_timeout(&candidate, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(addr = %candidate, error = %e, "trace connect attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(TraceFlowError::Connect {
            addr: addr.to_string(),
            reason: last_error,
        })
    }

    /// Close the connection and wait for the reader to finish
    ///
    /// Safe to call repeatedly or before any connect.
    pub fn disconnect(&self) {
        let conn = self.conn.lock().take();
        let Some(mut conn) = conn else {
            return;
        };
        conn.closing.store(true, Ordering::SeqCst);
        let _ = conn.stream.shutdown(Shutdown::Both);
        if let Some(reader) = conn.reader.take() {
            // The reader may be the caller, e.g. disconnect from a sink callback
            if reader.thread().id() != thread::current().id() {
                let _ = reader.join();
            }
        }
        debug!(peer = %conn.peer, "trace connection closed");
    }

    /// Write a control command to the tracer
    pub fn send_command(&self, command: ClientCommand) -> Result<()> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(TraceFlowError::NotConnected)?;
        (&conn.stream).write_all(command.to_json_line().as_bytes())?;
        (&conn.stream).flush()?;
        debug!(?command, "sent trace command");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn peer(&self) -> Option<String> {
        self.conn.lock().as_ref().map(|c| c.peer.clone())
    }

    /// Counters for the current (or most recent) connection
    pub fn stats(&self) -> ConnectionStats {
        let counters = self.counters.lock();
        ConnectionStats {
            lines_read: counters.lines_read.load(Ordering::Relaxed),
            events_parsed: counters.events_parsed.load(Ordering::Relaxed),
            parse_errors: counters.parse_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TraceSocketClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for TraceSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSocketClient")
            .field("peer", &self.peer())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    /// Line exceeded the cap; its bytes were discarded
    Oversized,
}

/// Read one newline-terminated line of at most `max` bytes (newline excluded)
///
/// An oversized line is consumed up to and including its newline without
/// buffering more than `max + 1` bytes at a time.
fn read_line_capped<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<LineRead> {
    buf.clear();
    let read = reader.by_ref().take(max as u64 + 1).read_until(b'\n', buf)?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.len() <= max || buf.ends_with(b"\n") {
        return Ok(LineRead::Line);
    }
    loop {
        buf.clear();
        let read = reader.by_ref().take(max as u64 + 1).read_until(b'\n', buf)?;
        if read == 0 || buf.ends_with(b"\n") {
            break;
        }
    }
    buf.clear();
    Ok(LineRead::Oversized)
}

fn read_loop(
    stream: TcpStream,
    max_line: usize,
    sink: Arc<dyn TraceEventSink>,
    counters: Arc<Counters>,
    closing: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(1024);

    let reason = loop {
        match read_line_capped(&mut reader, &mut buf, max_line) {
            Ok(LineRead::Eof) => break DisconnectReason::Closed,
            Ok(LineRead::Oversized) => {
                counters.lines_read.fetch_add(1, Ordering::Relaxed);
                counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(max_bytes = max_line, "skipping oversized trace line");
            }
            Ok(LineRead::Line) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                counters.lines_read.fetch_add(1, Ordering::Relaxed);
                match TraceEvent::parse_line(line) {
                    Ok(event) => {
                        counters.events_parsed.fetch_add(1, Ordering::Relaxed);
                        sink.on_trace_received(&event);
                    }
                    Err(e) => {
                        counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                        debug!(error = %e, "skipping malformed trace line");
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) if closing.load(Ordering::SeqCst) => break DisconnectReason::Requested,
            Err(e) => {
                warn!(error = %e, "trace connection read failed");
                sink.on_error(&e.to_string());
                break DisconnectReason::Error(e.to_string());
            }
        }
    };

    // EOF caused by our own shutdown
    let reason = if reason == DisconnectReason::Closed && closing.load(Ordering::SeqCst) {
        DisconnectReason::Requested
    } else {
        reason
    };

    connected.store(false, Ordering::SeqCst);
    info!(%reason, "trace connection ended");
    sink.on_disconnected(&reason);
}
