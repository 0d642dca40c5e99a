//! Command bridge to the backend: request/reply commands plus pushed events.
//!
//! [`WsBridge`] carries both over one WebSocket connection. A writer task owns
//! the sink and drains an outbound queue, so frames leave in the order they
//! were queued. A reader task owns the stream and routes every frame: replies
//! and errors go to the oneshot registered under their request id, events are
//! fanned out to every listener registered for the event name.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::messages::{BackendMessage, ClientMessage};

/// Bridge failure. Adapters collapse all of these into an absent result; the
/// variants only serve the log line.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("`{command}` failed: {message}")]
    Backend { command: String, message: String },

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("bridge closed")]
    Closed,
}

/// Host command bridge.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Run `command` with a flat argument record and wait for its result.
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BridgeError>;

    /// Subscribe to `event`. Payloads arrive on the returned listener until it
    /// is torn down.
    async fn listen(&self, event: &str) -> Result<Listener, BridgeError>;
}

type Teardown = Box<dyn FnOnce() + Send>;

/// A live subscription to one event channel.
///
/// Teardown runs exactly once: on [`Listener::unlisten`] or on drop,
/// whichever comes first.
pub struct Listener {
    event: String,
    rx: mpsc::UnboundedReceiver<Value>,
    teardown: Option<Teardown>,
}

impl Listener {
    pub fn new(
        event: impl Into<String>,
        rx: mpsc::UnboundedReceiver<Value>,
        teardown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            event: event.into(),
            rx,
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Next payload, or `None` once the bridge has stopped delivering.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// A payload that has already arrived, without waiting.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    pub fn unlisten(mut self) {
        self.tear_down();
    }

    fn tear_down(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            self.rx.close();
            teardown();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.tear_down();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("event", &self.event)
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<PendingCalls>>;
type Routes = Arc<Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>>>;

/// Calls waiting for a reply. `closed` is set once the reader has stopped, so
/// no waiter can be registered after the final sweep.
#[derive(Default)]
struct PendingCalls {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Result<Value, String>>>,
}

/// Bridge over a WebSocket connection to the backend.
pub struct WsBridge {
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
    routes: Routes,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Connect to the backend bridge at `url` (e.g. `ws://127.0.0.1:7878`).
pub async fn connect(url: &str) -> Result<WsBridge, BridgeError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| BridgeError::Connect(e.to_string()))?;
    debug!(url, "bridge connected");
    Ok(WsBridge::from_stream(ws_stream))
}

impl WsBridge {
    fn from_stream(ws_stream: WsStream) -> Self {
        let (sink, stream) = ws_stream.split();
        let (outbound, queue) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(PendingCalls::default()));
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(write_loop(sink, queue));
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&pending), Arc::clone(&routes)));

        Self {
            outbound,
            pending,
            routes,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        }
    }

    /// Number of live listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.routes).get(event).map_or(0, Vec::len)
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        lock(&self.pending).waiters.len()
    }

    /// Whether the connection is still routing replies.
    pub fn is_open(&self) -> bool {
        !lock(&self.pending).closed
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, frame: &ClientMessage<'_>) -> Result<(), BridgeError> {
        let text = serde_json::to_string(frame)?;
        trace!(bytes = text.len(), "bridge send");
        self.outbound.send(text).map_err(|_| BridgeError::Closed)
    }

    /// Send a frame carrying `id` and wait for the reply routed to it.
    async fn request(
        &self,
        id: u64,
        label: &str,
        frame: &ClientMessage<'_>,
    ) -> Result<Value, BridgeError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(BridgeError::Closed);
            }
            pending.waiters.insert(id, tx);
        }
        let _waiter = Waiter {
            pending: &self.pending,
            id,
        };

        self.send(frame)?;

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(BridgeError::Backend {
                command: label.to_string(),
                message,
            }),
            Err(_) => Err(BridgeError::Closed),
        }
    }
}

#[async_trait]
impl Bridge for WsBridge {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BridgeError> {
        let id = self.next_id();
        debug!(command, id, "invoke");
        let frame = ClientMessage::Invoke {
            id,
            cmd: command,
            args: &args,
        };
        self.request(id, command, &frame).await
    }

    async fn listen(&self, event: &str) -> Result<Listener, BridgeError> {
        let id = self.next_id();
        let handler = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        // Routed from the start so events right behind the ack are kept; a
        // rejected or abandoned listen only drops the route.
        let registration = Registration::insert(Arc::clone(&self.routes), event, handler, tx);

        let frame = ClientMessage::Listen { id, event, handler };
        self.request(id, "listen", &frame).await?;
        debug!(event, handler, "listen");

        let outbound = self.outbound.clone();
        Ok(Listener::new(event, rx, move || {
            let name = registration.event.clone();
            drop(registration);
            let frame = ClientMessage::Unlisten {
                event: &name,
                handler,
            };
            if let Ok(text) = serde_json::to_string(&frame) {
                // The backend may already be gone; nothing left to release then.
                let _ = outbound.send(text);
            }
            debug!(event = %name, handler, "unlisten");
        }))
    }
}

/// A handler in the route table, removed again on drop.
struct Registration {
    routes: Routes,
    event: String,
    handler: u64,
}

impl Registration {
    fn insert(routes: Routes, event: &str, handler: u64, tx: mpsc::UnboundedSender<Value>) -> Self {
        lock(&routes)
            .entry(event.to_string())
            .or_default()
            .push((handler, tx));
        Self {
            routes,
            event: event.to_string(),
            handler,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut routes = lock(&self.routes);
        if let Some(handlers) = routes.get_mut(&self.event) {
            handlers.retain(|(h, _)| *h != self.handler);
            if handlers.is_empty() {
                routes.remove(&self.event);
            }
        }
    }
}

/// Removes a waiter when its call completes or is abandoned.
struct Waiter<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        lock(self.pending).waiters.remove(&self.id);
    }
}

impl std::fmt::Debug for WsBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsBridge")
            .field("open", &self.is_open())
            .field("events", &lock(&self.routes).len())
            .finish()
    }
}

impl Drop for WsBridge {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut queue: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = queue.recv().await {
        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!("bridge writer stopped: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}

/// Route frames until the connection ends, then fail everything still waiting.
async fn read_loop(mut stream: SplitStream<WsStream>, pending: Pending, routes: Routes) {
    while let Some(item) = stream.next().await {
        let text = match item {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("bridge read error: {}", e);
                break;
            }
        };
        trace!(bytes = text.len(), "bridge recv");

        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!("bridge: unparseable frame: {}", e);
                continue;
            }
        };
        match BackendMessage::from_json(value) {
            Ok(BackendMessage::Reply { id, result }) => resolve(&pending, id, Ok(result)),
            Ok(BackendMessage::Error { id, message }) => resolve(&pending, id, Err(message)),
            Ok(BackendMessage::Event { event, payload }) => {
                let mut routes = lock(&routes);
                if let Some(handlers) = routes.get_mut(&event) {
                    handlers.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
                } else {
                    trace!(event = %event, "event with no listener");
                }
            }
            Err(e) => warn!("bridge: skipping frame: {}", e),
        }
    }

    debug!("bridge reader ended, closing pending calls and listeners");
    {
        let mut pending = lock(&pending);
        pending.closed = true;
        pending.waiters.clear();
    }
    lock(&routes).clear();
}

fn resolve(pending: &Pending, id: u64, outcome: Result<Value, String>) {
    let sender = lock(pending).waiters.remove(&id);
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => debug!(id, "reply for unknown request"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
