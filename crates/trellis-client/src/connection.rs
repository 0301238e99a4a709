//! Connection manager for the graph-serving node.
//!
//! Owns the single WebSocket connection shared by every subscription:
//! - Opens it on demand, negotiating the configured sub-protocol
//! - Queues requests while disconnected, collapsing duplicates
//! - Flushes the queue and replays live subscriptions on every open
//! - Reconnects after a fixed delay, forever, until [`ConnectionManager::close`]
//!
//! A single driver task owns the socket. Callers talk to it only through
//! `connect`, `send` and `close`.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{ClientMessage, GraphPush, GraphRequest, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a graceful close may take before the socket is simply dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never connected.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Socket open; requests are sent immediately.
    Open,
    /// Disconnected; the next attempt is scheduled.
    Reconnecting,
    /// Torn down by `close`; nothing is scheduled.
    Closed,
}

/// Receiver of everything the connection does not handle itself.
pub trait InboundHandler: Send + Sync {
    /// Called for every decoded snapshot push.
    fn on_graph(&self, push: GraphPush);

    /// Requests to resend whenever a connection opens.
    fn replay_requests(&self) -> Vec<GraphRequest>;
}

/// The running driver task and its shutdown signal.
struct Driver {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct ConnectionState {
    status: ConnectionStatus,
    /// Set while open; feeds the socket writer.
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    /// Requests waiting for the next open, keyed by the graph they ask for.
    pending: LruCache<GraphRequest, ClientMessage>,
    driver: Option<Driver>,
    /// Bumped by every `connect` and `close`; a driver whose generation is
    /// stale must not touch the state.
    generation: u64,
}

struct Shared {
    config: ClientConfig,
    handler: Weak<dyn InboundHandler>,
    state: Mutex<ConnectionState>,
    status_tx: watch::Sender<ConnectionStatus>,
}

/// Handle to the managed connection. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ConnectionManager
// ─────────────────────────────────────────────────────────────────────────────

impl ConnectionManager {
    /// Creates a manager. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: ClientConfig, handler: Weak<dyn InboundHandler>) -> Self {
        let capacity = NonZeroUsize::new(config.max_pending_requests.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        let (status_tx, _) = watch::channel(ConnectionStatus::Idle);

        Self {
            shared: Arc::new(Shared {
                config,
                handler,
                state: Mutex::new(ConnectionState {
                    status: ConnectionStatus::Idle,
                    outbound: None,
                    pending: LruCache::new(capacity),
                    driver: None,
                    generation: 0,
                }),
                status_tx,
            }),
        }
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().status
    }

    /// Watches status transitions.
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Number of requests queued for the next open.
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Starts the connection driver.
    ///
    /// A no-op while a driver is already running, whether the socket is
    /// open, opening or waiting to reconnect. Must be called from within a
    /// tokio runtime.
    pub fn connect(&self) -> Result<()> {
        self.shared.config.validate()?;

        let mut state = self.shared.state.lock();
        if state
            .driver
            .as_ref()
            .is_some_and(|driver| !driver.task.is_finished())
        {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        state.generation += 1;
        let generation = state.generation;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(run_driver(self.shared.clone(), generation, shutdown_rx));
        state.driver = Some(Driver { shutdown, task });
        self.shared.set_status(&mut state, ConnectionStatus::Connecting);

        Ok(())
    }

    /// Sends a message now if the socket is open, otherwise queues it.
    ///
    /// Queued requests for the same graph collapse into one. A cancellation
    /// issued while disconnected just withdraws the queued request, since
    /// nothing has reached the server yet on the next connection.
    pub fn send(&self, message: ClientMessage) {
        let mut state = self.shared.state.lock();
        send_locked(&mut state, message);
    }

    /// Runs `register` and then sends `message`, with no connection open
    /// able to slip in between.
    ///
    /// A request whose owner `register` makes visible to
    /// [`InboundHandler::replay_requests`] is thus either replayed by the
    /// next open or sent now, never both.
    pub fn send_after(&self, message: ClientMessage, register: impl FnOnce()) {
        let mut state = self.shared.state.lock();
        register();
        send_locked(&mut state, message);
    }

    /// Tears the connection down and cancels any scheduled reconnect.
    ///
    /// Queued requests are kept; a later `connect` sends them.
    pub fn close(&self) {
        let driver = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.outbound = None;
            self.shared.set_status(&mut state, ConnectionStatus::Closed);
            state.driver.take()
        };

        if let Some(driver) = driver {
            info!("Closing connection to {}", self.shared.config.url);
            let _ = driver.shutdown.send(true);
        }
    }
}

fn send_locked(state: &mut ConnectionState, message: ClientMessage) {
    let message = match (&state.status, &state.outbound) {
        (ConnectionStatus::Open, Some(outbound)) => match outbound.send(message) {
            Ok(()) => return,
            Err(mpsc::error::SendError(message)) => message,
        },
        _ => message,
    };

    match message {
        ClientMessage::CancelGraph(request) => {
            state.pending.pop(&request);
        }
        ClientMessage::GetGraph(ref request) => {
            let request = request.clone();
            queue(&mut state.pending, request, message);
        }
    }
}

fn queue(
    pending: &mut LruCache<GraphRequest, ClientMessage>,
    request: GraphRequest,
    message: ClientMessage,
) {
    if let Some((evicted, _)) = pending.push(request.clone(), message) {
        if evicted != request {
            warn!(
                "Pending request queue full; dropped request for {}",
                evicted.public_key
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

impl Shared {
    fn set_status(&self, state: &mut ConnectionState, status: ConnectionStatus) {
        state.status = status;
        self.status_tx.send_replace(status);
    }

    /// Runs `f` on the state if `generation` is still current.
    fn with_current<T>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut ConnectionState) -> T,
    ) -> Option<T> {
        let mut state = self.state.lock();
        (state.generation == generation).then(|| f(&mut state))
    }

    /// Marks the socket open and queues every pending and replayed request,
    /// each graph at most once.
    fn open(&self, generation: u64, outbound: mpsc::UnboundedSender<ClientMessage>) -> bool {
        let replay = self
            .handler
            .upgrade()
            .map(|handler| handler.replay_requests())
            .unwrap_or_default();

        self.with_current(generation, |state| {
            // Oldest first.
            let mut queued: Vec<(GraphRequest, ClientMessage)> = Vec::new();
            while let Some(entry) = state.pending.pop_lru() {
                queued.push(entry);
            }

            let mut seen = HashSet::new();
            let mut sent = 0usize;
            let replayed = replay
                .into_iter()
                .map(|request| (request.clone(), ClientMessage::GetGraph(request)));

            for (request, message) in queued.into_iter().chain(replayed) {
                if !seen.insert(request) {
                    continue;
                }
                if outbound.send(message).is_ok() {
                    sent += 1;
                }
            }

            state.outbound = Some(outbound);
            self.set_status(state, ConnectionStatus::Open);
            info!("Connected to {} ({} requests flushed)", self.config.url, sent);
        })
        .is_some()
    }

    /// Marks the socket gone and returns unsent requests to the queue.
    fn disconnected(
        &self,
        generation: u64,
        unsent: Option<&mut mpsc::UnboundedReceiver<ClientMessage>>,
    ) -> bool {
        self.with_current(generation, |state| {
            state.outbound = None;
            if let Some(rx) = unsent {
                rx.close();
                while let Ok(message) = rx.try_recv() {
                    if let ClientMessage::GetGraph(request) = &message {
                        let request = request.clone();
                        queue(&mut state.pending, request, message);
                    }
                }
            }
            self.set_status(state, ConnectionStatus::Reconnecting);
        })
        .is_some()
    }

    fn handle_text(&self, text: &str) {
        match ServerMessage::decode(text) {
            Ok(ServerMessage::Graph(push)) => match self.handler.upgrade() {
                Some(handler) => handler.on_graph(push),
                None => debug!("No handler for graph push of {}", push.public_key),
            },
            Ok(ServerMessage::Other(kind)) => {
                debug!("Ignoring server message of type {}", kind);
            }
            Err(e) => {
                warn!("Dropping malformed server message: {}", e);
            }
        }
    }

    /// Pumps one open socket until it closes or shutdown is requested.
    ///
    /// Returns true when shutdown was requested.
    async fn run_session(
        &self,
        generation: u64,
        socket: Socket,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        if !self.open(generation, tx) {
            return true;
        }

        let stop = loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
                    break true;
                }

                outgoing = rx.recv() => {
                    let Some(message) = outgoing else {
                        break true;
                    };
                    let text = match message.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode {:?}: {}", message, e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!("Send to {} failed: {}", self.config.url, e);
                        if let ClientMessage::GetGraph(request) = &message {
                            let request = request.clone();
                            self.with_current(generation, |state| {
                                queue(&mut state.pending, request, message)
                            });
                        }
                        break false;
                    }
                    debug!("Sent {:?}", message);
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        info!("Server closed connection: {:?}", frame);
                        break false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Connection error from {}: {}", self.config.url, e);
                        break false;
                    }
                    None => break false,
                },
            }
        };

        if !self.disconnected(generation, Some(&mut rx)) {
            return true;
        }
        stop
    }
}

async fn open_socket(config: &ClientConfig) -> std::result::Result<Socket, tungstenite::Error> {
    let mut request = config.url.as_str().into_client_request()?;
    if !config.protocols.is_empty() {
        let protocols = HeaderValue::from_str(&config.protocols.join(", "))
            .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", protocols);
    }

    let (socket, response) = tokio_tungstenite::connect_async(request).await?;
    debug!("Handshake complete: {}", response.status());
    Ok(socket)
}

/// Connects, pumps, and reconnects after a fixed delay until shut down.
async fn run_driver(shared: Arc<Shared>, generation: u64, mut shutdown: watch::Receiver<bool>) {
    let delay = shared.config.reconnect_delay();

    loop {
        if shared
            .with_current(generation, |state| {
                shared.set_status(state, ConnectionStatus::Connecting)
            })
            .is_none()
        {
            break;
        }

        debug!("Connecting to {}", shared.config.url);
        let opened = tokio::select! {
            result = open_socket(&shared.config) => result,
            _ = shutdown.changed() => break,
        };

        match opened {
            Ok(socket) => {
                if shared.run_session(generation, socket, &mut shutdown).await {
                    break;
                }
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", shared.config.url, e);
                if !shared.disconnected(generation, None) {
                    break;
                }
            }
        }

        info!("Reconnecting to {} in {:?}", shared.config.url, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("Connection driver for {} stopped", shared.config.url);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
