//! Physical WebSocket Connection
//!
//! One `Connection` owns one WebSocket stream for its whole life. It is
//! never reconnected in place: when it dies, the connection guard dials a
//! replacement and this handle stays dead.
//!
//! # Tasks
//!
//! Each connection runs three background tasks. Writes are not a task: every
//! sender takes the sink mutex directly.
//!
//! - **heartbeat manager**: ticks on the ping interval and reports when a
//!   probe is due or has gone unanswered.
//! - **heartbeat driver**: turns `HeartbeatEvent`s into probe writes and
//!   closes the connection when a probe goes unanswered.
//! - **socket reader**: receives raw frames and fans them out to every
//!   registered watch; frames matching the keep-alive answer are consumed
//!   by the heartbeat instead. It starts only after the `on_open` hook, so
//!   watches registered there miss nothing.
//!
//! # Liveness
//!
//! [`Liveness`] is the connection's cancel-with-cause signal. It fires
//! exactly once, for whichever reason comes first (read error, write error,
//! peer close, heartbeat timeout, explicit close), and keeps that reason
//! readable afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::proxy::{self, ProxyConfig};
use crate::application::ports::SharedLogger;
use crate::domain::streaming::ConnectionState;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// =============================================================================
// Error Types
// =============================================================================

/// The transport could not be established.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The endpoint URL is malformed.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    /// The HTTP proxy could not open a tunnel.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// TCP, TLS or WebSocket handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Dialing took longer than the configured timeout.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a physical connection ended.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionLost {
    /// A keep-alive probe went unanswered.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    ClosedByPeer,

    /// Reading or writing the socket failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The venue pushed an out-of-band error frame.
    #[error("venue error ({code}): {msg}")]
    Venue {
        /// Venue error code.
        code: String,
        /// Venue error message.
        msg: String,
    },

    /// Closed deliberately by the client.
    #[error("connection closed by client")]
    Shutdown,
}

/// A write could not be performed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No physical connection exists.
    #[error("not connected")]
    NotConnected,

    /// The connection has already died.
    #[error("connection closed: {0}")]
    Closed(ConnectionLost),

    /// The directive could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// The socket write failed. The connection is closed as a result.
    #[error("write failed: {0}")]
    Transport(String),
}

// =============================================================================
// Liveness
// =============================================================================

/// Cancel-with-cause signal for one physical connection.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    token: CancellationToken,
    cause: Arc<OnceLock<ConnectionLost>>,
}

impl Liveness {
    /// Create a live signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Only the first cause is kept.
    ///
    /// Returns `true` if this call fired it.
    pub fn close(&self, cause: ConnectionLost) -> bool {
        let first = self.cause.set(cause).is_ok();
        self.token.cancel();
        first
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the signal.
    pub async fn done(&self) {
        self.token.cancelled().await;
    }

    /// Why the connection ended, once it has.
    #[must_use]
    pub fn cause(&self) -> Option<ConnectionLost> {
        self.cause.get().cloned()
    }

    /// Token cancelled together with the signal.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

// =============================================================================
// Frames
// =============================================================================

/// Kind of a raw inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// UTF-8 text frame.
    Text,
    /// Binary frame.
    Binary,
}

/// One inbound data frame, shared between watches.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Frame payload.
    pub data: Arc<[u8]>,
}

impl RawFrame {
    /// Payload as text, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            FrameKind::Text => std::str::from_utf8(&self.data).ok(),
            FrameKind::Binary => None,
        }
    }
}

// =============================================================================
// Connect Options
// =============================================================================

/// Everything needed to dial one physical connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Optional HTTP CONNECT proxy.
    pub proxy: Option<ProxyConfig>,
    /// Upper bound on dial plus handshake.
    pub connect_timeout: Duration,
    /// Keep-alive configuration.
    pub heartbeat: HeartbeatConfig,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// One physical WebSocket connection.
pub struct Connection {
    id: Uuid,
    state: AtomicU8,
    sink: Mutex<WsSink>,
    liveness: Liveness,
    watches: RwLock<HashMap<String, mpsc::UnboundedSender<RawFrame>>>,
    log: SharedLogger,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Dial `url` and start the reader and heartbeat tasks.
    ///
    /// `on_open` runs after the handshake and before the socket reader
    /// starts, so watches it registers see every inbound frame.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the URL is invalid, the proxy refuses the
    /// tunnel, the handshake fails, or dialing exceeds the timeout.
    pub async fn connect(
        url: &str,
        options: &ConnectOptions,
        log: SharedLogger,
        on_open: impl FnOnce(&Arc<Self>),
    ) -> Result<Arc<Self>, ConnectError> {
        let stream = tokio::time::timeout(
            options.connect_timeout,
            dial(url, options.proxy.as_ref()),
        )
        .await
        .map_err(|_| ConnectError::Timeout(options.connect_timeout))??;

        let (sink, source) = stream.split();
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            state: AtomicU8::new(ConnectionState::Alive.as_u8()),
            sink: Mutex::new(sink),
            liveness: Liveness::new(),
            watches: RwLock::new(HashMap::new()),
            log,
        });

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(4);
        let manager = HeartbeatManager::new(
            options.heartbeat.ping_interval,
            Arc::clone(&heartbeat_state),
            heartbeat_tx,
            connection.liveness.token().child_token(),
        );

        on_open(&connection);

        tokio::spawn(manager.run());
        tokio::spawn(Arc::clone(&connection).drive_heartbeat(
            heartbeat_rx,
            options.heartbeat.keep_alive.probe().to_vec(),
        ));
        tokio::spawn(Arc::clone(&connection).read_socket(
            source,
            heartbeat_state,
            options.heartbeat.keep_alive.clone(),
        ));

        connection
            .log
            .info(format_args!("connected to {url} (connection {})", connection.id));
        Ok(connection)
    }

    /// Unique ID of this physical connection.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Cheap, lock-free liveness check.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state().is_alive() && !self.liveness.is_done()
    }

    /// The connection's cancel-with-cause signal.
    #[must_use]
    pub const fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Write one text frame.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Closed` if the connection is already dead, or
    /// `SendError::Transport` if the write fails (which also closes it).
    pub async fn send(&self, text: String) -> Result<(), SendError> {
        self.write(Message::Text(text.into())).await
    }

    async fn write(&self, message: Message) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed(
                self.liveness.cause().unwrap_or(ConnectionLost::Shutdown),
            ));
        }

        let result = self.sink.lock().await.send(message).await;
        result.map_err(|e| {
            let reason = e.to_string();
            self.close(ConnectionLost::Transport(reason.clone()));
            SendError::Transport(reason)
        })
    }

    /// Close the connection with `cause`. Idempotent; the first cause wins.
    pub fn close(&self, cause: ConnectionLost) {
        if self.liveness.close(cause.clone()) {
            self.state
                .store(ConnectionState::Closing.as_u8(), Ordering::SeqCst);
            self.log.warn(format_args!(
                "closing connection {}: {cause}",
                self.id
            ));
        }
    }

    /// Register a watch and return the channel it receives frames on.
    ///
    /// Registering an existing name replaces the previous channel.
    pub fn register_watch(&self, name: impl Into<String>) -> mpsc::UnboundedReceiver<RawFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watches.write().insert(name.into(), tx);
        rx
    }

    /// Remove a watch. Unknown names are ignored.
    pub fn unregister_watch(&self, name: &str) {
        self.watches.write().remove(name);
    }

    fn fan_out(&self, frame: &RawFrame) {
        let watches = self.watches.read();
        for tx in watches.values() {
            let _ = tx.send(frame.clone());
        }
    }

    async fn read_socket(
        self: Arc<Self>,
        mut source: WsSource,
        heartbeat: Arc<HeartbeatState>,
        keep_alive: super::heartbeat::KeepAlive,
    ) {
        loop {
            let next = tokio::select! {
                () = self.liveness.done() => break,
                next = source.next() => next,
            };

            let frame = match next {
                Some(Ok(Message::Text(text))) => RawFrame {
                    kind: FrameKind::Text,
                    data: Arc::from(text.as_bytes()),
                },
                Some(Ok(Message::Binary(data))) => RawFrame {
                    kind: FrameKind::Binary,
                    data: Arc::from(&data[..]),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.write(Message::Pong(data)).await {
                        self.log.warn(format_args!("failed to answer ping: {e}"));
                    }
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.close(ConnectionLost::ClosedByPeer);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.close(ConnectionLost::Transport(e.to_string()));
                    break;
                }
            };

            if keep_alive.is_pong(&frame.data) {
                heartbeat.record_pong();
                continue;
            }

            self.fan_out(&frame);
        }

        self.shutdown().await;
    }

    async fn drive_heartbeat(
        self: Arc<Self>,
        mut events: mpsc::Receiver<HeartbeatEvent>,
        probe: Vec<u8>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                HeartbeatEvent::SendPing => {
                    let message = match String::from_utf8(probe.clone()) {
                        Ok(text) => Message::Text(text.into()),
                        Err(e) => Message::Binary(e.into_bytes().into()),
                    };
                    if self.write(message).await.is_err() {
                        break;
                    }
                }
                HeartbeatEvent::Timeout(elapsed) => {
                    metrics::record_heartbeat_timeout();
                    self.close(ConnectionLost::HeartbeatTimeout(elapsed));
                    break;
                }
            }
        }
    }

    async fn shutdown(&self) {
        // Dropping the senders ends every watch's receive loop.
        self.watches.write().clear();

        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
        drop(sink);

        self.state
            .store(ConnectionState::Disconnected.as_u8(), Ordering::SeqCst);
        self.log.debug(format_args!("connection {} shut down", self.id));
    }
}

async fn dial(url: &str, proxy: Option<&ProxyConfig>) -> Result<WsStream, ConnectError> {
    let request = url
        .into_client_request()
        .map_err(|e| ConnectError::InvalidUrl(format!("{url}: {e}")))?;

    let result = match proxy {
        None => tokio_tungstenite::connect_async(request).await,
        Some(proxy) => {
            let uri = request.uri();
            let host = uri
                .host()
                .ok_or_else(|| ConnectError::InvalidUrl(format!("{url}: missing host")))?
                .to_string();
            let default_port = if uri.scheme_str() == Some("wss") { 443 } else { 80 };
            let port = uri.port_u16().unwrap_or(default_port);

            let tunnel = proxy::tunnel(proxy, &host, port).await?;
            tokio_tungstenite::client_async_tls(request, tunnel).await
        }
    };

    result
        .map(|(stream, _response)| stream)
        .map_err(|e| ConnectError::Handshake(e.to_string()))
}
