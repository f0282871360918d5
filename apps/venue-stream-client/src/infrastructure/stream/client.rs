//! Stream Client
//!
//! The public face of the crate: one logical, subscription-multiplexed
//! connection to one venue service.
//!
//! # Control Flow
//!
//! ```text
//! subscribe ──► ConnectionGuard ──► Session ──► DispatchRegistry ──► Connection
//!  (caller)      ensure live        login        register handler     send directive
//!                                   (private)
//!
//! Connection ──► FrameRouter ──► DispatchRegistry ──► handler
//!   (reader)       parse           topic + event
//! ```
//!
//! Every blocking call takes a [`CancellationToken`] standing in for the
//! caller's lifetime. `subscribe` blocks for as long as the subscription
//! lives; run it as its own task.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::guard::ConnectionGuard;
use super::registry::{DispatchRegistry, FrameHandler, RegistrationId};
use super::router::FrameRouter;
use super::session::{LoginError, LoginTurn, Session};
use crate::application::ports::{KeySigner, ReadMonitor, SharedLogger, TracingLogger, noop_read_monitor};
use crate::domain::streaming::{ConnectionState, ServiceKind};
use crate::domain::subscription::{Arg, WatchKey};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::okx::codec::JsonCodec;
use crate::infrastructure::okx::messages::{Directive, InboundFrame, LOGIN_EVENT, Op, Push};
use crate::infrastructure::ws::{
    ConnectError, ConnectOptions, Connection, ConnectionLost, KeepAlive, ReconnectConfig,
    ReconnectPolicy, SendError,
};

// =============================================================================
// Error Types
// =============================================================================

/// A subscription ended with an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// No connection could be established.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Login failed before the subscription could start.
    #[error(transparent)]
    Login(#[from] LoginError),

    /// The subscribe directive could not be written.
    #[error(transparent)]
    Send(#[from] SendError),

    /// The physical connection died while the subscription was live.
    #[error("subscription lost: {0}")]
    ConnectionLost(ConnectionLost),

    /// The caller gave up during setup.
    #[error("subscription cancelled during setup")]
    Cancelled,

    /// A supervised subscription ran out of retries.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error that ended the last attempt.
        last: Box<StreamError>,
    },
}

impl StreamError {
    /// Whether a fresh attempt on a new connection could succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::ConnectionLost(_) => true,
            Self::Send(error) => !matches!(error, SendError::Encode(_)),
            Self::Login(error) => matches!(
                error,
                LoginError::Connect(_) | LoginError::Send(_) | LoginError::ConnectionLost(_)
            ),
            Self::Cancelled | Self::RetriesExhausted { .. } => false,
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`StreamClient`].
pub struct StreamClientBuilder {
    config: ClientConfig,
    options: ConnectOptions,
    signer: Option<Arc<dyn KeySigner>>,
    log: Option<SharedLogger>,
    monitor: ReadMonitor,
}

impl std::fmt::Debug for StreamClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClientBuilder")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl StreamClientBuilder {
    /// Use `signer` for login instead of the configured credentials.
    #[must_use]
    pub fn signer(mut self, signer: Arc<dyn KeySigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Route the client's log events through `log`.
    #[must_use]
    pub fn logger(mut self, log: SharedLogger) -> Self {
        self.log = Some(log);
        self
    }

    /// Install a read monitor.
    #[must_use]
    pub fn read_monitor(mut self, monitor: ReadMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Replace the heartbeat probe and its expected answer.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.options.heartbeat.keep_alive = keep_alive;
        self
    }

    /// Build the client. Nothing is dialed until first use.
    #[must_use]
    pub fn build(self) -> StreamClient {
        let service = self.config.service;
        let log = self
            .log
            .unwrap_or_else(|| TracingLogger::shared(service.as_str()));
        let signer = self.signer.or_else(|| {
            self.config
                .credentials
                .clone()
                .map(|credentials| Arc::new(credentials) as Arc<dyn KeySigner>)
        });

        let registry = Arc::new(DispatchRegistry::new());
        let monitor = Arc::new(RwLock::new(self.monitor));
        let router = FrameRouter::new(
            service,
            Arc::clone(&registry),
            Arc::clone(&monitor),
            Arc::clone(&log),
        );

        let guard = ConnectionGuard::new(
            self.config.ws_url(),
            service,
            self.options,
            Arc::clone(&log),
            Box::new(move |connection: &Arc<Connection>| router.attach(connection)),
        );

        StreamClient {
            inner: Arc::new(Inner {
                service,
                guard,
                session: Session::new(),
                registry,
                monitor,
                signer,
                codec: JsonCodec::new(),
                reconnect: ReconnectConfig::from_settings(&self.config.stream),
                log,
            }),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

struct Inner {
    service: ServiceKind,
    guard: ConnectionGuard,
    session: Session,
    registry: Arc<DispatchRegistry>,
    monitor: Arc<RwLock<ReadMonitor>>,
    signer: Option<Arc<dyn KeySigner>>,
    codec: JsonCodec,
    reconnect: ReconnectConfig,
    log: SharedLogger,
}

impl Inner {
    async fn send_directive<A: Serialize>(
        &self,
        connection: &Connection,
        directive: &Directive<A>,
    ) -> Result<(), SendError> {
        let text = self
            .codec
            .encode(directive)
            .map_err(|e| SendError::Encode(e.to_string()))?;

        if directive.op == Op::Login {
            self.log.info(format_args!("{}: send login", self.service));
        } else {
            self.log.info(format_args!("{}: send {text}", self.service));
        }

        connection.send(text).await?;
        metrics::record_directive_sent(self.service, directive.op.as_str());
        Ok(())
    }

    fn update_watch_gauge(&self) {
        metrics::set_active_watches(self.service, self.registry.len());
    }
}

/// Multiplexed, self-healing client for one venue WebSocket service.
///
/// Cheap to clone; clones share the connection, session and registry.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("service", &self.inner.service)
            .field("guard", &self.inner.guard)
            .field("watches", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Client for `config` with the default tracing logger.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building a client for `config`.
    #[must_use]
    pub fn builder(config: ClientConfig) -> StreamClientBuilder {
        StreamClientBuilder {
            options: config.connect_options(),
            config,
            signer: None,
            log: None,
            monitor: noop_read_monitor(),
        }
    }

    /// Service this client talks to.
    #[must_use]
    pub fn service(&self) -> ServiceKind {
        self.inner.service
    }

    /// Replace the read monitor.
    pub fn set_read_monitor(&self, monitor: impl Fn(Option<&Arg>) + Send + Sync + 'static) {
        *self.inner.monitor.write() = Arc::new(monitor);
    }

    /// Make sure a live physical connection exists.
    ///
    /// # Errors
    ///
    /// Returns the `ConnectError` of the dial this call took part in.
    pub async fn ensure_connected(&self) -> Result<(), ConnectError> {
        self.inner.guard.ensure_connected().await.map(|_| ())
    }

    /// Authenticate the current physical connection.
    ///
    /// A no-op once the connection is authenticated. Concurrent callers
    /// share one login directive and its outcome.
    ///
    /// # Errors
    ///
    /// Returns `LoginError` if no connection can be made, the venue rejects
    /// the credentials, the connection dies, or `cancel` fires first.
    pub async fn login(&self, cancel: &CancellationToken) -> Result<(), LoginError> {
        let connection = tokio::select! {
            () = cancel.cancelled() => return Err(LoginError::Cancelled),
            result = self.inner.guard.ensure_connected() => result?,
        };
        self.login_on(&connection, cancel).await
    }

    async fn login_on(
        &self,
        connection: &Arc<Connection>,
        cancel: &CancellationToken,
    ) -> Result<(), LoginError> {
        let turn = tokio::select! {
            () = cancel.cancelled() => return Err(LoginError::Cancelled),
            turn = self.inner.session.begin(connection.id()) => turn,
        };
        let permit = match turn {
            LoginTurn::Settled(result) => return result,
            LoginTurn::Perform(permit) => permit,
        };

        let result = self.perform_login(connection, cancel).await;
        match &result {
            Ok(()) => self.inner.log.info(format_args!(
                "{}: logged in on connection {}",
                self.inner.service,
                connection.id()
            )),
            Err(e) => self
                .inner
                .log
                .error(format_args!("{}: login failed: {e}", self.inner.service)),
        }
        permit.complete(result)
    }

    async fn perform_login(
        &self,
        connection: &Arc<Connection>,
        cancel: &CancellationToken,
    ) -> Result<(), LoginError> {
        let signer = self.inner.signer.as_ref().ok_or(LoginError::NoCredentials)?;
        let args = signer.login_args()?;

        let (tx, rx) = oneshot::channel();
        let tx = parking_lot::Mutex::new(Some(tx));
        let handler: FrameHandler = Arc::new(move |frame: &InboundFrame| {
            let outcome = if frame.is_success() {
                Ok(())
            } else {
                Err(LoginError::Rejected {
                    code: frame.code().to_string(),
                    msg: frame.msg().to_string(),
                })
            };
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(outcome);
            }
        });

        let _watch = Registration::new(
            &self.inner.registry,
            WatchKey::event(LOGIN_EVENT),
            handler,
        );
        self.inner
            .send_directive(connection, &Directive::single(Op::Login, args))
            .await?;

        let liveness = connection.liveness();
        tokio::select! {
            biased;
            outcome = rx => outcome.unwrap_or_else(|_| Err(LoginError::from_lost(liveness.cause()))),
            () = liveness.done() => Err(LoginError::from_lost(liveness.cause())),
            () = cancel.cancelled() => Err(LoginError::Cancelled),
        }
    }

    /// Subscribe to `arg` and deliver every frame routed to it to `handler`.
    ///
    /// Blocks until `cancel` fires (returns `Ok`) or the physical connection
    /// dies (returns `StreamError::ConnectionLost`). On every exit path,
    /// including the future being dropped, the handler is removed and an
    /// unsubscribe directive is attempted. A later subscription to the same
    /// topic replaces this handler; this call's cleanup then leaves it alone.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting, logging in or sending the directive
    /// fails, or if the connection dies while the subscription is live.
    pub async fn subscribe<F>(
        &self,
        cancel: &CancellationToken,
        arg: Arg,
        handler: F,
    ) -> Result<(), StreamError>
    where
        F: Fn(&InboundFrame) + Send + Sync + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let connection = tokio::select! {
            () = cancel.cancelled() => return Err(StreamError::Cancelled),
            result = self.inner.guard.ensure_connected() => result?,
        };

        if self.inner.service.requires_login() {
            match self.login_on(&connection, cancel).await {
                Ok(()) => {}
                Err(LoginError::Cancelled) => return Err(StreamError::Cancelled),
                Err(error) => return Err(error.into()),
            }
        }

        let key = WatchKey::topic(&arg);
        let id = self.inner.registry.register(key.clone(), Arc::new(handler));
        self.inner.update_watch_gauge();
        let _cleanup = SubscriptionCleanup {
            inner: Arc::clone(&self.inner),
            connection: Arc::clone(&connection),
            key,
            id,
            arg: arg.clone(),
        };

        self.inner
            .send_directive(&connection, &Directive::subscribe(arg))
            .await?;

        let liveness = connection.liveness();
        tokio::select! {
            () = cancel.cancelled() => Ok(()),
            () = liveness.done() => Err(StreamError::ConnectionLost(
                liveness.cause().unwrap_or(ConnectionLost::Shutdown),
            )),
        }
    }

    /// Typed [`subscribe`](Self::subscribe): decodes each frame's `data`
    /// array into `T`.
    ///
    /// Subscribe and unsubscribe acknowledgements are skipped. Frames that
    /// fail to decode are logged and dropped.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn subscribe_typed<T, F>(
        &self,
        cancel: &CancellationToken,
        arg: Arg,
        handler: F,
    ) -> Result<(), StreamError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(Push<T>) + Send + Sync + 'static,
    {
        let log = Arc::clone(&self.inner.log);
        let codec = self.inner.codec;
        let service = self.inner.service;

        self.subscribe(cancel, arg, move |frame: &InboundFrame| {
            if frame.is_subscription_ack() {
                return;
            }
            match codec.decode_push::<T>(frame) {
                Ok(push) => handler(push),
                Err(e) => {
                    let channel = frame.arg.as_ref().map_or("", |arg| arg.channel.as_str());
                    log.error(format_args!("{service}: dropping {channel} frame: {e}"));
                }
            }
        })
        .await
    }

    /// [`subscribe`](Self::subscribe) that resubscribes after recoverable
    /// failures, spacing attempts with the configured backoff.
    ///
    /// Returns `Ok` when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error, or `RetriesExhausted` once the
    /// backoff gives up.
    pub async fn subscribe_with_retry<F>(
        &self,
        cancel: &CancellationToken,
        arg: Arg,
        handler: F,
    ) -> Result<(), StreamError>
    where
        F: Fn(&InboundFrame) + Send + Sync + 'static,
    {
        let handler: FrameHandler = Arc::new(handler);
        let mut policy = ReconnectPolicy::new(self.inner.reconnect.clone());

        loop {
            let attempt = Arc::clone(&handler);
            let error = match self
                .subscribe(cancel, arg.clone(), move |frame| attempt(frame))
                .await
            {
                Ok(()) | Err(StreamError::Cancelled) => return Ok(()),
                Err(error) if error.is_recoverable() => error,
                Err(error) => return Err(error),
            };

            if matches!(error, StreamError::ConnectionLost(_)) {
                policy.reset();
            }
            let Some(delay) = policy.next_delay() else {
                return Err(StreamError::RetriesExhausted {
                    attempts: policy.attempts(),
                    last: Box::new(error),
                });
            };

            self.inner.log.warn(format_args!(
                "{}: {} subscription interrupted ({error}), retrying in {delay:?}",
                self.inner.service,
                arg.key()
            ));
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Send an unsubscribe directive without touching the registry.
    ///
    /// # Errors
    ///
    /// Returns `SendError::NotConnected` if there is no live connection, or
    /// the write error.
    pub async fn unsubscribe(&self, arg: &Arg) -> Result<(), SendError> {
        let connection = self.inner.guard.live().ok_or(SendError::NotConnected)?;
        self.inner
            .send_directive(&connection, &Directive::unsubscribe(arg.clone()))
            .await
    }

    /// Close the current physical connection. Live subscriptions return
    /// `ConnectionLost`; the next call dials a replacement.
    ///
    /// Returns `true` if a live connection was closed.
    pub fn disconnect(&self) -> bool {
        self.inner.guard.disconnect(ConnectionLost::Shutdown)
    }

    /// Lifecycle state of the logical connection.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.guard.state()
    }

    /// Whether the current connection has logged in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .guard
            .live()
            .is_some_and(|connection| self.inner.session.is_authenticated_on(connection.id()))
    }

    /// Whether a handler is registered for `arg`.
    #[must_use]
    pub fn is_watching(&self, arg: &Arg) -> bool {
        self.inner.registry.contains(&WatchKey::topic(arg))
    }

    /// Number of registered handlers, including an in-flight login.
    #[must_use]
    pub fn active_watches(&self) -> usize {
        self.inner.registry.len()
    }

    /// Physical connections established so far.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.inner.guard.connects()
    }
}

// =============================================================================
// Scoped Registrations
// =============================================================================

/// Registry entry removed when dropped, unless something replaced it.
struct Registration<'a> {
    registry: &'a DispatchRegistry,
    key: WatchKey,
    id: RegistrationId,
}

impl<'a> Registration<'a> {
    fn new(registry: &'a DispatchRegistry, key: WatchKey, handler: FrameHandler) -> Self {
        let id = registry.register(key.clone(), handler);
        Self { registry, key, id }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister_if(&self.key, self.id);
    }
}

/// Removes a subscription's handler and unsubscribes on every exit path.
struct SubscriptionCleanup {
    inner: Arc<Inner>,
    connection: Arc<Connection>,
    key: WatchKey,
    id: RegistrationId,
    arg: Arg,
}

impl Drop for SubscriptionCleanup {
    fn drop(&mut self) {
        if !self.inner.registry.unregister_if(&self.key, self.id) {
            return;
        }
        self.inner.update_watch_gauge();

        if !self.connection.is_alive() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        let connection = Arc::clone(&self.connection);
        let directive = Directive::unsubscribe(self.arg.clone());
        runtime.spawn(async move {
            if let Err(e) = inner.send_directive(&connection, &directive).await {
                inner
                    .log
                    .debug(format_args!("{}: unsubscribe not sent: {e}", inner.service));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::application::ports::{MockKeySigner, NoopLogger, SignError};

    fn offline_client() -> StreamClient {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        StreamClient::builder(ClientConfig::new(
            format!("ws://127.0.0.1:{port}/ws/v5/public"),
            ServiceKind::Public,
        ))
        .logger(Arc::new(NoopLogger))
        .build()
    }

    #[test]
    fn recoverable_errors() {
        assert!(StreamError::ConnectionLost(ConnectionLost::ClosedByPeer).is_recoverable());
        assert!(StreamError::Connect(ConnectError::Timeout(std::time::Duration::from_secs(1))).is_recoverable());
        assert!(!StreamError::Cancelled.is_recoverable());
        assert!(
            !StreamError::Login(LoginError::Rejected {
                code: "60009".to_string(),
                msg: "Login failed.".to_string()
            })
            .is_recoverable()
        );
        assert!(!StreamError::Send(SendError::Encode("bad".to_string())).is_recoverable());
    }

    #[tokio::test]
    async fn new_client_is_idle() {
        let client = offline_client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_authenticated());
        assert_eq!(client.active_watches(), 0);
        assert_eq!(client.connects(), 0);
        assert!(!client.disconnect());
    }

    #[tokio::test]
    async fn unsubscribe_without_connection() {
        let client = offline_client();
        let err = client
            .unsubscribe(&Arg::instrument("trades", "BTC-USDT"))
            .await
            .unwrap_err();
        assert_eq!(err, SendError::NotConnected);
    }

    #[tokio::test]
    async fn subscribe_surfaces_connect_error_and_leaves_no_handler() {
        let client = offline_client();
        let arg = Arg::instrument("trades", "BTC-USDT");
        let err = client
            .subscribe(&CancellationToken::new(), arg.clone(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Connect(_)));
        assert!(!client.is_watching(&arg));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = offline_client();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .subscribe(&cancel, Arg::new("account"), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, StreamError::Cancelled);
        assert_eq!(client.login(&cancel).await, Err(LoginError::Cancelled));
    }

    #[tokio::test]
    async fn retry_gives_up_after_configured_attempts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = ClientConfig::new(
            format!("ws://127.0.0.1:{port}/ws/v5/public"),
            ServiceKind::Public,
        );
        config.stream.reconnect_delay_initial = std::time::Duration::from_millis(5);
        config.stream.max_reconnect_attempts = 2;
        let client = StreamClient::builder(config)
            .logger(Arc::new(NoopLogger))
            .build();

        let err = client
            .subscribe_with_retry(&CancellationToken::new(), Arg::new("tickers"), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::RetriesExhausted { attempts: 2, ref last } if matches!(**last, StreamError::Connect(_))
        ));
    }

    #[test]
    fn signer_errors_map_to_login_errors() {
        let mut signer = MockKeySigner::new();
        signer
            .expect_login_args()
            .returning(|| Err(SignError::MissingCredential("passphrase")));
        let error: LoginError = signer.login_args().map(|_: BTreeMap<String, String>| ()).unwrap_err().into();
        assert!(matches!(error, LoginError::Sign(msg) if msg.contains("passphrase")));
    }
}
