//! Connection Guard
//!
//! Owns the current physical connection and replaces it lazily. The hot
//! path is a lock-free liveness check; only callers that find the
//! connection dead queue on the dial lock, and the first of them dials.
//!
//! Callers that queued behind an attempt take its outcome instead of
//! dialing again: the same connection on success, the same error on
//! failure. A later caller (one that arrives after the attempt finished)
//! dials afresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::application::ports::SharedLogger;
use crate::domain::streaming::{ConnectionState, ServiceKind};
use crate::infrastructure::metrics;
use crate::infrastructure::ws::{ConnectError, ConnectOptions, Connection, ConnectionLost};

/// Hook run on every new connection before its reader starts and before
/// any caller can see it.
pub type OnConnect = Box<dyn Fn(&Arc<Connection>) + Send + Sync>;

#[derive(Default)]
struct DialOutcome {
    attempt: u64,
    error: Option<ConnectError>,
}

/// Single-flight owner of the physical connection.
pub struct ConnectionGuard {
    url: String,
    service: ServiceKind,
    options: ConnectOptions,
    log: SharedLogger,
    on_connect: OnConnect,
    current: RwLock<Option<Arc<Connection>>>,
    dial: Mutex<DialOutcome>,
    completed: AtomicU64,
    dialing: AtomicBool,
    connects: AtomicU64,
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("url", &self.url)
            .field("state", &self.state())
            .field("connects", &self.connects())
            .finish_non_exhaustive()
    }
}

impl ConnectionGuard {
    /// Create a guard for `url`. Nothing is dialed until first use.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        service: ServiceKind,
        options: ConnectOptions,
        log: SharedLogger,
        on_connect: OnConnect,
    ) -> Self {
        Self {
            url: url.into(),
            service,
            options,
            log,
            on_connect,
            current: RwLock::new(None),
            dial: Mutex::new(DialOutcome::default()),
            completed: AtomicU64::new(0),
            dialing: AtomicBool::new(false),
            connects: AtomicU64::new(0),
        }
    }

    /// Return a live connection, dialing one if necessary.
    ///
    /// # Errors
    ///
    /// Returns the `ConnectError` of the dial this call took part in.
    pub async fn ensure_connected(&self) -> Result<Arc<Connection>, ConnectError> {
        if let Some(connection) = self.live() {
            return Ok(connection);
        }

        let observed = self.completed.load(Ordering::SeqCst);
        let mut outcome = self.dial.lock().await;

        if let Some(connection) = self.live() {
            return Ok(connection);
        }
        if outcome.attempt != observed
            && let Some(error) = &outcome.error
        {
            return Err(error.clone());
        }

        self.dialing.store(true, Ordering::SeqCst);
        let result = Connection::connect(
            &self.url,
            &self.options,
            Arc::clone(&self.log),
            |connection| (self.on_connect)(connection),
        )
        .await;
        self.dialing.store(false, Ordering::SeqCst);

        let result = match result {
            Ok(connection) => {
                let previous = self.current.write().replace(Arc::clone(&connection));
                if let Some(previous) = previous {
                    previous.close(ConnectionLost::Shutdown);
                }
                self.connects.fetch_add(1, Ordering::SeqCst);
                metrics::record_connect(self.service);
                outcome.error = None;
                Ok(connection)
            }
            Err(error) => {
                self.log
                    .error(format_args!("{} dial to {} failed: {error}", self.service, self.url));
                metrics::record_connect_failure(self.service);
                outcome.error = Some(error.clone());
                Err(error)
            }
        };

        outcome.attempt = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        result
    }

    /// The current connection, if it is alive. Never dials.
    #[must_use]
    pub fn live(&self) -> Option<Arc<Connection>> {
        self.current
            .read()
            .as_ref()
            .filter(|connection| connection.is_alive())
            .cloned()
    }

    /// Close the current connection, if any.
    ///
    /// Returns `true` if a live connection was closed.
    pub fn disconnect(&self, cause: ConnectionLost) -> bool {
        let current = self.current.write().take();
        current.is_some_and(|connection| {
            let alive = connection.is_alive();
            connection.close(cause);
            alive
        })
    }

    /// Lifecycle state of the logical connection.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.dialing.load(Ordering::SeqCst) {
            return ConnectionState::Connecting;
        }
        self.current
            .read()
            .as_ref()
            .map_or(ConnectionState::Disconnected, |connection| connection.state())
    }

    /// Physical connections established so far.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Endpoint this guard dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::ports::NoopLogger;

    fn unreachable_guard() -> ConnectionGuard {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        ConnectionGuard::new(
            format!("ws://127.0.0.1:{port}/ws/v5/public"),
            ServiceKind::Public,
            ConnectOptions {
                connect_timeout: Duration::from_secs(2),
                ..ConnectOptions::default()
            },
            Arc::new(NoopLogger),
            Box::new(|_| {}),
        )
    }

    #[tokio::test]
    async fn starts_disconnected_without_dialing() {
        let guard = unreachable_guard();
        assert_eq!(guard.state(), ConnectionState::Disconnected);
        assert!(guard.live().is_none());
        assert_eq!(guard.connects(), 0);
    }

    #[tokio::test]
    async fn failed_dial_is_reported_and_retried_on_next_use() {
        let guard = unreachable_guard();

        let first = guard.ensure_connected().await.unwrap_err();
        assert!(matches!(first, ConnectError::Handshake(_)));

        let second = guard.ensure_connected().await.unwrap_err();
        assert!(matches!(second, ConnectError::Handshake(_)));
        assert_eq!(guard.completed.load(Ordering::SeqCst), 2);
        assert_eq!(guard.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn queued_callers_share_a_failed_attempt() {
        let guard = Arc::new(unreachable_guard());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                tokio::spawn(async move { guard.ensure_connected().await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        assert!(guard.completed.load(Ordering::SeqCst) <= 8);
    }

    #[test]
    fn disconnect_without_connection_is_noop() {
        let guard = unreachable_guard();
        assert!(!guard.disconnect(ConnectionLost::Shutdown));
    }
}
