//! Login Session
//!
//! Tracks which physical connection, if any, is authenticated. Storing the
//! connection ID rather than a flag makes every replacement connection start
//! unauthenticated without the guard having to reset anything.
//!
//! Login attempts are serialized by an async lock. Callers that queued
//! behind an attempt on the same connection take its outcome, so N
//! concurrent logins put one directive on the wire.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::application::ports::SignError;
use crate::infrastructure::ws::{ConnectError, ConnectionLost, SendError};

/// A login attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    /// The client was built without a key signer.
    #[error("no credentials configured")]
    NoCredentials,

    /// The signer could not produce a login argument.
    #[error("failed to sign login: {0}")]
    Sign(String),

    /// No connection could be established.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The login directive could not be written.
    #[error(transparent)]
    Send(#[from] SendError),

    /// The venue answered with a non-success status.
    #[error("login rejected ({code}): {msg}")]
    Rejected {
        /// Venue status code.
        code: String,
        /// Venue message.
        msg: String,
    },

    /// The connection died before the venue answered.
    #[error("connection lost during login: {0}")]
    ConnectionLost(ConnectionLost),

    /// The caller gave up.
    #[error("login cancelled")]
    Cancelled,
}

impl From<SignError> for LoginError {
    fn from(error: SignError) -> Self {
        Self::Sign(error.to_string())
    }
}

impl LoginError {
    /// Map the cause of a connection that died mid-login.
    ///
    /// The venue reports bad credentials with an `error` frame, which also
    /// closes the connection; that surfaces as a rejection.
    #[must_use]
    pub fn from_lost(cause: Option<ConnectionLost>) -> Self {
        match cause {
            Some(ConnectionLost::Venue { code, msg }) => Self::Rejected { code, msg },
            Some(cause) => Self::ConnectionLost(cause),
            None => Self::ConnectionLost(ConnectionLost::Shutdown),
        }
    }
}

/// Outcome of the most recent completed login attempt.
#[derive(Debug, Default)]
pub struct LoginOutcome {
    attempt: u64,
    last: Option<(Uuid, Result<(), LoginError>)>,
}

/// Exclusive right to run a login attempt.
pub struct LoginPermit<'a> {
    session: &'a Session,
    outcome: MutexGuard<'a, LoginOutcome>,
    connection: Uuid,
}

impl std::fmt::Debug for LoginPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginPermit")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl LoginPermit<'_> {
    /// Record the attempt's result and release the lock.
    ///
    /// A cancelled attempt is not shared: callers queued behind it try
    /// again themselves.
    pub fn complete(mut self, result: Result<(), LoginError>) -> Result<(), LoginError> {
        if result.is_ok() {
            *self.session.authenticated.write() = Some(self.connection);
        }
        self.outcome.last = match &result {
            Err(LoginError::Cancelled) => None,
            other => Some((self.connection, other.clone())),
        };
        self.outcome.attempt = self.session.completed.fetch_add(1, Ordering::SeqCst) + 1;
        result
    }
}

/// What a caller must do after queueing for the login lock.
#[derive(Debug)]
pub enum LoginTurn<'a> {
    /// The connection is already authenticated, or a queued-behind attempt
    /// settled the matter.
    Settled(Result<(), LoginError>),
    /// This caller must perform the login.
    Perform(LoginPermit<'a>),
}

/// Authentication state of the logical client.
#[derive(Debug, Default)]
pub struct Session {
    authenticated: RwLock<Option<Uuid>>,
    login: Mutex<LoginOutcome>,
    completed: AtomicU64,
}

impl Session {
    /// Create an unauthenticated session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `connection` has completed a successful login.
    #[must_use]
    pub fn is_authenticated_on(&self, connection: Uuid) -> bool {
        *self.authenticated.read() == Some(connection)
    }

    /// Connection the session is authenticated on, if any.
    #[must_use]
    pub fn authenticated_connection(&self) -> Option<Uuid> {
        *self.authenticated.read()
    }

    /// Queue for the login lock on `connection`.
    pub async fn begin(&self, connection: Uuid) -> LoginTurn<'_> {
        if self.is_authenticated_on(connection) {
            return LoginTurn::Settled(Ok(()));
        }

        let observed = self.completed.load(Ordering::SeqCst);
        let outcome = self.login.lock().await;

        if self.is_authenticated_on(connection) {
            return LoginTurn::Settled(Ok(()));
        }
        if outcome.attempt != observed
            && let Some((id, result)) = &outcome.last
            && *id == connection
        {
            return LoginTurn::Settled(result.clone());
        }

        LoginTurn::Perform(LoginPermit {
            session: self,
            outcome,
            connection,
        })
    }
}
