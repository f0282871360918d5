//! Port Interfaces
//!
//! Defines the interfaces (ports) for collaborators of the stream client
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `KeySigner`: Supplies the credential payload of the login directive
//! - `Logger`: Structured logging capability injected at construction
//!
//! ## Hooks
//!
//! - `ReadMonitor`: Side-channel invoked with every inbound frame's argument

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::subscription::Arg;

// =============================================================================
// Key Signer
// =============================================================================

/// Errors raised while producing login credentials.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignError {
    /// A required credential field was not configured.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// The signing key could not be used.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// Supplies the argument map of the login directive.
///
/// The map is sent verbatim as the single element of the directive's
/// `args` array, so implementations decide field names and signature
/// scheme. Called once per login attempt; implementations that embed a
/// timestamp must compute it on every call.
#[cfg_attr(test, mockall::automock)]
pub trait KeySigner: Send + Sync {
    /// Produce a freshly signed login argument.
    ///
    /// # Errors
    ///
    /// Returns `SignError` if credentials are missing or unusable.
    fn login_args(&self) -> Result<BTreeMap<String, String>, SignError>;
}

// =============================================================================
// Logger
// =============================================================================

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal operation.
    Info,
    /// Recoverable anomaly.
    Warn,
    /// Failed operation.
    Error,
    /// Invariant violation. Logged, never unwinds.
    Panic,
}

/// Logging capability injected into the stream client.
///
/// Only `log` is required; the level methods forward to it.
pub trait Logger: Send + Sync {
    /// Record one event.
    fn log(&self, level: LogLevel, message: fmt::Arguments<'_>);

    /// Record a debug event.
    fn debug(&self, message: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, message);
    }

    /// Record an info event.
    fn info(&self, message: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, message);
    }

    /// Record a warning.
    fn warn(&self, message: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, message);
    }

    /// Record an error.
    fn error(&self, message: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, message);
    }

    /// Record an invariant violation.
    fn panic(&self, message: fmt::Arguments<'_>) {
        self.log(LogLevel::Panic, message);
    }
}

/// Shared logger handle.
pub type SharedLogger = Arc<dyn Logger>;

/// Default logger: forwards every event to `tracing`, tagged with the
/// service it belongs to.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    scope: String,
}

impl TracingLogger {
    /// Create a logger that tags events with `scope`.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    /// Create a shared handle.
    #[must_use]
    pub fn shared(scope: impl Into<String>) -> SharedLogger {
        Arc::new(Self::new(scope))
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("stream")
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: fmt::Arguments<'_>) {
        let scope = self.scope.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(scope, "{message}"),
            LogLevel::Info => tracing::info!(scope, "{message}"),
            LogLevel::Warn => tracing::warn!(scope, "{message}"),
            LogLevel::Error => tracing::error!(scope, "{message}"),
            LogLevel::Panic => tracing::error!(scope, panic = true, "{message}"),
        }
    }
}

/// Logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: fmt::Arguments<'_>) {}
}

// =============================================================================
// Read Monitor
// =============================================================================

/// Hook invoked with the argument of every parsed inbound frame.
///
/// Runs on the reader task before dispatch. Used for metrics and logging,
/// never for control flow; frames without an argument pass `None`.
pub type ReadMonitor = Arc<dyn Fn(Option<&Arg>) + Send + Sync>;

/// Read monitor that does nothing.
#[must_use]
pub fn noop_read_monitor() -> ReadMonitor {
    Arc::new(|_| {})
}
