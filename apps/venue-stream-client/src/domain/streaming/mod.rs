//! Streaming Session Types
//!
//! Connection lifecycle and service classification for the venue feed.
//! These types carry no I/O and are shared by the transport, the
//! connection guard and the health endpoint.

use std::fmt;

use serde::Serialize;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the physical connection.
///
/// ```text
/// Disconnected ──► Connecting ──► Alive ──► Closing ──► Disconnected
///       ▲               │                                   │
///       └───────────────┴───────────────────────────────────┘
/// ```
///
/// Only `Alive` permits sends. Any other state makes the next caller of
/// `ensure_connected` dial a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection, or the last one has died.
    #[default]
    Disconnected,
    /// A dial is in flight.
    Connecting,
    /// Connected and passing heartbeats.
    Alive,
    /// Shutting down after an error or an explicit close.
    Closing,
}

impl ConnectionState {
    /// Check whether sends are permitted.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Alive)
    }

    /// Encode as a byte for atomic storage.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Alive => 2,
            Self::Closing => 3,
        }
    }

    /// Decode from atomic storage. Unknown values read as `Disconnected`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Alive,
            3 => Self::Closing,
            _ => Self::Disconnected,
        }
    }

    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Alive => "alive",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Service Kind
// =============================================================================

/// Which of the venue's WebSocket services a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Public market data (tickers, trades, books).
    #[default]
    Public,
    /// Account, position and order pushes. Requires login.
    Private,
    /// Candles and other business-line channels.
    Business,
}

impl ServiceKind {
    /// Parse a service kind from a string, defaulting to `Public`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "private" => Self::Private,
            "business" => Self::Business,
            _ => Self::Public,
        }
    }

    /// Whether every subscription on this service needs an authenticated session.
    #[must_use]
    pub const fn requires_login(self) -> bool {
        matches!(self, Self::Private)
    }

    /// URL path segment of this service.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Business => "business",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
