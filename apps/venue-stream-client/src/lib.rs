#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Venue Stream Client - Multiplexed WebSocket Session
//!
//! Maintains one logical, self-healing WebSocket connection per venue
//! service and multiplexes any number of topic subscriptions over it.
//! Private services log in once per physical connection before the first
//! subscription.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Connection state and service kinds
//!   - `subscription`: Subscription arguments, topic keys, watch keys
//!
//! - **Application**: Port definitions
//!   - `ports`: Key signer, logger and read monitor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `ws`: WebSocket transport, heartbeat, proxy, backoff
//!   - `okx`: Wire types, codec, login signing, typed channels
//!   - `stream`: Connection guard, session, dispatch registry, client
//!   - `config`, `metrics`, `telemetry`, `health`: Ambient services
//!
//! # Data Flow
//!
//! ```text
//!              subscribe(arg, handler)
//! caller ─────────────────────────────► StreamClient ──► directive ──► venue
//!                                          │
//! venue ──► Connection ──► FrameRouter ──► DispatchRegistry ──► handler
//!           (reader)       (parse)         (topic + event)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use venue_stream_client::{Arg, ClientConfig, ServiceKind, StreamClient};
//!
//! # async fn run() -> Result<(), venue_stream_client::StreamError> {
//! let client = StreamClient::new(ClientConfig::new(
//!     "wss://ws.okx.com:8443/ws/v5/public",
//!     ServiceKind::Public,
//! ));
//! let cancel = CancellationToken::new();
//! client
//!     .subscribe(&cancel, Arg::instrument("tickers", "BTC-USDT"), |frame| {
//!         println!("{:?}", frame.arg);
//!     })
//!     .await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{ConnectionState, ServiceKind};
pub use domain::subscription::{Arg, TopicKey, WatchKey};

// Ports
pub use application::ports::{
    KeySigner, LogLevel, Logger, NoopLogger, ReadMonitor, SharedLogger, SignError, TracingLogger,
};

// Stream client
pub use infrastructure::stream::{LoginError, StreamClient, StreamClientBuilder, StreamError};

// Transport
pub use infrastructure::ws::{
    ConnectError, ConnectOptions, ConnectionLost, HeartbeatConfig, KeepAlive, ProxyConfig,
    ReconnectConfig, ReconnectPolicy, SendError,
};

// Wire types
pub use infrastructure::okx::{InboundFrame, OkxCredentials, Push};

// Configuration
pub use infrastructure::config::{
    ClientConfig, ConfigError, Environment, ServerSettings, StreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
