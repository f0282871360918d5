//! WebSocket transport: one physical connection with heartbeat, optional
//! HTTP proxy tunnel, and the backoff used to space out resubscription.

pub mod connection;
pub mod heartbeat;
pub mod proxy;
pub mod reconnect;

pub use connection::{
    ConnectError, ConnectOptions, Connection, ConnectionLost, FrameKind, Liveness, RawFrame,
    SendError,
};
pub use heartbeat::{HeartbeatConfig, KeepAlive, PongMatcher};
pub use proxy::ProxyConfig;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
