//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the transport, the OKX protocol adapter, the
//! multiplexed stream session built on them, and the ambient services
//! (configuration, metrics, tracing, health) the binary wires together.

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OKX v5 wire types, codec and login signing.
pub mod okx;

/// Connection guard, session, dispatch registry and client.
pub mod stream;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;

/// WebSocket transport, heartbeat, proxy tunnelling and backoff.
pub mod ws;
