//! Prometheus Metrics Module
//!
//! Exposes stream client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by channel, malformed frames dropped
//! - **Directives**: Outbound login/subscribe/unsubscribe by op
//! - **Connections**: Dials, dial failures, heartbeat timeouts
//! - **Watches**: Registered handlers
//! - **Latency**: Time spent dispatching one frame
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before `init_metrics` is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ServiceKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let _install = INSTALL_LOCK.lock();
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "venue_stream_frames_received_total",
        "Total frames received from the venue by channel"
    );
    describe_counter!(
        "venue_stream_frames_malformed_total",
        "Total inbound frames dropped because they failed to parse"
    );
    describe_counter!(
        "venue_stream_directives_sent_total",
        "Total directives written to the venue by op"
    );

    describe_counter!(
        "venue_stream_connects_total",
        "Total physical connections established"
    );
    describe_counter!(
        "venue_stream_connect_failures_total",
        "Total failed dial attempts"
    );
    describe_counter!(
        "venue_stream_heartbeat_timeouts_total",
        "Total connections closed for an unanswered ping"
    );

    describe_gauge!(
        "venue_stream_active_watches",
        "Number of registered frame handlers"
    );

    describe_histogram!(
        "venue_stream_dispatch_seconds",
        "Time to parse and dispatch one inbound frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one parsed inbound frame.
pub fn record_frame_received(service: ServiceKind, channel: &str) {
    let channel = if channel.is_empty() { "none" } else { channel };
    counter!(
        "venue_stream_frames_received_total",
        "service" => service.as_str(),
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record a frame dropped because it failed to parse.
pub fn record_frame_malformed(service: ServiceKind) {
    counter!(
        "venue_stream_frames_malformed_total",
        "service" => service.as_str()
    )
    .increment(1);
}

/// Record a directive written to the venue.
pub fn record_directive_sent(service: ServiceKind, op: &'static str) {
    counter!(
        "venue_stream_directives_sent_total",
        "service" => service.as_str(),
        "op" => op
    )
    .increment(1);
}

/// Record a successful dial.
pub fn record_connect(service: ServiceKind) {
    counter!(
        "venue_stream_connects_total",
        "service" => service.as_str()
    )
    .increment(1);
}

/// Record a failed dial.
pub fn record_connect_failure(service: ServiceKind) {
    counter!(
        "venue_stream_connect_failures_total",
        "service" => service.as_str()
    )
    .increment(1);
}

/// Record a connection closed by the heartbeat.
pub fn record_heartbeat_timeout() {
    counter!("venue_stream_heartbeat_timeouts_total").increment(1);
}

/// Update the registered handler count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_watches(service: ServiceKind, count: usize) {
    gauge!(
        "venue_stream_active_watches",
        "service" => service.as_str()
    )
    .set(count as f64);
}

/// Record frame dispatch duration.
pub fn record_dispatch_duration(service: ServiceKind, duration: Duration) {
    histogram!(
        "venue_stream_dispatch_seconds",
        "service" => service.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_never_panics() {
        record_frame_received(ServiceKind::Public, "");
        record_frame_malformed(ServiceKind::Public);
        record_directive_sent(ServiceKind::Private, "login");
        record_heartbeat_timeout();
        set_active_watches(ServiceKind::Business, 3);
        record_dispatch_duration(ServiceKind::Public, Duration::from_micros(40));
    }

    #[test]
    fn init_is_idempotent() {
        let first = init_metrics().unwrap();
        record_connect(ServiceKind::Public);
        let second = init_metrics().unwrap();
        assert!(second.render().contains("venue_stream_connects_total"));
        drop(first);
    }
}
