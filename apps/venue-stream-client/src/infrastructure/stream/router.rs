//! Inbound Frame Router
//!
//! The reader loop bound to one physical connection. For every text frame
//! it parses the envelope, closes the connection on a venue `error` frame,
//! runs the read monitor, then hands the frame to the dispatch registry.
//! Frames that fail to parse are logged and dropped; the loop keeps going.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::registry::DispatchRegistry;
use crate::application::ports::{ReadMonitor, SharedLogger};
use crate::domain::streaming::ServiceKind;
use crate::infrastructure::metrics;
use crate::infrastructure::okx::codec::JsonCodec;
use crate::infrastructure::ws::{Connection, ConnectionLost, RawFrame};

/// Watch name the router registers on each connection.
pub const READER_WATCH: &str = "receive";

/// Routes parsed frames into the dispatch registry.
#[derive(Clone)]
pub struct FrameRouter {
    service: ServiceKind,
    registry: Arc<DispatchRegistry>,
    monitor: Arc<RwLock<ReadMonitor>>,
    codec: JsonCodec,
    log: SharedLogger,
}

impl FrameRouter {
    /// Create a router over `registry`.
    #[must_use]
    pub const fn new(
        service: ServiceKind,
        registry: Arc<DispatchRegistry>,
        monitor: Arc<RwLock<ReadMonitor>>,
        log: SharedLogger,
    ) -> Self {
        Self {
            service,
            registry,
            monitor,
            codec: JsonCodec::new(),
            log,
        }
    }

    /// Attach to a freshly dialed connection and start the reader loop.
    pub fn attach(&self, connection: &Arc<Connection>) {
        let frames = connection.register_watch(READER_WATCH);
        tokio::spawn(self.clone().run(Arc::clone(connection), frames));
    }

    async fn run(self, connection: Arc<Connection>, mut frames: mpsc::UnboundedReceiver<RawFrame>) {
        while let Some(raw) = frames.recv().await {
            self.route(&raw, |cause| connection.close(cause));
        }

        let cause = connection
            .liveness()
            .cause()
            .map_or_else(|| "unknown".to_string(), |cause| cause.to_string());
        self.log.info(format_args!(
            "{} reader for connection {} stopped: {cause}",
            self.service,
            connection.id()
        ));
    }

    /// Route one raw frame. `close` is called before dispatch when the frame
    /// is a venue error.
    pub fn route(&self, raw: &RawFrame, close: impl FnOnce(ConnectionLost)) {
        let started = Instant::now();

        let Some(text) = raw.as_text() else {
            self.log
                .debug(format_args!("{}: ignoring non-text frame", self.service));
            return;
        };

        let frame = match self.codec.decode(text.as_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::record_frame_malformed(self.service);
                self.log
                    .error(format_args!("{}: dropping frame: {e}, data: {text}", self.service));
                return;
            }
        };

        metrics::record_frame_received(
            self.service,
            frame.arg.as_ref().map_or("", |arg| arg.channel.as_str()),
        );

        if frame.is_error() {
            self.log.error(format_args!(
                "{}: venue error ({}): {}, data: {text}",
                self.service,
                frame.code(),
                frame.msg()
            ));
            close(ConnectionLost::Venue {
                code: frame.code().to_string(),
                msg: frame.msg().to_string(),
            });
        }

        let monitor = Arc::clone(&self.monitor.read());
        monitor(frame.arg.as_ref());

        self.registry.dispatch(&frame);
        metrics::record_dispatch_duration(self.service, started.elapsed());
    }
}
