//! Heartbeat Manager
//!
//! Keeps the physical connection honest with application-level ping/pong.
//! The venue expects the literal text `ping` and answers with the literal
//! text `pong`; protocol-level ping frames are not used.
//!
//! Every tick the manager checks whether the previous probe was answered.
//! If it was not, it reports a timeout and stops; otherwise it asks for a
//! new probe to be sent.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Predicate deciding whether an inbound payload answers the probe.
pub type PongMatcher = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Probe payload plus the predicate recognising its answer.
#[derive(Clone)]
pub struct KeepAlive {
    probe: Vec<u8>,
    is_pong: PongMatcher,
}

impl KeepAlive {
    /// Create a keep-alive from a probe and a response predicate.
    #[must_use]
    pub fn new(probe: impl Into<Vec<u8>>, is_pong: PongMatcher) -> Self {
        Self {
            probe: probe.into(),
            is_pong,
        }
    }

    /// Keep-alive that sends `probe` and expects exactly `pong` back.
    #[must_use]
    pub fn literal(probe: &str, pong: &str) -> Self {
        let expected = pong.as_bytes().to_vec();
        Self::new(probe, Arc::new(move |data: &[u8]| data == expected.as_slice()))
    }

    /// Bytes sent on every tick.
    #[must_use]
    pub fn probe(&self) -> &[u8] {
        &self.probe
    }

    /// Whether `data` answers the probe.
    #[must_use]
    pub fn is_pong(&self, data: &[u8]) -> bool {
        (self.is_pong)(data)
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::literal("ping", "pong")
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("probe", &String::from_utf8_lossy(&self.probe))
            .finish_non_exhaustive()
    }
}

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between probes. A probe unanswered by the next tick is a timeout.
    pub ping_interval: Duration,
    /// Probe payload and expected answer.
    pub keep_alive: KeepAlive,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        // The venue drops connections idle for 30 seconds.
        Self {
            ping_interval: Duration::from_secs(20),
            keep_alive: KeepAlive::default(),
        }
    }
}

impl HeartbeatConfig {
    /// Create a configuration with the default `ping`/`pong` pair.
    #[must_use]
    pub fn new(ping_interval: Duration) -> Self {
        Self {
            ping_interval,
            keep_alive: KeepAlive::default(),
        }
    }

    /// Replace the probe/answer pair.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send the probe now.
    SendPing,
    /// The previous probe went unanswered for this long.
    Timeout(Duration),
}

/// State shared between the heartbeat manager and the socket reader.
#[derive(Debug)]
pub struct HeartbeatState {
    last_pong: RwLock<Instant>,
    waiting_for_pong: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_pong: RwLock::new(Instant::now()),
            waiting_for_pong: AtomicBool::new(false),
        }
    }

    /// Record that the probe was answered.
    pub fn record_pong(&self) {
        *self.last_pong.write() = Instant::now();
        self.waiting_for_pong.store(false, Ordering::SeqCst);
    }

    /// Mark that a probe is outstanding.
    pub fn mark_ping_sent(&self) {
        self.waiting_for_pong.store(true, Ordering::SeqCst);
    }

    /// Check whether a probe is outstanding.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }

    /// Time since the last answered probe.
    #[must_use]
    pub fn time_since_pong(&self) -> Duration {
        self.last_pong.read().elapsed()
    }
}

/// Heartbeat manager that monitors connection health.
///
/// Runs until `cancel` fires, the event receiver is dropped, or a timeout
/// is reported.
pub struct HeartbeatManager {
    interval: Duration,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        interval: Duration,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            interval,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the heartbeat loop.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `Err(())` when the loop should exit.
    async fn check_and_ping(&self) -> Result<(), ()> {
        if self.state.is_waiting_for_pong() {
            let _ = self
                .event_tx
                .send(HeartbeatEvent::Timeout(self.state.time_since_pong()))
                .await;
            return Err(());
        }

        self.state.mark_ping_sent();
        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            return Err(());
        }

        Ok(())
    }
}
