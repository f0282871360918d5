//! Resubscription Backoff
//!
//! Exponential backoff with jitter used by supervised subscriptions when
//! the physical connection dies underneath them. The connection guard
//! itself never retries: it dials lazily on next use, and this policy only
//! spaces out those uses.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Fractional randomization applied to each delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed before giving up. Zero means unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Build from the stream settings loaded at startup.
    #[must_use]
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_attempts: settings.max_reconnect_attempts,
            ..Self::default()
        }
    }

    /// Backoff without randomization, for deterministic schedules.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Stateful backoff schedule.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Start a fresh schedule.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            current_delay,
            attempts: 0,
        }
    }

    /// Delay before the next retry, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts += 1;

        let delay = self.jittered(self.current_delay);
        let grown = self.current_delay.as_secs_f64() * self.config.multiplier.max(1.0);
        self.current_delay = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);

        Some(delay)
    }

    /// Restart the schedule after a healthy session.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Retries consumed so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 {
            return delay;
        }

        let spread = rand::rng().random_range(-factor..=factor);
        delay.mul_f64((1.0 + spread).max(0.0)).max(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(initial_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(
            ReconnectConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
                multiplier,
                jitter_factor: 0.0,
                max_attempts,
            }
            .without_jitter(),
        )
    }

    #[test]
    fn delays_grow_geometrically() {
        let mut policy = fixed(100, 10_000, 2.0, 0);
        let delays: Vec<_> = (0..4).filter_map(|_| policy.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn delays_are_capped() {
        let mut policy = fixed(1_000, 2_000, 4.0, 0);
        let _ = policy.next_delay();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2_000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2_000)));
    }

    #[test]
    fn attempts_are_bounded() {
        let mut policy = fixed(10, 100, 2.0, 2);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.next_delay(), None);
        assert!(!policy.should_retry());

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn jitter_stays_in_band() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1_000),
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1_100).contains(&millis), "delay {millis}ms out of band");
        }
    }

    #[test]
    fn sub_unit_multiplier_never_shrinks() {
        let mut policy = fixed(100, 1_000, 0.5, 0);
        let _ = policy.next_delay();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }
}
