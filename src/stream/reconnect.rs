//! Reconnect delay schedule

use ::backoff::backoff::Backoff;
use ::backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;

use crate::config::StreamConfig;

/// Deterministic exponential schedule: base, base * m, base * m^2 ... capped.
/// Only a successful subscription acknowledgment resets it.
pub struct ReconnectBackoff {
    inner: ExponentialBackoff,
    max: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        let inner = ExponentialBackoffBuilder::new()
            .with_initial_interval(base)
            .with_multiplier(multiplier)
            .with_max_interval(max)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();
        Self { inner, max }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            config.backoff_multiplier,
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// Delay to wait before the next attempt; grows the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.inner.next_backoff().unwrap_or(self.max);
        // drop the sub-millisecond noise the float math can introduce
        Duration::from_millis(delay.as_millis() as u64).min(self.max)
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(backoff: &mut ReconnectBackoff, n: usize) -> Vec<u64> {
        (0..n).map(|_| backoff.next_delay().as_millis() as u64).collect()
    }

    #[test]
    fn test_schedule_caps() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(1000), 1.5, Duration::from_millis(5000));
        assert_eq!(millis(&mut backoff, 7), vec![1000, 1500, 2250, 3375, 5000, 5000, 5000]);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(1000), 1.5, Duration::from_millis(5000));
        millis(&mut backoff, 3);
        backoff.reset();
        assert_eq!(millis(&mut backoff, 2), vec![1000, 1500]);
    }

    #[test]
    fn test_from_config_defaults() {
        let mut backoff = ReconnectBackoff::from_config(&StreamConfig::default());
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1500));
    }
}
