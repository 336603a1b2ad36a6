use rand::Rng;
use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay before reconnect attempt `attempt` (0-based)
///
/// `initial * multiplier^attempt`, capped at `max`, then scaled by
/// `1 + jitter_sample` where `jitter_sample` lies in `[-jitter, jitter]`.
/// The jittered result never exceeds `max`.
pub fn backoff_delay(
    attempt: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter_sample: f64,
) -> Duration {
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let base_secs = initial.as_secs_f64() * multiplier.powi(exponent);
    let capped_secs = base_secs.min(max.as_secs_f64());
    let jittered_secs = (capped_secs * (1.0 + jitter_sample)).min(max.as_secs_f64());
    Duration::from_secs_f64(jittered_secs.max(0.0))
}

/// Stateful backoff over consecutive failures
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Backoff { config, attempt: 0 }
    }

    /// Delay for the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let jitter = self.config.jitter;
        let sample = if jitter > 0.0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        let delay = backoff_delay(
            self.attempt,
            self.config.initial_delay(),
            self.config.max_delay(),
            self.config.multiplier,
            sample,
        );
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// True once `max_attempts` consecutive failures have been spent
    pub fn exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let initial = Duration::from_millis(500);
        let max = Duration::from_secs(4);

        let delays: Vec<_> = (0..6)
            .map(|attempt| backoff_delay(attempt, initial, max, 2.0, 0.0))
            .collect();

        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[1], Duration::from_secs(1));
        assert_eq!(delays[2], Duration::from_secs(2));
        assert_eq!(delays[3], Duration::from_secs(4));
        assert_eq!(delays[5], Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = ReconnectConfig {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 0,
        };
        let mut backoff = Backoff::new(config);
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1_200));
        }
    }

    #[test]
    fn test_exhaustion() {
        let config = ReconnectConfig {
            max_attempts: 2,
            jitter: 0.0,
            ..Default::default()
        };
        let mut backoff = Backoff::new(config);
        assert!(!backoff.exhausted());
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.exhausted());
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
    }
}
