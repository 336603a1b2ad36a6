use std::time::Duration;
use tokio::time::Instant;

/// Continuously refilling token bucket
///
/// Capacity bounds bursts; tokens accrue at `refill_rate` per second.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    pub(crate) fn new(capacity: u32, refill_per_second: f64) -> Self {
        TokenBucket {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_rate: refill_per_second,
            last_update: Instant::now(),
        }
    }

    /// Take `amount` tokens if present, otherwise report how long until they are
    pub(crate) fn try_consume(&mut self, amount: u32, now: Instant) -> (bool, Duration) {
        self.refill(now);

        let amount = amount as f64;
        if self.tokens >= amount {
            self.tokens -= amount;
            (true, Duration::ZERO)
        } else {
            let deficit = amount - self.tokens;
            (false, Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }

    pub(crate) fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        self.last_update = now;
    }

    pub(crate) fn tokens(&self) -> f64 {
        self.tokens
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reports_wait_for_deficit() {
        let mut bucket = TokenBucket::new(4, 2.0);
        let now = Instant::now();

        assert_eq!(bucket.try_consume(4, now), (true, Duration::ZERO));
        let (ok, wait) = bucket.try_consume(1, now);
        assert!(!ok);
        assert_eq!(wait, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let mut bucket = TokenBucket::new(3, 10.0);
        let now = Instant::now();
        bucket.try_consume(3, now);

        bucket.refill(now + Duration::from_secs(60));
        assert_eq!(bucket.tokens(), 3.0);
    }
}
