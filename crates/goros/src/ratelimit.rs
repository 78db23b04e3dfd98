use std::time::Instant;

/// Token-bucket rate limiter for inbound client messages.
///
/// Tokens accrue continuously at the sustained rate and cap at the burst
/// size; each admitted message spends one token. `allow` never blocks:
/// an empty bucket is a denial, and the caller disconnects the client.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// Creates a limiter with the given sustained rate and burst. The
    /// bucket starts full.
    #[must_use]
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let now = Instant::now();
        Self {
            rate_per_sec,
            burst: f64::from(burst),
            tokens: f64::from(burst),
            last: now,
        }
    }

    /// Spends one token if available. Returns `false` when the bucket is
    /// empty.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.burst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn burst_is_admitted_then_denied() {
        let mut limiter = RateLimiter::new(10.0, 3);
        let now = Instant::now();
        assert!(limiter.allow_at(now));
        assert!(limiter.allow_at(now));
        assert!(limiter.allow_at(now));
        assert!(!limiter.allow_at(now));
    }

    #[test]
    fn tokens_refill_at_sustained_rate() {
        let mut limiter = RateLimiter::new(10.0, 1);
        let start = Instant::now();
        assert!(limiter.allow_at(start));
        assert!(!limiter.allow_at(start));

        // 100ms at 10/s accrues exactly one token.
        assert!(limiter.allow_at(start + Duration::from_millis(100)));
        assert!(!limiter.allow_at(start + Duration::from_millis(100)));
    }

    #[test]
    fn bucket_caps_at_burst() {
        let mut limiter = RateLimiter::new(100.0, 2);
        let start = Instant::now();
        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start));

        // A long idle period must not bank more than the burst.
        let later = start + Duration::from_secs(60);
        assert!(limiter.allow_at(later));
        assert!(limiter.allow_at(later));
        assert!(!limiter.allow_at(later));
    }

    #[test]
    fn fractional_rates_accumulate() {
        let mut limiter = RateLimiter::new(0.5, 1);
        let start = Instant::now();
        assert!(limiter.allow_at(start));
        assert!(!limiter.allow_at(start + Duration::from_secs(1)));
        assert!(limiter.allow_at(start + Duration::from_secs(2)));
    }

    #[test]
    fn non_monotonic_clock_does_not_panic() {
        let mut limiter = RateLimiter::new(10.0, 1);
        let start = Instant::now();
        assert!(limiter.allow_at(start + Duration::from_secs(1)));
        // An earlier instant after a later one saturates to zero elapsed.
        assert!(!limiter.allow_at(start));
    }
}
