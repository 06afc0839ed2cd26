// Exponential reconnect delay with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay policy for stream reconnects: `base * 2^(attempt-1)`, capped at
/// `max`, then randomized by `±jitter` of itself and clamped back into
/// `[0, max]`. `reset()` is called once a connection opens.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Un-jittered delay for a 1-based attempt number.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Advance to the next attempt and return its jittered delay.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.base_delay(self.attempt);
        if self.jitter == 0.0 {
            return delay;
        }

        let secs = delay.as_secs_f64();
        let spread = secs * self.jitter;
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((secs + offset).max(0.0)).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn doubles_until_cap() {
        let mut backoff = Backoff::new(ms(100), ms(1_000), 0.0);
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![ms(100), ms(200), ms(400), ms(800), ms(1_000), ms(1_000)]
        );
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(ms(50), ms(10_000), 0.0);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), ms(50));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(ms(1_000), ms(60_000), 0.25);
        for attempt in 1..=8 {
            let nominal = backoff.base_delay(attempt).as_secs_f64();
            let actual = backoff.next_delay().as_secs_f64();
            assert!(
                actual >= nominal * 0.75 - 1e-9 && actual <= (nominal * 1.25).min(60.0) + 1e-9,
                "attempt {attempt}: {actual} outside ±25% of {nominal}"
            );
        }
    }

    #[test]
    fn jittered_delay_never_exceeds_cap() {
        let mut backoff = Backoff::new(ms(500), ms(500), 1.0);
        for _ in 0..50 {
            assert!(backoff.next_delay() <= ms(500));
        }
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let backoff = Backoff::new(ms(1), Duration::from_secs(3600), 0.0);
        assert_eq!(backoff.base_delay(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn max_below_base_is_raised_to_base() {
        let mut backoff = Backoff::new(ms(300), ms(100), 0.0);
        assert_eq!(backoff.next_delay(), ms(300));
        assert_eq!(backoff.next_delay(), ms(300));
    }
}
