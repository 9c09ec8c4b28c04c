//! Tick-driven timers.
//!
//! The client owns no clock: the host calls `tick()` at a fixed rate and
//! every deadline is counted in ticks. Retransmission timers back off
//! exponentially with full jitter so that a cluster recovering from a view
//! change is not stampeded by every waiting client at once.

use rand::Rng;

/// Cap on the backoff exponent so the deadline cannot overflow or grow
/// past any useful bound.
const BACKOFF_EXPONENT_MAX: u8 = 8;

/// A deadline measured in ticks, with optional exponential backoff.
#[derive(Debug)]
pub struct Timeout {
    name: &'static str,
    after_min: u64,
    after: u64,
    ticks: u64,
    attempts: u8,
    ticking: bool,
}

impl Timeout {
    /// Create a stopped timeout that fires `after` ticks once started.
    pub fn new(name: &'static str, after: u64) -> Self {
        assert!(after > 0);
        Self {
            name,
            after_min: after,
            after,
            ticks: 0,
            attempts: 0,
            ticking: false,
        }
    }

    /// The timer's name, for log lines.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of backoffs since the timer last started.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Whether the timer is running.
    pub fn ticking(&self) -> bool {
        self.ticking
    }

    /// Advance the timer by one tick if it is running.
    pub fn tick(&mut self) {
        if self.ticking {
            assert!(self.ticks < u64::MAX);
            self.ticks += 1;
        }
    }

    /// Whether the deadline has been reached.
    pub fn fired(&self) -> bool {
        self.ticking && self.ticks >= self.after
    }

    /// Start counting from zero at the base deadline.
    pub fn start(&mut self) {
        self.ticks = 0;
        self.attempts = 0;
        self.after = self.after_min;
        self.ticking = true;
    }

    /// Stop the timer and clear its state.
    pub fn stop(&mut self) {
        self.ticks = 0;
        self.attempts = 0;
        self.after = self.after_min;
        self.ticking = false;
    }

    /// Restart the current period without resetting the deadline.
    pub fn reset(&mut self) {
        assert!(self.ticking);
        self.ticks = 0;
    }

    /// Back off exponentially with full jitter and restart the period.
    pub fn backoff<R: Rng>(&mut self, rng: &mut R) {
        assert!(self.ticking);
        self.ticks = 0;
        self.attempts = self.attempts.saturating_add(1);

        let exponent = u32::from(self.attempts.min(BACKOFF_EXPONENT_MAX));
        let ceiling = self.after_min.saturating_mul(1u64 << exponent);
        self.after = ceiling + rng.random_range(0..=self.after_min);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fires_after_deadline() {
        let mut timeout = Timeout::new("request", 3);
        assert!(!timeout.fired());

        timeout.start();
        timeout.tick();
        timeout.tick();
        assert!(!timeout.fired());
        timeout.tick();
        assert!(timeout.fired());
    }

    #[test]
    fn test_does_not_tick_while_stopped() {
        let mut timeout = Timeout::new("request", 1);
        timeout.tick();
        timeout.tick();
        assert!(!timeout.fired());
    }

    #[test]
    fn test_stop_clears_state() {
        let mut timeout = Timeout::new("request", 2);
        timeout.start();
        timeout.tick();
        timeout.tick();
        assert!(timeout.fired());

        timeout.stop();
        assert!(!timeout.fired());
        assert_eq!(timeout.attempts(), 0);
    }

    #[test]
    fn test_reset_restarts_period() {
        let mut timeout = Timeout::new("ping", 2);
        timeout.start();
        timeout.tick();
        timeout.tick();
        assert!(timeout.fired());

        timeout.reset();
        assert!(!timeout.fired());
        timeout.tick();
        timeout.tick();
        assert!(timeout.fired());
    }

    #[test]
    fn test_backoff_grows_within_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut timeout = Timeout::new("request", 10);
        timeout.start();

        let mut previous_ceiling = 10;
        for attempt in 1..=BACKOFF_EXPONENT_MAX {
            timeout.backoff(&mut rng);
            assert_eq!(timeout.attempts(), attempt);
            let ceiling = 10 * (1u64 << attempt);
            assert!(timeout.after >= ceiling);
            assert!(timeout.after <= ceiling + 10);
            assert!(ceiling > previous_ceiling);
            previous_ceiling = ceiling;
        }
    }

    #[test]
    fn test_backoff_exponent_saturates() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut timeout = Timeout::new("request", 1);
        timeout.start();

        for _ in 0..200 {
            timeout.backoff(&mut rng);
        }
        assert!(timeout.after <= (1 << BACKOFF_EXPONENT_MAX) + 1);
    }

    #[test]
    fn test_start_resets_backoff() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut timeout = Timeout::new("request", 4);
        timeout.start();
        timeout.backoff(&mut rng);
        timeout.backoff(&mut rng);
        assert!(timeout.after > 4);

        timeout.start();
        assert_eq!(timeout.attempts(), 0);
        assert_eq!(timeout.after, 4);
    }
}
