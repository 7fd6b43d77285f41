//! Fixed-pace rate limiting for external lookups.
//!
//! One permit per pause, no burst, no backoff. The limiter is shared by every
//! lookup worker, so the aggregate call rate stays at one call per pause no
//! matter how many workers run.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

pub struct Pacer {
    pause: Duration,
    limiter: Option<DefaultDirectRateLimiter>,
    clock: DefaultClock,
}

impl Pacer {
    /// A zero pause disables pacing.
    pub fn new(pause: Duration) -> Self {
        let limiter = Quota::with_period(pause)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            pause,
            limiter,
            clock: DefaultClock::default(),
        }
    }

    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }

    /// Block until the next call is allowed.
    pub fn wait_turn(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        while let Err(not_until) = limiter.check() {
            std::thread::sleep(not_until.wait_time_from(self.clock.now()));
        }
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer").field("pause", &self.pause).finish()
    }
}
