//! Step pacing

use std::num::NonZeroU32;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Caps how many steps per second the episode loop submits
pub struct StepLimiter {
    limiter: Limiter,
    steps_per_second: NonZeroU32,
}

impl StepLimiter {
    pub fn new(steps_per_second: NonZeroU32) -> Self {
        // Burst of one keeps steps evenly spaced
        let quota = Quota::per_second(steps_per_second).allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(quota),
            steps_per_second,
        }
    }

    pub fn steps_per_second(&self) -> NonZeroU32 {
        self.steps_per_second
    }

    /// Wait until the next step is allowed
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}
