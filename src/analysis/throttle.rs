//! Minimum spacing between LLM calls, backed by `governor`

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Cooperative in-process rate limiter
pub struct Throttle {
    limiter: Option<DefaultDirectRateLimiter>,
    interval: Duration,
}

impl Throttle {
    /// Spread calls evenly over the minute; zero disables throttling.
    ///
    /// The burst is one call, so consecutive calls are always spaced by
    /// `60s / requests_per_minute`.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        match NonZeroU32::new(requests_per_minute) {
            Some(rate) => {
                let quota = Quota::per_minute(rate).allow_burst(NonZeroU32::MIN);
                Self {
                    limiter: Some(RateLimiter::direct(quota)),
                    interval: quota.replenish_interval(),
                }
            }
            None => Self {
                limiter: None,
                interval: Duration::ZERO,
            },
        }
    }

    /// Spacing between consecutive calls
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next call is allowed
    pub async fn wait(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        if limiter.check().is_err() {
            tracing::debug!(interval_ms = self.interval.as_millis() as u64, "Throttling LLM call");
            limiter.until_ready().await;
        }
    }
}
