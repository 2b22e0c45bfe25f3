//! Per-session rate limiting for the service proxy (spec §4.8), built on
//! `governor`'s keyed rate limiter rather than a hand-rolled token bucket.

use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::{Quota, RateLimiter};

type Limiter = RateLimiter<String, governor::state::keyed::DefaultKeyedStateStore<String>, governor::clock::DefaultClock>;

pub struct ProxyRateLimiter {
    limiter: Limiter,
}

impl ProxyRateLimiter {
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute.max(1)).expect("clamped to at least 1");
        let quota = Quota::per_minute(per_minute);
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn check(&self, session_id: &str) -> bool {
        self.limiter.check_key(&session_id.to_string()).is_ok()
    }
}

/// Shared handle, cloned across proxy requests.
pub type SharedProxyRateLimiter = Arc<ProxyRateLimiter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_recovers_is_not_tested_here_but_limit_applies() {
        let limiter = ProxyRateLimiter::new(1);
        assert!(limiter.check("s1"));
        assert!(!limiter.check("s1"));
        assert!(limiter.check("s2"));
    }
}
