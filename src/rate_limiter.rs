use std::net::Ipv4Addr;
use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::debug;

/// Which limit a packet is charged against: every inbound DNS query, or
/// only the refused ones headed for the forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateClass {
    All,
    Fwd,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Queries per second per source IP across all traffic; 0 disables.
    pub all_per_second: u32,
    /// Refused-query (forwarded) budget per second per source IP; 0 disables.
    pub fwd_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            all_per_second: 0,
            fwd_per_second: 0,
        }
    }
}

/// Per-source token buckets for the packet pipeline. Each pipeline CPU owns
/// one instance, so the maps never see cross-CPU contention.
pub struct SourceRateLimiter {
    config: RateLimitConfig,
    all: DashMap<Ipv4Addr, DefaultDirectRateLimiter>,
    fwd: DashMap<Ipv4Addr, DefaultDirectRateLimiter>,
}

impl SourceRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            all: DashMap::new(),
            fwd: DashMap::new(),
        }
    }

    /// True if the packet is admitted, false if it must be dropped.
    pub fn check(&self, src: Ipv4Addr, class: RateClass) -> bool {
        let (per_second, map) = match class {
            RateClass::All => (self.config.all_per_second, &self.all),
            RateClass::Fwd => (self.config.fwd_per_second, &self.fwd),
        };
        let Some(per_second) = NonZeroU32::new(per_second) else {
            return true;
        };

        if !map.contains_key(&src) {
            map.insert(src, RateLimiter::direct(Quota::per_second(per_second)));
        }
        let limiter = match map.get(&src) {
            Some(l) => l,
            None => return true,
        };
        match limiter.check() {
            Ok(_) => true,
            Err(_) => {
                debug!(%src, ?class, "rate limit exceeded");
                false
            }
        }
    }

    pub fn tracked_sources(&self) -> usize {
        self.all.len() + self.fwd.len()
    }
}
