//! Per-user GCRA rate limiting for text requests.

use std::num::NonZeroU32;

use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use lily_common::BridgeError;
use lily_config::schema::RateLimitConfig;

pub type KeyedRateLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

pub struct UserRateLimiter {
    limiter: KeyedRateLimiter,
}

impl UserRateLimiter {
    /// `None` when rate limiting is switched off or configured to zero.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let rate = NonZeroU32::new(config.requests_per_second)?;
        let burst = NonZeroU32::new(config.burst).unwrap_or(rate);
        Some(Self {
            limiter: RateLimiter::keyed(Quota::per_second(rate).allow_burst(burst)),
        })
    }

    pub fn check(&self, user_id: &str) -> Result<(), BridgeError> {
        self.limiter
            .check_key(&user_id.to_string())
            .map_err(|_| BridgeError::RateLimited {
                user_id: user_id.to_string(),
            })
    }

    /// Forget users whose budget has fully recovered.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rps: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst,
        }
    }

    #[test]
    fn burst_then_limited() {
        let limiter = UserRateLimiter::from_config(&config(1, 3)).unwrap();
        for _ in 0..3 {
            assert!(limiter.check("u1").is_ok());
        }
        let err = limiter.check("u1").unwrap_err();
        assert!(matches!(err, BridgeError::RateLimited { ref user_id } if user_id == "u1"));
    }

    #[test]
    fn users_have_separate_budgets() {
        let limiter = UserRateLimiter::from_config(&config(1, 1)).unwrap();
        assert!(limiter.check("u1").is_ok());
        assert!(limiter.check("u1").is_err());
        assert!(limiter.check("u2").is_ok());
    }

    #[test]
    fn disabled_or_zero_rate_means_no_limiter() {
        let mut disabled = config(10, 20);
        disabled.enabled = false;
        assert!(UserRateLimiter::from_config(&disabled).is_none());
        assert!(UserRateLimiter::from_config(&config(0, 20)).is_none());
    }
}
