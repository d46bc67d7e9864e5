//! # Route Rate Limiting
//!
//! Each bridge route carries two token buckets, one for value leaving the
//! ledger and one for value arriving. A bucket holds at most `capacity`
//! token units and refills at `refill_rate` units per second of ledger
//! time. A transfer either fits entirely or is refused before anything is
//! burned or minted.
//!
//! Buckets are driven by the ledger [`Clock`](crate::clock::Clock), not
//! `Instant`, so tests can reason about exact refill amounts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::default_route_limit;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rate-limit failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// Not enough tokens right now; retry later.
    #[error("rate limit exhausted: requested {requested}, available {available}, retry in {retry_after_secs}s")]
    Exhausted {
        /// Amount requested.
        requested: u64,
        /// Tokens currently in the bucket.
        available: u64,
        /// Seconds until the bucket will hold `requested`.
        retry_after_secs: u64,
    },

    /// The request can never fit, no matter how long you wait.
    #[error("request of {requested} exceeds bucket capacity {capacity}")]
    ExceedsCapacity {
        /// Amount requested.
        requested: u64,
        /// Bucket capacity.
        capacity: u64,
    },

    /// The policy itself is nonsense.
    #[error("invalid rate limit: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One direction's policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// If `false`, the bucket admits everything and tracks nothing.
    pub enabled: bool,
    /// Maximum tokens held.
    pub capacity: u64,
    /// Tokens added per second.
    pub refill_rate: u64,
}

impl RateLimitConfig {
    /// An enabled policy.
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            enabled: true,
            capacity,
            refill_rate,
        }
    }

    /// A policy that admits everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            capacity: 0,
            refill_rate: 0,
        }
    }

    /// Enabled policies need a positive capacity and may not refill
    /// faster than they can hold. Disabled policies must be all zeros so
    /// nobody mistakes a disabled route for a configured one.
    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.enabled {
            if self.capacity == 0 {
                return Err(RateLimitError::InvalidConfig(
                    "enabled bucket needs capacity > 0".into(),
                ));
            }
            if self.refill_rate > self.capacity {
                return Err(RateLimitError::InvalidConfig(format!(
                    "refill rate {} exceeds capacity {}",
                    self.refill_rate, self.capacity
                )));
            }
        } else if self.capacity != 0 || self.refill_rate != 0 {
            return Err(RateLimitError::InvalidConfig(
                "disabled bucket must have zero capacity and refill".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        default_route_limit()
    }
}

/// Both directions' policy for one (local, remote) route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Applied to `bridge_out` towards the remote ledger.
    pub outbound: RateLimitConfig,
    /// Applied to deliveries from the remote ledger.
    pub inbound: RateLimitConfig,
}

impl RouteConfig {
    /// Same policy in both directions.
    pub fn symmetric(limit: RateLimitConfig) -> Self {
        Self {
            outbound: limit,
            inbound: limit,
        }
    }

    /// No limits either way.
    pub fn unlimited() -> Self {
        Self::symmetric(RateLimitConfig::disabled())
    }

    /// Validates both directions.
    pub fn validate(&self) -> Result<(), RateLimitError> {
        self.outbound.validate()?;
        self.inbound.validate()
    }
}

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

/// A token bucket measured in token units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenBucket {
    config: RateLimitConfig,
    tokens: u64,
    last_refill: u64,
}

impl TokenBucket {
    /// A full bucket as of `now`.
    pub fn new(config: RateLimitConfig, now: u64) -> Self {
        Self {
            config,
            tokens: config.capacity,
            last_refill: now,
        }
    }

    /// Current policy.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Tokens that would be available at `now`, without consuming.
    pub fn available(&self, now: u64) -> u64 {
        if !self.config.enabled {
            return u64::MAX;
        }
        let elapsed = now.saturating_sub(self.last_refill);
        let refill = elapsed.saturating_mul(self.config.refill_rate);
        self.tokens.saturating_add(refill).min(self.config.capacity)
    }

    /// Checks whether `amount` fits at `now` without consuming.
    pub fn check(&self, amount: u64, now: u64) -> Result<(), RateLimitError> {
        if !self.config.enabled {
            return Ok(());
        }
        if amount > self.config.capacity {
            return Err(RateLimitError::ExceedsCapacity {
                requested: amount,
                capacity: self.config.capacity,
            });
        }
        let available = self.available(now);
        if amount > available {
            let missing = amount - available;
            let retry_after_secs = if self.config.refill_rate == 0 {
                u64::MAX
            } else {
                missing.div_ceil(self.config.refill_rate)
            };
            return Err(RateLimitError::Exhausted {
                requested: amount,
                available,
                retry_after_secs,
            });
        }
        Ok(())
    }

    /// Consumes `amount` tokens, or fails without touching the bucket.
    pub fn try_consume(&mut self, amount: u64, now: u64) -> Result<(), RateLimitError> {
        if !self.config.enabled {
            return Ok(());
        }
        self.check(amount, now)?;
        self.tokens = self.available(now) - amount;
        self.last_refill = now.max(self.last_refill);
        Ok(())
    }

    /// Swaps the policy. Tokens are refilled under the old policy up to
    /// `now`, then clamped to the new capacity. A freshly enabled bucket
    /// starts full.
    pub fn reconfigure(&mut self, config: RateLimitConfig, now: u64) {
        let was_enabled = self.config.enabled;
        let carried = if was_enabled {
            self.available(now)
        } else {
            config.capacity
        };
        self.config = config;
        self.tokens = carried.min(config.capacity);
        self.last_refill = now.max(self.last_refill);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bucket_starts_full() {
        let bucket = TokenBucket::new(RateLimitConfig::new(100, 10), 0);
        assert_eq!(bucket.available(0), 100);
    }

    #[test]
    fn consume_and_refill() {
        let mut bucket = TokenBucket::new(RateLimitConfig::new(100, 10), 0);
        bucket.try_consume(80, 0).unwrap();
        assert_eq!(bucket.available(0), 20);
        assert_eq!(bucket.available(3), 50);
        // Never exceeds capacity.
        assert_eq!(bucket.available(1_000), 100);
    }

    #[test]
    fn exhausted_reports_retry_after() {
        let mut bucket = TokenBucket::new(RateLimitConfig::new(100, 10), 0);
        bucket.try_consume(100, 0).unwrap();
        let err = bucket.try_consume(25, 1).unwrap_err();
        assert_eq!(
            err,
            RateLimitError::Exhausted {
                requested: 25,
                available: 10,
                retry_after_secs: 2
            }
        );
        // Failed attempt consumed nothing.
        assert_eq!(bucket.available(1), 10);
    }

    #[test]
    fn over_capacity_is_permanent() {
        let bucket = TokenBucket::new(RateLimitConfig::new(100, 10), 0);
        assert!(matches!(
            bucket.check(101, 1_000_000),
            Err(RateLimitError::ExceedsCapacity { .. })
        ));
    }

    #[test]
    fn disabled_admits_everything() {
        let mut bucket = TokenBucket::new(RateLimitConfig::disabled(), 0);
        assert!(bucket.try_consume(u64::MAX, 0).is_ok());
        assert!(bucket.try_consume(u64::MAX, 0).is_ok());
    }

    #[test]
    fn config_validation() {
        assert!(RateLimitConfig::new(100, 10).validate().is_ok());
        assert!(RateLimitConfig::new(0, 0).validate().is_err());
        assert!(RateLimitConfig::new(10, 100).validate().is_err());
        assert!(RateLimitConfig::disabled().validate().is_ok());
        let sloppy = RateLimitConfig {
            enabled: false,
            capacity: 5,
            refill_rate: 0,
        };
        assert!(sloppy.validate().is_err());
    }

    #[test]
    fn reconfigure_clamps_to_new_capacity() {
        let mut bucket = TokenBucket::new(RateLimitConfig::new(100, 10), 0);
        bucket.reconfigure(RateLimitConfig::new(40, 4), 0);
        assert_eq!(bucket.available(0), 40);
    }

    #[test]
    fn enabling_a_disabled_bucket_starts_full() {
        let mut bucket = TokenBucket::new(RateLimitConfig::disabled(), 0);
        bucket.reconfigure(RateLimitConfig::new(50, 5), 10);
        assert_eq!(bucket.available(10), 50);
    }
}
