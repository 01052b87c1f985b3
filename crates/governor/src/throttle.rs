//! Per-type and per-category submission throttles.
//!
//! Uses a token bucket per configured payload type and per configured
//! category. A submission needs a token from every bucket that applies to
//! it; tokens are only taken when all of them have one.

use crate::config::{RateLimit, ThrottleConfig};
use dashmap::DashMap;
use replaygate_types::{PayloadCategory, PayloadType};
use std::time::Instant;

/// Token bucket state for one throttle.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current number of tokens available.
    tokens: f64,
    /// Maximum tokens (bucket capacity).
    capacity: f64,
    /// Tokens added per second.
    refill_rate: f64,
    /// Last time we updated the bucket.
    last_update: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(limit: RateLimit, now: Instant) -> Self {
        Self {
            tokens: limit.burst as f64,
            capacity: limit.burst as f64,
            refill_rate: limit.per_sec as f64,
            last_update: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;
    }

    /// Whether a token is available at `now`.
    pub fn has_token(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= 1.0
    }

    /// Try to consume one token. Returns true if allowed, false if rate limited.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        if self.has_token(now) {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently in the bucket.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Which throttle refused a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleScope {
    Type(PayloadType),
    Category(PayloadCategory),
}

/// Buckets for every configured throttle.
#[derive(Debug)]
pub struct ThrottleSet {
    per_type: DashMap<PayloadType, TokenBucket>,
    per_category: DashMap<PayloadCategory, TokenBucket>,
}

impl ThrottleSet {
    /// Build full buckets for every configured limit.
    pub fn new(config: &ThrottleConfig, now: Instant) -> Self {
        Self {
            per_type: config
                .per_type
                .iter()
                .map(|(t, l)| (*t, TokenBucket::new(*l, now)))
                .collect(),
            per_category: config
                .per_category
                .iter()
                .map(|(c, l)| (*c, TokenBucket::new(*l, now)))
                .collect(),
        }
    }

    /// Take a token for `payload_type` from every applicable bucket.
    ///
    /// Returns the first scope without a token; in that case nothing is
    /// consumed.
    pub fn check(&self, payload_type: PayloadType, now: Instant) -> Result<(), ThrottleScope> {
        let category = payload_type.category();
        let mut type_bucket = self.per_type.get_mut(&payload_type);
        let mut category_bucket = self.per_category.get_mut(&category);

        if let Some(bucket) = type_bucket.as_mut() {
            if !bucket.has_token(now) {
                return Err(ThrottleScope::Type(payload_type));
            }
        }
        if let Some(bucket) = category_bucket.as_mut() {
            if !bucket.has_token(now) {
                return Err(ThrottleScope::Category(category));
            }
        }

        if let Some(bucket) = type_bucket.as_mut() {
            bucket.try_consume(now);
        }
        if let Some(bucket) = category_bucket.as_mut() {
            bucket.try_consume(now);
        }
        Ok(())
    }

    /// Check if no throttle is configured.
    pub fn is_empty(&self) -> bool {
        self.per_type.is_empty() && self.per_category.is_empty()
    }
}
