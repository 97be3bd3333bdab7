//! Per-provider admission control.
//!
//! Two token buckets per provider share a one-minute window: one for
//! requests, one for estimated tokens. Admission is atomic — either both
//! buckets have capacity and both are decremented, or neither is touched.
//! The limiter never queues; a denial carries the wait until the limiting
//! bucket would refill enough.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::core::ids::ProviderId;
use crate::providers::records::AIProvider;

/// Upper bound on reported retry-after, used when a bucket can never
/// satisfy the request at its configured rate.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Outcome of an admission call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Both buckets had capacity and were decremented.
    Granted,
    /// At least one bucket lacked capacity; nothing was consumed.
    Denied {
        /// Time until the limiting bucket refills enough.
        retry_after: Duration,
    },
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    available: f64,
    refill_per_sec: f64,
}

impl TokenBucket {
    fn new(per_minute: u32) -> Self {
        let capacity = f64::from(per_minute);
        Self {
            capacity,
            available: capacity,
            refill_per_sec: capacity / 60.0,
        }
    }

    fn refill(&mut self, elapsed: Duration) {
        self.available =
            (self.available + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
    }

    fn wait_for(&self, amount: f64) -> Duration {
        let shortfall = amount - self.available;
        if shortfall <= 0.0 {
            return Duration::ZERO;
        }
        if self.refill_per_sec <= 0.0 {
            return MAX_RETRY_AFTER;
        }
        Duration::from_secs_f64((shortfall / self.refill_per_sec).min(MAX_RETRY_AFTER.as_secs_f64()))
    }

    fn credit(&mut self, amount: f64) {
        self.available = (self.available + amount).min(self.capacity);
    }
}

#[derive(Debug)]
struct ProviderBuckets {
    requests: TokenBucket,
    tokens: TokenBucket,
    last_refill: Instant,
}

impl ProviderBuckets {
    fn new(provider: &AIProvider) -> Self {
        Self {
            requests: TokenBucket::new(provider.rate_limit_requests),
            tokens: TokenBucket::new(provider.rate_limit_tokens),
            last_refill: Instant::now(),
        }
    }

    fn matches(&self, provider: &AIProvider) -> bool {
        (self.requests.capacity - f64::from(provider.rate_limit_requests)).abs() < f64::EPSILON
            && (self.tokens.capacity - f64::from(provider.rate_limit_tokens)).abs() < f64::EPSILON
    }
}

/// Token-bucket rate limiter keyed by provider id.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: DashMap<ProviderId, ProviderBuckets>,
}

impl RateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to admit one request costing `estimated_tokens`.
    ///
    /// Bucket state is rebuilt when the provider's configured limits have
    /// changed since the last call.
    pub fn admit(&self, provider: &AIProvider, estimated_tokens: u64) -> Admission {
        let mut entry = self
            .buckets
            .entry(provider.id.clone())
            .or_insert_with(|| ProviderBuckets::new(provider));

        if !entry.matches(provider) {
            *entry = ProviderBuckets::new(provider);
        }

        let now = Instant::now();
        let elapsed = now.duration_since(entry.last_refill);
        entry.last_refill = now;
        entry.requests.refill(elapsed);
        entry.tokens.refill(elapsed);

        let needed = estimated_tokens as f64;
        if entry.requests.available >= 1.0 && entry.tokens.available >= needed {
            entry.requests.available -= 1.0;
            entry.tokens.available -= needed;
            return Admission::Granted;
        }

        let retry_after = entry.requests.wait_for(1.0).max(entry.tokens.wait_for(needed));
        Admission::Denied { retry_after }
    }

    /// Return a previously admitted request's budget, for upstream failures
    /// the provider did not bill.
    pub fn refund(&self, provider_id: &ProviderId, estimated_tokens: u64) {
        if let Some(mut entry) = self.buckets.get_mut(provider_id) {
            entry.requests.credit(1.0);
            entry.tokens.credit(estimated_tokens as f64);
        }
    }

    /// Drop all bucket state for a provider.
    pub fn remove(&self, provider_id: &ProviderId) {
        self.buckets.remove(provider_id);
    }
}
