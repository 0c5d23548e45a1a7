//! Token Bucket Rate Limiter
//!
//! Admits or denies a unit of work against a per-service request budget.
//! The bucket allows bursts up to its capacity and refills lazily at a fixed
//! rate. Denial is immediate; callers that want to wait use
//! [`TokenBucket::time_until_available`] and retry on their own schedule.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::error::{HubError, Result};

/// Mutable bucket state, protected by a single mutex
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket for API call throttling
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    /// Create a new token bucket. The bucket starts full.
    ///
    /// `capacity` and `refill_rate` must both be positive and finite.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self> {
        let mut reasons = Vec::new();
        if !capacity.is_finite() || capacity <= 0.0 {
            reasons.push(format!("capacity must be positive and finite, got {capacity}"));
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            reasons.push(format!(
                "refill_rate must be positive and finite, got {refill_rate}"
            ));
        }
        if !reasons.is_empty() {
            return Err(HubError::InvalidComponent {
                component: "token bucket",
                reasons,
            });
        }

        Ok(Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate,
        })
    }

    /// Bucket holding `capacity` tokens that refills completely every `window`
    pub fn with_window(capacity: u32, window: Duration) -> Result<Self> {
        let capacity = capacity as f64;
        Self::new(capacity, capacity / window.as_secs_f64())
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Take `n` tokens if they are available right now.
    ///
    /// Returns `false` without consuming anything when the bucket holds
    /// fewer than `n` tokens.
    pub fn try_consume(&self, n: u32) -> bool {
        self.try_acquire(n).is_ok()
    }

    /// Take `n` tokens, or report how long until they would be available
    pub fn try_acquire(&self, n: u32) -> std::result::Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);

        let n = n as f64;
        if state.tokens >= n {
            state.tokens -= n;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((n - state.tokens) / self.refill_rate))
        }
    }

    /// Current number of tokens, after accounting for elapsed time
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// How long until `n` tokens will be available, zero if they are now
    pub fn time_until_available(&self, n: u32) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);

        let needed = n as f64 - state.tokens;
        if needed <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(needed / self.refill_rate)
        }
    }

    /// Refill to capacity
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.capacity;
        state.last_refill = Instant::now();
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
    }
}
