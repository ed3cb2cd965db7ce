//! Per-connection inbound rate limiting
//!
//! A token bucket owned by a single connection's inbound duty. Each read first
//! acquires a token; when the bucket is empty the caller waits for the next
//! refill. A run of consecutive throttled acquisitions longer than
//! `max_strikes` is a sustained violation and is reported as an error so the
//! caller can drop the connection.

use std::time::Duration;
use tokio::time::Instant;

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Tokens added per second. Zero disables limiting.
    pub per_second: u32,
    /// Bucket size (maximum burst)
    pub burst: u32,
    /// Consecutive throttled acquisitions tolerated before giving up
    pub max_strikes: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 10,
            burst: 20,
            max_strikes: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded after {strikes} consecutive throttled reads")]
    Exceeded { strikes: u32 },
}

/// Token bucket limiter for one connection
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    tokens: f64,
    last_refill: Instant,
    strikes: u32,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: f64::from(config.burst),
            last_refill: Instant::now(),
            strikes: 0,
            config,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * f64::from(self.config.per_second))
            .min(f64::from(self.config.burst));
        self.last_refill = now;
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&mut self) -> bool {
        if self.config.per_second == 0 {
            return true;
        }
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.strikes = 0;
            true
        } else {
            false
        }
    }

    /// Take a token, waiting for a refill when the bucket is empty.
    ///
    /// Returns an error once the connection has been throttled more than
    /// `max_strikes` times in a row.
    pub async fn acquire(&mut self) -> Result<(), RateLimitError> {
        if self.try_acquire() {
            return Ok(());
        }

        self.strikes += 1;
        if self.strikes > self.config.max_strikes {
            return Err(RateLimitError::Exceeded {
                strikes: self.strikes,
            });
        }

        let deficit = 1.0 - self.tokens;
        let wait = Duration::from_secs_f64(deficit / f64::from(self.config.per_second));
        tokio::time::sleep(wait).await;

        self.refill(Instant::now());
        self.tokens = (self.tokens - 1.0).max(0.0);
        Ok(())
    }

    /// Consecutive throttled acquisitions so far
    pub fn strikes(&self) -> u32 {
        self.strikes
    }
}
