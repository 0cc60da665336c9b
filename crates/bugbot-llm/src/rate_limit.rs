//! Token bucket rate limiter for outbound model requests
//!
//! Keeps the router inside provider limits. Supports requests-per-minute and
//! an optional tokens-per-minute bucket.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as TokioMutex;
use tracing::debug;

/// Configuration for rate limiting
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum requests allowed per minute
    pub requests_per_minute: u32,
    /// Maximum tokens allowed per minute (optional)
    pub tokens_per_minute: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 120,
            tokens_per_minute: None,
        }
    }
}

impl RateLimitConfig {
    /// No limiting; used for local endpoints.
    pub fn unlimited() -> Self {
        Self {
            requests_per_minute: u32::MAX,
            tokens_per_minute: None,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_update = now;
    }

    fn try_consume(&mut self, amount: f64) -> bool {
        self.refill();
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    fn time_until_available(&self, amount: f64) -> Duration {
        if self.tokens >= amount {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((amount - self.tokens) / self.refill_rate)
        }
    }
}

/// Rate limiter using the token bucket algorithm
#[derive(Debug, Clone)]
pub struct RateLimiter {
    request_bucket: Arc<TokioMutex<TokenBucket>>,
    token_bucket: Option<Arc<TokioMutex<TokenBucket>>>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        let request_bucket = TokenBucket::new(
            config.requests_per_minute as f64,
            config.requests_per_minute as f64 / 60.0,
        );
        let token_bucket = config
            .tokens_per_minute
            .map(|tpm| TokenBucket::new(tpm as f64, tpm as f64 / 60.0));
        Self {
            request_bucket: Arc::new(TokioMutex::new(request_bucket)),
            token_bucket: token_bucket.map(|tb| Arc::new(TokioMutex::new(tb))),
        }
    }

    /// Wait until limits allow one request consuming `token_count` tokens.
    pub async fn acquire(&self, token_count: Option<u32>) {
        let mut request_bucket = self.request_bucket.lock().await;
        loop {
            if request_bucket.try_consume(1.0) {
                if let (Some(bucket), Some(tokens)) = (&self.token_bucket, token_count) {
                    let mut token_bucket = bucket.lock().await;
                    if token_bucket.try_consume(tokens as f64) {
                        return;
                    }
                    // Roll the request token back while we wait for TPM budget.
                    request_bucket.tokens += 1.0;
                } else {
                    return;
                }
            }

            let wait = request_bucket.time_until_available(1.0);
            drop(request_bucket);
            debug!("rate limit hit, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
            request_bucket = self.request_bucket.lock().await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(10.0, 1.0);
        assert!(bucket.try_consume(10.0));
        assert!(!bucket.try_consume(1.0));
        std::thread::sleep(Duration::from_millis(1100));
        assert!(bucket.try_consume(1.0));
    }

    #[tokio::test]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let start = Instant::now();
        limiter.acquire(None).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
