//! Token-bucket rate limiting and retry with exponential backoff
//!
//! Every outbound call (LLM, web search, web fetch) acquires tokens from its
//! bucket before it runs. Buckets are owned by a [`RateLimiters`] value that is
//! built from configuration and passed to the clients and tools that need it.

use crate::types::{AppError, Result};
use crate::utils::toml_config::{BucketConfig, RateLimitsConfig, RetryConfig};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Classic token bucket: refills continuously at `tokens_per_minute`, holds at
/// most `burst_size` tokens, starts full.
#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(tokens_per_minute: u32, burst_size: u32) -> Self {
        Self {
            rate_per_sec: f64::from(tokens_per_minute) / 60.0,
            capacity: f64::from(burst_size),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst_size),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &BucketConfig) -> Self {
        Self::new(config.tokens_per_minute, config.burst_size)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Wait until `tokens` are available, then consume them.
    ///
    /// The lock is held while sleeping, so waiters are served in order.
    pub async fn acquire(&self, tokens: u32) -> Result<()> {
        let needed = f64::from(tokens);
        if needed > self.capacity {
            return Err(AppError::InvalidInput(format!(
                "Requested {} tokens but the bucket holds at most {}",
                tokens, self.capacity
            )));
        }

        let mut state = self.state.lock().await;
        self.refill(&mut state);

        while state.tokens < needed {
            let wait = (needed - state.tokens) / self.rate_per_sec;
            debug!("Rate limit reached, waiting {:.2}s", wait);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            self.refill(&mut state);
        }

        state.tokens -= needed;
        Ok(())
    }

    /// Consume `tokens` if they are available right now
    pub async fn try_acquire(&self, tokens: u32) -> bool {
        let needed = f64::from(tokens);
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= needed {
            state.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (after refilling)
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

/// The three buckets shared by a research pipeline
#[derive(Debug, Clone)]
pub struct RateLimiters {
    pub llm: Arc<TokenBucket>,
    pub web_search: Arc<TokenBucket>,
    pub web_fetch: Arc<TokenBucket>,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitsConfig) -> Self {
        Self {
            llm: Arc::new(TokenBucket::from_config(&config.llm)),
            web_search: Arc::new(TokenBucket::from_config(&config.web_search)),
            web_fetch: Arc::new(TokenBucket::from_config(&config.web_fetch)),
        }
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::from_config(&RateLimitsConfig::default())
    }
}

/// Retries retryable failures with exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            multiplier: Duration::from_secs(config.wait_multiplier_secs),
            max_wait: Duration::from_secs(config.max_wait_secs),
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            multiplier: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    /// Wait before the retry that follows failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.multiplier
            .saturating_mul(1u32 << exp)
            .min(self.max_wait)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        label, attempt, self.max_attempts, e, wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_bucket_starts_full() {
        let bucket = TokenBucket::new(60, 5);
        let start = Instant::now();
        for _ in 0..5 {
            bucket.acquire(1).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_waits_when_empty() {
        // 60/min = one token per second
        let bucket = TokenBucket::new(60, 2);
        bucket.acquire(2).await.unwrap();

        let start = Instant::now();
        bucket.acquire(1).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(990), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(1100), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refill_is_capped() {
        let bucket = TokenBucket::new(600, 3);
        bucket.acquire(3).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((bucket.available().await - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire() {
        let bucket = TokenBucket::new(60, 1);
        assert!(bucket.try_acquire(1).await);
        assert!(!bucket.try_acquire(1).await);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.try_acquire(1).await);
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let bucket = TokenBucket::new(60, 2);
        assert!(matches!(
            bucket.acquire(3).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 10,
            multiplier: Duration::from_secs(2),
            max_wait: Duration::from_secs(60),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(6), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result = policy
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AppError::Upstream("503".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<()> = policy
            .run("always-429", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::RateLimited("429".into()))
            })
            .await;

        assert!(matches!(result, Err(AppError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<()> = policy
            .run("bad-request", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::LLM("400".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
