use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{Error, ErrorContext, Result};

#[derive(Debug, Clone)]
pub struct TokenBucketSnapshot {
    pub capacity: f64,
    /// Tokens per second.
    pub refill_rate: f64,
    pub tokens: f64,
    /// Estimated wait until a token is available, if currently empty.
    pub estimated_wait: Option<Duration>,
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter.
///
/// - Starts full at `capacity` tokens
/// - Refills continuously at `refill_rate` tokens per second, capped at `capacity`
/// - Waiters are not served in FIFO order; the bucket enforces a ceiling, not fairness
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<State>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Result<Self> {
        if capacity < 1 {
            return Err(Error::configuration_with_context(
                "bucket capacity must be >= 1",
                ErrorContext::new()
                    .with_field_path("burst_capacity")
                    .with_source("token_bucket"),
            ));
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(Error::configuration_with_context(
                "refill rate must be a positive number",
                ErrorContext::new()
                    .with_field_path("requests_per_minute")
                    .with_source("token_bucket"),
            ));
        }
        let capacity = capacity as f64;
        Ok(Self {
            capacity,
            refill_rate,
            state: Mutex::new(State {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Bucket sized for `requests_per_minute`, optionally with a larger burst.
    pub fn per_minute(requests_per_minute: u32, burst_capacity: Option<u32>) -> Result<Self> {
        Self::new(
            burst_capacity.unwrap_or(requests_per_minute),
            requests_per_minute as f64 / 60.0,
        )
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill_locked(&self, st: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(st.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * self.refill_rate).min(self.capacity);
            st.last_refill = now;
        }
    }

    /// Consume one token, sleeping while the bucket is empty.
    ///
    /// Returns the total time spent waiting (zero when a token was available).
    pub async fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let wait = {
                let mut st = self.state.lock().await;
                self.refill_locked(&mut st);
                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return waited;
                }
                let deficit = 1.0 - st.tokens;
                Duration::from_secs_f64(deficit / self.refill_rate)
            };

            // Sleep with the lock released, then re-check: another caller
            // may have taken the token in the meantime.
            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }

    /// Try to take a token without waiting.
    pub async fn try_acquire(&self) -> bool {
        let mut st = self.state.lock().await;
        self.refill_locked(&mut st);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn snapshot(&self) -> TokenBucketSnapshot {
        let mut st = self.state.lock().await;
        self.refill_locked(&mut st);
        let estimated_wait = if st.tokens < 1.0 {
            Some(Duration::from_secs_f64((1.0 - st.tokens) / self.refill_rate))
        } else {
            None
        };
        TokenBucketSnapshot {
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            tokens: st.tokens,
            estimated_wait,
        }
    }
}

/// Buckets shared per provider name.
///
/// The first module built for a provider decides the bucket's size; later
/// modules for the same provider share it as-is, so one budget applies no
/// matter how many call sites exist.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    buckets: StdMutex<HashMap<String, Arc<TokenBucket>>>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        provider: &str,
        requests_per_minute: u32,
        burst_capacity: Option<u32>,
    ) -> Result<Arc<TokenBucket>> {
        let mut buckets = self.buckets.lock().map_err(|_| {
            Error::configuration_with_context(
                "bucket registry poisoned",
                ErrorContext::new().with_source("bucket_registry"),
            )
        })?;
        if let Some(bucket) = buckets.get(provider) {
            return Ok(bucket.clone());
        }
        let bucket = Arc::new(TokenBucket::per_minute(requests_per_minute, burst_capacity)?);
        buckets.insert(provider.to_string(), bucket.clone());
        Ok(bucket)
    }

    pub fn get(&self, provider: &str) -> Option<Arc<TokenBucket>> {
        self.buckets.lock().ok()?.get(provider).cloned()
    }

    /// Drop every bucket (test isolation and cache resets).
    pub fn clear(&self) {
        if let Ok(mut buckets) = self.buckets.lock() {
            buckets.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_configuration() {
        assert!(TokenBucket::new(0, 1.0).is_err());
        assert!(TokenBucket::new(1, 0.0).is_err());
        assert!(TokenBucket::new(1, -1.0).is_err());
        assert!(TokenBucket::new(1, f64::NAN).is_err());
        assert!(TokenBucket::per_minute(0, None).is_err());
    }

    #[test]
    fn burst_defaults_to_rpm() {
        let bucket = TokenBucket::per_minute(120, None).unwrap();
        assert_eq!(bucket.capacity(), 120.0);
        assert_eq!(bucket.refill_rate(), 2.0);

        let bucket = TokenBucket::per_minute(60, Some(5)).unwrap();
        assert_eq!(bucket.capacity(), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_capacity_immediate_acquisitions() {
        let bucket = TokenBucket::new(3, 1.0).unwrap();
        for _ in 0..3 {
            assert_eq!(bucket.acquire().await, Duration::ZERO);
        }
        let waited = bucket.acquire().await;
        assert!(waited > Duration::ZERO);
        // one token deficit at 1 token/s
        assert!((waited.as_secs_f64() - 1.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let bucket = TokenBucket::new(2, 10.0).unwrap();
        assert!(bucket.try_acquire().await);
        tokio::time::advance(Duration::from_secs(60)).await;
        let snap = bucket.snapshot().await;
        assert_eq!(snap.tokens, 2.0);
        assert!(snap.estimated_wait.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_adds_tokens_over_time() {
        let bucket = TokenBucket::new(5, 100.0).unwrap();
        for _ in 0..5 {
            assert!(bucket.try_acquire().await);
        }
        assert!(!bucket.try_acquire().await);
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(bucket.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_never_go_negative() {
        let bucket = Arc::new(TokenBucket::new(2, 5.0).unwrap());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let b = bucket.clone();
                tokio::spawn(async move { b.acquire().await })
            })
            .collect();
        let mut immediate = 0;
        for h in handles {
            if h.await.unwrap() == Duration::ZERO {
                immediate += 1;
            }
        }
        assert_eq!(immediate, 2);
        let snap = bucket.snapshot().await;
        assert!(snap.tokens >= 0.0 && snap.tokens <= snap.capacity);
    }

    #[test]
    fn registry_shares_bucket_per_provider() {
        let registry = BucketRegistry::new();
        let a1 = registry.get_or_create("anthropic", 60, None).unwrap();
        let a2 = registry.get_or_create("anthropic", 600, Some(50)).unwrap();
        let o = registry.get_or_create("openai", 60, None).unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &o));
        // first creation wins
        assert_eq!(a2.capacity(), 60.0);
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
        let a3 = registry.get_or_create("anthropic", 60, None).unwrap();
        assert!(!Arc::ptr_eq(&a1, &a3));
    }
}
