//! 弹性模式模块：提供按供应商共享的令牌桶限流原语。
//!
//! # Resilience Primitives Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter::TokenBucket`] | Concurrency-safe token bucket |
//! | [`rate_limiter::BucketRegistry`] | Buckets shared per provider name |
//!
//! The bucket's critical section (refill + decision) runs under a lock; the
//! wait for a missing token happens with the lock released, after which the
//! caller re-checks rather than assuming the token is still there.
//!
//! ```rust
//! use ai_lib_stack::resilience::rate_limiter::TokenBucket;
//!
//! # async fn demo() -> ai_lib_stack::Result<()> {
//! // 60 requests per minute, bursts of up to 10
//! let bucket = TokenBucket::per_minute(60, Some(10))?;
//! let waited = bucket.acquire().await;
//! assert!(waited.is_zero());
//! # Ok(())
//! # }
//! ```

pub mod rate_limiter;

pub use rate_limiter::{BucketRegistry, TokenBucket, TokenBucketSnapshot};
