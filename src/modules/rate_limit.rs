//! Per-provider token bucket throttling.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{out_of_range, parse_settings, ModuleSettings, RATE_LIMIT};
use crate::provider::{InvokeOptions, LlmProvider, Module};
use crate::resilience::{BucketRegistry, TokenBucket};
use crate::types::{LlmResponse, Message, Tool};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    /// Bucket size; defaults to `requests_per_minute`.
    pub burst_capacity: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_capacity: None,
        }
    }
}

impl RateLimitConfig {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        let config: Self = parse_settings(RATE_LIMIT, settings)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 {
            return Err(out_of_range(
                RATE_LIMIT,
                "requests_per_minute",
                "requests_per_minute must be > 0",
            ));
        }
        if self.burst_capacity == Some(0) {
            return Err(out_of_range(
                RATE_LIMIT,
                "burst_capacity",
                "burst_capacity must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Takes one token from the provider's shared bucket before each call.
///
/// The bucket is keyed by the inner provider's name, so every instance built
/// against the same registry for the same provider draws on one budget. The
/// first instance to create a bucket fixes its size and rate.
pub struct RateLimitModule {
    inner: Box<dyn LlmProvider>,
    bucket: Arc<TokenBucket>,
}

impl RateLimitModule {
    pub fn new(
        settings: &ModuleSettings,
        inner: Box<dyn LlmProvider>,
        buckets: &BucketRegistry,
    ) -> Result<Self> {
        Self::with_config(RateLimitConfig::from_settings(settings)?, inner, buckets)
    }

    pub fn with_config(
        config: RateLimitConfig,
        inner: Box<dyn LlmProvider>,
        buckets: &BucketRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let bucket =
            buckets.get_or_create(inner.name(), config.requests_per_minute, config.burst_capacity)?;
        Ok(Self { inner, bucket })
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }
}

#[async_trait]
impl Module for RateLimitModule {
    const LAYER: &'static str = RATE_LIMIT;

    fn inner_provider(&self) -> &dyn LlmProvider {
        self.inner.as_ref()
    }

    async fn handle(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse> {
        let waited = self.bucket.acquire().await;
        if waited > Duration::ZERO {
            warn!(
                provider = self.inner.name(),
                wait_ms = waited.as_millis() as u64,
                "rate limited, waited for token"
            );
        }
        self.inner.invoke(messages, tools, options).await
    }
}
