//! Exponential backoff with proportional jitter on transient failures.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use super::{out_of_range, parse_settings, ModuleSettings, RETRY};
use crate::logging::sanitize;
use crate::provider::{InvokeOptions, LlmProvider, Module};
use crate::types::{LlmResponse, Message, Tool};
use crate::{Error, Result};

/// Upper bound for `max_wait_seconds` (one day).
pub const MAX_WAIT_LIMIT_SECONDS: f64 = 86_400.0;

/// Draws a jitter in `[0, upper]` seconds.
pub type JitterFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub backoff_base_seconds: f64,
    pub max_wait_seconds: f64,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_seconds: 1.0,
            max_wait_seconds: 60.0,
            retryable_status_codes: vec![429, 500, 502, 503, 529],
        }
    }
}

impl RetryConfig {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        let config: Self = parse_settings(RETRY, settings)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.backoff_base_seconds.is_finite() && self.backoff_base_seconds > 0.0) {
            return Err(out_of_range(
                RETRY,
                "backoff_base_seconds",
                "backoff_base_seconds must be > 0",
            ));
        }
        if !(self.max_wait_seconds > 0.0 && self.max_wait_seconds <= MAX_WAIT_LIMIT_SECONDS) {
            return Err(out_of_range(
                RETRY,
                "max_wait_seconds",
                format!(
                    "max_wait_seconds must be > 0 and <= {}",
                    MAX_WAIT_LIMIT_SECONDS
                ),
            ));
        }
        Ok(())
    }

    /// API errors with a listed status, plus connection and timeout failures.
    pub fn is_retryable(&self, err: &Error) -> bool {
        match err {
            Error::Api(api) => self.retryable_status_codes.contains(&api.status_code),
            Error::Transport(t) => t.is_transient(),
            _ => false,
        }
    }
}

pub struct RetryModule {
    inner: Box<dyn LlmProvider>,
    config: RetryConfig,
    jitter: JitterFn,
}

impl RetryModule {
    pub fn new(settings: &ModuleSettings, inner: Box<dyn LlmProvider>) -> Result<Self> {
        Self::with_config(RetryConfig::from_settings(settings)?, inner)
    }

    pub fn with_config(config: RetryConfig, inner: Box<dyn LlmProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            config,
            jitter: Arc::new(|upper| rand::thread_rng().gen_range(0.0..=upper)),
        })
    }

    /// Replace the random source, e.g. with a fixed value in tests.
    pub fn with_jitter(mut self, jitter: JitterFn) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Wait before retry `attempt` (0-based) after `err`.
    ///
    /// A server `retry_after` hint wins over computed backoff. Both are capped
    /// at `max_wait_seconds`.
    pub fn backoff_for(&self, attempt: u32, err: &Error) -> Duration {
        let max_wait = self.config.max_wait_seconds;
        if let Some(hint) = err.as_api().and_then(|api| api.retry_after) {
            return wait_duration(hint.min(max_wait));
        }
        // Capped before jitter so the jitter range stays finite.
        let backoff = (self.config.backoff_base_seconds * 2f64.powi(attempt.min(62) as i32))
            .min(max_wait);
        let jitter = (self.jitter)(backoff).clamp(0.0, backoff);
        wait_duration((backoff + jitter).min(max_wait))
    }
}

/// Seconds to a `Duration`, saturating instead of panicking.
fn wait_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

impl fmt::Debug for RetryModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryModule")
            .field("provider", &self.inner.name())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl Module for RetryModule {
    const LAYER: &'static str = RETRY;

    fn inner_provider(&self) -> &dyn LlmProvider {
        self.inner.as_ref()
    }

    async fn handle(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse> {
        let mut attempt: u32 = 0;
        loop {
            let err = match self.inner.invoke(messages, tools, options).await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };
            if !self.config.is_retryable(&err) {
                return Err(err);
            }
            if attempt >= self.config.max_retries {
                error!(
                    provider = self.inner.name(),
                    max_retries = self.config.max_retries,
                    error = %sanitize(&err.to_string()),
                    "all retries exhausted"
                );
                return Err(err);
            }
            let wait = self.backoff_for(attempt, &err);
            warn!(
                provider = self.inner.name(),
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                wait_ms = wait.as_millis() as u64,
                error = %sanitize(&err.to_string()),
                "retrying after transient failure"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}
