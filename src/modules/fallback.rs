//! Provider chain switching on failure.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{out_of_range, parse_settings, ModuleSettings, FALLBACK};
use crate::logging::sanitize;
use crate::provider::{InvokeOptions, LlmProvider, Module};
use crate::types::{LlmResponse, Message, Tool};
use crate::Result;

pub const MAX_FALLBACK_CHAIN: usize = 10;

/// Builds fallback providers on demand.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, provider: &str) -> Result<Box<dyn LlmProvider>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FallbackConfig {
    /// Provider names tried in order after the primary fails.
    pub chain: Vec<String>,
}

impl FallbackConfig {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        let config: Self = parse_settings(FALLBACK, settings)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.len() > MAX_FALLBACK_CHAIN {
            return Err(out_of_range(
                FALLBACK,
                "chain",
                format!(
                    "fallback chain too long ({} providers, max {})",
                    self.chain.len(),
                    MAX_FALLBACK_CHAIN
                ),
            ));
        }
        Ok(())
    }
}

/// On any primary failure, walks the chain and returns the first success.
///
/// Every fallback instance is closed after its attempt, successful or not.
/// When the whole chain fails the primary's error is returned.
pub struct FallbackModule {
    inner: Box<dyn LlmProvider>,
    chain: Vec<String>,
    loader: Arc<dyn ModelLoader>,
}

impl FallbackModule {
    pub fn new(
        settings: &ModuleSettings,
        inner: Box<dyn LlmProvider>,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self> {
        Self::with_config(FallbackConfig::from_settings(settings)?, inner, loader)
    }

    pub fn with_config(
        config: FallbackConfig,
        inner: Box<dyn LlmProvider>,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            chain: config.chain,
            loader,
        })
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }
}

#[async_trait]
impl Module for FallbackModule {
    const LAYER: &'static str = FALLBACK;

    fn inner_provider(&self) -> &dyn LlmProvider {
        self.inner.as_ref()
    }

    async fn handle(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse> {
        let primary_error = match self.inner.invoke(messages, tools, options).await {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };
        if self.chain.is_empty() {
            return Err(primary_error);
        }
        warn!(
            provider = self.inner.name(),
            chain_len = self.chain.len(),
            error = %sanitize(&primary_error.to_string()),
            "primary provider failed, trying fallbacks"
        );

        for name in &self.chain {
            let fallback = match self.loader.load(name).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(fallback = %name, error = %sanitize(&e.to_string()), "could not load fallback provider");
                    continue;
                }
            };
            let result = fallback.invoke(messages, tools, options).await;
            if let Err(e) = fallback.close().await {
                debug!(fallback = %name, error = %sanitize(&e.to_string()), "error while closing fallback provider");
            }
            match result {
                Ok(resp) => {
                    info!(fallback = %name, model = fallback.model_name(), "fallback provider succeeded");
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(fallback = %name, error = %sanitize(&e.to_string()), "fallback provider failed");
                }
            }
        }
        Err(primary_error)
    }
}
