//! Timing, token usage and cost per call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{out_of_range, parse_settings, ModuleSettings, TELEMETRY};
use crate::config::ModelMetadata;
use crate::logging::{sanitize, LogLevel};
use crate::provider::{InvokeOptions, LlmProvider, Module};
use crate::types::{LlmResponse, Message, Tool, Usage};
use crate::Result;

/// USD prices per one million tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TelemetryConfig {
    pub cost_input_per_1m: f64,
    pub cost_output_per_1m: f64,
    pub cost_cache_read_per_1m: f64,
    pub cost_cache_write_per_1m: f64,
    pub log_level: LogLevel,
}

impl TelemetryConfig {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        let config: Self = parse_settings(TELEMETRY, settings)?;
        config.validate()?;
        Ok(config)
    }

    /// Prices taken from model metadata.
    pub fn from_metadata(meta: &ModelMetadata) -> Self {
        Self {
            cost_input_per_1m: meta.cost_input_per_1m,
            cost_output_per_1m: meta.cost_output_per_1m,
            cost_cache_read_per_1m: meta.cost_cache_read_per_1m,
            cost_cache_write_per_1m: meta.cost_cache_write_per_1m,
            log_level: LogLevel::default(),
        }
    }

    /// Explicit settings win; every other field comes from the model's
    /// metadata, or the zero defaults when the model is unknown.
    pub fn resolve(settings: &ModuleSettings, meta: Option<&ModelMetadata>) -> Result<Self> {
        let Some(meta) = meta else {
            return Self::from_settings(settings);
        };
        let mut merged = match serde_json::to_value(Self::from_metadata(meta))? {
            serde_json::Value::Object(map) => map,
            _ => ModuleSettings::new(),
        };
        merged.extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self::from_settings(&merged)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("cost_input_per_1m", self.cost_input_per_1m),
            ("cost_output_per_1m", self.cost_output_per_1m),
            ("cost_cache_read_per_1m", self.cost_cache_read_per_1m),
            ("cost_cache_write_per_1m", self.cost_cache_write_per_1m),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(out_of_range(
                    TELEMETRY,
                    field,
                    format!("{} must be >= 0", field),
                ));
            }
        }
        Ok(())
    }

    pub fn cost(&self, usage: &Usage) -> f64 {
        let mut cost = (usage.input_tokens as f64 * self.cost_input_per_1m
            + usage.output_tokens as f64 * self.cost_output_per_1m)
            / 1_000_000.0;
        if let Some(read) = usage.cache_read_tokens {
            cost += read as f64 * self.cost_cache_read_per_1m / 1_000_000.0;
        }
        if let Some(write) = usage.cache_write_tokens {
            cost += write as f64 * self.cost_cache_write_per_1m / 1_000_000.0;
        }
        cost
    }
}

pub struct TelemetryModule {
    inner: Box<dyn LlmProvider>,
    config: TelemetryConfig,
}

impl TelemetryModule {
    pub fn new(settings: &ModuleSettings, inner: Box<dyn LlmProvider>) -> Result<Self> {
        Self::with_config(TelemetryConfig::from_settings(settings)?, inner)
    }

    pub fn with_config(config: TelemetryConfig, inner: Box<dyn LlmProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self { inner, config })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }
}

#[async_trait]
impl Module for TelemetryModule {
    const LAYER: &'static str = TELEMETRY;

    fn inner_provider(&self) -> &dyn LlmProvider {
        self.inner.as_ref()
    }

    async fn handle(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse> {
        let start = Instant::now();
        let response = self.inner.invoke(messages, tools, options).await?;
        let duration_ms = (start.elapsed().as_secs_f64() * 10_000.0).round() / 10.0;

        let usage = &response.usage;
        event_at!(
            self.config.log_level,
            provider = %sanitize(self.inner.name()),
            model = %sanitize(&response.model),
            duration_ms,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            total_tokens = usage.total_tokens,
            cache_read_tokens = usage.cache_read_tokens,
            cache_write_tokens = usage.cache_write_tokens,
            cost_usd = self.config.cost(usage),
            stop_reason = response.stop_reason.as_str(),
            "llm call"
        );

        Ok(response)
    }
}
