//! Provider 适配器 — 将统一调用契约转换为各厂商的 HTTP 协议
//!
//! Provider adapters. Each adapter translates the unified call contract to one
//! vendor wire format and owns a pooled `reqwest` client for its lifetime.
//!
//! | Adapter | Wire format | Providers |
//! |---------|-------------|-----------|
//! | [`OpenAiAdapter`] | Chat Completions | openai and the OpenAI-compatible hosts in [`OPENAI_COMPATIBLE`] |
//! | [`AnthropicAdapter`] | Messages API | anthropic |

pub mod anthropic;
pub mod openai;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::{Map, Value};
use std::env;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::config::{ModelMetadata, ProviderConfig};
use crate::error::{ApiError, TransportError};
use crate::provider::InvokeOptions;
use crate::secrets::SecretSource;
use crate::{Error, ErrorContext, Result};

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;

/// Used when neither the call options nor the model metadata give `max_tokens`.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 4096;

/// Providers served by [`OpenAiAdapter`] under their own names.
pub const OPENAI_COMPATIBLE: [&str; 10] = [
    "openai",
    "groq",
    "together",
    "deepseek",
    "fireworks",
    "mistral",
    "ollama",
    "vllm",
    "huggingface",
    "huggingface_tgi",
];

/// Config, credentials and connection pool shared by every adapter.
pub(crate) struct AdapterCore {
    provider: String,
    model: String,
    config: ProviderConfig,
    api_key: Option<String>,
    client: Mutex<Option<reqwest::Client>>,
}

impl AdapterCore {
    pub(crate) fn new(
        provider: &str,
        config: ProviderConfig,
        model: &str,
        secrets: &dyn SecretSource,
    ) -> Result<Self> {
        config.validate(provider)?;
        let key_name = &config.provider.api_key_env;
        let api_key = secrets.get_secret(key_name).filter(|k| !k.is_empty());
        if api_key.is_none() && config.provider.api_key_required {
            return Err(Error::configuration_with_context(
                format!(
                    "missing API key '{}' for provider '{}'; set the environment variable",
                    key_name, provider
                ),
                ErrorContext::new()
                    .with_field_path(format!("{}.provider.api_key_env", provider))
                    .with_source("adapter"),
            ));
        }
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
            config,
            api_key,
            client: Mutex::new(Some(build_client()?)),
        })
    }

    pub(crate) fn provider(&self) -> &str {
        &self.provider
    }

    pub(crate) fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub(crate) fn model_meta(&self) -> Option<&ModelMetadata> {
        self.config.model(&self.model)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.provider.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn validate(&self) -> bool {
        self.api_key.is_some() || !self.config.provider.api_key_required
    }

    /// `max_tokens` and `temperature`: call options, then model metadata,
    /// then provider defaults.
    pub(crate) fn resolve_defaults(&self, options: &InvokeOptions) -> (u64, f64) {
        let max_tokens = options
            .get("max_tokens")
            .and_then(Value::as_u64)
            .or_else(|| self.model_meta().map(|m| m.max_output_tokens))
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);
        let temperature = options
            .get("temperature")
            .and_then(Value::as_f64)
            .unwrap_or(self.config.provider.default_temperature);
        (max_tokens, temperature)
    }

    /// POST `body` and return the response text; non-2xx becomes [`ApiError`].
    pub(crate) async fn post_json(&self, url: &str, headers: HeaderMap, body: &Value) -> Result<String> {
        let client = self.client()?;
        debug!(provider = %self.provider, model = %self.model, url, "sending request");
        let resp = client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(TransportError::Http)?;

        let status = resp.status();
        let retry_after = parse_retry_after(resp.headers());
        let text = resp.text().await.map_err(TransportError::Http)?;
        if !status.is_success() {
            let mut err = ApiError::new(status.as_u16(), text, self.provider.clone());
            if let Some(secs) = retry_after {
                err = err.with_retry_after(secs);
            }
            return Err(err.into());
        }
        Ok(text)
    }

    fn client(&self) -> Result<reqwest::Client> {
        let guard = self
            .client
            .lock()
            .map_err(|_| TransportError::Other("client lock poisoned".into()))?;
        guard.clone().ok_or_else(|| {
            Error::configuration_with_context(
                format!("{} adapter is closed", self.provider),
                ErrorContext::new().with_source("adapter"),
            )
        })
    }

    /// Drop the pooled client. Returns `false` if it was already released.
    pub(crate) fn close(&self) -> bool {
        match self.client.lock() {
            Ok(mut guard) => guard.take().is_some(),
            Err(_) => false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.client.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

/// Pooled client with env-overridable timeouts.
fn build_client() -> Result<reqwest::Client> {
    let timeout_secs = env_number("AI_HTTP_TIMEOUT_SECS").unwrap_or(60);
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .pool_max_idle_per_host(env_number("AI_HTTP_POOL_MAX_IDLE_PER_HOST").unwrap_or(32) as usize)
        .pool_idle_timeout(Some(Duration::from_secs(
            env_number("AI_HTTP_POOL_IDLE_TIMEOUT_SECS").unwrap_or(90),
        )));

    if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
        if let Ok(proxy) = reqwest::Proxy::all(&proxy_url) {
            builder = builder.proxy(proxy);
        }
    }

    builder
        .build()
        .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))
}

fn env_number(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

/// Numeric `retry-after` header in seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<f64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs = raw.trim().parse::<f64>().ok()?;
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Tool-call arguments arrive either as an object or as a JSON string.
pub fn parse_arguments(raw: &Value) -> Result<Map<String, Value>> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::String(s) => serde_json::from_str(s).map_err(|e| Error::parse(s.clone(), e)),
        other => serde_json::from_value(other.clone()).map_err(|e| Error::parse(other.to_string(), e)),
    }
}

/// Copy per-call options that the adapter does not interpret itself.
pub(crate) fn merge_extra_options(body: &mut Value, options: &InvokeOptions, handled: &[&str]) {
    if let Value::Object(obj) = body {
        for (k, v) in options {
            if !handled.contains(&k.as_str()) && !obj.contains_key(k) {
                obj.insert(k.clone(), v.clone());
            }
        }
    }
}
