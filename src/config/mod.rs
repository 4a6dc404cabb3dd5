//! 配置模型 — 供应商连接设置、模型元数据与模块开关
//!
//! Configuration consumed by adapters, modules and the registry.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ProviderConfig`] | Connection settings plus per-model metadata for one provider |
//! | [`GlobalConfig`] | Global defaults and module toggles |
//! | [`ModuleConfig`] | `enabled` flag plus arbitrary module-specific settings |
//! | [`ConfigSource`] | Where configs come from (in-memory or a YAML directory) |

mod source;

pub use source::{ConfigSource, DirConfigSource, StaticConfigSource};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::{Error, ErrorContext, Result};

static PROVIDER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("provider name pattern"));

const MAX_PROVIDER_NAME_LEN: usize = 64;
const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// Per-model metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub context_window: u64,
    pub max_output_tokens: u64,
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_thinking: bool,
    #[serde(default = "default_modalities")]
    pub input_modalities: Vec<String>,
    #[serde(default)]
    pub cost_input_per_1m: f64,
    #[serde(default)]
    pub cost_output_per_1m: f64,
    #[serde(default)]
    pub cost_cache_read_per_1m: f64,
    #[serde(default)]
    pub cost_cache_write_per_1m: f64,
}

fn default_modalities() -> Vec<String> {
    vec!["text".to_string()]
}

/// Provider connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Wire format id, e.g. "openai" or "anthropic".
    pub api_format: String,
    pub base_url: String,
    /// Name of the environment variable (or secret) holding the API key.
    pub api_key_env: String,
    #[serde(default = "default_true")]
    pub api_key_required: bool,
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f64 {
    0.7
}

/// Connection settings plus model metadata for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub models: HashMap<String, ModelMetadata>,
}

impl ProviderConfig {
    pub fn new(provider: ProviderSettings) -> Self {
        Self {
            provider,
            models: HashMap::new(),
        }
    }

    pub fn with_model(mut self, name: impl Into<String>, meta: ModelMetadata) -> Self {
        self.models.insert(name.into(), meta);
        self
    }

    pub fn model(&self, name: &str) -> Option<&ModelMetadata> {
        self.models.get(name)
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self, provider_name: &str) -> Result<()> {
        validate_base_url(&self.provider.base_url).map_err(|msg| {
            Error::configuration_with_context(
                msg,
                ErrorContext::new()
                    .with_field_path(format!("{}.provider.base_url", provider_name))
                    .with_source("provider_config"),
            )
        })?;
        if self.provider.default_model.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "default_model must not be empty",
                ErrorContext::new()
                    .with_field_path(format!("{}.provider.default_model", provider_name))
                    .with_source("provider_config"),
            ));
        }
        Ok(())
    }
}

/// Global defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_max_tokens() -> u64 {
    4096
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Module toggle plus module-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl ModuleConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            settings: Map::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}

/// Global defaults and module toggles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub modules: HashMap<String, ModuleConfig>,
}

impl GlobalConfig {
    pub fn with_module(mut self, name: impl Into<String>, module: ModuleConfig) -> Self {
        self.modules.insert(name.into(), module);
        self
    }

    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.get(name)
    }
}

/// Provider names are used to build file paths, so keep them boring.
pub fn validate_provider_name(name: &str) -> Result<()> {
    let ctx = || {
        ErrorContext::new()
            .with_field_path("provider")
            .with_source("registry")
    };
    if name.is_empty() {
        return Err(Error::configuration_with_context(
            "provider name cannot be empty",
            ctx(),
        ));
    }
    if name.len() > MAX_PROVIDER_NAME_LEN {
        return Err(Error::configuration_with_context(
            format!("provider name too long (max {} characters)", MAX_PROVIDER_NAME_LEN),
            ctx(),
        ));
    }
    if !PROVIDER_NAME_RE.is_match(name) {
        return Err(Error::configuration_with_context(
            format!(
                "invalid provider name '{}': must start with a lowercase letter and contain only lowercase letters, digits and underscores",
                name
            ),
            ctx(),
        ));
    }
    Ok(())
}

/// `https` everywhere; plain `http` only for loopback hosts.
fn validate_base_url(raw: &str) -> std::result::Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("invalid base_url '{}': {}", raw, e))?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let host = parsed.host_str().unwrap_or("");
            if LOOPBACK_HOSTS.contains(&host) {
                Ok(())
            } else {
                Err(format!("base_url must use https for remote hosts, got '{}'", raw))
            }
        }
        other => Err(format!("unsupported base_url scheme '{}' in '{}'", other, raw)),
    }
}
