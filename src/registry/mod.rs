//! 模型注册表 — 适配器发现、配置缓存与模块栈组装
//!
//! Composition root: discovers adapters, caches provider and global
//! configuration, owns the shared token buckets, and assembles the module
//! stack for each `load_model` call.
//!
//! Stacking order, outermost first, for the modules that end up enabled:
//!
//! ```text
//! Telemetry(Audit(Security(Retry(Fallback(RateLimit(Adapter))))))
//! ```
//!
//! Retry always sits above Fallback, so each retried attempt re-enters the
//! fallback chain from its top. Fallback targets are bare adapters.
//!
//! Per module, settings resolve with this precedence:
//! explicit disable > explicit settings (merged over the global ones) >
//! explicit enable > the global `enabled` flag.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::{
    validate_provider_name, ConfigSource, DirConfigSource, GlobalConfig, ProviderConfig,
};
use crate::drivers::{AnthropicAdapter, OpenAiAdapter, OPENAI_COMPATIBLE};
use crate::modules::{
    AuditModule, FallbackModule, ModelLoader, ModuleSettings, RateLimitModule, RetryModule,
    SecurityModule, TelemetryConfig, TelemetryModule, AUDIT, FALLBACK, RATE_LIMIT, RETRY, SECURITY, TELEMETRY,
};
use crate::provider::LlmProvider;
use crate::resilience::BucketRegistry;
use crate::secrets::{ChainedSecretSource, SecretSource};
use crate::{Error, ErrorContext, Result};

/// Builds an adapter from `(provider, config, model, secrets)`.
pub type AdapterFactory = Arc<
    dyn Fn(&str, ProviderConfig, &str, &dyn SecretSource) -> Result<Box<dyn LlmProvider>>
        + Send
        + Sync,
>;

/// Every module name the registry knows how to stack.
pub const KNOWN_MODULES: [&str; 6] = [TELEMETRY, AUDIT, SECURITY, RETRY, FALLBACK, RATE_LIMIT];

/// Caller-side toggle for one module in [`Registry::load_model`].
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleOverride {
    Disabled,
    /// Enable with the global settings (or defaults when there are none).
    Enabled,
    /// Enable with these settings layered over the global ones.
    /// An `"enabled": false` entry disables the module instead.
    Settings(ModuleSettings),
}

impl From<bool> for ModuleOverride {
    fn from(enabled: bool) -> Self {
        if enabled {
            ModuleOverride::Enabled
        } else {
            ModuleOverride::Disabled
        }
    }
}

impl From<ModuleSettings> for ModuleOverride {
    fn from(settings: ModuleSettings) -> Self {
        ModuleOverride::Settings(settings)
    }
}

/// Overrides keyed by module name (`"retry"`, `"fallback"`, ...).
pub type ModuleOverrides = HashMap<String, ModuleOverride>;

/// Settings a module should be built with, or `None` when it stays off.
pub fn resolve_module_settings(
    name: &str,
    global: &GlobalConfig,
    overrides: &ModuleOverrides,
) -> Option<ModuleSettings> {
    let global_module = global.module(name);
    let base = || {
        global_module
            .map(|m| m.settings.clone())
            .unwrap_or_default()
    };
    let mut resolved = match overrides.get(name) {
        Some(ModuleOverride::Disabled) => return None,
        Some(ModuleOverride::Settings(explicit)) => {
            if explicit.get("enabled") == Some(&Value::Bool(false)) {
                return None;
            }
            let mut merged = base();
            for (k, v) in explicit {
                merged.insert(k.clone(), v.clone());
            }
            merged
        }
        Some(ModuleOverride::Enabled) => base(),
        None => match global_module {
            Some(m) if m.enabled => m.settings.clone(),
            _ => return None,
        },
    };
    resolved.remove("enabled");
    Some(resolved)
}

struct RegistryInner {
    config_source: Arc<dyn ConfigSource>,
    secrets: Arc<dyn SecretSource>,
    factories: Mutex<HashMap<String, AdapterFactory>>,
    factory_cache: Mutex<HashMap<String, AdapterFactory>>,
    provider_configs: Mutex<HashMap<String, Arc<ProviderConfig>>>,
    global: ArcSwapOption<GlobalConfig>,
    buckets: Arc<BucketRegistry>,
}

/// Loads models and owns every process-wide cache.
///
/// Cloning is cheap; clones share caches and token buckets.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("buckets", &self.inner.buckets.len())
            .finish_non_exhaustive()
    }
}

fn poisoned(what: &str) -> Error {
    Error::configuration_with_context(
        format!("{} lock poisoned", what),
        ErrorContext::new().with_source("registry"),
    )
}

impl Registry {
    pub fn new(config_source: Arc<dyn ConfigSource>, secrets: Arc<dyn SecretSource>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config_source,
                secrets,
                factories: Mutex::new(HashMap::new()),
                factory_cache: Mutex::new(HashMap::new()),
                provider_configs: Mutex::new(HashMap::new()),
                global: ArcSwapOption::empty(),
                buckets: Arc::new(BucketRegistry::new()),
            }),
        }
    }

    /// YAML configuration under `base`, keys from the keyring then the environment.
    pub fn from_dir(base: impl AsRef<Path>) -> Self {
        Self::new(
            Arc::new(DirConfigSource::new(base)),
            Arc::new(ChainedSecretSource::keyring_then_env()),
        )
    }

    pub fn buckets(&self) -> &Arc<BucketRegistry> {
        &self.inner.buckets
    }

    pub fn secrets(&self) -> &dyn SecretSource {
        self.inner.secrets.as_ref()
    }

    /// Register an adapter factory under a provider name.
    ///
    /// Registered factories win over built-in discovery and survive
    /// [`clear_cache`](Self::clear_cache).
    pub fn register_adapter<F>(&self, provider: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&str, ProviderConfig, &str, &dyn SecretSource) -> Result<Box<dyn LlmProvider>>
            + Send
            + Sync
            + 'static,
    {
        let provider = provider.into();
        validate_provider_name(&provider)?;
        self.inner
            .factories
            .lock()
            .map_err(|_| poisoned("factories"))?
            .insert(provider.clone(), Arc::new(factory));
        // A cached built-in lookup must not shadow the new registration.
        self.inner
            .factory_cache
            .lock()
            .map_err(|_| poisoned("factory cache"))?
            .remove(&provider);
        Ok(())
    }

    /// Drop cached configuration, adapter lookups and all token buckets.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.inner.factory_cache.lock() {
            cache.clear();
        }
        if let Ok(mut configs) = self.inner.provider_configs.lock() {
            configs.clear();
        }
        self.inner.global.store(None);
        self.inner.buckets.clear();
        debug!("registry caches cleared");
    }

    /// Provider configuration, loaded once and cached by provider name.
    pub fn provider_config(&self, provider: &str) -> Result<Arc<ProviderConfig>> {
        validate_provider_name(provider)?;
        if let Some(cached) = self
            .inner
            .provider_configs
            .lock()
            .map_err(|_| poisoned("provider config cache"))?
            .get(provider)
        {
            return Ok(cached.clone());
        }
        let config = Arc::new(self.inner.config_source.load_provider(provider)?);
        debug!(provider = %provider, "provider config loaded");
        let mut cache = self
            .inner
            .provider_configs
            .lock()
            .map_err(|_| poisoned("provider config cache"))?;
        Ok(cache
            .entry(provider.to_string())
            .or_insert(config)
            .clone())
    }

    /// Global configuration, loaded once and cached.
    pub fn global_config(&self) -> Result<Arc<GlobalConfig>> {
        if let Some(global) = self.inner.global.load_full() {
            return Ok(global);
        }
        let global = Arc::new(self.inner.config_source.load_global()?);
        self.inner.global.store(Some(global.clone()));
        Ok(global)
    }

    fn factory_for(&self, provider: &str, config: &ProviderConfig) -> Result<AdapterFactory> {
        if let Some(f) = self
            .inner
            .factory_cache
            .lock()
            .map_err(|_| poisoned("factory cache"))?
            .get(provider)
        {
            return Ok(f.clone());
        }
        let registered = self
            .inner
            .factories
            .lock()
            .map_err(|_| poisoned("factories"))?
            .get(provider)
            .cloned();
        let factory = match registered {
            Some(f) => f,
            None => builtin_factory(provider, &config.provider.api_format)?,
        };
        self.inner
            .factory_cache
            .lock()
            .map_err(|_| poisoned("factory cache"))?
            .insert(provider.to_string(), factory.clone());
        Ok(factory)
    }

    /// A bare adapter with no modules around it.
    pub fn load_adapter(&self, provider: &str, model: Option<&str>) -> Result<Box<dyn LlmProvider>> {
        let config = self.provider_config(provider)?;
        let model = model
            .map(str::to_string)
            .unwrap_or_else(|| config.provider.default_model.clone());
        let factory = self.factory_for(provider, &config)?;
        factory(
            provider,
            config.as_ref().clone(),
            &model,
            self.inner.secrets.as_ref(),
        )
    }

    /// Telemetry settings for `model_name`, with unset prices taken from the
    /// model's metadata. `None` when telemetry is disabled.
    pub fn telemetry_config(
        &self,
        provider: &str,
        model_name: &str,
        overrides: &ModuleOverrides,
    ) -> Result<Option<TelemetryConfig>> {
        let Some(settings) = resolve_module_settings(TELEMETRY, &*self.global_config()?, overrides)
        else {
            return Ok(None);
        };
        let config = self.provider_config(provider)?;
        TelemetryConfig::resolve(&settings, config.model(model_name)).map(Some)
    }

    /// Build an adapter for `provider` and wrap it in every enabled module.
    ///
    /// Every configuration problem surfaces here, before any request is sent.
    pub fn load_model(
        &self,
        provider: &str,
        model: Option<&str>,
        overrides: &ModuleOverrides,
    ) -> Result<Box<dyn LlmProvider>> {
        if let Some(unknown) = overrides
            .keys()
            .find(|k| !KNOWN_MODULES.contains(&k.as_str()))
        {
            return Err(Error::configuration_with_context(
                format!("unknown module '{}'; known: {:?}", unknown, KNOWN_MODULES),
                ErrorContext::new()
                    .with_field_path(format!("modules.{}", unknown))
                    .with_source("registry"),
            ));
        }

        let global = self.global_config()?;
        let mut stack: Box<dyn LlmProvider> = self.load_adapter(provider, model)?;
        let settings = |name: &str| resolve_module_settings(name, &global, overrides);

        if let Some(s) = settings(RATE_LIMIT) {
            stack = Box::new(RateLimitModule::new(&s, stack, &self.inner.buckets)?);
        }
        if let Some(s) = settings(FALLBACK) {
            let loader: Arc<dyn ModelLoader> = Arc::new(self.clone());
            stack = Box::new(FallbackModule::new(&s, stack, loader)?);
        }
        if let Some(s) = settings(RETRY) {
            stack = Box::new(RetryModule::new(&s, stack)?);
        }
        if let Some(s) = settings(SECURITY) {
            stack = Box::new(SecurityModule::new(&s, stack, self.inner.secrets.as_ref())?);
        }
        if let Some(s) = settings(AUDIT) {
            stack = Box::new(AuditModule::new(&s, stack)?);
        }
        if let Some(telemetry) = self.telemetry_config(provider, stack.model_name(), overrides)? {
            stack = Box::new(TelemetryModule::with_config(telemetry, stack)?);
        }

        info!(
            provider = %provider,
            model = %stack.model_name(),
            layers = ?crate::provider::stack_layers(stack.as_ref()),
            "model loaded"
        );
        Ok(stack)
    }
}

/// Fallback targets are loaded bare, so a chain can never recurse.
#[async_trait]
impl ModelLoader for Registry {
    async fn load(&self, provider: &str) -> Result<Box<dyn LlmProvider>> {
        self.load_adapter(provider, None)
    }
}

/// Discovery by naming convention, then by declared wire format.
fn builtin_factory(provider: &str, api_format: &str) -> Result<AdapterFactory> {
    let openai = || -> AdapterFactory {
        Arc::new(
            |provider: &str, config: ProviderConfig, model: &str, secrets: &dyn SecretSource| {
                Ok(Box::new(OpenAiAdapter::new(provider, config, model, secrets)?)
                    as Box<dyn LlmProvider>)
            },
        )
    };
    let anthropic = || -> AdapterFactory {
        Arc::new(
            |provider: &str, config: ProviderConfig, model: &str, secrets: &dyn SecretSource| {
                Ok(Box::new(AnthropicAdapter::new(provider, config, model, secrets)?)
                    as Box<dyn LlmProvider>)
            },
        )
    };

    if provider == "anthropic" {
        return Ok(anthropic());
    }
    if OPENAI_COMPATIBLE.contains(&provider) {
        return Ok(openai());
    }
    match api_format {
        "openai" => Ok(openai()),
        "anthropic" => Ok(anthropic()),
        other => Err(Error::configuration_with_context(
            format!(
                "no adapter for provider '{}' (api_format '{}')",
                provider, other
            ),
            ErrorContext::new()
                .with_field_path(format!("{}.provider.api_format", provider))
                .with_source("registry"),
        )),
    }
}
