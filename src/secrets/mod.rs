//! 凭据解析 — API 密钥与签名密钥的来源抽象
//!
//! Credential resolution contract.
//!
//! API keys and signing keys are looked up by *name* (an environment variable
//! name such as `OPENAI_API_KEY`) at construction time. Where the value comes
//! from is a [`SecretSource`]: the process environment, the OS keyring, an
//! in-memory map, or an ordered chain of those.

use keyring::Entry;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;

/// Keyring service name used by [`KeyringSecretSource::default`].
pub const DEFAULT_KEYRING_SERVICE: &str = "ai-lib-stack";

/// Something that can resolve a named secret.
pub trait SecretSource: Send + Sync {
    /// Returns `None` when the secret is absent or empty.
    fn get_secret(&self, name: &str) -> Option<String>;
}

/// Reads secrets from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretSource;

impl SecretSource for EnvSecretSource {
    fn get_secret(&self, name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Reads secrets from the OS keyring, one entry per secret name.
#[derive(Debug, Clone)]
pub struct KeyringSecretSource {
    service: String,
}

impl KeyringSecretSource {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Default for KeyringSecretSource {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE)
    }
}

impl SecretSource for KeyringSecretSource {
    fn get_secret(&self, name: &str) -> Option<String> {
        let entry = Entry::new(&self.service, name).ok()?;
        match entry.get_password() {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(service = %self.service, secret = name, error = %e, "keyring lookup missed");
                None
            }
        }
    }
}

/// Fixed in-memory secrets, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretSource {
    values: HashMap<String, String>,
}

impl StaticSecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl SecretSource for StaticSecretSource {
    fn get_secret(&self, name: &str) -> Option<String> {
        self.values.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

/// Tries each source in order; the first hit wins.
#[derive(Clone, Default)]
pub struct ChainedSecretSource {
    sources: Vec<Arc<dyn SecretSource>>,
}

impl ChainedSecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, source: Arc<dyn SecretSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Keyring first, then environment.
    pub fn keyring_then_env() -> Self {
        Self::new()
            .add(Arc::new(KeyringSecretSource::default()))
            .add(Arc::new(EnvSecretSource))
    }
}

impl SecretSource for ChainedSecretSource {
    fn get_secret(&self, name: &str) -> Option<String> {
        self.sources.iter().find_map(|s| s.get_secret(name))
    }
}
