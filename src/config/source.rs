//! Config sources: in-memory and YAML directory.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{validate_provider_name, GlobalConfig, ProviderConfig};
use crate::{Error, ErrorContext, Result};

/// Where provider and global configuration come from.
pub trait ConfigSource: Send + Sync {
    /// Load and validate the config for one provider.
    fn load_provider(&self, name: &str) -> Result<ProviderConfig>;

    fn load_global(&self) -> Result<GlobalConfig>;
}

/// In-memory configuration, assembled in code.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    providers: HashMap<String, ProviderConfig>,
    global: GlobalConfig,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.providers.insert(name.into(), config);
        self
    }

    pub fn with_global(mut self, global: GlobalConfig) -> Self {
        self.global = global;
        self
    }
}

impl ConfigSource for StaticConfigSource {
    fn load_provider(&self, name: &str) -> Result<ProviderConfig> {
        validate_provider_name(name)?;
        let config = self.providers.get(name).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                format!("no configuration for provider '{}'", name),
                ErrorContext::new()
                    .with_field_path(name)
                    .with_source("static_config"),
            )
        })?;
        config.validate(name)?;
        Ok(config)
    }

    fn load_global(&self) -> Result<GlobalConfig> {
        Ok(self.global.clone())
    }
}

/// Directory layout:
///
/// ```text
/// <base>/config.yaml             # optional, GlobalConfig
/// <base>/providers/<name>.yaml   # one ProviderConfig per provider
/// ```
#[derive(Debug, Clone)]
pub struct DirConfigSource {
    base: PathBuf,
}

impl DirConfigSource {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    fn read_yaml<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
        let ctx = || {
            ErrorContext::new()
                .with_field_path(path.display().to_string())
                .with_source("dir_config")
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(format!("{} not readable: {}", what, e), ctx())
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            Error::configuration_with_context(format!("failed to parse {}: {}", what, e), ctx())
        })
    }
}

impl ConfigSource for DirConfigSource {
    fn load_provider(&self, name: &str) -> Result<ProviderConfig> {
        // Validate before the name touches the filesystem.
        validate_provider_name(name)?;
        let path = self.base.join("providers").join(format!("{}.yaml", name));
        let config: ProviderConfig =
            Self::read_yaml(&path, &format!("provider config '{}'", name))?;
        config.validate(name)?;
        Ok(config)
    }

    fn load_global(&self) -> Result<GlobalConfig> {
        let path = self.base.join("config.yaml");
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }
        Self::read_yaml(&path, "global config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ai-lib-stack-{}-{}",
            tag,
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(dir.join("providers")).unwrap();
        dir
    }

    #[test]
    fn loads_yaml_provider_and_global() {
        let dir = temp_dir("cfg");
        std::fs::write(
            dir.join("providers").join("openai.yaml"),
            r#"
provider:
  api_format: openai
  base_url: https://api.openai.com
  api_key_env: OPENAI_API_KEY
  default_model: gpt-4o
  default_temperature: 0.2
models:
  gpt-4o:
    context_window: 128000
    max_output_tokens: 16384
    supports_tools: true
    cost_input_per_1m: 2.5
    cost_output_per_1m: 10.0
"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("config.yaml"),
            r#"
defaults:
  provider: openai
modules:
  retry:
    enabled: true
    max_retries: 2
"#,
        )
        .unwrap();

        let source = DirConfigSource::new(&dir);
        let provider = source.load_provider("openai").unwrap();
        assert!(provider.provider.api_key_required);
        assert_eq!(provider.model("gpt-4o").unwrap().max_output_tokens, 16384);

        let global = source.load_global().unwrap();
        assert_eq!(global.defaults.provider, "openai");
        let retry = global.module("retry").unwrap();
        assert!(retry.enabled);
        assert_eq!(retry.settings["max_retries"], 2);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_provider_file_is_config_error() {
        let dir = temp_dir("missing");
        let err = DirConfigSource::new(&dir).load_provider("nope").unwrap_err();
        assert!(err.is_configuration());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn rejects_traversal_before_touching_disk() {
        let err = DirConfigSource::new("/nonexistent")
            .load_provider("../secrets")
            .unwrap_err();
        assert!(err.to_string().contains("invalid provider name"));
    }

    #[test]
    fn missing_global_file_yields_defaults() {
        let dir = temp_dir("noglobal");
        let global = DirConfigSource::new(&dir).load_global().unwrap();
        assert!(global.modules.is_empty());
        std::fs::remove_dir_all(dir).ok();
    }
}
