//! 中间件模块：重试、回退、限流、安全、审计与遥测。
//!
//! # Modules
//!
//! Each module wraps exactly one inner [`LlmProvider`](crate::provider::LlmProvider)
//! and is itself a provider, so they nest freely.
//!
//! | Module | Settings |
//! |--------|----------|
//! | [`RetryModule`] | `max_retries`, `backoff_base_seconds`, `max_wait_seconds`, `retryable_status_codes` |
//! | [`FallbackModule`] | `chain` |
//! | [`RateLimitModule`] | `requests_per_minute`, `burst_capacity` |
//! | [`SecurityModule`] | `pii_enabled`, `pii_detector`, `pii_custom_patterns`, `signing_enabled`, `signing_algorithm`, `signing_key_env` |
//! | [`AuditModule`] | `include_messages`, `include_response`, `log_level` |
//! | [`TelemetryModule`] | `cost_*_per_1m`, `log_level` |
//!
//! Settings are validated when the module is built: unknown keys and
//! out-of-range values are configuration errors, never first-call surprises.
//! The `enabled` key is a registry toggle and is ignored here.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{Error, ErrorContext, Result};

/// Emit a tracing event at a level chosen at runtime.
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            $crate::logging::LogLevel::Debug => tracing::debug!($($arg)+),
            $crate::logging::LogLevel::Info => tracing::info!($($arg)+),
            $crate::logging::LogLevel::Warning => tracing::warn!($($arg)+),
            $crate::logging::LogLevel::Error | $crate::logging::LogLevel::Critical => {
                tracing::error!($($arg)+)
            }
        }
    };
}

mod audit;
mod fallback;
mod rate_limit;
mod retry;
mod security;
mod telemetry;

pub use audit::{AuditConfig, AuditModule};
pub use fallback::{FallbackConfig, FallbackModule, ModelLoader, MAX_FALLBACK_CHAIN};
pub use rate_limit::{RateLimitConfig, RateLimitModule};
pub use retry::{JitterFn, RetryConfig, RetryModule};
pub use security::{SecurityConfig, SecurityModule};
pub use telemetry::{TelemetryConfig, TelemetryModule};

/// Raw module settings as they appear in configuration.
pub type ModuleSettings = Map<String, Value>;

/// Registry names of the six modules.
pub const RETRY: &str = "retry";
pub const FALLBACK: &str = "fallback";
pub const RATE_LIMIT: &str = "rate_limit";
pub const SECURITY: &str = "security";
pub const AUDIT: &str = "audit";
pub const TELEMETRY: &str = "telemetry";

/// Deserialize `settings` into a module's typed config.
///
/// Unknown keys and type mismatches become configuration errors naming the module.
pub(crate) fn parse_settings<T: DeserializeOwned>(module: &str, settings: &ModuleSettings) -> Result<T> {
    let mut cleaned = settings.clone();
    cleaned.remove("enabled");
    serde_json::from_value(Value::Object(cleaned)).map_err(|e| {
        Error::configuration_with_context(
            format!("invalid {} settings: {}", module, e),
            ErrorContext::new()
                .with_field_path(format!("modules.{}", module))
                .with_source(format!("{}_module", module)),
        )
    })
}

pub(crate) fn out_of_range(module: &str, field: &str, message: impl Into<String>) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(format!("{}.{}", module, field))
            .with_source(format!("{}_module", module)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Sample {
        #[serde(default)]
        size: u32,
    }

    fn map(v: Value) -> ModuleSettings {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn enabled_key_is_ignored() {
        let s: Sample = parse_settings("sample", &map(json!({"enabled": true, "size": 3}))).unwrap();
        assert_eq!(s.size, 3);
    }

    #[test]
    fn unknown_key_is_config_error() {
        let err = parse_settings::<Sample>("sample", &map(json!({"sise": 3}))).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("unknown field `sise`"));
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("modules.sample")
        );
    }
}
