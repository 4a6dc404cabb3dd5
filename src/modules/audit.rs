//! Structured audit logging per call.
//!
//! Only metadata is logged by default. Raw messages and response text are
//! opt-in and go out at DEBUG.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{parse_settings, ModuleSettings, AUDIT};
use crate::logging::{sanitize, LogLevel};
use crate::provider::{InvokeOptions, LlmProvider, Module};
use crate::types::{LlmResponse, Message, Tool};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuditConfig {
    pub include_messages: bool,
    pub include_response: bool,
    pub log_level: LogLevel,
}

impl AuditConfig {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        parse_settings(AUDIT, settings)
    }
}

pub struct AuditModule {
    inner: Box<dyn LlmProvider>,
    config: AuditConfig,
}

impl AuditModule {
    pub fn new(settings: &ModuleSettings, inner: Box<dyn LlmProvider>) -> Result<Self> {
        Ok(Self::with_config(AuditConfig::from_settings(settings)?, inner))
    }

    pub fn with_config(config: AuditConfig, inner: Box<dyn LlmProvider>) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Module for AuditModule {
    const LAYER: &'static str = AUDIT;

    fn inner_provider(&self) -> &dyn LlmProvider {
        self.inner.as_ref()
    }

    async fn handle(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let response = self.inner.invoke(messages, tools, options).await?;

        let content_length = response.content.as_ref().map(|c| c.chars().count()).unwrap_or(0);
        event_at!(
            self.config.log_level,
            request_id = %request_id,
            provider = %sanitize(self.inner.name()),
            model = %sanitize(&response.model),
            message_count = messages.len(),
            stop_reason = response.stop_reason.as_str(),
            tools_provided = tools.map(|t| t.len()),
            tool_calls = response.tool_calls.len(),
            content_length,
            "audit"
        );

        if self.config.include_messages {
            let raw = serde_json::to_string(messages)?;
            debug!(request_id = %request_id, messages = %sanitize(&raw), "audit messages");
        }
        if self.config.include_response {
            debug!(
                request_id = %request_id,
                response = %sanitize(response.content.as_deref().unwrap_or("")),
                "audit response"
            );
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoProvider;
    use serde_json::json;

    fn settings(v: serde_json::Value) -> ModuleSettings {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_and_validates_settings() {
        let cfg = AuditConfig::from_settings(&settings(json!({
            "enabled": true,
            "include_messages": true,
            "log_level": "DEBUG"
        })))
        .unwrap();
        assert!(cfg.include_messages);
        assert!(!cfg.include_response);
        assert_eq!(cfg.log_level, LogLevel::Debug);

        assert!(AuditConfig::from_settings(&settings(json!({"log_level": "LOUD"}))).is_err());
        assert!(AuditConfig::from_settings(&settings(json!({"verbose": true}))).is_err());
    }

    #[tokio::test]
    async fn response_passes_through_untouched() {
        let module = AuditModule::new(
            &settings(json!({"include_messages": true, "include_response": true})),
            Box::new(EchoProvider::new("stub")),
        )
        .unwrap();
        let resp = module
            .invoke(&[Message::user("line1\nline2")], None, &InvokeOptions::new())
            .await
            .unwrap();
        assert_eq!(resp.content.as_deref(), Some("line1\nline2"));
    }

    #[tokio::test]
    async fn errors_are_not_swallowed() {
        let module =
            AuditModule::new(&ModuleSettings::new(), Box::new(EchoProvider::failing("stub", 500)))
                .unwrap();
        let err = module
            .invoke(&[Message::user("hi")], None, &InvokeOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(500));
    }
}
