//! PII redaction and request signing.
//!
//! Per call:
//! 1. redact PII in every outbound message,
//! 2. invoke the inner provider with the redacted messages,
//! 3. redact PII in the response text and thinking, dropping the raw
//!    provider payload,
//! 4. sign the canonical form of the redacted request and attach
//!    `request_signature` / `signing_algorithm` to the response metadata.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

use super::{out_of_range, parse_settings, ModuleSettings, SECURITY};
use crate::guardrails::{
    canonicalize, create_signer, redact_with, CustomPattern, PiiDetector, RegexPiiDetector,
    RequestSigner, DEFAULT_SIGNING_KEY_ENV,
};
use crate::provider::{InvokeOptions, LlmProvider, Module};
use crate::secrets::SecretSource;
use crate::types::{ContentBlock, LlmResponse, Message, MessageContent, Tool, ToolResultContent};
use crate::Result;

const SUPPORTED_DETECTORS: [&str; 1] = ["regex"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SecurityConfig {
    pub pii_enabled: bool,
    pub pii_detector: String,
    pub pii_custom_patterns: Vec<CustomPattern>,
    pub signing_enabled: bool,
    pub signing_algorithm: String,
    /// Secret name holding the signing key.
    pub signing_key_env: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pii_enabled: true,
            pii_detector: "regex".to_string(),
            pii_custom_patterns: Vec::new(),
            signing_enabled: true,
            signing_algorithm: "hmac-sha256".to_string(),
            signing_key_env: DEFAULT_SIGNING_KEY_ENV.to_string(),
        }
    }
}

impl SecurityConfig {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        parse_settings(SECURITY, settings)
    }
}

pub struct SecurityModule {
    inner: Box<dyn LlmProvider>,
    detector: Option<Arc<dyn PiiDetector>>,
    signer: Option<Box<dyn RequestSigner>>,
}

impl SecurityModule {
    pub fn new(
        settings: &ModuleSettings,
        inner: Box<dyn LlmProvider>,
        secrets: &dyn SecretSource,
    ) -> Result<Self> {
        Self::with_config(SecurityConfig::from_settings(settings)?, inner, secrets)
    }

    /// Builds the detector and signer up front; a missing key or unsupported
    /// algorithm fails here, before any call is made.
    pub fn with_config(
        config: SecurityConfig,
        inner: Box<dyn LlmProvider>,
        secrets: &dyn SecretSource,
    ) -> Result<Self> {
        let detector: Option<Arc<dyn PiiDetector>> = if config.pii_enabled {
            if !SUPPORTED_DETECTORS.contains(&config.pii_detector.as_str()) {
                return Err(out_of_range(
                    SECURITY,
                    "pii_detector",
                    format!(
                        "unsupported pii_detector '{}'; supported: {:?}",
                        config.pii_detector, SUPPORTED_DETECTORS
                    ),
                ));
            }
            Some(Arc::new(RegexPiiDetector::with_custom_patterns(
                &config.pii_custom_patterns,
            )?))
        } else {
            None
        };

        let signer = if config.signing_enabled {
            Some(create_signer(
                &config.signing_algorithm,
                &config.signing_key_env,
                secrets,
            )?)
        } else {
            None
        };

        Ok(Self {
            inner,
            detector,
            signer,
        })
    }

    /// Swap in a custom detector. Enables redaction if it was off.
    pub fn with_detector(mut self, detector: Arc<dyn PiiDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn pii_enabled(&self) -> bool {
        self.detector.is_some()
    }

    pub fn signing_enabled(&self) -> bool {
        self.signer.is_some()
    }

    fn redact_messages(&self, detector: &dyn PiiDetector, messages: &[Message]) -> Vec<Message> {
        messages
            .iter()
            .map(|msg| {
                let content = match &msg.content {
                    MessageContent::Text(text) => MessageContent::Text(redact_with(detector, text)),
                    MessageContent::Blocks(blocks) => {
                        MessageContent::Blocks(redact_blocks(detector, blocks))
                    }
                };
                Message::with_content(msg.role, content)
            })
            .collect()
    }
}

fn redact_blocks(detector: &dyn PiiDetector, blocks: &[ContentBlock]) -> Vec<ContentBlock> {
    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => ContentBlock::Text {
                text: redact_with(detector, text),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => ContentBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: match content {
                    ToolResultContent::Text(text) => {
                        ToolResultContent::Text(redact_with(detector, text))
                    }
                    ToolResultContent::Blocks(nested) => {
                        ToolResultContent::Blocks(redact_blocks(detector, nested))
                    }
                },
            },
            ContentBlock::ToolUse {
                id,
                name,
                arguments,
            } => {
                let mut value = Value::Object(arguments.clone());
                redact_string_leaves(detector, &mut value);
                let arguments = match value {
                    Value::Object(map) => map,
                    _ => arguments.clone(),
                };
                ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    arguments,
                }
            }
            ContentBlock::Image { .. } => block.clone(),
        })
        .collect()
}

fn redact_string_leaves(detector: &dyn PiiDetector, value: &mut Value) {
    match value {
        Value::String(s) => {
            let redacted = redact_with(detector, s);
            if redacted != *s {
                *s = redacted;
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| redact_string_leaves(detector, v)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| redact_string_leaves(detector, v)),
        _ => {}
    }
}

#[async_trait]
impl Module for SecurityModule {
    const LAYER: &'static str = SECURITY;

    fn inner_provider(&self) -> &dyn LlmProvider {
        self.inner.as_ref()
    }

    async fn handle(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse> {
        let outbound: Cow<'_, [Message]> = match &self.detector {
            Some(detector) => Cow::Owned(self.redact_messages(detector.as_ref(), messages)),
            None => Cow::Borrowed(messages),
        };

        let mut response = self.inner.invoke(&outbound, tools, options).await?;

        if let Some(detector) = &self.detector {
            if let Some(text) = response.content.as_deref() {
                let redacted = redact_with(detector.as_ref(), text);
                if redacted != text {
                    response = response.with_content(Some(redacted));
                }
            }
            let thinking = response
                .thinking
                .as_deref()
                .map(|t| redact_with(detector.as_ref(), t));
            // raw repeats the unredacted text
            response = LlmResponse {
                thinking,
                raw: None,
                ..response
            };
        }

        if let Some(signer) = &self.signer {
            let payload = canonicalize(&outbound, tools, self.inner.model_name())?;
            let signature = signer.sign(&payload);
            debug!(
                provider = self.inner.name(),
                algorithm = signer.algorithm().as_str(),
                payload_bytes = payload.len(),
                "signed request"
            );
            response = response
                .with_metadata_entry("request_signature", Value::String(signature))
                .with_metadata_entry(
                    "signing_algorithm",
                    Value::String(signer.algorithm().as_str().to_string()),
                );
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrails::{HmacSigner, PiiMatch};
    use crate::secrets::StaticSecretSource;
    use crate::testing::EchoProvider;
    use crate::types::MessageRole;
    use serde_json::json;

    fn settings(v: Value) -> ModuleSettings {
        v.as_object().cloned().unwrap()
    }

    fn keyed() -> StaticSecretSource {
        StaticSecretSource::new().with_secret(DEFAULT_SIGNING_KEY_ENV, "test-key")
    }

    #[tokio::test]
    async fn redacts_outbound_and_inbound_and_signs() {
        let stub = EchoProvider::new("stub").replying("Contact: a@b.com");
        let received = stub.received();
        let module = SecurityModule::new(&ModuleSettings::new(), Box::new(stub), &keyed()).unwrap();

        let resp = module
            .invoke(&[Message::user("My SSN is 123-45-6789")], None, &InvokeOptions::new())
            .await
            .unwrap();

        let seen = received.lock().unwrap();
        assert_eq!(seen[0][0].text(), "My SSN is [PII:SSN]");
        assert_eq!(resp.content.as_deref(), Some("Contact: [PII:EMAIL]"));

        let sig = resp.metadata_str("request_signature").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(resp.metadata_str("signing_algorithm"), Some("hmac-sha256"));
    }

    #[tokio::test]
    async fn signature_covers_redacted_request() {
        let module = SecurityModule::new(
            &ModuleSettings::new(),
            Box::new(EchoProvider::new("stub").replying("ok")),
            &keyed(),
        )
        .unwrap();
        let resp = module
            .invoke(&[Message::user("SSN 123-45-6789")], None, &InvokeOptions::new())
            .await
            .unwrap();

        let expected_payload =
            canonicalize(&[Message::user("SSN [PII:SSN]")], None, "stub-model").unwrap();
        let expected = HmacSigner::new("test-key").sign(&expected_payload);
        assert_eq!(resp.metadata_str("request_signature"), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn redacts_inside_blocks_and_leaves_images_alone() {
        let stub = EchoProvider::new("stub").replying("ok");
        let received = stub.received();
        let module = SecurityModule::new(
            &settings(json!({"signing_enabled": false})),
            Box::new(stub),
            &StaticSecretSource::new(),
        )
        .unwrap();

        let image = ContentBlock::image_base64("aGVsbG8=", "image/png");
        let mut args = serde_json::Map::new();
        args.insert("to".into(), json!("bob@example.com"));
        args.insert("cc".into(), json!(["carol@example.com", 42]));
        args.insert("nested".into(), json!({"ip": "10.1.2.3", "n": 5}));
        let msgs = vec![
            Message::with_content(
                MessageRole::User,
                MessageContent::Blocks(vec![ContentBlock::text("ip 192.168.0.1"), image.clone()]),
            ),
            Message::with_content(
                MessageRole::Assistant,
                MessageContent::Blocks(vec![ContentBlock::tool_use("t1", "send_mail", args)]),
            ),
            Message::tool_results(vec![ContentBlock::tool_result("t1", "sent to 555-123-4567")]),
        ];
        module.invoke(&msgs, None, &InvokeOptions::new()).await.unwrap();

        let seen = received.lock().unwrap()[0].clone();
        let MessageContent::Blocks(first) = &seen[0].content else {
            panic!("expected blocks")
        };
        assert_eq!(first[0], ContentBlock::text("ip [PII:IPV4]"));
        assert_eq!(first[1], image);

        let MessageContent::Blocks(second) = &seen[1].content else {
            panic!("expected blocks")
        };
        match &second[0] {
            ContentBlock::ToolUse { arguments, .. } => {
                assert_eq!(arguments["to"], json!("[PII:EMAIL]"));
                assert_eq!(arguments["cc"], json!(["[PII:EMAIL]", 42]));
                assert_eq!(arguments["nested"], json!({"ip": "[PII:IPV4]", "n": 5}));
            }
            other => panic!("unexpected block {other:?}"),
        }

        let MessageContent::Blocks(third) = &seen[2].content else {
            panic!("expected blocks")
        };
        assert_eq!(third[0], ContentBlock::tool_result("t1", "sent to [PII:PHONE]"));
    }

    #[tokio::test]
    async fn redacts_nested_tool_result_blocks() {
        let stub = EchoProvider::new("stub").replying("ok");
        let received = stub.received();
        let module = SecurityModule::new(
            &settings(json!({"signing_enabled": false})),
            Box::new(stub),
            &StaticSecretSource::new(),
        )
        .unwrap();

        let image = ContentBlock::image_base64("aGVsbG8=", "image/png");
        let nested = ContentBlock::ToolResult {
            tool_use_id: "t1".into(),
            content: ToolResultContent::Blocks(vec![
                ContentBlock::text("owner bob@example.com"),
                image.clone(),
                ContentBlock::tool_result("t0", "call 555-123-4567"),
            ]),
        };
        module
            .invoke(&[Message::tool_results(vec![nested])], None, &InvokeOptions::new())
            .await
            .unwrap();

        let seen = received.lock().unwrap()[0].clone();
        let MessageContent::Blocks(blocks) = &seen[0].content else {
            panic!("expected blocks")
        };
        assert_eq!(
            blocks[0],
            ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: ToolResultContent::Blocks(vec![
                    ContentBlock::text("owner [PII:EMAIL]"),
                    image,
                    ContentBlock::tool_result("t0", "call [PII:PHONE]"),
                ]),
            }
        );
    }

    #[tokio::test]
    async fn inbound_thinking_is_redacted_and_raw_dropped() {
        let stub = EchoProvider::new("stub").scripted(|_| {
            let mut resp = LlmResponse::text("reach me at a@b.com", "stub-model");
            resp.thinking = Some("user SSN is 123-45-6789".into());
            resp.raw = Some(json!({"content": "reach me at a@b.com"}));
            Ok(resp)
        });
        let module = SecurityModule::new(
            &settings(json!({"signing_enabled": false})),
            Box::new(stub),
            &StaticSecretSource::new(),
        )
        .unwrap();

        let resp = module
            .invoke(&[Message::user("hi")], None, &InvokeOptions::new())
            .await
            .unwrap();
        assert_eq!(resp.content.as_deref(), Some("reach me at [PII:EMAIL]"));
        assert_eq!(resp.thinking.as_deref(), Some("user SSN is [PII:SSN]"));
        assert!(resp.raw.is_none());
    }

    #[tokio::test]
    async fn raw_is_kept_when_redaction_is_off() {
        let stub = EchoProvider::new("stub").scripted(|_| {
            let mut resp = LlmResponse::text("ok", "stub-model");
            resp.raw = Some(json!({"id": "r1"}));
            Ok(resp)
        });
        let module = SecurityModule::new(
            &settings(json!({"pii_enabled": false, "signing_enabled": false})),
            Box::new(stub),
            &StaticSecretSource::new(),
        )
        .unwrap();
        let resp = module
            .invoke(&[Message::user("hi")], None, &InvokeOptions::new())
            .await
            .unwrap();
        assert_eq!(resp.raw, Some(json!({"id": "r1"})));
    }

    #[tokio::test]
    async fn inner_errors_pass_through_unchanged() {
        let module = SecurityModule::new(
            &ModuleSettings::new(),
            Box::new(EchoProvider::failing("stub", 503)),
            &keyed(),
        )
        .unwrap();
        assert!(module.signing_enabled());

        let err = module
            .invoke(&[Message::user("SSN 123-45-6789")], None, &InvokeOptions::new())
            .await
            .unwrap_err();
        let api = err.as_api().unwrap();
        assert_eq!(api.status_code, 503);
        assert_eq!(api.provider, "stub");
        assert_eq!(api.body, "status 503");
    }

    #[tokio::test]
    async fn both_disabled_is_passthrough() {
        let stub = EchoProvider::new("stub").replying("mail a@b.com");
        let received = stub.received();
        let module = SecurityModule::new(
            &settings(json!({"pii_enabled": false, "signing_enabled": false})),
            Box::new(stub),
            &StaticSecretSource::new(),
        )
        .unwrap();
        let msgs = [Message::user("SSN 123-45-6789")];
        let resp = module.invoke(&msgs, None, &InvokeOptions::new()).await.unwrap();
        assert_eq!(received.lock().unwrap()[0], msgs.to_vec());
        assert_eq!(resp.content.as_deref(), Some("mail a@b.com"));
        assert!(resp.metadata.is_none());
    }

    #[test]
    fn construction_errors() {
        let inner = || Box::new(EchoProvider::new("stub")) as Box<dyn LlmProvider>;
        let none = StaticSecretSource::new();

        // signing key missing
        assert!(SecurityModule::new(&ModuleSettings::new(), inner(), &none).is_err());
        // unknown key
        assert!(SecurityModule::new(&settings(json!({"pii": true})), inner(), &keyed()).is_err());
        // unsupported detector
        assert!(SecurityModule::new(
            &settings(json!({"pii_detector": "ml", "signing_enabled": false})),
            inner(),
            &none
        )
        .is_err());
        // bad custom pattern
        assert!(SecurityModule::new(
            &settings(json!({
                "signing_enabled": false,
                "pii_custom_patterns": [{"name": "X", "pattern": "("}]
            })),
            inner(),
            &none
        )
        .is_err());
        // unsupported algorithm
        let err = SecurityModule::new(
            &settings(json!({"signing_algorithm": "ecdsa-p256"})),
            inner(),
            &keyed(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("ecdsa-p256"));
    }

    struct WordDetector;

    impl PiiDetector for WordDetector {
        fn detect(&self, text: &str) -> Vec<PiiMatch> {
            text.match_indices("secret")
                .map(|(start, m)| PiiMatch {
                    pii_type: "WORD".into(),
                    start,
                    end: start + m.len(),
                    matched_text: m.to_string(),
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn custom_detector_can_be_injected() {
        let stub = EchoProvider::new("stub");
        let received = stub.received();
        let module = SecurityModule::new(
            &settings(json!({"pii_enabled": false, "signing_enabled": false})),
            Box::new(stub),
            &StaticSecretSource::new(),
        )
        .unwrap()
        .with_detector(Arc::new(WordDetector));
        assert!(module.pii_enabled());

        let resp = module
            .invoke(&[Message::user("the secret plan")], None, &InvokeOptions::new())
            .await
            .unwrap();
        assert_eq!(received.lock().unwrap()[0][0].text(), "the [PII:WORD] plan");
        assert_eq!(resp.content.as_deref(), Some("the [PII:WORD] plan"));
    }
}
