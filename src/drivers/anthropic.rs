//! Anthropic Messages API 适配器
//!
//! Anthropic Messages API adapter. Differences from Chat Completions:
//! - System messages go into the top-level `system` parameter.
//! - Tool results travel as `user` messages with `tool_result` blocks.
//! - `max_tokens` is required.
//! - Authentication uses `x-api-key` plus an `anthropic-version` header.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{merge_extra_options, parse_arguments, AdapterCore};
use crate::config::ProviderConfig;
use crate::provider::{InvokeOptions, LlmProvider};
use crate::secrets::SecretSource;
use crate::types::{
    ContentBlock, ImageSource, LlmResponse, Message, MessageContent, MessageRole, StopReason, Tool,
    ToolCall, ToolResultContent, Usage,
};
use crate::{Error, ErrorContext, Result};

const MESSAGES_PATH: &str = "/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    core: AdapterCore,
}

impl AnthropicAdapter {
    pub fn new(
        provider: &str,
        config: ProviderConfig,
        model: &str,
        secrets: &dyn SecretSource,
    ) -> Result<Self> {
        Ok(Self {
            core: AdapterCore::new(provider, config, model, secrets)?,
        })
    }

    pub fn build_request_body(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Value {
        let (system, rest) = split_system(messages);
        let (max_tokens, temperature) = self.core.resolve_defaults(options);
        let mut body = json!({
            "model": self.core.model(),
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": rest.into_iter().map(format_message).collect::<Vec<_>>(),
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
        }
        merge_extra_options(&mut body, options, &["max_tokens", "temperature"]);
        body
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        if let Some(key) = self.core.api_key() {
            let value = HeaderValue::from_str(key).map_err(|_| {
                Error::configuration_with_context(
                    "API key contains characters not allowed in a header",
                    ErrorContext::new().with_source("anthropic_adapter"),
                )
            })?;
            headers.insert(HeaderName::from_static("x-api-key"), value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl LlmProvider for AnthropicAdapter {
    fn name(&self) -> &str {
        self.core.provider()
    }

    fn model_name(&self) -> &str {
        self.core.model()
    }

    fn validate_config(&self) -> bool {
        self.core.validate()
    }

    async fn invoke(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse> {
        let body = self.build_request_body(messages, tools, options);
        let text = self
            .core
            .post_json(&self.core.endpoint(MESSAGES_PATH), self.headers()?, &body)
            .await?;
        parse_response(&text)
    }

    async fn close(&self) -> Result<()> {
        self.core.close();
        Ok(())
    }
}

/// Pull system messages out; several are joined with newlines.
fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role == MessageRole::System {
            system_parts.push(msg.text());
        } else {
            rest.push(msg);
        }
    }
    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n"));
    (system, rest)
}

fn format_message(msg: &Message) -> Value {
    let role = match msg.role {
        MessageRole::Assistant => "assistant",
        _ => "user",
    };
    let content = match &msg.content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Blocks(blocks) => Value::Array(blocks.iter().map(format_block).collect()),
    };
    json!({ "role": role, "content": content })
}

fn format_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Image { source, media_type } => {
            let source = match source {
                ImageSource::Base64 { data } => {
                    json!({ "type": "base64", "media_type": media_type, "data": data })
                }
                ImageSource::Url { url } => json!({ "type": "url", "url": url }),
            };
            json!({ "type": "image", "source": source })
        }
        ContentBlock::ToolUse {
            id,
            name,
            arguments,
        } => json!({ "type": "tool_use", "id": id, "name": name, "input": arguments }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
        } => {
            let content = match content {
                ToolResultContent::Text(text) => Value::String(text.clone()),
                ToolResultContent::Blocks(blocks) => {
                    Value::Array(blocks.iter().map(format_block).collect())
                }
            };
            json!({ "type": "tool_result", "tool_use_id": tool_use_id, "content": content })
        }
    }
}

fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") | None => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("refusal") => StopReason::ContentFilter,
        Some(_) => StopReason::Other,
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    #[serde(default)]
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

fn parse_response(text: &str) -> Result<LlmResponse> {
    let raw: Value = serde_json::from_str(text)?;
    let parsed: MessagesResponse = serde_json::from_value(raw.clone())?;

    let mut text_parts = Vec::new();
    let mut thinking_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in parsed.content {
        match block {
            WireBlock::Text { text } => text_parts.push(text),
            WireBlock::Thinking { thinking } => thinking_parts.push(thinking),
            WireBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: parse_arguments(&input)?,
            }),
            WireBlock::Unknown => {}
        }
    }

    let u = parsed.usage;
    Ok(LlmResponse {
        content: (!text_parts.is_empty()).then(|| text_parts.join("\n")),
        tool_calls,
        usage: Usage {
            cache_read_tokens: u.cache_read_input_tokens,
            cache_write_tokens: u.cache_creation_input_tokens,
            ..Usage::new(u.input_tokens, u.output_tokens)
        },
        model: parsed.model,
        stop_reason: map_stop_reason(parsed.stop_reason.as_deref()),
        thinking: (!thinking_parts.is_empty()).then(|| thinking_parts.join("\n")),
        metadata: None,
        raw: Some(raw),
    })
}
