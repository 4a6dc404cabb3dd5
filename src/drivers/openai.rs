//! OpenAI Chat Completions adapter.
//!
//! Also serves every OpenAI-compatible host (Groq, Together, DeepSeek, ...);
//! the adapter reports whatever provider name it was built with.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{merge_extra_options, parse_arguments, AdapterCore};
use crate::config::ProviderConfig;
use crate::provider::{InvokeOptions, LlmProvider};
use crate::secrets::SecretSource;
use crate::types::{
    ContentBlock, ImageSource, LlmResponse, Message, MessageContent, MessageRole, StopReason, Tool,
    ToolCall, Usage,
};
use crate::{Error, ErrorContext, Result};

const CHAT_PATH: &str = "/v1/chat/completions";

pub struct OpenAiAdapter {
    core: AdapterCore,
}

impl OpenAiAdapter {
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
        let (max_tokens, temperature) = self.core.resolve_defaults(options);
        let mut body = json!({
            "model": self.core.model(),
            "messages": format_messages(messages),
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = Value::Array(tools.iter().map(format_tool).collect());
        }
        merge_extra_options(&mut body, options, &["max_tokens", "temperature"]);
        body
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = self.core.api_key() {
            let value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| {
                Error::configuration_with_context(
                    "API key contains characters not allowed in a header",
                    ErrorContext::new().with_source("openai_adapter"),
                )
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl LlmProvider for OpenAiAdapter {
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
            .post_json(&self.core.endpoint(CHAT_PATH), self.headers()?, &body)
            .await?;
        parse_response(&text)
    }

    async fn close(&self) -> Result<()> {
        self.core.close();
        Ok(())
    }
}

fn format_tool(tool: &Tool) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// A `tool` message with several results becomes one wire message per result.
fn format_messages(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        match (&msg.role, &msg.content) {
            (MessageRole::Tool, MessageContent::Blocks(blocks)) => {
                for block in blocks {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } = block
                    {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content.to_text(),
                        }));
                    }
                }
            }
            _ => out.push(format_message(msg)),
        }
    }
    out
}

fn format_message(msg: &Message) -> Value {
    let role = msg.role.as_str();
    let blocks = match &msg.content {
        MessageContent::Text(text) => return json!({ "role": role, "content": text }),
        MessageContent::Blocks(blocks) => blocks,
    };

    let tool_calls: Vec<Value> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse {
                id,
                name,
                arguments,
            } => Some(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": Value::Object(arguments.clone()).to_string(),
                }
            })),
            _ => None,
        })
        .collect();
    if !tool_calls.is_empty() {
        let text: Vec<&str> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        let content = if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.join(" "))
        };
        return json!({ "role": "assistant", "content": content, "tool_calls": tool_calls });
    }

    let parts: Vec<Value> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
            ContentBlock::Image { source, media_type } => Some(json!({
                "type": "image_url",
                "image_url": { "url": image_url(source, media_type) },
            })),
            ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => None,
        })
        .collect();
    if parts.is_empty() {
        json!({ "role": role, "content": "" })
    } else {
        json!({ "role": role, "content": parts })
    }
}

fn image_url(source: &ImageSource, media_type: &str) -> String {
    match source {
        ImageSource::Base64 { data } => format!("data:{};base64,{}", media_type, data),
        ImageSource::Url { url } => url.clone(),
    }
}

fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("stop") | None => StopReason::EndTurn,
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("content_filter") => StopReason::ContentFilter,
        Some(_) => StopReason::Other,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    /// DeepSeek-style reasoning text.
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

fn parse_response(text: &str) -> Result<LlmResponse> {
    let raw: Value = serde_json::from_str(text)?;
    let completion: ChatCompletion = serde_json::from_value(raw.clone())?;
    let choice = completion.choices.into_iter().next().ok_or_else(|| {
        Error::Transport(crate::error::TransportError::Other(
            "chat completion contained no choices".into(),
        ))
    })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            Ok(ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: parse_arguments(&tc.function.arguments)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let usage = completion
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u
                .total_tokens
                .unwrap_or(u.prompt_tokens + u.completion_tokens),
            reasoning_tokens: u.completion_tokens_details.and_then(|d| d.reasoning_tokens),
            ..Usage::default()
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content: choice.message.content,
        tool_calls,
        usage,
        model: completion.model,
        stop_reason: map_stop_reason(choice.finish_reason.as_deref()),
        thinking: choice.message.reasoning_content,
        metadata: None,
        raw: Some(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::StaticSecretSource;
    use crate::testing::provider_config;
    use serde_json::Map;

    fn adapter() -> OpenAiAdapter {
        OpenAiAdapter::new(
            "groq",
            provider_config("openai", "https://api.groq.com/openai"),
            "llama-3.3-70b",
            &StaticSecretSource::new().with_secret("TEST_API_KEY", "sk-test"),
        )
        .unwrap()
    }

    #[test]
    fn reports_its_own_provider_name() {
        let a = adapter();
        assert_eq!(a.name(), "groq");
        assert_eq!(a.model_name(), "llama-3.3-70b");
        assert!(a.validate_config());
    }

    #[test]
    fn tool_results_are_flattened() {
        let msgs = vec![Message::tool_results(vec![
            ContentBlock::tool_result("call_1", "sunny"),
            ContentBlock::tool_result("call_2", "rainy"),
        ])];
        let wire = format_messages(&msgs);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0], json!({"role": "tool", "tool_call_id": "call_1", "content": "sunny"}));
        assert_eq!(wire[1]["tool_call_id"], "call_2");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls() {
        let mut args = Map::new();
        args.insert("city".into(), json!("Paris"));
        let msg = Message::with_content(
            MessageRole::Assistant,
            MessageContent::Blocks(vec![
                ContentBlock::text("checking"),
                ContentBlock::tool_use("call_1", "weather", args),
            ]),
        );
        let wire = format_message(&msg);
        assert_eq!(wire["content"], "checking");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "weather");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"city\":\"Paris\"}");
    }

    #[test]
    fn images_become_data_urls() {
        let msg = Message::with_content(
            MessageRole::User,
            MessageContent::Blocks(vec![ContentBlock::image_base64("QUJD", "image/png")]),
        );
        let wire = format_message(&msg);
        assert_eq!(wire["content"][0]["image_url"]["url"], "data:image/png;base64,QUJD");
    }

    #[test]
    fn body_carries_defaults_tools_and_extras() {
        let mut opts = InvokeOptions::new();
        opts.insert("tool_choice".into(), json!("auto"));
        let tools = [Tool::new("weather", "get weather", json!({"type": "object"}))];
        let body = adapter().build_request_body(&[Message::user("hi")], Some(&tools[..]), &opts);
        assert_eq!(body["model"], "llama-3.3-70b");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn parses_tool_calls_usage_and_stop_reason() {
        let text = json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "weather", "arguments": "{\"city\":\"Paris\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 8,
                "total_tokens": 20,
                "completion_tokens_details": {"reasoning_tokens": 3}
            }
        })
        .to_string();
        let resp = parse_response(&text).unwrap();
        assert!(resp.content.is_none());
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.tool_calls[0].arguments["city"], "Paris");
        assert_eq!(resp.usage.total_tokens, 20);
        assert_eq!(resp.usage.reasoning_tokens, Some(3));
        assert!(resp.raw.is_some());
    }

    #[test]
    fn malformed_tool_arguments_fail_with_parse_error() {
        let text = json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {"tool_calls": [{"id": "c", "function": {"name": "f", "arguments": "{oops"}}]},
                "finish_reason": "tool_calls"
            }]
        })
        .to_string();
        assert!(matches!(parse_response(&text), Err(Error::Parse { .. })));
    }

    #[test]
    fn stop_reasons() {
        assert_eq!(map_stop_reason(Some("length")), StopReason::MaxTokens);
        assert_eq!(map_stop_reason(Some("content_filter")), StopReason::ContentFilter);
        assert_eq!(map_stop_reason(Some("weird")), StopReason::Other);
    }
}
