//! Normalized response returned by every provider and module.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::tool::ToolCall;

/// Token usage for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            ..Self::default()
        }
    }
}

/// Why generation ended, normalized across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    ContentFilter,
    Other,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
            StopReason::ContentFilter => "content_filter",
            StopReason::Other => "other",
        }
    }
}

/// Provider response. Modules never mutate one in place; the `with_*`
/// helpers consume the value and return a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub model: String,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage: Usage::default(),
            model: model.into(),
            stop_reason: StopReason::EndTurn,
            thinking: None,
            metadata: None,
            raw: None,
        }
    }

    pub fn with_content(self, content: Option<String>) -> Self {
        Self { content, ..self }
    }

    pub fn with_usage(self, usage: Usage) -> Self {
        Self { usage, ..self }
    }

    /// Returns a copy with `key` set in the metadata map, creating the map if absent.
    pub fn with_metadata_entry(self, key: impl Into<String>, value: Value) -> Self {
        let mut metadata = self.metadata.unwrap_or_default();
        metadata.insert(key.into(), value);
        Self {
            metadata: Some(metadata),
            ..self
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_entry_creates_map() {
        let resp = LlmResponse::text("hi", "m");
        assert!(resp.metadata.is_none());
        let resp = resp.with_metadata_entry("k", Value::from("v"));
        assert_eq!(resp.metadata_str("k"), Some("v"));
    }

    #[test]
    fn metadata_entry_keeps_existing_keys() {
        let resp = LlmResponse::text("hi", "m")
            .with_metadata_entry("a", Value::from(1))
            .with_metadata_entry("b", Value::from(2));
        let md = resp.metadata.unwrap();
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn usage_total() {
        let u = Usage::new(10, 5);
        assert_eq!(u.total_tokens, 15);
    }
}
