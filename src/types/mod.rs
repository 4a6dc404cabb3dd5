//! 类型系统模块：定义统一调用契约所使用的核心数据类型。
//!
//! # Types Module
//!
//! Strongly-typed representations of everything that crosses the call
//! contract: messages, content blocks, tools, tool calls, usage and the
//! normalized response.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Chat message with role and content |
//! | [`ContentBlock`] | Closed tagged union of text, image, tool-use and tool-result blocks |
//! | [`Tool`] | Tool definition for model context |
//! | [`ToolCall`] | Tool call parsed from a model response |
//! | [`LlmResponse`] | Normalized response with usage and stop reason |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_stack::types::{Message, Tool};
//!
//! let system = Message::system("You are a helpful assistant");
//! let user = Message::user("What's the weather?");
//!
//! let tool = Tool::new(
//!     "get_weather",
//!     "Get current weather for a location",
//!     serde_json::json!({
//!         "type": "object",
//!         "properties": { "location": {"type": "string"} }
//!     }),
//! );
//! ```

pub mod message;
pub mod response;
pub mod tool;

pub use message::{ContentBlock, ImageSource, Message, MessageContent, MessageRole, ToolResultContent};
pub use response::{LlmResponse, StopReason, Usage};
pub use tool::{Tool, ToolCall};
