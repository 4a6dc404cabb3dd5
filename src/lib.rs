//! # ai-lib-stack
//!
//! 统一的多厂商 LLM 调用契约，以及可组合的弹性与信任中间件栈。
//!
//! A unified call contract for LLM providers, plus a composable middleware
//! stack of resilience and trust modules built on that same contract.
//!
//! ## Overview
//!
//! Every provider adapter and every module implements [`LlmProvider`]:
//! `invoke(messages, tools, options) -> LlmResponse`. A module owns exactly one
//! inner provider and is itself a provider, so wrappers nest freely and the
//! caller cannot tell a bare adapter from a fully wrapped one.
//!
//! ## Key Features
//!
//! - **Adapters**: OpenAI Chat Completions (and compatible services) and
//!   Anthropic Messages via [`drivers`]
//! - **Resilience**: retry with exponential backoff, ordered fallback chains and
//!   a per-provider token bucket via [`modules`] and [`resilience`]
//! - **Trust**: PII redaction and HMAC request signing via [`guardrails`]
//! - **Observability**: audit and telemetry events through `tracing`
//! - **Composition**: [`Registry`] discovers adapters, caches configuration
//!   and stacks modules with a fixed order
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_stack::{Message, ModuleOverride, ModuleOverrides, Registry};
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_stack::Result<()> {
//!     ai_lib_stack::logging::init_tracing();
//!
//!     let registry = Registry::from_dir("config");
//!     let overrides = ModuleOverrides::from([
//!         ("retry".to_string(), ModuleOverride::Enabled),
//!         ("rate_limit".to_string(), ModuleOverride::Enabled),
//!     ]);
//!     let model = registry.load_model("anthropic", None, &overrides)?;
//!
//!     let reply = model
//!         .invoke(&[Message::user("Hello!")], None, &Default::default())
//!         .await?;
//!     println!("{}", reply.content.unwrap_or_default());
//!
//!     model.close().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Messages, content blocks, tools, responses |
//! | [`provider`] | The call contract and the module wrapper trait |
//! | [`drivers`] | Concrete provider adapters |
//! | [`config`] | Provider and global configuration |
//! | [`secrets`] | API key and signing key lookup |
//! | [`resilience`] | Token bucket and bucket registry |
//! | [`guardrails`] | PII detection, redaction, canonicalization, signing |
//! | [`modules`] | Retry, fallback, rate limit, security, audit, telemetry |
//! | [`registry`] | Adapter discovery, caching and stack composition |
//! | [`logging`] | Tracing setup and log-field hygiene |

pub mod config;
pub mod drivers;
pub mod guardrails;
pub mod logging;
pub mod modules;
pub mod provider;
pub mod registry;
pub mod resilience;
pub mod secrets;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::{ConfigSource, DirConfigSource, GlobalConfig, ProviderConfig, StaticConfigSource};
pub use provider::{stack_layers, InvokeOptions, LlmProvider, Module};
pub use registry::{ModuleOverride, ModuleOverrides, Registry};
pub use types::{
    ContentBlock, LlmResponse, Message, MessageRole, StopReason, Tool, ToolCall, Usage,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{ApiError, Error, ErrorContext, TransportError};
