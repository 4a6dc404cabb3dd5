//! 调用契约 — 所有适配器与中间件模块共享的统一接口
//!
//! The call contract shared by provider adapters and the modules that wrap them.
//!
//! Every adapter implements [`LlmProvider`] directly. Every module implements
//! [`Module`]: it owns exactly one inner provider and overrides only
//! [`Module::handle`]; `name`, `model_name`, `validate_config` and `close`
//! are forwarded to the inner provider by the blanket `LlmProvider` impl. Since
//! a module is itself an `LlmProvider`, wrappers nest arbitrarily:
//! `Outer(Middle(Inner(Adapter)))`.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::types::{LlmResponse, Message, Tool};
use crate::Result;

/// Per-call options (`max_tokens`, `temperature`, `tool_choice`, ...).
pub type InvokeOptions = Map<String, Value>;

/// Layer name reported by adapters in [`stack_layers`].
pub const ADAPTER_LAYER: &str = "adapter";

/// Unified call contract.
///
/// The trait is object-safe and is used as `Box<dyn LlmProvider>` throughout.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. "anthropic"). Rate-limit buckets are keyed by it.
    fn name(&self) -> &str;

    fn model_name(&self) -> &str;

    fn validate_config(&self) -> bool;

    async fn invoke(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse>;

    /// Release held resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;

    /// Short name of this layer, used for diagnostics.
    fn layer(&self) -> &'static str {
        ADAPTER_LAYER
    }

    /// The wrapped provider, if this is a module.
    fn inner(&self) -> Option<&dyn LlmProvider> {
        None
    }
}

/// A composable wrapper around exactly one inner provider.
#[async_trait]
pub trait Module: Send + Sync {
    /// Layer name reported through [`LlmProvider::layer`].
    const LAYER: &'static str;

    fn inner_provider(&self) -> &dyn LlmProvider;

    /// The module's behaviour around the inner `invoke`.
    async fn handle(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse>;
}

#[async_trait]
impl<M> LlmProvider for M
where
    M: Module,
{
    fn name(&self) -> &str {
        self.inner_provider().name()
    }

    fn model_name(&self) -> &str {
        self.inner_provider().model_name()
    }

    fn validate_config(&self) -> bool {
        self.inner_provider().validate_config()
    }

    async fn invoke(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse> {
        self.handle(messages, tools, options).await
    }

    async fn close(&self) -> Result<()> {
        self.inner_provider().close().await
    }

    fn layer(&self) -> &'static str {
        M::LAYER
    }

    fn inner(&self) -> Option<&dyn LlmProvider> {
        Some(self.inner_provider())
    }
}

/// Layer names from outermost to innermost, e.g. `["retry", "fallback", "adapter"]`.
pub fn stack_layers(provider: &dyn LlmProvider) -> Vec<&'static str> {
    let mut layers = vec![provider.layer()];
    let mut current = provider.inner();
    while let Some(p) = current {
        layers.push(p.layer());
        current = p.inner();
    }
    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoProvider;

    struct Passthrough {
        inner: Box<dyn LlmProvider>,
    }

    #[async_trait]
    impl Module for Passthrough {
        const LAYER: &'static str = "passthrough";

        fn inner_provider(&self) -> &dyn LlmProvider {
            self.inner.as_ref()
        }

        async fn handle(
            &self,
            messages: &[Message],
            tools: Option<&[Tool]>,
            options: &InvokeOptions,
        ) -> Result<LlmResponse> {
            self.inner.invoke(messages, tools, options).await
        }
    }

    #[tokio::test]
    async fn module_forwards_identity_and_close() {
        let echo = EchoProvider::new("stub");
        let closed = echo.close_counter();
        let outer = Passthrough {
            inner: Box::new(Passthrough {
                inner: Box::new(echo),
            }),
        };

        assert_eq!(outer.name(), "stub");
        assert_eq!(outer.model_name(), "stub-model");
        assert!(outer.validate_config());
        assert_eq!(
            stack_layers(&outer),
            vec!["passthrough", "passthrough", "adapter"]
        );

        let resp = outer
            .invoke(&[Message::user("hello")], None, &InvokeOptions::new())
            .await
            .unwrap();
        assert_eq!(resp.content.as_deref(), Some("hello"));

        outer.close().await.unwrap();
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
