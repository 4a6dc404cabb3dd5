//! Test doubles shared by unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{ProviderConfig, ProviderSettings};
use crate::error::ApiError;
use crate::provider::{InvokeOptions, LlmProvider};
use crate::types::{LlmResponse, Message, Tool};
use crate::{Error, Result};

type Script = Box<dyn Fn(usize) -> Result<LlmResponse> + Send + Sync>;

/// Provider that answers with the text of the last message it received,
/// or with whatever a script returns for the n-th call.
pub struct EchoProvider {
    name: String,
    model: String,
    calls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Vec<Message>>>>,
    script: Option<Script>,
    reply: Option<String>,
}

impl EchoProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            model: format!("{}-model", name),
            calls: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
            script: None,
            reply: None,
        }
    }

    /// Always answer with `text` instead of echoing.
    pub fn replying(mut self, text: &str) -> Self {
        self.reply = Some(text.to_string());
        self
    }

    pub fn scripted(
        mut self,
        script: impl Fn(usize) -> Result<LlmResponse> + Send + Sync + 'static,
    ) -> Self {
        self.script = Some(Box::new(script));
        self
    }

    /// Fails every call with the given status code.
    pub fn failing(name: &str, status: u16) -> Self {
        let provider = name.to_string();
        Self::new(name).scripted(move |_| Err(api_error(status, &provider)))
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }

    pub fn received(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        self.received.clone()
    }
}

pub fn api_error(status: u16, provider: &str) -> Error {
    Error::Api(ApiError::new(status, format!("status {}", status), provider))
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        messages: &[Message],
        _tools: Option<&[Tool]>,
        _options: &InvokeOptions,
    ) -> Result<LlmResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.received
            .lock()
            .expect("received lock")
            .push(messages.to_vec());
        if let Some(script) = &self.script {
            return script(n);
        }
        let text = match &self.reply {
            Some(r) => r.clone(),
            None => messages.last().map(|m| m.text()).unwrap_or_default(),
        };
        Ok(LlmResponse::text(text, self.model.clone()))
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider config whose key lives under `TEST_API_KEY`.
pub fn provider_config(api_format: &str, base_url: &str) -> ProviderConfig {
    ProviderConfig::new(ProviderSettings {
        api_format: api_format.into(),
        base_url: base_url.into(),
        api_key_env: "TEST_API_KEY".into(),
        api_key_required: true,
        default_model: "test-model".into(),
        default_temperature: 0.7,
    })
}
