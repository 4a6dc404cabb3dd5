//! Shared fixtures for integration tests.

#![allow(dead_code)]

use ai_lib_stack::config::{ProviderConfig, ProviderSettings};
use ai_lib_stack::secrets::StaticSecretSource;
use ai_lib_stack::{ApiError, Error, InvokeOptions, LlmProvider, LlmResponse, Message, Tool};
use async_trait::async_trait;
use mockito::{Mock, Server, ServerGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_KEY_ENV: &str = "TEST_API_KEY";
pub const TEST_KEY: &str = "sk-test";

/// Mock HTTP server plus the URL adapters should point at.
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    /// A JSON response on `POST path`, expected exactly `hits` times.
    pub async fn mock_json(&mut self, path: &str, status: usize, body: &str, hits: usize) -> Mock {
        self.server
            .mock("POST", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    pub fn provider_config(&self, api_format: &str) -> ProviderConfig {
        provider_config(api_format, &self.base_url)
    }
}

pub fn provider_config(api_format: &str, base_url: &str) -> ProviderConfig {
    ProviderConfig::new(ProviderSettings {
        api_format: api_format.into(),
        base_url: base_url.into(),
        api_key_env: TEST_KEY_ENV.into(),
        api_key_required: true,
        default_model: "test-model".into(),
        default_temperature: 0.7,
    })
}

pub fn secrets() -> StaticSecretSource {
    StaticSecretSource::new().with_secret(TEST_KEY_ENV, TEST_KEY)
}

pub fn api_error(status: u16, provider: &str) -> Error {
    Error::Api(ApiError::new(status, format!("status {}", status), provider))
}

enum Behaviour {
    Echo,
    Reply(String),
    Fail(u16),
}

/// In-process provider that records what it was sent.
pub struct StubProvider {
    name: String,
    behaviour: Behaviour,
    pub calls: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub received: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl StubProvider {
    fn with(name: &str, behaviour: Behaviour) -> Self {
        Self {
            name: name.to_string(),
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn echo(name: &str) -> Self {
        Self::with(name, Behaviour::Echo)
    }

    pub fn replying(name: &str, text: &str) -> Self {
        Self::with(name, Behaviour::Reply(text.to_string()))
    }

    pub fn failing(name: &str, status: u16) -> Self {
        Self::with(name, Behaviour::Fail(status))
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        "stub-model"
    }

    fn validate_config(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        messages: &[Message],
        _tools: Option<&[Tool]>,
        _options: &InvokeOptions,
    ) -> ai_lib_stack::Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().unwrap().push(messages.to_vec());
        match &self.behaviour {
            Behaviour::Echo => Ok(LlmResponse::text(
                messages.last().map(|m| m.text()).unwrap_or_default(),
                "stub-model",
            )),
            Behaviour::Reply(text) => Ok(LlmResponse::text(text.clone(), "stub-model")),
            Behaviour::Fail(status) => Err(api_error(*status, &self.name)),
        }
    }

    async fn close(&self) -> ai_lib_stack::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
