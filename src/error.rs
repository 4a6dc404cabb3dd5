use std::fmt;
use thiserror::Error;

/// Maximum body length rendered by [`ApiError`]'s `Display` impl.
const BODY_DISPLAY_LIMIT: usize = 500;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "retry.max_retries", "provider.base_url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "retry_module", "registry")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Non-success response from a provider.
///
/// The full body is kept on the value; only the human-readable rendering is
/// truncated so verbose payloads do not end up in logs.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status_code: u16,
    pub body: String,
    pub provider: String,
    /// Seconds to wait before retrying, parsed from a numeric `retry-after` header.
    pub retry_after: Option<f64>,
}

impl ApiError {
    pub fn new(status_code: u16, body: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
            provider: provider.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: f64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = truncate_chars(&self.body, BODY_DISPLAY_LIMIT);
        write!(
            f,
            "{} API error (HTTP {}): {}",
            self.provider, self.status_code, body
        )?;
        if let Some(secs) = self.retry_after {
            write!(f, " (retry after {:.1}s)", secs)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Transport-level failures (connection refused, timeouts, broken bodies).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection and timeout failures are transient by nature.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_connect() || e.is_timeout(),
            TransportError::Connect(_) | TransportError::Timeout(_) => true,
            TransportError::Other(_) => false,
        }
    }
}

/// Unified error type for the call contract and every module around it.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration. Always raised at construction time.
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    /// Tool-call arguments the provider returned could not be parsed.
    #[error("Failed to parse tool call arguments: {source}")]
    Parse {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a configuration error without extra context.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn parse(raw: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Parse {
            raw: raw.into(),
            source,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }

    /// Status code when this is a provider API error.
    pub fn status_code(&self) -> Option<u16> {
        self.as_api().map(|e| e.status_code)
    }
}
