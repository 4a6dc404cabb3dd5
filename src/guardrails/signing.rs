//! Canonical request serialization and keyed-hash signing.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::secrets::SecretSource;
use crate::types::{Message, Tool};
use crate::{Error, ErrorContext, Result};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SIGNING_KEY_ENV: &str = "AI_LIB_SIGNING_KEY";

/// Supported (and recognised) signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    HmacSha256,
    /// Recognised so misconfiguration gets a precise message, but not implemented.
    EcdsaP256,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::HmacSha256 => "hmac-sha256",
            SigningAlgorithm::EcdsaP256 => "ecdsa-p256",
        }
    }
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        SigningAlgorithm::HmacSha256
    }
}

impl FromStr for SigningAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hmac-sha256" => Ok(SigningAlgorithm::HmacSha256),
            "ecdsa-p256" => Ok(SigningAlgorithm::EcdsaP256),
            other => Err(Error::configuration_with_context(
                format!(
                    "unsupported signing algorithm '{}'; supported: 'hmac-sha256'",
                    other
                ),
                ErrorContext::new()
                    .with_field_path("signing_algorithm")
                    .with_source("request_signer"),
            )),
        }
    }
}

/// Signing backend.
pub trait RequestSigner: Send + Sync {
    fn algorithm(&self) -> SigningAlgorithm;

    /// Hex-encoded signature of `payload`.
    fn sign(&self, payload: &[u8]) -> String;
}

/// HMAC-SHA256 signer.
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").field("key", &"<redacted>").finish()
    }
}

impl RequestSigner for HmacSigner {
    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::HmacSha256
    }

    fn sign(&self, payload: &[u8]) -> String {
        // HMAC accepts keys of any length
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Build a signer for `algorithm` with the key named `key_name`.
pub fn create_signer(
    algorithm: &str,
    key_name: &str,
    secrets: &dyn SecretSource,
) -> Result<Box<dyn RequestSigner>> {
    let algorithm = SigningAlgorithm::from_str(algorithm)?;
    let key = secrets.get_secret(key_name).ok_or_else(|| {
        Error::configuration_with_context(
            format!("signing key '{}' is not set", key_name),
            ErrorContext::new()
                .with_field_path("signing_key_env")
                .with_source("request_signer"),
        )
    })?;
    match algorithm {
        SigningAlgorithm::HmacSha256 => Ok(Box::new(HmacSigner::new(key.into_bytes()))),
        SigningAlgorithm::EcdsaP256 => Err(Error::configuration_with_context(
            "signing algorithm 'ecdsa-p256' is not supported by this build",
            ErrorContext::new()
                .with_field_path("signing_algorithm")
                .with_source("request_signer"),
        )),
    }
}

/// Deterministic bytes for the semantic request content.
///
/// Object keys are sorted at every depth and no whitespace is emitted, so two
/// logically identical requests always produce identical bytes. Absent and
/// empty tool lists are equivalent.
pub fn canonicalize(messages: &[Message], tools: Option<&[Tool]>, model: &str) -> Result<Vec<u8>> {
    let doc = serde_json::json!({
        "messages": serde_json::to_value(messages)?,
        "model": model,
        "tools": serde_json::to_value(tools.unwrap_or(&[]))?,
    });
    let mut out = String::new();
    write_canonical(&doc, &mut out);
    Ok(out.into_bytes())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serializing a string cannot fail
                let _ = write!(out, "{}", Value::String((*key).clone()));
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}
