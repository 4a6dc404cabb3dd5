//! 内容安全模块：PII 检测与脱敏、请求规范化与签名。
//!
//! # Guardrails Module
//!
//! Building blocks used by the security module:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`PiiDetector`] | Detection backend trait |
//! | [`RegexPiiDetector`] | Built-in SSN / card / email / phone / IPv4 detector plus custom patterns |
//! | [`redact`] | Replace detected spans with `[PII:<TYPE>]` markers |
//! | [`canonicalize`] | Byte-stable encoding of a request |
//! | [`RequestSigner`] | Keyed-hash signature over canonical bytes |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_stack::guardrails::{redact, PiiDetector, RegexPiiDetector};
//!
//! let detector = RegexPiiDetector::new();
//! let text = "My SSN is 123-45-6789";
//! let matches = detector.detect(text);
//! assert_eq!(redact(text, &matches), "My SSN is [PII:SSN]");
//! ```

mod pii;
mod signing;

pub use pii::{redact, redact_with, CustomPattern, PiiDetector, PiiMatch, RegexPiiDetector};
pub use signing::{
    canonicalize, create_signer, HmacSigner, RequestSigner, SigningAlgorithm,
    DEFAULT_SIGNING_KEY_ENV,
};
