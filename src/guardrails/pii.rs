//! PII (Personally Identifiable Information) detection and redaction

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, ErrorContext, Result};

/// One detected span. Offsets are byte offsets into the scanned text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PiiMatch {
    pub pii_type: String,
    pub start: usize,
    pub end: usize,
    pub matched_text: String,
}

impl PiiMatch {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn overlaps(&self, other: &PiiMatch) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Detection backend.
///
/// Implementations must return non-overlapping matches sorted by start offset.
pub trait PiiDetector: Send + Sync {
    fn detect(&self, text: &str) -> Vec<PiiMatch>;
}

/// Caller-supplied pattern, appended after the built-ins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPattern {
    pub name: String,
    pub pattern: String,
}

impl CustomPattern {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

static BUILTIN_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("SSN", r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b"),
        (
            "CREDIT_CARD",
            r"\b[0-9]{4}[\s-]?[0-9]{4}[\s-]?[0-9]{4}[\s-]?[0-9]{4}\b",
        ),
        ("EMAIL", r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b"),
        (
            "PHONE",
            r"\b(?:\+?1[-.\s]?)?\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b",
        ),
        ("IPV4", r"\b[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\b"),
    ]
    .into_iter()
    .map(|(name, pat)| (name, Regex::new(pat).expect("built-in PII pattern")))
    .collect()
});

/// Regex-based detector.
///
/// Ships with SSN, credit card, email, phone and IPv4 patterns. Custom
/// patterns add detection surface but never take precedence over a built-in
/// on an equal-length tie.
#[derive(Debug, Clone)]
pub struct RegexPiiDetector {
    patterns: Vec<(String, Regex)>,
}

impl RegexPiiDetector {
    pub fn new() -> Self {
        Self {
            patterns: BUILTIN_PATTERNS
                .iter()
                .map(|(name, re)| (name.to_string(), re.clone()))
                .collect(),
        }
    }

    pub fn with_custom_patterns(custom: &[CustomPattern]) -> Result<Self> {
        let mut detector = Self::new();
        for entry in custom {
            let compiled = Regex::new(&entry.pattern).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid regex for custom PII pattern '{}': {}", entry.name, e),
                    ErrorContext::new()
                        .with_field_path("pii_custom_patterns")
                        .with_source("pii_detector"),
                )
            })?;
            detector.patterns.push((entry.name.clone(), compiled));
        }
        Ok(detector)
    }

    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl Default for RegexPiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PiiDetector for RegexPiiDetector {
    fn detect(&self, text: &str) -> Vec<PiiMatch> {
        if text.is_empty() {
            return Vec::new();
        }

        // (match, pattern index)
        let mut candidates: Vec<(PiiMatch, usize)> = Vec::new();
        for (idx, (pii_type, re)) in self.patterns.iter().enumerate() {
            for m in re.find_iter(text) {
                if m.start() == m.end() {
                    continue;
                }
                candidates.push((
                    PiiMatch {
                        pii_type: pii_type.clone(),
                        start: m.start(),
                        end: m.end(),
                        matched_text: m.as_str().to_string(),
                    },
                    idx,
                ));
            }
        }

        // Longest first; ties by earliest start, then registration order.
        candidates.sort_by(|(a, ai), (b, bi)| {
            b.len()
                .cmp(&a.len())
                .then(a.start.cmp(&b.start))
                .then(ai.cmp(bi))
        });

        let mut selected: Vec<PiiMatch> = Vec::new();
        for (candidate, _) in candidates {
            if selected.iter().all(|s| !s.overlaps(&candidate)) {
                selected.push(candidate);
            }
        }
        selected.sort_by_key(|m| m.start);
        selected
    }
}

/// Replace each match with `[PII:<TYPE>]`.
///
/// Replacements are applied from the last offset to the first so earlier
/// offsets stay valid. Spans that are out of range, not on a char boundary,
/// or overlap an already applied span are skipped.
pub fn redact(text: &str, matches: &[PiiMatch]) -> String {
    if matches.is_empty() {
        return text.to_string();
    }
    let mut ordered: Vec<&PiiMatch> = matches.iter().collect();
    ordered.sort_by(|a, b| b.start.cmp(&a.start));

    let mut result = text.to_string();
    let mut floor = text.len();
    for m in ordered {
        if m.start >= m.end || m.end > floor || text.get(m.start..m.end).is_none() {
            continue;
        }
        result.replace_range(m.start..m.end, &format!("[PII:{}]", m.pii_type));
        floor = m.start;
    }
    result
}

/// Detect and redact in one step.
pub fn redact_with(detector: &dyn PiiDetector, text: &str) -> String {
    let matches = detector.detect(text);
    if matches.is_empty() {
        return text.to_string();
    }
    redact(text, &matches)
}
