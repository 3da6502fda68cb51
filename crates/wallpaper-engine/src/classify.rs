//! Best-effort mapping from an unstructured failure message to a [`FailureKind`].
//!
//! The remote service exposes no structured error contract the client can rely on, so
//! classification matches lowercase substrings of the full error chain. Rows are tried
//! in order and the first row with a matching needle wins; anything else is `Unknown`.
//! Swap this table for a status-code lookup if the service ever provides one.

use crate::error::{FailureKind, GenerationError};

/// Needles are lowercase; the haystack is lowercased before matching.
pub const CLASSIFICATION_TABLE: &[(FailureKind, &[&str])] = &[
    (FailureKind::InvalidCredential, &["api_key", "api key not valid"]),
    (
        FailureKind::SafetyRejected,
        &["safety", "prohibited_content", "blocklist"],
    ),
    (
        FailureKind::RateLimited,
        &["429", "rate limit", "resource_exhausted"],
    ),
    (
        FailureKind::ServiceUnavailable,
        &["500", "503", "server error"],
    ),
    (FailureKind::InvalidRequest, &["invalid"]),
];

pub fn classify(message: &str) -> FailureKind {
    let haystack = message.to_ascii_lowercase();
    CLASSIFICATION_TABLE
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| haystack.contains(needle)))
        .map(|(kind, _)| *kind)
        .unwrap_or(FailureKind::Unknown)
}

/// Classifies a transport failure, keeping its flattened chain as the detail.
pub fn classify_error(err: &anyhow::Error) -> GenerationError {
    let detail = error_chain_text(err, 1024);
    GenerationError::remote(classify(&detail), detail)
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
