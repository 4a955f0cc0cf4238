//! Error types for the filtering engine.
//!
//! None of these ever reach the host page: every caller recovers by falling
//! back to pass-through behavior for the affected request or node.

use crate::guard::GuardViolation;

/// Error type for engine configuration and payload processing.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(#[source] serde_json::Error),
    #[error("Invalid signature pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Payload is not structured JSON: {0}")]
    PayloadParse(#[source] serde_json::Error),
    #[error("Payload could not be serialized: {0}")]
    PayloadSerialize(#[source] serde_json::Error),
    #[error("Response body is not JSON (content-type '{0}')")]
    NotJson(String),
    #[error("Cleaned payload rejected: {}", format_violations(.0))]
    IntegrityViolation(Vec<GuardViolation>),
    #[error("Interception failed: {0}")]
    Interception(String),
}

fn format_violations(violations: &[GuardViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
