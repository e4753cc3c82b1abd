use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Result of an alert evaluation.
///
/// This is *not* a domain event. It is an operational signal that higher
/// layers (infra/API) can persist, display, or broadcast without mutating
/// domain state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertReport {
    /// Number of conditions that fired.
    pub fired: u32,

    /// Optional human-readable summary.
    pub summary: Option<String>,

    /// Free-form metadata (alert kind, per-alert rows, thresholds, etc).
    pub metadata: JsonValue,
}

impl AlertReport {
    pub fn new(fired: u32) -> Self {
        Self {
            fired,
            summary: None,
            metadata: JsonValue::Null,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}
