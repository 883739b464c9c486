//! Rule Engine Error Types

use thiserror::Error;

/// Main error type for rule engine operations.
///
/// Per-call failures never propagate to the intercepted client: the engine
/// degrades the affected call to passthrough and surfaces the error through
/// the audit path only.
#[derive(Debug, Error, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EngineError {
    /// A Modify/Replace template failed to parse as JSON.
    #[error("malformed action template: {detail}")]
    MalformedTemplate { detail: String },

    /// A randomize target payload did not have the expected usage-log shape.
    #[error("malformed usage-log payload: {detail}")]
    MalformedPayload { detail: String },

    /// The rule store could not produce a snapshot.
    #[error("rule store unavailable: {detail}")]
    StoreUnavailable { detail: String },

    /// A rule definition violated a model invariant.
    #[error("invalid rule: {reason}")]
    InvalidRule { reason: String },
}

impl EngineError {
    pub fn malformed_template(detail: impl Into<String>) -> Self {
        Self::MalformedTemplate {
            detail: detail.into(),
        }
    }

    pub fn malformed_payload(detail: impl Into<String>) -> Self {
        Self::MalformedPayload {
            detail: detail.into(),
        }
    }

    pub fn store_unavailable(detail: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            detail: detail.into(),
        }
    }

    pub fn invalid_rule(reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            reason: reason.into(),
        }
    }

    /// Stable kind label used in call records and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MalformedTemplate { .. } => "MalformedTemplate",
            EngineError::MalformedPayload { .. } => "MalformedPayload",
            EngineError::StoreUnavailable { .. } => "StoreUnavailable",
            EngineError::InvalidRule { .. } => "InvalidRule",
        }
    }
}

/// Result type alias for rule engine operations
pub type EngineResult<T> = Result<T, EngineError>;
