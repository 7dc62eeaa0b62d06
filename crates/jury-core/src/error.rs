//! Error taxonomy for the judging engine.
//!
//! Two layers:
//! - [`ModelError`] describes why one model failed one call. It is absorbed
//!   into a failed [`ModelResult`](crate::result::ModelResult) and never
//!   propagates on its own.
//! - [`JuryError`] describes failures that change the outcome of an
//!   evaluation (no models, no successes, no consensus, bad config).

use serde::{Deserialize, Serialize};

/// Why a single model invocation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelError {
    #[error("model {model_id} invocation failed: {message}")]
    Invocation { model_id: String, message: String },

    #[error("model {model_id} timed out after {elapsed_ms}ms")]
    Timeout { model_id: String, elapsed_ms: u64 },

    #[error("model {model_id} returned an unparseable response: {message}")]
    Parse { model_id: String, message: String },

    #[error("model {model_id} produced a non-finite score: {score}")]
    InvalidScore { model_id: String, score: f64 },

    #[error("no client registered for model {model_id}")]
    UnknownModel { model_id: String },

    #[error("model {model_id} does not support {operation}")]
    Unsupported { model_id: String, operation: String },

    #[error("model {model_id} task panicked: {message}")]
    Panicked { model_id: String, message: String },
}

impl ModelError {
    /// Convenience constructor for the common "the call itself failed" case.
    pub fn invocation(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        ModelError::Invocation {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// The model this error is attributed to.
    pub fn model_id(&self) -> &str {
        match self {
            ModelError::Invocation { model_id, .. }
            | ModelError::Timeout { model_id, .. }
            | ModelError::Parse { model_id, .. }
            | ModelError::InvalidScore { model_id, .. }
            | ModelError::UnknownModel { model_id }
            | ModelError::Unsupported { model_id, .. }
            | ModelError::Panicked { model_id, .. } => model_id,
        }
    }
}

/// Outcome-level errors raised to the caller of an evaluation.
#[derive(Debug, thiserror::Error)]
pub enum JuryError {
    #[error("no models configured for metric {metric}")]
    NoModelsConfigured { metric: String },

    #[error("all models failed for metric {metric}")]
    AllModelsFailed { metric: String },

    #[error("no consensus: scores range from {min} to {max}, exceeding tolerance {tolerance}")]
    NoConsensus { min: f64, max: f64, tolerance: f64 },

    #[error("cannot aggregate an empty score list")]
    EmptyScores,

    #[error("invalid aggregator: {0}")]
    InvalidAggregator(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by a listener callback. Always logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        ListenerError(message.into())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, JuryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_models_failed_names_the_metric() {
        let err = JuryError::AllModelsFailed {
            metric: "faithfulness".to_string(),
        };
        assert!(err.to_string().contains("faithfulness"));
    }

    #[test]
    fn no_consensus_reports_range_and_tolerance() {
        let err = JuryError::NoConsensus {
            min: 0.2,
            max: 0.9,
            tolerance: 0.1,
        };
        let msg = err.to_string();
        assert!(msg.contains("0.2"));
        assert!(msg.contains("0.9"));
        assert!(msg.contains("0.1"));
    }

    #[test]
    fn model_error_exposes_model_id() {
        let err = ModelError::Timeout {
            model_id: "gpt-x".to_string(),
            elapsed_ms: 30_000,
        };
        assert_eq!(err.model_id(), "gpt-x");
        assert!(err.to_string().contains("30000ms"));
    }

    #[test]
    fn model_error_serializes_with_kind_tag() {
        let err = ModelError::invocation("m1", "boom");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "invocation");
        assert_eq!(json["model_id"], "m1");
    }
}
