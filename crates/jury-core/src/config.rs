//! Executor configuration.

use serde::{Deserialize, Serialize};

use crate::aggregator::ScoreAggregator;
use crate::error::{JuryError, Result};

/// Tunables for [`MultiModelExecutor`](crate::executor::MultiModelExecutor).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of model calls in flight per batch. `None` dispatches
    /// every model at once.
    pub max_concurrency: Option<usize>,

    /// Aggregator used by `execute_default`.
    pub default_aggregator: ScoreAggregator,
}

impl ExecutorConfig {
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_default_aggregator(mut self, aggregator: ScoreAggregator) -> Self {
        self.default_aggregator = aggregator;
        self
    }

    /// Reject values the executor cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == Some(0) {
            return Err(JuryError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if let ScoreAggregator::Consensus { tolerance } = self.default_aggregator {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(JuryError::Config(format!(
                    "consensus tolerance must be a non-negative number, got {tolerance}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded_average() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_concurrency, None);
        assert_eq!(config.default_aggregator, ScoreAggregator::Average);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = ExecutorConfig::default().with_max_concurrency(0);
        assert!(matches!(config.validate(), Err(JuryError::Config(_))));
    }

    #[test]
    fn negative_tolerance_rejected() {
        let config =
            ExecutorConfig::default().with_default_aggregator(ScoreAggregator::consensus(-0.1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let config: ExecutorConfig = serde_json::from_value(serde_json::json!({
            "default_aggregator": { "type": "median" }
        }))
        .unwrap();
        assert_eq!(config.default_aggregator, ScoreAggregator::Median);
        assert_eq!(config.max_concurrency, None);
    }
}
