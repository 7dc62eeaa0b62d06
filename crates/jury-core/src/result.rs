//! Result types produced by a multi-model dispatch.
//!
//! - [`ModelResult`]: outcome of one model call for one step
//! - [`Scored`]: a parsed response paired with its extracted score
//! - [`AggregatedExecutionResult`]: everything one batch produced
//! - [`ScoreStatistics`]: min/max/average/count over successful scores

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Outcome of a single model invocation.
///
/// Exactly one of value or error exists, by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelResult<T> {
    Success {
        model_id: String,
        value: T,
        duration: Duration,
        request: Option<String>,
        started_at: DateTime<Utc>,
    },
    Failure {
        model_id: String,
        error: ModelError,
        duration: Duration,
        request: Option<String>,
        started_at: DateTime<Utc>,
    },
}

impl<T> ModelResult<T> {
    pub fn success(
        model_id: impl Into<String>,
        value: T,
        duration: Duration,
        request: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        ModelResult::Success {
            model_id: model_id.into(),
            value,
            duration,
            request,
            started_at,
        }
    }

    pub fn failure(
        model_id: impl Into<String>,
        error: ModelError,
        duration: Duration,
        request: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        ModelResult::Failure {
            model_id: model_id.into(),
            error,
            duration,
            request,
            started_at,
        }
    }

    pub fn model_id(&self) -> &str {
        match self {
            ModelResult::Success { model_id, .. } | ModelResult::Failure { model_id, .. } => {
                model_id
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ModelResult::Success { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            ModelResult::Success { value, .. } => Some(value),
            ModelResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ModelError> {
        match self {
            ModelResult::Success { .. } => None,
            ModelResult::Failure { error, .. } => Some(error),
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            ModelResult::Success { duration, .. } | ModelResult::Failure { duration, .. } => {
                *duration
            }
        }
    }

    /// The prompt or text sent to the model, kept for audit and reports.
    pub fn request(&self) -> Option<&str> {
        match self {
            ModelResult::Success { request, .. } | ModelResult::Failure { request, .. } => {
                request.as_deref()
            }
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        match self {
            ModelResult::Success { started_at, .. } | ModelResult::Failure { started_at, .. } => {
                *started_at
            }
        }
    }

    /// Consume the result and return the value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            ModelResult::Success { value, .. } => Some(value),
            ModelResult::Failure { .. } => None,
        }
    }

    /// Transform the success value, keeping model ID, timing and request.
    pub fn map<U, F>(self, f: F) -> ModelResult<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            ModelResult::Success {
                model_id,
                value,
                duration,
                request,
                started_at,
            } => ModelResult::Success {
                model_id,
                value: f(value),
                duration,
                request,
                started_at,
            },
            ModelResult::Failure {
                model_id,
                error,
                duration,
                request,
                started_at,
            } => ModelResult::Failure {
                model_id,
                error,
                duration,
                request,
                started_at,
            },
        }
    }

    /// Borrowing variant of [`map`](Self::map).
    pub fn map_ref<U, F>(&self, f: F) -> ModelResult<U>
    where
        F: FnOnce(&T) -> U,
    {
        match self {
            ModelResult::Success {
                model_id,
                value,
                duration,
                request,
                started_at,
            } => ModelResult::Success {
                model_id: model_id.clone(),
                value: f(value),
                duration: *duration,
                request: request.clone(),
                started_at: *started_at,
            },
            ModelResult::Failure {
                model_id,
                error,
                duration,
                request,
                started_at,
            } => ModelResult::Failure {
                model_id: model_id.clone(),
                error: error.clone(),
                duration: *duration,
                request: request.clone(),
                started_at: *started_at,
            },
        }
    }
}

/// A parsed model response together with the score extracted from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored<T> {
    pub value: T,
    pub score: f64,
}

impl<T> Scored<T> {
    pub fn new(value: T, score: f64) -> Self {
        Self { value, score }
    }

    /// Drop the payload and keep only the score.
    pub fn score_only(&self) -> Scored<()> {
        Scored {
            value: (),
            score: self.score,
        }
    }
}

/// Summary statistics over the successful scores of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreStatistics {
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub count: usize,
}

impl ScoreStatistics {
    /// Compute statistics; an empty slice yields all zeros.
    pub fn from_scores(scores: &[f64]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let average = scores.iter().sum::<f64>() / scores.len() as f64;
        Self {
            min,
            max,
            average,
            count: scores.len(),
        }
    }
}

/// Final product of one batch dispatch.
///
/// # Invariants
///
/// `results` holds one entry per requested model, in request order, whether
/// the model succeeded or failed. `aggregated_score` was computed from the
/// successful scores only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedExecutionResult<T> {
    pub metric_name: String,
    pub strategy: String,
    pub aggregated_score: f64,
    pub results: Vec<ModelResult<Scored<T>>>,
    pub completed_at: DateTime<Utc>,
}

impl<T> AggregatedExecutionResult<T> {
    pub fn new(
        metric_name: impl Into<String>,
        strategy: impl Into<String>,
        aggregated_score: f64,
        results: Vec<ModelResult<Scored<T>>>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            strategy: strategy.into(),
            aggregated_score,
            results,
            completed_at: Utc::now(),
        }
    }

    pub fn successful(&self) -> impl Iterator<Item = &ModelResult<Scored<T>>> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ModelResult<Scored<T>>> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.successful().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    /// Successful results divided by total results; 0.0 when empty.
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.success_count() as f64 / self.results.len() as f64
        }
    }

    /// Wall time of the batch: models run concurrently, so this is the
    /// slowest model's duration, not the sum.
    pub fn total_duration(&self) -> Duration {
        self.results
            .iter()
            .map(|r| r.duration())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Successful scores in model order.
    pub fn scores(&self) -> Vec<f64> {
        self.results
            .iter()
            .filter_map(|r| r.value().map(|s| s.score))
            .collect()
    }

    pub fn statistics(&self) -> ScoreStatistics {
        ScoreStatistics::from_scores(&self.scores())
    }

    /// Per-model score lookup. `None` when the model failed or is unknown.
    pub fn score_for(&self, model_id: &str) -> Option<f64> {
        self.results
            .iter()
            .find(|r| r.model_id() == model_id)
            .and_then(|r| r.value().map(|s| s.score))
    }

    /// Copy of this result with the parsed payloads dropped.
    pub fn score_view(&self) -> AggregatedExecutionResult<()> {
        AggregatedExecutionResult {
            metric_name: self.metric_name.clone(),
            strategy: self.strategy.clone(),
            aggregated_score: self.aggregated_score,
            results: self
                .results
                .iter()
                .map(|r| r.map_ref(Scored::score_only))
                .collect(),
            completed_at: self.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(model: &str, score: f64, ms: u64) -> ModelResult<Scored<()>> {
        ModelResult::success(
            model,
            Scored::new((), score),
            Duration::from_millis(ms),
            Some("prompt".to_string()),
            Utc::now(),
        )
    }

    fn failed(model: &str, ms: u64) -> ModelResult<Scored<()>> {
        ModelResult::failure(
            model,
            ModelError::invocation(model, "boom"),
            Duration::from_millis(ms),
            Some("prompt".to_string()),
            Utc::now(),
        )
    }

    #[test]
    fn success_and_failure_expose_exactly_one_of_value_or_error() {
        let s = ok("a", 0.5, 10);
        assert!(s.is_success());
        assert!(s.value().is_some());
        assert!(s.error().is_none());

        let f = failed("b", 10);
        assert!(!f.is_success());
        assert!(f.value().is_none());
        assert!(f.error().is_some());
    }

    #[test]
    fn success_rate_three_of_four() {
        let result = AggregatedExecutionResult::new(
            "m",
            "AVERAGE",
            0.5,
            vec![ok("a", 0.5, 1), ok("b", 0.5, 1), ok("c", 0.5, 1), failed("d", 1)],
        );
        assert_eq!(result.success_rate(), 0.75);
        assert_eq!(result.success_count(), 3);
        assert_eq!(result.failure_count(), 1);
    }

    #[test]
    fn success_rate_edges() {
        let empty: AggregatedExecutionResult<()> =
            AggregatedExecutionResult::new("m", "AVERAGE", 0.0, vec![]);
        assert_eq!(empty.success_rate(), 0.0);
        assert_eq!(empty.total_duration(), Duration::ZERO);

        let all = AggregatedExecutionResult::new("m", "AVERAGE", 1.0, vec![ok("a", 1.0, 1)]);
        assert_eq!(all.success_rate(), 1.0);
    }

    #[test]
    fn total_duration_is_max_not_sum() {
        let result = AggregatedExecutionResult::new(
            "m",
            "AVERAGE",
            0.5,
            vec![ok("a", 0.5, 100), ok("b", 0.5, 300), failed("c", 200)],
        );
        assert_eq!(result.total_duration(), Duration::from_millis(300));
    }

    #[test]
    fn statistics_ignore_failures() {
        let result = AggregatedExecutionResult::new(
            "m",
            "AVERAGE",
            0.7,
            vec![ok("a", 0.8, 1), failed("b", 1), ok("c", 0.6, 1)],
        );
        let stats = result.statistics();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 0.6);
        assert_eq!(stats.max, 0.8);
        assert!((stats.average - 0.7).abs() < 1e-12);
        assert_eq!(result.score_for("b"), None);
        assert_eq!(result.score_for("a"), Some(0.8));
    }

    #[test]
    fn statistics_of_nothing_are_zero() {
        assert_eq!(ScoreStatistics::from_scores(&[]), ScoreStatistics::default());
    }

    #[test]
    fn map_preserves_metadata() {
        let started = Utc::now();
        let r = ModelResult::success("a", 2, Duration::from_millis(5), None, started);
        let mapped = r.map(|v| v * 10);
        assert_eq!(mapped.value(), Some(&20));
        assert_eq!(mapped.model_id(), "a");
        assert_eq!(mapped.started_at(), started);
        assert_eq!(mapped.duration(), Duration::from_millis(5));
    }

    #[test]
    fn score_view_keeps_scores() {
        let started = Utc::now();
        let result = AggregatedExecutionResult::new(
            "m",
            "MAX",
            0.9,
            vec![ModelResult::success(
                "a",
                Scored::new("verdict".to_string(), 0.9),
                Duration::from_millis(1),
                None,
                started,
            )],
        );
        let view = result.score_view();
        assert_eq!(view.scores(), vec![0.9]);
        assert_eq!(view.strategy, "MAX");
    }
}
