//! Structured observability hooks for evaluation lifecycle events.
//!
//! This module provides:
//! - Evaluation-scoped tracing spans via the `EvaluationSpan` RAII guard
//! - Emission functions for key lifecycle events: batch start, model
//!   completion, aggregation, exclusion and step boundaries
//!
//! Events are emitted at `info!`/`debug!` level with an `event` field so they
//! can be filtered as a stream. For JSON output, initialise tracing with
//! [`init_tracing(true, ..)`](crate::telemetry::init_tracing).

use std::time::Duration;

use tracing::{debug, info, warn};

/// RAII guard that enters an evaluation-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = EvaluationSpan::enter("faithfulness", "3f1c...");
/// // All tracing calls now carry metric and evaluation_id.
/// ```
pub struct EvaluationSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvaluationSpan {
    /// Create and enter a span tagged with the metric and evaluation ID.
    pub fn enter(metric: &str, evaluation_id: &str) -> Self {
        Self {
            _span: evaluation_span(metric, evaluation_id).entered(),
        }
    }
}

/// The evaluation span itself, for attaching to a future with
/// [`tracing::Instrument`] instead of entering it on the current thread.
pub fn evaluation_span(metric: &str, evaluation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "jury.evaluation",
        metric = %metric,
        evaluation_id = %evaluation_id
    )
}

/// Emit event: batch dispatched to `model_count` models.
pub fn emit_batch_started(metric: &str, model_count: usize) {
    info!(event = "batch.started", metric = %metric, model_count = model_count);
}

/// Emit event: one model settled.
pub fn emit_model_completed(metric: &str, model_id: &str, duration: Duration, success: bool) {
    debug!(
        event = "model.completed",
        metric = %metric,
        model_id = %model_id,
        duration_ms = duration.as_millis() as u64,
        success = success,
    );
}

/// Emit event: one model failed (warning level).
pub fn emit_model_failed(metric: &str, model_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "model.failed", metric = %metric, model_id = %model_id, error = %error);
}

/// Emit event: batch aggregated into a final score.
pub fn emit_batch_aggregated(
    metric: &str,
    strategy: &str,
    score: f64,
    success_count: usize,
    total: usize,
) {
    info!(
        event = "batch.aggregated",
        metric = %metric,
        strategy = %strategy,
        score = score,
        success_count = success_count,
        total = total,
    );
}

/// Emit event: a model was dropped from a multi-step evaluation.
pub fn emit_model_excluded(metric: &str, model_id: &str, step_name: &str, step_index: usize) {
    warn!(
        event = "model.excluded",
        metric = %metric,
        model_id = %model_id,
        step = %step_name,
        step_index = step_index,
    );
}

/// Emit event: a harness step finished with `survivors` of `entrants` models.
pub fn emit_step_finished(
    metric: &str,
    step_name: &str,
    step_index: usize,
    survivors: usize,
    entrants: usize,
) {
    info!(
        event = "step.finished",
        metric = %metric,
        step = %step_name,
        step_index = step_index,
        survivors = survivors,
        entrants = entrants,
    );
}

/// Emit event: evaluation failed outright (warning level).
pub fn emit_evaluation_failed(metric: &str, error: &dyn std::fmt::Display) {
    warn!(event = "evaluation.failed", metric = %metric, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_span_create() {
        // Just ensure EvaluationSpan::enter doesn't panic
        let _span = EvaluationSpan::enter("faithfulness", "eval-1");
    }
}
