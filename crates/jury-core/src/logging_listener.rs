//! Listener that writes every lifecycle event to `tracing`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chart::{render_score_chart, render_timeline};
use crate::context::{BatchExecutionContext, ModelExecutionContext, ModelExecutionResult};
use crate::harness::{ModelExclusionEvent, StepReport};
use crate::listener::{ExecutionListener, ListenerResult};
use crate::result::AggregatedExecutionResult;

/// Default chart width in cells.
pub const DEFAULT_CHART_WIDTH: usize = 40;

/// Logs lifecycle events and, after aggregation, the score chart and
/// timeline. Holds no per-evaluation state, so one instance is shared.
#[derive(Debug, Clone)]
pub struct LoggingListener {
    chart_width: usize,
    charts: bool,
}

impl Default for LoggingListener {
    fn default() -> Self {
        Self {
            chart_width: DEFAULT_CHART_WIDTH,
            charts: true,
        }
    }
}

impl LoggingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chart_width(mut self, width: usize) -> Self {
        self.chart_width = width;
        self
    }

    /// Skip chart rendering; only the one-line events are logged.
    pub fn without_charts(mut self) -> Self {
        self.charts = false;
        self
    }

    pub fn into_listener(self) -> Arc<dyn ExecutionListener> {
        Arc::new(self)
    }
}

impl ExecutionListener for LoggingListener {
    fn name(&self) -> &str {
        "logging"
    }

    // After default-order listeners.
    fn order(&self) -> i32 {
        100
    }

    fn before_all_executions(&self, context: &BatchExecutionContext) -> ListenerResult {
        info!(
            metric = %context.metric_name,
            models = ?context.model_ids,
            "dispatching batch"
        );
        Ok(())
    }

    fn before_execution(&self, context: &ModelExecutionContext) -> ListenerResult {
        debug!(
            metric = %context.metric_name(),
            model_id = %context.model_id(),
            execution_id = %context.execution_id(),
            "model call started"
        );
        Ok(())
    }

    fn after_execution(&self, result: &ModelExecutionResult) -> ListenerResult {
        let outcome = &result.result;
        match outcome.value() {
            Some(scored) => debug!(
                model_id = %outcome.model_id(),
                score = scored.score,
                duration_ms = outcome.duration().as_millis() as u64,
                "model call succeeded"
            ),
            None => warn!(
                model_id = %outcome.model_id(),
                error = %outcome.error().map(|e| e.to_string()).unwrap_or_default(),
                duration_ms = outcome.duration().as_millis() as u64,
                "model call failed"
            ),
        }
        Ok(())
    }

    fn after_aggregation(&self, result: &AggregatedExecutionResult<()>) -> ListenerResult {
        info!(
            metric = %result.metric_name,
            strategy = %result.strategy,
            score = result.aggregated_score,
            success_rate = result.success_rate(),
            "aggregated"
        );
        if self.charts {
            info!(
                "\n{}\n{}",
                render_score_chart(result, self.chart_width),
                render_timeline(&result.results, self.chart_width)
            );
        }
        Ok(())
    }

    fn before_step(&self, step_name: &str, index: usize, total: usize) -> ListenerResult {
        debug!(step = %step_name, "step {}/{} started", index + 1, total);
        Ok(())
    }

    fn after_step(&self, report: &StepReport) -> ListenerResult {
        info!(
            metric = %report.metric_name,
            step = %report.step_name,
            kind = %report.kind,
            succeeded = report.success_count(),
            failed = report.failure_count(),
            max_duration_ms = report.max_duration().as_millis() as u64,
            "step finished"
        );
        Ok(())
    }

    fn on_model_excluded(&self, event: &ModelExclusionEvent) -> ListenerResult {
        warn!(
            model_id = %event.model_id,
            step = %event.step_name,
            step_index = event.step_index,
            error = %event.error,
            "model excluded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::result::{ModelResult, Scored};
    use chrono::Utc;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn aggregation_logs_chart() {
        let result = AggregatedExecutionResult::new(
            "relevance",
            "AVERAGE",
            0.8,
            vec![ModelResult::success(
                "judge-a",
                Scored::new((), 0.8),
                Duration::from_millis(12),
                None,
                Utc::now(),
            )],
        );
        LoggingListener::new().after_aggregation(&result).unwrap();
        assert!(logs_contain("aggregated"));
        assert!(logs_contain("relevance (AVERAGE)"));
    }

    #[traced_test]
    #[test]
    fn exclusion_logged_as_warning() {
        let event = ModelExclusionEvent {
            model_id: "judge-b".to_string(),
            step_name: "verify".to_string(),
            step_index: 1,
            error: ModelError::invocation("judge-b", "rate limited"),
        };
        LoggingListener::new().on_model_excluded(&event).unwrap();
        assert!(logs_contain("model excluded"));
        assert!(logs_contain("judge-b"));
    }

    #[test]
    fn shared_across_evaluations() {
        assert!(LoggingListener::new().scoped().is_none());
        assert_eq!(LoggingListener::new().name(), "logging");
    }
}
