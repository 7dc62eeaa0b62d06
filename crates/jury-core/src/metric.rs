//! Long-lived, named metric bound to a set of judge models.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregator::ScoreAggregator;
use crate::error::Result;
use crate::executor::{ExecutionRequest, MultiModelExecutor};
use crate::harness::{
    Cohort, EvaluationPlan, EvaluationStep, ModelExclusionEvent, StepHarness, StepReport,
};
use crate::listener::{ExecutionListener, ListenerRegistry};
use crate::obs;
use crate::result::AggregatedExecutionResult;

/// What a metric evaluation produced.
#[derive(Debug, Clone)]
pub struct MetricEvaluation<T> {
    pub score: f64,
    pub aggregated: AggregatedExecutionResult<T>,
    /// Models dropped mid-evaluation. Always empty for single-batch metrics.
    pub exclusions: Vec<ModelExclusionEvent>,
    /// Per-step reports. Always empty for single-batch metrics.
    pub steps: Vec<StepReport>,
}

/// A metric evaluated by several models at once.
///
/// Listeners registered here are scoped per call to
/// [`evaluate`](Self::evaluate) / [`evaluate_steps`](Self::evaluate_steps),
/// so one `JuryMetric` can serve concurrent evaluations.
#[derive(Debug)]
pub struct JuryMetric {
    name: String,
    executor: Arc<MultiModelExecutor>,
    model_ids: Vec<String>,
    aggregator: ScoreAggregator,
    listeners: ListenerRegistry,
}

impl JuryMetric {
    /// Uses the executor's default aggregator until
    /// [`with_aggregator`](Self::with_aggregator) says otherwise.
    pub fn new(
        name: impl Into<String>,
        executor: Arc<MultiModelExecutor>,
        model_ids: Vec<String>,
    ) -> Self {
        let aggregator = executor.config().default_aggregator.clone();
        Self {
            name: name.into(),
            executor,
            model_ids,
            aggregator,
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn with_aggregator(mut self, aggregator: ScoreAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_ids(&self) -> &[String] {
        &self.model_ids
    }

    pub fn aggregator(&self) -> &ScoreAggregator {
        &self.aggregator
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn add_listener(&self, listener: Arc<dyn ExecutionListener>) {
        self.listeners.register(listener);
    }

    pub fn remove_listener(&self, name: &str) -> bool {
        self.listeners.unregister(name)
    }

    /// Ask every model the same prompt and aggregate `extract`ed scores.
    pub async fn evaluate<T, F>(&self, prompt: &str, extract: F) -> Result<MetricEvaluation<T>>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        let listeners = self.listeners.scoped_set();
        let request = ExecutionRequest::new(&self.name, prompt, self.model_ids.clone(), extract);
        let span = obs::evaluation_span(&self.name, &Uuid::new_v4().to_string());

        let aggregated = self
            .executor
            .execute_with_listeners(request, &self.aggregator, &listeners)
            .instrument(span)
            .await?;

        Ok(MetricEvaluation {
            score: aggregated.aggregated_score,
            aggregated,
            exclusions: Vec::new(),
            steps: Vec::new(),
        })
    }

    /// Run `steps` over every model, starting each from `initial_state`,
    /// then score the survivors with `score`.
    pub async fn evaluate_steps<S, F>(
        &self,
        initial_state: S,
        steps: Vec<EvaluationStep<S>>,
        score: F,
    ) -> Result<MetricEvaluation<S>>
    where
        S: Clone + Send + 'static,
        F: Fn(&S) -> f64 + Send + Sync + 'static,
    {
        let listeners = self.listeners.scoped_set();
        let plan = EvaluationPlan::new(
            self.name.clone(),
            Cohort::uniform(&self.model_ids, initial_state),
            steps,
            score,
        )
        .with_aggregator(self.aggregator.clone());
        let span = obs::evaluation_span(&self.name, &Uuid::new_v4().to_string());

        let evaluation = StepHarness::new(self.executor.models().clone())
            .evaluate(plan, &listeners)
            .instrument(span)
            .await?;

        Ok(MetricEvaluation {
            score: evaluation.score(),
            aggregated: evaluation.aggregated,
            exclusions: evaluation.exclusions,
            steps: evaluation.steps,
        })
    }
}
