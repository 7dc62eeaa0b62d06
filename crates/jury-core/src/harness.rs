//! Step-oriented evaluation for metrics needing several model round-trips.
//!
//! A metric such as faithfulness first asks each model to extract claims,
//! then asks it to verify each claim, then computes a score. The harness
//! threads an explicit [`Cohort`] (model ID → per-model working state)
//! through the steps:
//!
//! ```text
//! cohort₀ ──step 0──▶ cohort₁ ──step 1──▶ cohort₂ ── … ──▶ score + aggregate
//!            │                  │
//!            └─ exclusions      └─ exclusions
//! ```
//!
//! A model whose step fails leaves the cohort for good and is recorded as a
//! [`ModelExclusionEvent`]. If the cohort empties, the evaluation stops with
//! [`JuryError::AllModelsFailed`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{instrument, warn};

use crate::aggregator::ScoreAggregator;
use crate::context::{BatchExecutionContext, ModelExecutionContext, ModelExecutionResult};
use crate::error::{JuryError, ModelError, Result};
use crate::executor::guard_panics;
use crate::listener::ListenerSet;
use crate::metrics::METRICS;
use crate::model::{parse_response, ModelClient, ModelRegistry};
use crate::obs;
use crate::result::{AggregatedExecutionResult, ModelResult, Scored};

/// What a step does, which decides how it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    /// Prompt/response round-trip with the model.
    Llm,
    /// Embedding call; reported with its own duration/success view.
    Embedding,
    /// Local computation; no outbound request.
    Compute,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepKind::Llm => "LLM",
            StepKind::Embedding => "EMBEDDING",
            StepKind::Compute => "COMPUTE",
        })
    }
}

// ---------------------------------------------------------------------------
// Cohort
// ---------------------------------------------------------------------------

/// The models still participating, each with its working state.
#[derive(Debug, Clone, PartialEq)]
pub struct Cohort<S> {
    members: Vec<(String, S)>,
}

impl<S> Cohort<S> {
    pub fn new(members: Vec<(String, S)>) -> Self {
        Self { members }
    }

    /// Every model starts from a clone of `state`.
    pub fn uniform(model_ids: &[String], state: S) -> Self
    where
        S: Clone,
    {
        Self {
            members: model_ids
                .iter()
                .map(|id| (id.clone(), state.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.members.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.members.iter().any(|(id, _)| id == model_id)
    }

    pub fn state_of(&self, model_id: &str) -> Option<&S> {
        self.members
            .iter()
            .find(|(id, _)| id == model_id)
            .map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &S)> {
        self.members.iter().map(|(id, s)| (id.as_str(), s))
    }

    pub fn into_members(self) -> Vec<(String, S)> {
        self.members
    }
}

// ---------------------------------------------------------------------------
// Exclusions and step reports
// ---------------------------------------------------------------------------

/// A model dropped from a multi-step evaluation after failing a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExclusionEvent {
    pub model_id: String,
    pub step_name: String,
    /// Zero-based index of the failed step.
    pub step_index: usize,
    pub error: ModelError,
}

/// What happened during one step, as handed to `after_step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub metric_name: String,
    pub step_name: String,
    pub step_index: usize,
    pub total_steps: usize,
    pub kind: StepKind,
    /// Outbound request; `None` for compute steps.
    pub request: Option<String>,
    pub results: Vec<ModelResult<()>>,
}

impl StepReport {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    /// Models run the step concurrently, so the step took as long as its
    /// slowest member.
    pub fn max_duration(&self) -> Duration {
        self.results
            .iter()
            .map(|r| r.duration())
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Input handed to a step function for one cohort member.
pub struct StepInput<S> {
    pub model_id: String,
    pub client: Option<Arc<dyn ModelClient>>,
    pub state: S,
}

impl<S> StepInput<S> {
    /// The member's client, or [`ModelError::UnknownModel`].
    pub fn client(&self) -> std::result::Result<&Arc<dyn ModelClient>, ModelError> {
        self.client.as_ref().ok_or_else(|| ModelError::UnknownModel {
            model_id: self.model_id.clone(),
        })
    }

    /// Invoke the member's model and parse the reply as `T`.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        prompt: &str,
    ) -> std::result::Result<T, ModelError> {
        let raw = self.client()?.invoke(prompt).await?;
        parse_response(&self.model_id, raw)
    }

    /// Embed `texts` with the member's model.
    pub async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ModelError> {
        self.client()?.embed(texts).await
    }
}

/// Boxed per-member step function.
pub type StepFn<S> =
    Arc<dyn Fn(StepInput<S>) -> BoxFuture<'static, std::result::Result<S, ModelError>> + Send + Sync>;

/// One named step of a multi-step evaluation.
pub struct EvaluationStep<S> {
    name: String,
    kind: StepKind,
    request: Option<String>,
    run: StepFn<S>,
}

impl<S: 'static> EvaluationStep<S> {
    /// A prompt/response step. `request` describes the outbound prompt.
    pub fn llm<F, Fut>(name: impl Into<String>, request: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepInput<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<S, ModelError>> + Send + 'static,
    {
        Self::build(name, StepKind::Llm, Some(request.into()), f)
    }

    /// An embedding step. `request` describes what is embedded.
    pub fn embedding<F, Fut>(name: impl Into<String>, request: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepInput<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<S, ModelError>> + Send + 'static,
    {
        Self::build(name, StepKind::Embedding, Some(request.into()), f)
    }

    /// A local computation with no outbound request.
    pub fn compute<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepInput<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<S, ModelError>> + Send + 'static,
    {
        Self::build(name, StepKind::Compute, None, f)
    }

    fn build<F, Fut>(name: impl Into<String>, kind: StepKind, request: Option<String>, f: F) -> Self
    where
        F: Fn(StepInput<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<S, ModelError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind,
            request,
            run: Arc::new(move |input| f(input).boxed()),
        }
    }
}

impl<S> EvaluationStep<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn request(&self) -> Option<&str> {
        self.request.as_deref()
    }
}

impl<S> Clone for EvaluationStep<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            request: self.request.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<S> std::fmt::Debug for EvaluationStep<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationStep")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Result of running one step over a cohort.
#[derive(Debug)]
pub struct StepOutcome<S> {
    /// Members that completed the step, carrying their new state.
    pub cohort: Cohort<S>,
    /// Members dropped by this step.
    pub exclusions: Vec<ModelExclusionEvent>,
    pub report: StepReport,
}

/// Run `step` for every cohort member concurrently and narrow the cohort.
///
/// Fires `before_step`, then per member `before_execution` and
/// `after_execution` (plus `on_model_excluded` on failure), then
/// `after_step` once every member has settled. The per-member context
/// carries `step` and `step_index` metadata; steps produce no score, so the
/// `after_execution` payload of a successful member carries `NaN`.
/// `report.results` has one entry per input member, in cohort order.
pub async fn run_step<S>(
    metric_name: &str,
    cohort: Cohort<S>,
    step: &EvaluationStep<S>,
    index: usize,
    total: usize,
    models: &ModelRegistry,
    listeners: &ListenerSet,
) -> StepOutcome<S>
where
    S: Send + 'static,
{
    listeners.before_step(&step.name, index, total);

    let mut tasks = Vec::with_capacity(cohort.len());
    for (model_id, state) in cohort.into_members() {
        let input = StepInput {
            client: models.get(&model_id),
            model_id: model_id.clone(),
            state,
        };
        let run = Arc::clone(&step.run);
        let metric = metric_name.to_string();
        let step_name = step.name.clone();
        let request = step.request.clone();
        let listeners = listeners.clone();

        let task = tokio::spawn(async move {
            let id = input.model_id.clone();
            let context =
                ModelExecutionContext::new(&id, &metric, request.clone().unwrap_or_default())
                    .with_metadata("step", serde_json::json!(step_name))
                    .with_metadata("step_index", serde_json::json!(index));
            listeners.before_execution(&context);

            let clock = Instant::now();
            METRICS.inc_model_invocations();
            let outcome = guard_panics(&id, run(input)).await;
            let duration = clock.elapsed();

            let result = match &outcome {
                Ok(_) => {
                    ModelResult::success(id.clone(), (), duration, request, context.started_at())
                }
                Err(error) => ModelResult::failure(
                    id.clone(),
                    error.clone(),
                    duration,
                    request,
                    context.started_at(),
                ),
            };
            obs::emit_model_completed(&metric, &id, duration, result.is_success());
            listeners.after_execution(&ModelExecutionResult {
                context,
                result: result.map_ref(|_| Scored::new((), f64::NAN)),
            });

            if let Err(error) = &outcome {
                METRICS.inc_model_failures();
                METRICS.inc_models_excluded();
                obs::emit_model_excluded(&metric, &id, &step_name, index);
                listeners.on_model_excluded(&ModelExclusionEvent {
                    model_id: id.clone(),
                    step_name: step_name.clone(),
                    step_index: index,
                    error: error.clone(),
                });
            }
            (outcome.ok(), result)
        });
        tasks.push((model_id, task));
    }

    let entrants = tasks.len();
    let mut survivors = Vec::with_capacity(entrants);
    let mut exclusions = Vec::new();
    let mut results = Vec::with_capacity(entrants);

    for (model_id, task) in tasks {
        let (state, result) = match task.await {
            Ok(settled) => settled,
            Err(e) => {
                warn!(model_id = %model_id, error = %e, "step task did not complete");
                let error = ModelError::Panicked {
                    model_id: model_id.clone(),
                    message: e.to_string(),
                };
                METRICS.inc_models_excluded();
                listeners.on_model_excluded(&ModelExclusionEvent {
                    model_id: model_id.clone(),
                    step_name: step.name.clone(),
                    step_index: index,
                    error: error.clone(),
                });
                let failed = ModelResult::failure(
                    model_id.clone(),
                    error,
                    Duration::ZERO,
                    step.request.clone(),
                    Utc::now(),
                );
                (None, failed)
            }
        };

        match (state, result.error()) {
            (Some(state), None) => survivors.push((model_id, state)),
            (_, error) => exclusions.push(ModelExclusionEvent {
                model_id,
                step_name: step.name.clone(),
                step_index: index,
                error: error.cloned().unwrap_or_else(|| ModelError::Panicked {
                    model_id: result.model_id().to_string(),
                    message: "step produced no state".to_string(),
                }),
            }),
        }
        results.push(result);
    }

    let report = StepReport {
        metric_name: metric_name.to_string(),
        step_name: step.name.clone(),
        step_index: index,
        total_steps: total,
        kind: step.kind,
        request: step.request.clone(),
        results,
    };
    obs::emit_step_finished(metric_name, &step.name, index, survivors.len(), entrants);
    listeners.after_step(&report);

    StepOutcome {
        cohort: Cohort::new(survivors),
        exclusions,
        report,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Computes the final score from a surviving member's state.
pub type StateScorer<S> = Arc<dyn Fn(&S) -> f64 + Send + Sync>;

/// Everything needed to run one multi-step evaluation.
pub struct EvaluationPlan<S> {
    pub metric_name: String,
    pub cohort: Cohort<S>,
    pub steps: Vec<EvaluationStep<S>>,
    pub aggregator: ScoreAggregator,
    scorer: StateScorer<S>,
}

impl<S> EvaluationPlan<S> {
    pub fn new<F>(
        metric_name: impl Into<String>,
        cohort: Cohort<S>,
        steps: Vec<EvaluationStep<S>>,
        scorer: F,
    ) -> Self
    where
        F: Fn(&S) -> f64 + Send + Sync + 'static,
    {
        Self {
            metric_name: metric_name.into(),
            cohort,
            steps,
            aggregator: ScoreAggregator::default(),
            scorer: Arc::new(scorer),
        }
    }

    pub fn with_aggregator(mut self, aggregator: ScoreAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }
}

/// Outcome of a multi-step evaluation.
#[derive(Debug, Clone)]
pub struct HarnessEvaluation<S> {
    /// One result per model that entered step 0: survivors carry their final
    /// state and score, excluded models carry the error that removed them.
    pub aggregated: AggregatedExecutionResult<S>,
    pub exclusions: Vec<ModelExclusionEvent>,
    pub steps: Vec<StepReport>,
}

impl<S> HarnessEvaluation<S> {
    pub fn score(&self) -> f64 {
        self.aggregated.aggregated_score
    }

    pub fn excluded_models(&self) -> Vec<&str> {
        self.exclusions.iter().map(|e| e.model_id.as_str()).collect()
    }

    /// Reports of embedding steps only.
    pub fn embedding_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.kind == StepKind::Embedding)
    }

    /// Reports of LLM steps only.
    pub fn llm_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.kind == StepKind::Llm)
    }
}

/// Sequences [`EvaluationStep`]s over a shrinking cohort.
#[derive(Debug, Clone, Default)]
pub struct StepHarness {
    models: ModelRegistry,
}

impl StepHarness {
    pub fn new(models: ModelRegistry) -> Self {
        Self { models }
    }

    /// Run every step in order, then score and aggregate the survivors.
    ///
    /// Listener calls: `before_all_executions` once, the step callbacks for
    /// each step, and `after_aggregation` once the final score exists.
    #[instrument(
        skip(self, plan, listeners),
        fields(metric = %plan.metric_name, steps = plan.steps.len(), models = plan.cohort.len())
    )]
    pub async fn evaluate<S>(
        &self,
        plan: EvaluationPlan<S>,
        listeners: &ListenerSet,
    ) -> Result<HarnessEvaluation<S>>
    where
        S: Send + 'static,
    {
        let EvaluationPlan {
            metric_name,
            cohort,
            steps,
            aggregator,
            scorer,
        } = plan;

        if cohort.is_empty() {
            return Err(JuryError::NoModelsConfigured {
                metric: metric_name,
            });
        }

        let mut entrants = Entrants::new(cohort.model_ids());
        let started_at = Utc::now();
        METRICS.inc_batches();
        obs::emit_batch_started(&metric_name, entrants.len());
        listeners.before_all_executions(&BatchExecutionContext::new(
            metric_name.clone(),
            cohort.model_ids(),
            steps
                .iter()
                .find_map(|s| s.request.clone())
                .unwrap_or_default(),
        ));

        let total = steps.len();
        let mut cohort = cohort;
        let mut exclusions: Vec<ModelExclusionEvent> = Vec::new();
        let mut reports: Vec<StepReport> = Vec::with_capacity(total);

        for (index, step) in steps.iter().enumerate() {
            let outcome = run_step(
                &metric_name,
                cohort,
                step,
                index,
                total,
                &self.models,
                listeners,
            )
            .await;
            entrants.record(&outcome.report);
            exclusions.extend(outcome.exclusions);
            reports.push(outcome.report);
            cohort = outcome.cohort;

            if cohort.is_empty() {
                let err = JuryError::AllModelsFailed {
                    metric: metric_name.clone(),
                };
                obs::emit_evaluation_failed(&metric_name, &err);
                return Err(err);
            }
        }

        let results = entrants.into_results(cohort, started_at, scorer.as_ref());

        let scores: Vec<f64> = results
            .iter()
            .filter_map(|r| r.value().map(|s| s.score))
            .collect();
        if scores.is_empty() {
            let err = JuryError::AllModelsFailed {
                metric: metric_name.clone(),
            };
            obs::emit_evaluation_failed(&metric_name, &err);
            return Err(err);
        }

        let aggregated_score = aggregator.aggregate(&scores).map_err(|e| {
            obs::emit_evaluation_failed(&metric_name, &e);
            e
        })?;
        let aggregated =
            AggregatedExecutionResult::new(metric_name, aggregator.name(), aggregated_score, results);

        obs::emit_batch_aggregated(
            &aggregated.metric_name,
            &aggregated.strategy,
            aggregated.aggregated_score,
            aggregated.success_count(),
            aggregated.results.len(),
        );
        listeners.after_aggregation(&aggregated.score_view());

        Ok(HarnessEvaluation {
            aggregated,
            exclusions,
            steps: reports,
        })
    }
}

/// Per-entrant bookkeeping, indexed by position in the initial cohort so a
/// model ID listed twice stays two entrants.
struct Entrants {
    ids: Vec<String>,
    elapsed: Vec<Duration>,
    requests: Vec<Option<String>>,
    errors: Vec<Option<ModelError>>,
    /// Entrant positions of the current cohort members, in cohort order.
    active: Vec<usize>,
}

impl Entrants {
    fn new(ids: Vec<String>) -> Self {
        let n = ids.len();
        Self {
            ids,
            elapsed: vec![Duration::ZERO; n],
            requests: vec![None; n],
            errors: vec![None; n],
            active: (0..n).collect(),
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    /// Fold in one step. Report results line up with the active members.
    fn record(&mut self, report: &StepReport) {
        let mut still_active = Vec::with_capacity(self.active.len());
        for (&slot, result) in self.active.iter().zip(&report.results) {
            self.elapsed[slot] += result.duration();
            if let Some(request) = result.request() {
                self.requests[slot] = Some(request.to_string());
            }
            match result.error() {
                Some(error) => self.errors[slot] = Some(error.clone()),
                None => still_active.push(slot),
            }
        }
        self.active = still_active;
    }

    /// One result per entrant, in entrant order. Survivors are scored;
    /// excluded entrants carry the error that removed them. Each result
    /// keeps the last outbound request its model saw.
    fn into_results<S>(
        self,
        survivors: Cohort<S>,
        started_at: DateTime<Utc>,
        scorer: &(dyn Fn(&S) -> f64 + Send + Sync),
    ) -> Vec<ModelResult<Scored<S>>> {
        let Entrants {
            ids,
            elapsed,
            requests,
            errors,
            active,
        } = self;

        let mut states: Vec<Option<S>> = std::iter::repeat_with(|| None).take(ids.len()).collect();
        for (slot, (_, state)) in active.into_iter().zip(survivors.into_members()) {
            states[slot] = Some(state);
        }

        ids.into_iter()
            .zip(states)
            .zip(errors)
            .zip(elapsed.into_iter().zip(requests))
            .map(|(((model_id, state), error), (duration, request))| {
                let error = match state {
                    Some(state) => {
                        let score = scorer(&state);
                        if score.is_finite() {
                            return ModelResult::success(
                                model_id,
                                Scored::new(state, score),
                                duration,
                                request,
                                started_at,
                            );
                        }
                        ModelError::InvalidScore {
                            model_id: model_id.clone(),
                            score,
                        }
                    }
                    None => error.unwrap_or_else(|| ModelError::Panicked {
                        model_id: model_id.clone(),
                        message: "left the cohort without an exclusion".to_string(),
                    }),
                };
                ModelResult::failure(model_id, error, duration, request, started_at)
            })
            .collect()
    }
}
