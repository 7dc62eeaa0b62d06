//! Concurrent multi-model dispatch.
//!
//! [`MultiModelExecutor::execute`] sends one prompt to every requested model
//! at once, waits for all of them to settle, and aggregates the successful
//! scores. A failing model becomes a failed [`ModelResult`]; only a batch
//! with zero successes (or an aggregator that refuses the scores) fails the
//! call.

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{instrument, warn};

use crate::aggregator::ScoreAggregator;
use crate::config::ExecutorConfig;
use crate::context::{BatchExecutionContext, ModelExecutionContext, ModelExecutionResult};
use crate::error::{JuryError, ModelError, Result};
use crate::listener::{panic_message, ListenerRegistry, ListenerSet};
use crate::metrics::METRICS;
use crate::model::{parse_response, ModelClient, ModelRegistry};
use crate::obs;
use crate::result::{AggregatedExecutionResult, ModelResult, Scored};

/// Extracts a numeric score from a parsed model response.
pub type ScoreExtractor<T> = Arc<dyn Fn(&T) -> f64 + Send + Sync>;

/// One evaluation request: a prompt, the expected response shape `T`, how to
/// score it, and which models to ask.
pub struct ExecutionRequest<T> {
    pub metric_name: String,
    pub prompt: String,
    pub model_ids: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    score_extractor: ScoreExtractor<T>,
    _shape: PhantomData<fn() -> T>,
}

impl<T> ExecutionRequest<T> {
    pub fn new<F>(
        metric_name: impl Into<String>,
        prompt: impl Into<String>,
        model_ids: Vec<String>,
        score_extractor: F,
    ) -> Self
    where
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        Self {
            metric_name: metric_name.into(),
            prompt: prompt.into(),
            model_ids,
            metadata: BTreeMap::new(),
            score_extractor: Arc::new(score_extractor),
            _shape: PhantomData,
        }
    }

    /// Attach a metadata entry copied into every model's execution context.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn score_extractor(&self) -> &ScoreExtractor<T> {
        &self.score_extractor
    }
}

impl<T> Clone for ExecutionRequest<T> {
    fn clone(&self) -> Self {
        Self {
            metric_name: self.metric_name.clone(),
            prompt: self.prompt.clone(),
            model_ids: self.model_ids.clone(),
            metadata: self.metadata.clone(),
            score_extractor: Arc::clone(&self.score_extractor),
            _shape: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for ExecutionRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("metric_name", &self.metric_name)
            .field("prompt", &self.prompt)
            .field("model_ids", &self.model_ids)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Dispatches requests to every requested model concurrently.
#[derive(Debug)]
pub struct MultiModelExecutor {
    models: ModelRegistry,
    config: ExecutorConfig,
    listeners: ListenerRegistry,
}

impl MultiModelExecutor {
    pub fn new(models: ModelRegistry) -> Self {
        Self {
            models,
            config: ExecutorConfig::default(),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Build an executor with explicit tunables.
    pub fn with_config(models: ModelRegistry, config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            models,
            config,
            listeners: ListenerRegistry::new(),
        })
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Listeners notified by [`execute`](Self::execute) and
    /// [`execute_default`](Self::execute_default).
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Execute with the configured default aggregator.
    pub async fn execute_default<T>(
        &self,
        request: ExecutionRequest<T>,
    ) -> Result<AggregatedExecutionResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let aggregator = self.config.default_aggregator.clone();
        self.execute(request, &aggregator).await
    }

    /// Execute against this executor's own registered listeners.
    pub async fn execute<T>(
        &self,
        request: ExecutionRequest<T>,
        aggregator: &ScoreAggregator,
    ) -> Result<AggregatedExecutionResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let listeners = self.listeners.scoped_set();
        self.execute_with_listeners(request, aggregator, &listeners)
            .await
    }

    /// Execute, notifying an explicit evaluation-scoped listener set.
    ///
    /// Callback order: `before_all_executions` once, then per model
    /// `before_execution` followed by `after_execution`, and finally
    /// `after_aggregation` once the aggregate exists.
    ///
    /// Errors:
    /// - [`JuryError::NoModelsConfigured`] when `model_ids` is empty
    ///   (before any callback fires)
    /// - [`JuryError::AllModelsFailed`] when no model succeeded
    /// - whatever the aggregator returns, unchanged
    #[instrument(
        skip(self, request, aggregator, listeners),
        fields(metric = %request.metric_name, models = request.model_ids.len())
    )]
    pub async fn execute_with_listeners<T>(
        &self,
        request: ExecutionRequest<T>,
        aggregator: &ScoreAggregator,
        listeners: &ListenerSet,
    ) -> Result<AggregatedExecutionResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        if request.model_ids.is_empty() {
            return Err(JuryError::NoModelsConfigured {
                metric: request.metric_name,
            });
        }

        METRICS.inc_batches();
        obs::emit_batch_started(&request.metric_name, request.model_ids.len());
        listeners.before_all_executions(&BatchExecutionContext::new(
            request.metric_name.clone(),
            request.model_ids.clone(),
            request.prompt.clone(),
        ));

        let semaphore = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let mut tasks = Vec::with_capacity(request.model_ids.len());

        for model_id in &request.model_ids {
            let client = self.models.get(model_id);
            let id = model_id.clone();
            let metric = request.metric_name.clone();
            let prompt = request.prompt.clone();
            let metadata = request.metadata.clone();
            let extractor = Arc::clone(&request.score_extractor);
            let listeners = listeners.clone();
            let semaphore = semaphore.clone();

            let task = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };

                let context = ModelExecutionContext::new(&id, &metric, &prompt)
                    .with_metadata_map(&metadata);
                listeners.before_execution(&context);
                METRICS.inc_model_invocations();

                let clock = Instant::now();
                let outcome = guard_panics(
                    &id,
                    invoke_and_score(client, &id, &prompt, &extractor),
                )
                .await;
                let duration = clock.elapsed();

                let result = match outcome {
                    Ok(scored) => ModelResult::success(
                        id.clone(),
                        scored,
                        duration,
                        Some(prompt),
                        context.started_at(),
                    ),
                    Err(error) => {
                        METRICS.inc_model_failures();
                        obs::emit_model_failed(&metric, &id, &error);
                        ModelResult::failure(
                            id.clone(),
                            error,
                            duration,
                            Some(prompt),
                            context.started_at(),
                        )
                    }
                };
                obs::emit_model_completed(&metric, &id, duration, result.is_success());

                listeners.after_execution(&ModelExecutionResult {
                    context,
                    result: result.map_ref(Scored::score_only),
                });
                result
            });

            tasks.push((model_id.clone(), task));
        }

        // Barrier: every model settles before aggregation.
        let mut results: Vec<ModelResult<Scored<T>>> = Vec::with_capacity(tasks.len());
        for (model_id, task) in tasks {
            match task.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(model_id = %model_id, error = %e, "model task did not complete");
                    METRICS.inc_model_failures();
                    results.push(ModelResult::failure(
                        model_id.clone(),
                        ModelError::Panicked {
                            model_id,
                            message: e.to_string(),
                        },
                        Duration::ZERO,
                        Some(request.prompt.clone()),
                        Utc::now(),
                    ));
                }
            }
        }

        let scores: Vec<f64> = results
            .iter()
            .filter_map(|r| r.value().map(|s| s.score))
            .collect();

        if scores.is_empty() {
            let err = JuryError::AllModelsFailed {
                metric: request.metric_name.clone(),
            };
            obs::emit_evaluation_failed(&request.metric_name, &err);
            return Err(err);
        }

        let aggregated_score = aggregator.aggregate(&scores).map_err(|e| {
            obs::emit_evaluation_failed(&request.metric_name, &e);
            e
        })?;

        let aggregated = AggregatedExecutionResult::new(
            request.metric_name.clone(),
            aggregator.name(),
            aggregated_score,
            results,
        );

        obs::emit_batch_aggregated(
            &aggregated.metric_name,
            &aggregated.strategy,
            aggregated.aggregated_score,
            aggregated.success_count(),
            aggregated.results.len(),
        );
        listeners.after_aggregation(&aggregated.score_view());

        Ok(aggregated)
    }
}

async fn invoke_and_score<T: DeserializeOwned>(
    client: Option<Arc<dyn ModelClient>>,
    model_id: &str,
    prompt: &str,
    extractor: &ScoreExtractor<T>,
) -> std::result::Result<Scored<T>, ModelError> {
    let client = client.ok_or_else(|| ModelError::UnknownModel {
        model_id: model_id.to_string(),
    })?;
    let raw = client.invoke(prompt).await?;
    let value: T = parse_response(model_id, raw)?;
    let score = extractor(&value);
    if !score.is_finite() {
        return Err(ModelError::InvalidScore {
            model_id: model_id.to_string(),
            score,
        });
    }
    Ok(Scored::new(value, score))
}

/// Run a per-model future, turning a panic inside it into
/// [`ModelError::Panicked`].
pub(crate) async fn guard_panics<F, T>(model_id: &str, fut: F) -> std::result::Result<T, ModelError>
where
    F: Future<Output = std::result::Result<T, ModelError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(ModelError::Panicked {
            model_id: model_id.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}
