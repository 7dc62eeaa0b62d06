//! Jury Core Library
//!
//! Sends one evaluation to several judge models at once, keeps every
//! per-model outcome, and combines the successful scores with a pluggable
//! aggregation strategy. Multi-step metrics run through the step harness,
//! which drops a model from later steps once it fails one.

pub mod aggregator;
pub mod chart;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod harness;
pub mod listener;
pub mod logging_listener;
pub mod metric;
pub mod metrics;
pub mod model;
pub mod obs;
pub mod result;
pub mod telemetry;

pub use aggregator::{AggregateFn, CustomAggregator, ScoreAggregator};
pub use chart::{render_score_chart, render_timeline};
pub use config::ExecutorConfig;
pub use context::{BatchExecutionContext, ModelExecutionContext, ModelExecutionResult};
pub use error::{JuryError, ListenerError, ModelError, Result};
pub use executor::{ExecutionRequest, MultiModelExecutor, ScoreExtractor};
pub use fakes::{PromptRule, RecordingListener, ScriptedBehavior, ScriptedModel, ScriptedModelSpec};
pub use harness::{
    run_step, Cohort, EvaluationPlan, EvaluationStep, HarnessEvaluation, ModelExclusionEvent,
    StateScorer, StepFn, StepHarness, StepInput, StepKind, StepOutcome, StepReport,
};
pub use listener::{ExecutionListener, ListenerRegistry, ListenerResult, ListenerSet};
pub use logging_listener::LoggingListener;
pub use metric::{JuryMetric, MetricEvaluation};
pub use metrics::METRICS;
pub use model::{parse_response, ModelClient, ModelRegistry};
pub use obs::{
    emit_batch_aggregated, emit_batch_started, emit_evaluation_failed, emit_model_completed,
    emit_model_excluded, emit_model_failed, emit_step_finished, evaluation_span, EvaluationSpan,
};
pub use result::{AggregatedExecutionResult, ModelResult, ScoreStatistics, Scored};
pub use telemetry::init_tracing;
