//! Deterministic in-memory model clients.
//!
//! [`ScriptedModel`] satisfies the [`ModelClient`] contract without any
//! network access. Tests use it directly; the CLI builds it from
//! [`ScriptedModelSpec`] entries in a config file.
//!
//! [`RecordingListener`] captures lifecycle callbacks, one log per
//! evaluation, for assertions on ordering and isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::{BatchExecutionContext, ModelExecutionContext, ModelExecutionResult};
use crate::error::ModelError;
use crate::harness::{ModelExclusionEvent, StepReport};
use crate::listener::{ExecutionListener, ListenerResult};
use crate::model::ModelClient;
use crate::result::AggregatedExecutionResult;

/// What a scripted model does when invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptedBehavior {
    Reply { value: serde_json::Value },
    Fail { message: String },
    Timeout,
    Panic,
}

/// Behavior override applied when the prompt contains `contains`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRule {
    pub contains: String,
    pub behavior: ScriptedBehavior,
}

/// In-memory model with scripted replies, failures and latency.
#[derive(Debug)]
pub struct ScriptedModel {
    id: String,
    default: ScriptedBehavior,
    rules: Vec<PromptRule>,
    delay: Duration,
    embedding: Option<Vec<f32>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    /// A model that always replies with `value`.
    pub fn replying(id: impl Into<String>, value: serde_json::Value) -> Self {
        Self::with_behavior(id, ScriptedBehavior::Reply { value })
    }

    /// A model whose every call fails with `message`.
    pub fn failing(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_behavior(
            id,
            ScriptedBehavior::Fail {
                message: message.into(),
            },
        )
    }

    /// A model whose every call reports a timeout.
    pub fn timing_out(id: impl Into<String>) -> Self {
        Self::with_behavior(id, ScriptedBehavior::Timeout)
    }

    pub fn with_behavior(id: impl Into<String>, behavior: ScriptedBehavior) -> Self {
        Self {
            id: id.into(),
            default: behavior,
            rules: Vec::new(),
            delay: Duration::ZERO,
            embedding: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer `embed` calls with `vector` for every input text.
    pub fn with_embedding(mut self, vector: Vec<f32>) -> Self {
        self.embedding = Some(vector);
        self
    }

    /// Override the behavior for prompts containing `contains`.
    /// Rules are checked in insertion order.
    pub fn when_prompt_contains(
        mut self,
        contains: impl Into<String>,
        behavior: ScriptedBehavior,
    ) -> Self {
        self.rules.push(PromptRule {
            contains: contains.into(),
            behavior,
        });
        self
    }

    /// Number of `invoke` and `embed` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_client(self) -> Arc<dyn ModelClient> {
        Arc::new(self)
    }

    fn behavior_for(&self, prompt: &str) -> &ScriptedBehavior {
        self.rules
            .iter()
            .find(|r| prompt.contains(&r.contains))
            .map(|r| &r.behavior)
            .unwrap_or(&self.default)
    }

    async fn settle(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, prompt: &str) -> Result<serde_json::Value, ModelError> {
        self.settle().await;
        match self.behavior_for(prompt) {
            ScriptedBehavior::Reply { value } => Ok(value.clone()),
            ScriptedBehavior::Fail { message } => {
                Err(ModelError::invocation(self.id.clone(), message.clone()))
            }
            ScriptedBehavior::Timeout => Err(ModelError::Timeout {
                model_id: self.id.clone(),
                elapsed_ms: self.delay.as_millis() as u64,
            }),
            ScriptedBehavior::Panic => panic!("scripted panic from model {}", self.id),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        self.settle().await;
        match &self.embedding {
            Some(vector) => Ok(texts.iter().map(|_| vector.clone()).collect()),
            None => Err(ModelError::Unsupported {
                model_id: self.id.clone(),
                operation: "embed".to_string(),
            }),
        }
    }
}

/// Serializable description of a [`ScriptedModel`], as found in config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedModelSpec {
    pub id: String,
    pub behavior: ScriptedBehavior,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub rules: Vec<PromptRule>,
}

impl ScriptedModelSpec {
    pub fn build(&self) -> ScriptedModel {
        let mut model = ScriptedModel::with_behavior(self.id.clone(), self.behavior.clone())
            .with_delay(Duration::from_millis(self.delay_ms));
        if let Some(vector) = &self.embedding {
            model = model.with_embedding(vector.clone());
        }
        for rule in &self.rules {
            model = model.when_prompt_contains(rule.contains.clone(), rule.behavior.clone());
        }
        model
    }
}

/// Listener that records every callback as a short line of text.
///
/// The registered instance is a template: each evaluation gets a fresh
/// scoped instance with its own log, and every scoped instance is kept so
/// tests can inspect them afterwards.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
    scopes: Arc<Mutex<Vec<Arc<RecordingListener>>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines recorded by this instance, in callback order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every instance handed out by [`ExecutionListener::scoped`] so far.
    pub fn scopes(&self) -> Vec<Arc<RecordingListener>> {
        self.scopes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, line: String) -> ListenerResult {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line);
        Ok(())
    }
}

impl ExecutionListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    fn scoped(&self) -> Option<Arc<dyn ExecutionListener>> {
        let fresh = Arc::new(RecordingListener {
            events: Mutex::new(Vec::new()),
            scopes: Arc::clone(&self.scopes),
        });
        self.scopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&fresh));
        Some(fresh)
    }

    fn before_all_executions(&self, context: &BatchExecutionContext) -> ListenerResult {
        self.record(format!("before_all:{}", context.metric_name))
    }

    fn before_execution(&self, context: &ModelExecutionContext) -> ListenerResult {
        self.record(format!("before:{}", context.model_id()))
    }

    fn after_execution(&self, result: &ModelExecutionResult) -> ListenerResult {
        let status = if result.result.is_success() { "ok" } else { "err" };
        self.record(format!("after:{}:{status}", result.result.model_id()))
    }

    fn after_aggregation(&self, result: &AggregatedExecutionResult<()>) -> ListenerResult {
        self.record(format!("aggregated:{}", result.metric_name))
    }

    fn before_step(&self, step_name: &str, index: usize, _total: usize) -> ListenerResult {
        self.record(format!("before_step:{index}:{step_name}"))
    }

    fn after_step(&self, report: &StepReport) -> ListenerResult {
        self.record(format!(
            "after_step:{}:{}:{}",
            report.step_index,
            report.step_name,
            report.success_count()
        ))
    }

    fn on_model_excluded(&self, event: &ModelExclusionEvent) -> ListenerResult {
        self.record(format!("excluded:{}@{}", event.model_id, event.step_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replying_model_returns_value_and_counts_calls() {
        let model = ScriptedModel::replying("m1", serde_json::json!({ "score": 0.4 }));
        let reply = model.invoke("anything").await.unwrap();
        assert_eq!(reply["score"], 0.4);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn prompt_rules_override_default() {
        let model = ScriptedModel::replying("m1", serde_json::json!(1))
            .when_prompt_contains("verify", ScriptedBehavior::Timeout);
        assert!(model.invoke("generate").await.is_ok());
        assert!(matches!(
            model.invoke("please verify").await,
            Err(ModelError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn embed_without_vector_is_unsupported() {
        let model = ScriptedModel::replying("m1", serde_json::json!(1));
        let err = model.embed(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, ModelError::Unsupported { .. }));

        let model = model.with_embedding(vec![0.1, 0.2]);
        let vectors = model.embed(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 2);
    }

    #[test]
    fn spec_builds_model_from_json() {
        let spec: ScriptedModelSpec = serde_json::from_value(serde_json::json!({
            "id": "judge-a",
            "behavior": { "type": "reply", "value": { "score": 0.9 } },
            "delay_ms": 20,
            "rules": [{ "contains": "claims", "behavior": { "type": "fail", "message": "nope" } }]
        }))
        .unwrap();
        let model = spec.build();
        assert_eq!(model.id(), "judge-a");
        assert_eq!(model.delay, Duration::from_millis(20));
        assert_eq!(model.rules.len(), 1);
    }

    #[test]
    fn recording_listener_scopes_get_separate_logs() {
        let template = RecordingListener::new();
        let first = template.scoped().unwrap();
        let second = template.scoped().unwrap();

        first
            .before_all_executions(&BatchExecutionContext::new("m", vec![], "p"))
            .unwrap();
        second.before_step("verify", 1, 3).unwrap();

        let scopes = template.scopes();
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0].events(), vec!["before_all:m"]);
        assert_eq!(scopes[1].events(), vec!["before_step:1:verify"]);
        assert!(template.events().is_empty());
    }
}
