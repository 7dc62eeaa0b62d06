//! Listener state never leaks between concurrent evaluations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jury_core::{
    ExecutionListener, JuryMetric, ListenerResult, ModelExecutionResult, ModelRegistry,
    MultiModelExecutor, RecordingListener, ScriptedModel,
};
use serde_json::json;

fn slow_panel() -> Arc<MultiModelExecutor> {
    let registry = [("a", 10), ("b", 20), ("c", 30)]
        .iter()
        .fold(ModelRegistry::new(), |reg, (id, ms)| {
            reg.with(
                ScriptedModel::replying(*id, json!({ "score": 0.5 }))
                    .with_delay(Duration::from_millis(*ms))
                    .into_client(),
            )
        });
    Arc::new(MultiModelExecutor::new(registry))
}

fn ids() -> Vec<String> {
    vec!["a".to_string(), "b".to_string(), "c".to_string()]
}

fn score(v: &serde_json::Value) -> f64 {
    v["score"].as_f64().unwrap_or(0.0)
}

#[tokio::test(start_paused = true)]
async fn concurrent_evaluations_get_separate_listener_instances() {
    let metric = JuryMetric::new("relevance", slow_panel(), ids());
    let recorder = Arc::new(RecordingListener::new());
    metric.add_listener(Arc::clone(&recorder) as Arc<dyn ExecutionListener>);

    let (first, second) = tokio::join!(
        metric.evaluate("first prompt", score),
        metric.evaluate("second prompt", score)
    );
    first.unwrap();
    second.unwrap();

    let scopes = recorder.scopes();
    assert_eq!(scopes.len(), 2);
    for scope in &scopes {
        let events = scope.events();
        assert_eq!(events.len(), 8, "{events:?}");
        assert_eq!(events.iter().filter(|e| e.starts_with("before_all:")).count(), 1);
        assert_eq!(events.iter().filter(|e| e.starts_with("aggregated:")).count(), 1);
    }
    assert!(recorder.events().is_empty());
}

/// Counts the models it saw; a fresh counter per evaluation.
#[derive(Default)]
struct ModelCounter {
    seen: AtomicUsize,
    totals: Arc<Mutex<Vec<usize>>>,
}

impl ExecutionListener for ModelCounter {
    fn name(&self) -> &str {
        "model-counter"
    }

    fn scoped(&self) -> Option<Arc<dyn ExecutionListener>> {
        Some(Arc::new(ModelCounter {
            seen: AtomicUsize::new(0),
            totals: Arc::clone(&self.totals),
        }))
    }

    fn after_execution(&self, _: &ModelExecutionResult) -> ListenerResult {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn after_aggregation(
        &self,
        _: &jury_core::AggregatedExecutionResult<()>,
    ) -> ListenerResult {
        self.totals
            .lock()
            .unwrap()
            .push(self.seen.load(Ordering::SeqCst));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn stateful_listener_counts_only_its_own_evaluation() {
    let metric = Arc::new(JuryMetric::new("relevance", slow_panel(), ids()));
    let counter = Arc::new(ModelCounter::default());
    let totals = Arc::clone(&counter.totals);
    metric.add_listener(counter);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let metric = Arc::clone(&metric);
            tokio::spawn(async move { metric.evaluate(&format!("prompt {i}"), score).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(*totals.lock().unwrap(), vec![3, 3, 3, 3]);
}

#[tokio::test(start_paused = true)]
async fn registration_during_flight_affects_only_later_evaluations() {
    let metric = Arc::new(JuryMetric::new("relevance", slow_panel(), ids()));
    let early = Arc::new(RecordingListener::new());
    metric.add_listener(Arc::clone(&early) as Arc<dyn ExecutionListener>);

    let in_flight = {
        let metric = Arc::clone(&metric);
        tokio::spawn(async move { metric.evaluate("slow", score).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    let late = Arc::new(RecordingListener::new());
    metric.add_listener(Arc::clone(&late) as Arc<dyn ExecutionListener>);
    in_flight.await.unwrap().unwrap();

    assert_eq!(early.scopes().len(), 1);
    assert!(late.scopes().is_empty());

    metric.evaluate("next", score).await.unwrap();
    assert_eq!(early.scopes().len(), 2);
    assert_eq!(late.scopes().len(), 1);
}
