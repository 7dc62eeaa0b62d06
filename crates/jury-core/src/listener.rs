//! Lifecycle listeners and their dispatch.
//!
//! Listeners register on a long-lived [`ListenerRegistry`]. Every evaluation
//! takes a [`ListenerSet`] snapshot first: each registered listener is asked
//! for an evaluation-scoped instance, so concurrent evaluations of the same
//! metric never share listener state. Registration swaps a whole `Arc<Vec>`
//! under a short write lock; evaluations in flight keep iterating their own
//! snapshot.
//!
//! Callbacks run behind a fault barrier: an `Err` or a panic from one
//! listener is logged and counted, and the remaining listeners still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::context::{BatchExecutionContext, ModelExecutionContext, ModelExecutionResult};
use crate::error::ListenerError;
use crate::harness::{ModelExclusionEvent, StepReport};
use crate::metrics::METRICS;
use crate::result::AggregatedExecutionResult;

/// Result type for listener callbacks.
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// Observer of evaluation lifecycle events. Every callback defaults to a no-op.
pub trait ExecutionListener: Send + Sync {
    /// Identity used in fault logs and for [`ListenerRegistry::unregister`].
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Dispatch order; lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Produce an evaluation-scoped instance.
    ///
    /// Stateless listeners return `None` and are shared. Listeners holding
    /// per-evaluation state must return a fresh, independent instance.
    fn scoped(&self) -> Option<Arc<dyn ExecutionListener>> {
        None
    }

    fn before_all_executions(&self, _context: &BatchExecutionContext) -> ListenerResult {
        Ok(())
    }

    fn before_execution(&self, _context: &ModelExecutionContext) -> ListenerResult {
        Ok(())
    }

    fn after_execution(&self, _result: &ModelExecutionResult) -> ListenerResult {
        Ok(())
    }

    fn after_aggregation(&self, _result: &AggregatedExecutionResult<()>) -> ListenerResult {
        Ok(())
    }

    fn before_step(&self, _step_name: &str, _index: usize, _total: usize) -> ListenerResult {
        Ok(())
    }

    fn after_step(&self, _report: &StepReport) -> ListenerResult {
        Ok(())
    }

    fn on_model_excluded(&self, _event: &ModelExclusionEvent) -> ListenerResult {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type ListenerList = Arc<Vec<Arc<dyn ExecutionListener>>>;

/// Long-lived, concurrently mutable set of registered listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<ListenerList>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. The list stays sorted by [`ExecutionListener::order`];
    /// equal orders keep registration order.
    pub fn register(&self, listener: Arc<dyn ExecutionListener>) {
        let mut guard = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let mut next: Vec<Arc<dyn ExecutionListener>> = guard.as_ref().clone();
        next.push(listener);
        next.sort_by_key(|l| l.order());
        *guard = Arc::new(next);
    }

    /// Remove every listener named `name`. Returns whether any was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        let next: Vec<Arc<dyn ExecutionListener>> = guard
            .iter()
            .filter(|l| l.name() != name)
            .cloned()
            .collect();
        let removed = next.len() != before;
        *guard = Arc::new(next);
        removed
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Registered listeners as of now, without scoping.
    pub fn snapshot(&self) -> Vec<Arc<dyn ExecutionListener>> {
        self.current().as_ref().clone()
    }

    /// Snapshot and scope the registered listeners for one evaluation.
    ///
    /// A listener whose `scoped` panics is counted as a fault and shared as
    /// registered.
    pub fn scoped_set(&self) -> ListenerSet {
        let current = self.current();
        ListenerSet::from_listeners(
            current
                .iter()
                .map(|l| match catch_unwind(AssertUnwindSafe(|| l.scoped())) {
                    Ok(scoped) => scoped.unwrap_or_else(|| Arc::clone(l)),
                    Err(payload) => {
                        METRICS.inc_listener_faults();
                        warn!(
                            listener = %l.name(),
                            phase = "scoped",
                            panic = %panic_message(payload.as_ref()),
                            "listener scoping panicked"
                        );
                        Arc::clone(l)
                    }
                })
                .collect(),
        )
    }

    fn current(&self) -> ListenerList {
        Arc::clone(&self.listeners.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.current().iter().map(|l| l.name().to_string()).collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Evaluation-scoped dispatch
// ---------------------------------------------------------------------------

/// Immutable, order-sorted listeners for one evaluation. Cheap to clone.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Arc<[Arc<dyn ExecutionListener>]>,
}

impl ListenerSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set directly, sorting by order. Listeners are used as given,
    /// without calling [`ExecutionListener::scoped`].
    pub fn from_listeners(mut listeners: Vec<Arc<dyn ExecutionListener>>) -> Self {
        listeners.sort_by_key(|l| l.order());
        Self {
            listeners: listeners.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn before_all_executions(&self, context: &BatchExecutionContext) {
        self.notify("before_all_executions", |l| l.before_all_executions(context));
    }

    pub fn before_execution(&self, context: &ModelExecutionContext) {
        self.notify("before_execution", |l| l.before_execution(context));
    }

    pub fn after_execution(&self, result: &ModelExecutionResult) {
        self.notify("after_execution", |l| l.after_execution(result));
    }

    pub fn after_aggregation(&self, result: &AggregatedExecutionResult<()>) {
        self.notify("after_aggregation", |l| l.after_aggregation(result));
    }

    pub fn before_step(&self, step_name: &str, index: usize, total: usize) {
        self.notify("before_step", |l| l.before_step(step_name, index, total));
    }

    pub fn after_step(&self, report: &StepReport) {
        self.notify("after_step", |l| l.after_step(report));
    }

    pub fn on_model_excluded(&self, event: &ModelExclusionEvent) {
        self.notify("on_model_excluded", |l| l.on_model_excluded(event));
    }

    fn notify<F>(&self, phase: &'static str, callback: F)
    where
        F: Fn(&dyn ExecutionListener) -> ListenerResult,
    {
        for listener in self.listeners.iter() {
            match catch_unwind(AssertUnwindSafe(|| callback(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    METRICS.inc_listener_faults();
                    warn!(
                        listener = %listener.name(),
                        phase = phase,
                        error = %e,
                        "listener callback failed"
                    );
                }
                Err(payload) => {
                    METRICS.inc_listener_faults();
                    warn!(
                        listener = %listener.name(),
                        phase = phase,
                        panic = %panic_message(payload.as_ref()),
                        "listener callback panicked"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.listeners.iter().map(|l| l.name()).collect();
        f.debug_struct("ListenerSet").field("listeners", &names).finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
