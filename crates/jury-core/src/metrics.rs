//! Global atomic counters for engine observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of an evaluation run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free atomic counters.
pub struct Metrics {
    batches_executed: AtomicU64,
    model_invocations: AtomicU64,
    model_failures: AtomicU64,
    models_excluded: AtomicU64,
    listener_faults: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            batches_executed: AtomicU64::new(0),
            model_invocations: AtomicU64::new(0),
            model_failures: AtomicU64::new(0),
            models_excluded: AtomicU64::new(0),
            listener_faults: AtomicU64::new(0),
        }
    }

    /// Increment the batches-executed counter by one.
    pub fn inc_batches(&self) {
        self.batches_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "batches_executed", "counter incremented");
    }

    /// Increment the model-invocations counter by one.
    pub fn inc_model_invocations(&self) {
        self.model_invocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "model_invocations", "counter incremented");
    }

    /// Increment the model-failures counter by one.
    pub fn inc_model_failures(&self) {
        self.model_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "model_failures", "counter incremented");
    }

    /// Increment the models-excluded counter by one.
    pub fn inc_models_excluded(&self) {
        self.models_excluded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "models_excluded", "counter incremented");
    }

    /// Increment the listener-faults counter by one.
    pub fn inc_listener_faults(&self) {
        self.listener_faults.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "listener_faults", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run, end of a CLI command)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            batches_executed = self.batches_executed(),
            model_invocations = self.model_invocations(),
            model_failures = self.model_failures(),
            models_excluded = self.models_excluded(),
            listener_faults = self.listener_faults(),
        );
    }

    pub fn batches_executed(&self) -> u64 {
        self.batches_executed.load(Ordering::Relaxed)
    }

    pub fn model_invocations(&self) -> u64 {
        self.model_invocations.load(Ordering::Relaxed)
    }

    pub fn model_failures(&self) -> u64 {
        self.model_failures.load(Ordering::Relaxed)
    }

    pub fn models_excluded(&self) -> u64 {
        self.models_excluded.load(Ordering::Relaxed)
    }

    pub fn listener_faults(&self) -> u64 {
        self.listener_faults.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.batches_executed.store(0, Ordering::Relaxed);
        self.model_invocations.store(0, Ordering::Relaxed);
        self.model_failures.store(0, Ordering::Relaxed);
        self.models_excluded.store(0, Ordering::Relaxed);
        self.listener_faults.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.batches_executed(), 0);
        m.inc_batches();
        m.inc_batches();
        assert_eq!(m.batches_executed(), 2);

        m.inc_model_invocations();
        m.inc_model_failures();
        assert_eq!(m.model_invocations(), 1);
        assert_eq!(m.model_failures(), 1);

        m.inc_models_excluded();
        m.inc_listener_faults();
        m.inc_listener_faults();
        assert_eq!(m.models_excluded(), 1);
        assert_eq!(m.listener_faults(), 2);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_batches();
        m.inc_model_invocations();
        m.inc_model_failures();
        m.inc_models_excluded();
        m.inc_listener_faults();
        m.reset();
        assert_eq!(m.batches_executed(), 0);
        assert_eq!(m.model_invocations(), 0);
        assert_eq!(m.model_failures(), 0);
        assert_eq!(m.models_excluded(), 0);
        assert_eq!(m.listener_faults(), 0);
    }
}
