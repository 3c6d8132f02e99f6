//! Trace counters and gauges: a small trait with one method per counter, a
//! no-op implementation for when metrics collection is disabled, and an
//! atomics-backed default implementation safe to share across the producer
//! threads and the worker thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Kinds of evaluation failure tracked separately so operators can tell a
/// depth-exceeded condition apart from a divide-by-zero one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// `EvaluationError::SignalNotFound`.
    SignalNotFound,
    /// `EvaluationError::WindowNotAvailable`.
    WindowNotAvailable,
    /// `EvaluationError::DepthExceeded`.
    DepthExceeded,
    /// `EvaluationError::TypeError`.
    TypeError,
}

/// Observability hook for the engine. Implementations must be cheap: every
/// method is called from the hot ingest/evaluate path.
pub trait Metrics: Send + Sync {
    /// Current depth of the bounded ingress queue.
    fn ingress_queue_depth(&self, depth: usize);
    /// Current depth of the bounded egress queue.
    fn egress_queue_depth(&self, depth: usize);
    /// A sample or frame was dropped because the ingress queue was full.
    fn ingress_overflow(&self);
    /// A snapshot was dropped because the egress queue was full.
    fn egress_overflow(&self);
    /// A sample was dropped due to a signal/buffer type mismatch.
    fn type_mismatch(&self);
    /// Condition `condition_index` produced a triggered snapshot.
    fn condition_triggered(&self, condition_index: usize);
    /// An evaluation error of the given kind occurred for some condition.
    fn evaluation_error(&self, kind: EvalErrorKind);
}

/// Discards every metric. Zero runtime overhead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn ingress_queue_depth(&self, _depth: usize) {}
    fn egress_queue_depth(&self, _depth: usize) {}
    fn ingress_overflow(&self) {}
    fn egress_overflow(&self) {}
    fn type_mismatch(&self) {}
    fn condition_triggered(&self, _condition_index: usize) {}
    fn evaluation_error(&self, _kind: EvalErrorKind) {}
}

/// Thread-safe atomic-counter implementation. Per-condition trigger counts
/// are indexed by condition index, up to [`crate::signal::MAX_CONDITIONS`].
pub struct CounterMetrics {
    /// Last observed ingress queue depth.
    pub ingress_queue_depth: AtomicU64,
    /// Last observed egress queue depth.
    pub egress_queue_depth: AtomicU64,
    /// Total samples/frames dropped due to ingress overflow.
    pub ingress_overflows: AtomicU64,
    /// Total snapshots dropped due to egress overflow.
    pub egress_overflows: AtomicU64,
    /// Total samples dropped due to a type mismatch.
    pub type_mismatches: AtomicU64,
    /// Total triggers, one counter per condition index.
    pub condition_triggers: [AtomicU64; crate::signal::MAX_CONDITIONS],
    /// Total `SignalNotFound` evaluation errors.
    pub signal_not_found_errors: AtomicU64,
    /// Total `WindowNotAvailable` evaluation errors.
    pub window_not_available_errors: AtomicU64,
    /// Total `DepthExceeded` evaluation errors.
    pub depth_exceeded_errors: AtomicU64,
    /// Total `TypeError` evaluation errors.
    pub type_errors: AtomicU64,
}

impl Default for CounterMetrics {
    fn default() -> Self {
        CounterMetrics {
            ingress_queue_depth: AtomicU64::new(0),
            egress_queue_depth: AtomicU64::new(0),
            ingress_overflows: AtomicU64::new(0),
            egress_overflows: AtomicU64::new(0),
            type_mismatches: AtomicU64::new(0),
            condition_triggers: std::array::from_fn(|_| AtomicU64::new(0)),
            signal_not_found_errors: AtomicU64::new(0),
            window_not_available_errors: AtomicU64::new(0),
            depth_exceeded_errors: AtomicU64::new(0),
            type_errors: AtomicU64::new(0),
        }
    }
}

impl Metrics for CounterMetrics {
    fn ingress_queue_depth(&self, depth: usize) {
        self.ingress_queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    fn egress_queue_depth(&self, depth: usize) {
        self.egress_queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    fn ingress_overflow(&self) {
        self.ingress_overflows.fetch_add(1, Ordering::Relaxed);
    }

    fn egress_overflow(&self) {
        self.egress_overflows.fetch_add(1, Ordering::Relaxed);
    }

    fn type_mismatch(&self) {
        self.type_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    fn condition_triggered(&self, condition_index: usize) {
        if let Some(counter) = self.condition_triggers.get(condition_index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn evaluation_error(&self, kind: EvalErrorKind) {
        let counter = match kind {
            EvalErrorKind::SignalNotFound => &self.signal_not_found_errors,
            EvalErrorKind::WindowNotAvailable => &self.window_not_available_errors,
            EvalErrorKind::DepthExceeded => &self.depth_exceeded_errors,
            EvalErrorKind::TypeError => &self.type_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
