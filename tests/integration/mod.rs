//! Shared helpers for the end-to-end scenario tests in this directory. Each
//! `scenario_*.rs` file drives an [`InspectionEngine`] with a
//! [`ManualClock`] for deterministic timing.

use std::sync::Arc;
use std::time::Duration;

use inspection_engine::clock::{ManualClock, TimePoint};
use inspection_engine::matrix::{
    BinaryOp, Condition, ExpressionNode, ExpressionNodeKind, InspectionMatrix, PassThroughMetadata,
    SignalSpec,
};
use inspection_engine::metrics::NoopMetrics;
use inspection_engine::signal::{SignalId, SignalType};
use inspection_engine::{EngineConfig, InspectionEngine};

/// Fast idle timeout so a test never waits a full second for the worker to
/// notice a window/after-duration deadline with no new samples.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        idle_timeout_ms: 10,
        ..EngineConfig::default()
    }
}

pub fn spawn(config: EngineConfig, clock: Arc<ManualClock>) -> InspectionEngine {
    InspectionEngine::spawn(config, clock, Arc::new(NoopMetrics), None, None)
}

/// A single-condition matrix over one `f64` signal compared against
/// `threshold`, with the publish-policy knobs a test cares about exposed as
/// arguments and everything else defaulted.
#[allow(clippy::too_many_arguments)]
pub fn single_signal_matrix(
    signal_id: SignalId,
    threshold: f64,
    buffer_size: u32,
    rising_edge_only: bool,
    min_publish_interval_ms: u64,
    after_duration_ms: u64,
    probability_to_send: f64,
) -> InspectionMatrix {
    let arena = vec![
        ExpressionNode::new(ExpressionNodeKind::Signal(signal_id)),
        ExpressionNode::new(ExpressionNodeKind::Float(threshold)),
        ExpressionNode::new(ExpressionNodeKind::OpBinary(BinaryOp::Gt, 0, 1)),
    ];
    let condition = Condition {
        root: 2,
        min_publish_interval_ms,
        after_duration_ms,
        signals: vec![SignalSpec {
            signal_id,
            sample_buffer_size: buffer_size,
            min_sample_interval_ms: 0,
            fixed_window_period_ms: 0,
            is_condition_only: false,
            signal_type: SignalType::F64,
        }],
        raw_frames: vec![],
        include_active_dtcs: false,
        trigger_only_on_rising_edge: rising_edge_only,
        probability_to_send,
        metadata: PassThroughMetadata::default(),
        geohash: None,
    };
    InspectionMatrix {
        conditions: vec![condition],
        expression_node_storage: arena,
    }
}

pub fn now(clock: &ManualClock, t: u64) -> TimePoint {
    clock.set(TimePoint::new(t, t));
    TimePoint::new(t, t)
}

pub const SETTLE: Duration = Duration::from_millis(60);
