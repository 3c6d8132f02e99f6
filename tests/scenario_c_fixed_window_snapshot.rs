//! Run end-to-end through the engine rather than the aggregator directly: a
//! condition on `Window(LastAvg) > 5` only becomes true once the window has
//! rolled over, which here requires the worker to notice a window-boundary
//! timeout with no new sample arriving (the idle-timeout /
//! `advance_all_windows` path).

#[path = "integration/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use inspection_engine::clock::{ManualClock, TimePoint};
use inspection_engine::matrix::{
    BinaryOp, Condition, ExpressionNode, ExpressionNodeKind, InspectionMatrix, PassThroughMetadata,
    SignalSpec, WindowFunction,
};
use inspection_engine::signal::SignalType;
use inspection_engine::SignalValue;

fn window_avg_matrix() -> InspectionMatrix {
    let arena = vec![
        ExpressionNode::new(ExpressionNodeKind::Window(WindowFunction::LastAvg, 2)),
        ExpressionNode::new(ExpressionNodeKind::Float(5.0)),
        ExpressionNode::new(ExpressionNodeKind::OpBinary(BinaryOp::Gt, 0, 1)),
    ];
    let condition = Condition {
        root: 2,
        min_publish_interval_ms: 0,
        after_duration_ms: 0,
        signals: vec![SignalSpec {
            signal_id: 2,
            sample_buffer_size: 8,
            min_sample_interval_ms: 0,
            fixed_window_period_ms: 100,
            is_condition_only: false,
            signal_type: SignalType::F64,
        }],
        raw_frames: vec![],
        include_active_dtcs: false,
        trigger_only_on_rising_edge: true,
        probability_to_send: 1.0,
        metadata: PassThroughMetadata::default(),
        geohash: None,
    };
    InspectionMatrix {
        conditions: vec![condition],
        expression_node_storage: arena,
    }
}

#[test]
fn window_rollover_triggers_without_a_new_sample() {
    let clock = Arc::new(ManualClock::new(TimePoint::new(0, 0)));
    let mut engine = common::spawn(common::fast_config(), clock.clone());
    engine.set_inspection_matrix(window_avg_matrix());
    std::thread::sleep(Duration::from_millis(30));

    for (t, v) in [(10u64, 2.0), (50, 4.0), (90, 6.0), (110, 8.0), (190, 10.0)] {
        common::now(&clock, t);
        engine.ingest_signal(2, SignalType::F64, t, SignalValue::F64(v));
        std::thread::sleep(Duration::from_millis(15));
    }

    // No trigger yet: the only completed window so far averages (2,4,6) = 4,
    // below the threshold.
    assert!(engine.recv_snapshot_timeout(Duration::from_millis(30)).is_none());

    // The first sample (t=10) starts the window at its own timestamp
    // rather than an epoch-aligned raster, so windows close at 110 and 210,
    // not 100 and 200. Advance the clock past that boundary with no new
    // sample; the worker's idle timeout should notice and roll (8,10) into
    // `last`, whose average of 9 clears the threshold.
    common::now(&clock, 215);
    let snapshot = engine
        .recv_snapshot_timeout(Duration::from_millis(200))
        .expect("window rollover should trigger the condition");

    let values: Vec<f64> = snapshot.signals[0].1.iter().map(|s| s.value.as_f64().unwrap()).collect();
    assert!(values.contains(&10.0));
    assert!(values.contains(&8.0));

    engine.stop();
}
