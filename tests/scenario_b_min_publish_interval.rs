//! A level-triggered condition whose `min_publish_interval_ms` suppresses a
//! second trigger that arrives too soon after the first, then allows a
//! third once the interval has elapsed.

#[path = "integration/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use inspection_engine::clock::{ManualClock, TimePoint};
use inspection_engine::signal::SignalType;
use inspection_engine::SignalValue;

#[test]
fn second_trigger_within_interval_is_suppressed() {
    let clock = Arc::new(ManualClock::new(TimePoint::new(0, 0)));
    let mut engine = common::spawn(common::fast_config(), clock.clone());
    // Level-triggered (not rising-edge-only), 200ms floor between publishes.
    engine.set_inspection_matrix(common::single_signal_matrix(1, 50.0, 8, false, 200, 0, 1.0));
    std::thread::sleep(Duration::from_millis(30));

    common::now(&clock, 0);
    engine.ingest_signal(1, SignalType::F64, 0, SignalValue::F64(60.0));
    let first = engine.recv_snapshot_timeout(common::SETTLE).expect("first trigger publishes");

    // Still true 50ms later, well inside the 200ms floor: must not publish
    // again even though the condition is still verified true every tick.
    common::now(&clock, 50);
    engine.ingest_signal(1, SignalType::F64, 50, SignalValue::F64(65.0));
    assert!(engine.recv_snapshot_timeout(Duration::from_millis(80)).is_none());

    // 220ms after the first publish: the floor has elapsed, a fresh sample
    // re-triggers it.
    common::now(&clock, 220);
    engine.ingest_signal(1, SignalType::F64, 220, SignalValue::F64(70.0));
    let second = engine.recv_snapshot_timeout(common::SETTLE).expect("third sample re-triggers after the floor");
    assert_ne!(second.event_id, first.event_id);

    engine.stop();
}
