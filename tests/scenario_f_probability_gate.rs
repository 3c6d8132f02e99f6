//! `probability_to_send` gates publication of an otherwise-true verdict, and
//! `EngineConfig`'s `disable_probability` bypasses that gate entirely for
//! deterministic replay.

#[path = "integration/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use inspection_engine::clock::{ManualClock, TimePoint};
use inspection_engine::signal::SignalType;
use inspection_engine::{EngineConfig, SignalValue};

#[test]
fn probability_zero_never_publishes() {
    let clock = Arc::new(ManualClock::new(TimePoint::new(0, 0)));
    let mut engine = common::spawn(common::fast_config(), clock.clone());
    // probability_to_send = 0.0: a verdict that is always true must never
    // clear the probability gate.
    engine.set_inspection_matrix(common::single_signal_matrix(1, 50.0, 4, false, 0, 0, 0.0));
    std::thread::sleep(Duration::from_millis(30));

    for t in [0u64, 20, 40, 60, 80] {
        common::now(&clock, t);
        engine.ingest_signal(1, SignalType::F64, t, SignalValue::F64(100.0));
    }
    assert!(
        engine.recv_snapshot_timeout(Duration::from_millis(150)).is_none(),
        "probability_to_send = 0.0 must suppress every trigger"
    );

    engine.stop();
}

#[test]
fn disable_probability_bypasses_the_gate() {
    let clock = Arc::new(ManualClock::new(TimePoint::new(0, 0)));
    let config = EngineConfig {
        disable_probability: true,
        ..common::fast_config()
    };
    let mut engine = common::spawn(config, clock.clone());
    // Same near-zero probability, but the config says to ignore it.
    engine.set_inspection_matrix(common::single_signal_matrix(1, 50.0, 4, true, 0, 0, 0.0001));
    std::thread::sleep(Duration::from_millis(30));

    common::now(&clock, 0);
    engine.ingest_signal(1, SignalType::F64, 0, SignalValue::F64(100.0));
    engine
        .recv_snapshot_timeout(common::SETTLE)
        .expect("disable_probability must make every true verdict publish");

    engine.stop();
}
