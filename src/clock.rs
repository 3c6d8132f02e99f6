//! Injectable clock: intervals use the monotonic timestamp exclusively,
//! user-visible fields use the wall timestamp. Never derive an interval from
//! wall-clock values — they can jump.

use crate::signal::Timestamp;

/// A paired wall-clock / monotonic instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimePoint {
    /// System wall-clock milliseconds, used only in user-visible records.
    pub system_time_ms: Timestamp,
    /// Monotonic milliseconds, used for all interval arithmetic.
    pub monotonic_time_ms: Timestamp,
}

impl TimePoint {
    /// Builds a point from both components.
    pub fn new(system_time_ms: Timestamp, monotonic_time_ms: Timestamp) -> Self {
        TimePoint {
            system_time_ms,
            monotonic_time_ms,
        }
    }

    /// Maps a wall timestamp to a monotonic point, given the current
    /// `(system, monotonic)` pair as a reference. Returns the sentinel
    /// `(0, 0)` point if `wall_ts_ms` predates what the monotonic clock can
    /// represent (i.e. falls before the reference's monotonic origin).
    pub fn from_wall_timestamp(wall_ts_ms: Timestamp, reference: TimePoint) -> TimePoint {
        if wall_ts_ms >= reference.system_time_ms {
            let delta = wall_ts_ms - reference.system_time_ms;
            TimePoint::new(wall_ts_ms, reference.monotonic_time_ms + delta)
        } else {
            let delta = reference.system_time_ms - wall_ts_ms;
            if delta > reference.monotonic_time_ms {
                TimePoint::new(0, 0)
            } else {
                TimePoint::new(wall_ts_ms, reference.monotonic_time_ms - delta)
            }
        }
    }
}

/// Collaborator-supplied clock. The engine consumes only this trait; a real
/// implementation comes from the host process.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn system_now_ms(&self) -> Timestamp;
    /// Current monotonic time in milliseconds, immune to wall-clock jumps.
    fn monotonic_now_ms(&self) -> Timestamp;
    /// Current time as both components.
    fn now(&self) -> TimePoint {
        TimePoint::new(self.system_now_ms(), self.monotonic_now_ms())
    }
    /// RFC3339/ISO8601 rendering of the current wall time, for log lines.
    fn iso8601_now(&self) -> String;
}

/// Default clock backed by `std::time`.
pub struct SystemClock {
    start_instant: std::time::Instant,
    start_system_ms: Timestamp,
}

impl SystemClock {
    /// Builds a new system clock, anchored to the moment of construction.
    pub fn new() -> Self {
        let start_system_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp;
        SystemClock {
            start_instant: std::time::Instant::now(),
            start_system_ms,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn system_now_ms(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }

    fn monotonic_now_ms(&self) -> Timestamp {
        self.start_instant.elapsed().as_millis() as Timestamp + self.start_system_ms
    }

    fn iso8601_now(&self) -> String {
        let ms = self.system_now_ms();
        format!("epoch+{ms}ms")
    }
}

/// A manually-advanced clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: std::sync::Arc<parking_lot::Mutex<TimePoint>>,
}

impl ManualClock {
    /// Builds a clock starting at `start`.
    pub fn new(start: TimePoint) -> Self {
        ManualClock {
            inner: std::sync::Arc::new(parking_lot::Mutex::new(start)),
        }
    }

    /// Advances both components by `ms`.
    pub fn advance_ms(&self, ms: Timestamp) {
        let mut guard = self.inner.lock();
        guard.system_time_ms += ms;
        guard.monotonic_time_ms += ms;
    }

    /// Sets the current point explicitly.
    pub fn set(&self, point: TimePoint) {
        *self.inner.lock() = point;
    }
}

impl Clock for ManualClock {
    fn system_now_ms(&self) -> Timestamp {
        self.inner.lock().system_time_ms
    }

    fn monotonic_now_ms(&self) -> Timestamp {
        self.inner.lock().monotonic_time_ms
    }

    fn iso8601_now(&self) -> String {
        format!("manual+{}ms", self.system_now_ms())
    }
}
