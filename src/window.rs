//! Streaming fixed-time-window aggregation. Each `(signal, window_ms)` pair
//! gets one [`FixedWindowAggregator`] maintaining three generations —
//! `collecting`, `last`, `prev_last` — updated online as samples arrive.

use crate::signal::Timestamp;

/// One completed (or in-progress) window's aggregate statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowGeneration {
    min: f64,
    max: f64,
    avg: f64,
    count: u64,
}

impl WindowGeneration {
    const fn empty() -> Self {
        WindowGeneration {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            avg: 0.0,
            count: 0,
        }
    }

    fn update(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        // Online mean: avg_n = avg_{n-1} + (value - avg_{n-1}) / n.
        self.avg += (value - self.avg) / self.count as f64;
    }

    fn available(&self) -> bool {
        self.count > 0
    }
}

/// `min`/`max`/`avg` of a completed window, or [`None`] if the window has no
/// samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Minimum observed value.
    pub min: f64,
    /// Maximum observed value.
    pub max: f64,
    /// Arithmetic mean of observed values.
    pub avg: f64,
}

impl From<WindowGeneration> for Option<WindowStats> {
    fn from(gen: WindowGeneration) -> Self {
        gen.available().then_some(WindowStats {
            min: gen.min,
            max: gen.max,
            avg: gen.avg,
        })
    }
}

/// Streaming min/max/avg over a fixed window length, keeping the current
/// in-progress window plus the two most recently completed ones.
#[derive(Debug, Clone)]
pub struct FixedWindowAggregator {
    window_ms: u64,
    last_calculated_ms: Option<Timestamp>,
    collecting: WindowGeneration,
    last: WindowGeneration,
    prev_last: WindowGeneration,
}

impl FixedWindowAggregator {
    /// Builds an aggregator over windows of `window_ms` milliseconds. Does
    /// nothing useful until [`FixedWindowAggregator::observe`] is called at
    /// least once.
    pub fn new(window_ms: u64) -> Self {
        FixedWindowAggregator {
            window_ms,
            last_calculated_ms: None,
            collecting: WindowGeneration::empty(),
            last: WindowGeneration::empty(),
            prev_last: WindowGeneration::empty(),
        }
    }

    /// The `last` (most recently completed) window, if available.
    pub fn last(&self) -> Option<WindowStats> {
        self.last.into()
    }

    /// The window completed before `last`, if available.
    pub fn prev_last(&self) -> Option<WindowStats> {
        self.prev_last.into()
    }

    /// Monotonic timestamp at which the current collecting window closes, or
    /// `None` before the first sample. The engine folds this into
    /// `wait_time_hint` so the worker wakes even without new samples.
    pub fn next_window_timeout(&self) -> Option<Timestamp> {
        self.last_calculated_ms.map(|start| start + self.window_ms)
    }

    /// Applies the window-boundary transition rules for current time `t`
    /// without adding a sample. Used when the worker wakes on a window
    /// timeout rather than a new ingest. Returns whether `last`/`prev_last`
    /// changed.
    pub fn advance_to(&mut self, t: Timestamp) -> bool {
        self.maybe_transition(t)
    }

    /// Records a new sample at time `t`, applying window transitions first
    /// and then folding `value` into the (possibly just-reset) collecting
    /// window. Returns whether `last`/`prev_last` changed.
    pub fn observe(&mut self, t: Timestamp, value: f64) -> bool {
        let mutated = match self.last_calculated_ms {
            None => {
                self.last_calculated_ms = Some(t);
                false
            }
            Some(_) => self.maybe_transition(t),
        };
        self.collecting.update(value);
        mutated
    }

    fn window_start(t: Timestamp, window_ms: u64) -> Timestamp {
        (t / window_ms) * window_ms
    }

    fn maybe_transition(&mut self, t: Timestamp) -> bool {
        let Some(last_calc) = self.last_calculated_ms else {
            return false;
        };
        if t >= last_calc + 2 * self.window_ms {
            self.last = WindowGeneration::empty();
            self.prev_last = if self.collecting.available() {
                self.collecting
            } else {
                WindowGeneration::empty()
            };
            self.collecting = WindowGeneration::empty();
            self.last_calculated_ms = Some(Self::window_start(t, self.window_ms));
            true
        } else if t >= last_calc + self.window_ms {
            self.prev_last = self.last;
            self.last = if self.collecting.available() {
                self.collecting
            } else {
                WindowGeneration::empty()
            };
            self.collecting = WindowGeneration::empty();
            self.last_calculated_ms = Some(last_calc + self.window_ms);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_c_fixed_window_avg() {
        // window = 100ms, samples (t, value) = (10,2) (50,4) (90,6) (110,8)
        // (190,10). The first sample starts the window at its own
        // timestamp (t=10), not an epoch-aligned raster, so windows close
        // at 110 and 210, not 100 and 200: `last` = [8,10] (avg 9) becomes
        // available once the clock reaches 210.
        let mut agg = FixedWindowAggregator::new(100);
        agg.observe(10, 2.0);
        agg.observe(50, 4.0);
        agg.observe(90, 6.0);
        agg.observe(110, 8.0);
        agg.observe(190, 10.0);
        agg.advance_to(210);

        let last = agg.last().expect("last window available");
        assert_eq!(last.min, 8.0);
        assert_eq!(last.max, 10.0);
        assert_eq!(last.avg, 9.0);

        let prev = agg.prev_last().expect("prev_last window available");
        assert_eq!(prev.avg, 4.0);
    }

    #[test]
    fn two_windows_skipped_marks_last_unavailable() {
        let mut agg = FixedWindowAggregator::new(100);
        agg.observe(0, 1.0);
        // Next sample arrives 3 windows later with nothing in between: the
        // window immediately following the skip has no samples (`last`
        // unavailable), but the window that held the t=0 sample rolls
        // forward into `prev_last`.
        let mutated = agg.observe(300, 2.0);
        assert!(mutated);
        assert!(agg.last().is_none());
        assert_eq!(agg.prev_last().unwrap().avg, 1.0);
    }

    #[test]
    fn before_first_sample_has_no_timeout() {
        let agg = FixedWindowAggregator::new(100);
        assert_eq!(agg.next_window_timeout(), None);
    }

    #[test]
    fn avg_matches_simple_mean_within_one_window() {
        let mut agg = FixedWindowAggregator::new(1_000);
        for v in [1.0, 2.0, 3.0, 4.0] {
            agg.observe(0, v);
        }
        agg.advance_to(1_000);
        let last = agg.last().unwrap();
        assert!((last.avg - 2.5).abs() < 1e-9);
        assert_eq!(last.min, 1.0);
        assert_eq!(last.max, 4.0);
    }
}
