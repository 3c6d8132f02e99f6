//! The bounded signal history store. One typed ring buffer per
//! `(signal_id, min_sample_interval_ms)` pair, plus one raw-frame ring per
//! `(frame_id, channel_id, min_sample_interval_ms)`. No boxing per sample —
//! each buffer is a flat `VecDeque`-free ring (`Vec` + head index) fixed to
//! the type of its first accepted sample.

use rustc_hash::FxHashMap;

use crate::signal::{
    CanChannelId, CanFrameId, ConditionMask, RawFrame, Sample, SignalId, SignalType, SignalValue,
    Timestamp, MAX_CAN_FRAME_BYTES,
};
use crate::window::FixedWindowAggregator;

/// Key identifying one signal ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalBufferKey {
    /// The signal this buffer holds.
    pub signal_id: SignalId,
    /// The minimum spacing between accepted samples.
    pub min_sample_interval_ms: u32,
}

/// Key identifying one raw-frame ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameBufferKey {
    /// CAN arbitration id.
    pub frame_id: CanFrameId,
    /// Internal channel id.
    pub channel_id: CanChannelId,
    /// The minimum spacing between accepted frames.
    pub min_sample_interval_ms: u32,
}

/// A fixed-capacity ring of [`Sample`]s for one `(signal, interval)` pair.
/// Fixed to the type of its first accepted sample; later mismatched inserts
/// are rejected by the caller before reaching this buffer.
#[derive(Debug, Clone)]
pub struct SignalBuffer {
    capacity: usize,
    signal_type: SignalType,
    min_sample_interval_ms: u32,
    samples: Vec<Sample>,
    /// Index one past the most recently written sample; `len` tracks how
    /// many slots are populated (`< capacity` until the ring first wraps).
    head: usize,
    len: usize,
    last_sample_monotonic: Option<Timestamp>,
    /// One aggregator per fixed-window length requested by a referencing
    /// condition; keyed by window length in milliseconds.
    windows: FxHashMap<u64, FixedWindowAggregator>,
}

impl SignalBuffer {
    /// Builds an empty buffer of the given capacity and fixed type.
    pub fn new(capacity: usize, signal_type: SignalType, min_sample_interval_ms: u32) -> Self {
        SignalBuffer {
            capacity: capacity.max(1),
            signal_type,
            min_sample_interval_ms,
            samples: Vec::new(),
            head: 0,
            len: 0,
            last_sample_monotonic: None,
            windows: FxHashMap::default(),
        }
    }

    /// The type this buffer is fixed to.
    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    /// Registers a fixed-window aggregator for `window_ms`, if one is not
    /// already present.
    pub fn ensure_window(&mut self, window_ms: u64) {
        self.windows
            .entry(window_ms)
            .or_insert_with(|| FixedWindowAggregator::new(window_ms));
    }

    /// The aggregator for `window_ms`, if registered.
    pub fn window(&self, window_ms: u64) -> Option<&FixedWindowAggregator> {
        self.windows.get(&window_ms)
    }

    /// Every registered window's next timeout, for `wait_time_hint`.
    pub fn window_timeouts(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.windows.values().filter_map(|w| w.next_window_timeout())
    }

    /// Applies pending window-boundary transitions for all registered
    /// windows at time `t`, without a new sample. Returns whether any window
    /// mutated.
    pub fn advance_windows(&mut self, t: Timestamp) -> bool {
        let mut mutated = false;
        for window in self.windows.values_mut() {
            mutated |= window.advance_to(t);
        }
        mutated
    }

    /// Accepts `value` at `(system_ts_ms, monotonic_now_ms)` if either no
    /// sample has been written yet or the minimum interval has elapsed.
    /// Returns `Some((changed, any_window_mutated, evicted))` describing
    /// whether the engine should mark this buffer's conditions dirty,
    /// `evicted` carrying the complex-payload handle of the slot overwritten
    /// (if any), or `None` if the sample was rejected by the interval gate.
    pub fn accept(
        &mut self,
        value: SignalValue,
        system_ts_ms: Timestamp,
        monotonic_now_ms: Timestamp,
    ) -> Option<(bool, bool, Option<u32>)> {
        let accept = match self.last_sample_monotonic {
            None => true,
            Some(last) => monotonic_now_ms >= last + self.min_sample_interval_ms as Timestamp,
        };
        if !accept {
            return None;
        }

        let previous_value = self.newest().map(|s| s.value);
        let evicted = if self.len < self.capacity {
            self.samples.push(Sample::empty(value));
            let idx = self.samples.len() - 1;
            self.head = idx;
            self.len += 1;
            None
        } else {
            self.head = (self.head + 1) % self.capacity;
            let evicted_value = self.samples[self.head].value;
            let evicted_handle = match evicted_value {
                SignalValue::ComplexHandle(h) => Some(h),
                _ => None,
            };
            evicted_handle
        };

        let slot = &mut self.samples[self.head];
        slot.value = value;
        slot.system_ts_ms = system_ts_ms;
        slot.consumed_bits = ConditionMask::empty();

        self.last_sample_monotonic = Some(monotonic_now_ms);

        let window_mutated = if let Some(numeric) = value.as_f64() {
            let mut any = false;
            for window in self.windows.values_mut() {
                any |= window.observe(monotonic_now_ms, numeric);
            }
            any
        } else {
            false
        };

        let changed = previous_value.map(|prev| prev != value).unwrap_or(true);
        Some((changed || window_mutated, window_mutated, evicted))
    }

    /// The most recently written sample, if any.
    pub fn newest(&self) -> Option<&Sample> {
        if self.len == 0 {
            None
        } else {
            Some(&self.samples[self.head])
        }
    }

    /// Walks the ring backwards from newest to oldest, yielding up to
    /// `max_count` samples whose `consumed_bits[condition_index]` is unset.
    /// If `mark_consumed` is set, sets that bit on every yielded sample.
    pub fn collect_unconsumed(
        &mut self,
        condition_index: usize,
        max_count: usize,
        mark_consumed: bool,
    ) -> Vec<Sample> {
        let mut out = Vec::new();
        if self.len == 0 {
            return out;
        }
        for step in 0..self.len {
            if out.len() >= max_count {
                break;
            }
            let idx = (self.head + self.capacity - step) % self.capacity;
            if idx >= self.samples.len() {
                continue;
            }
            if self.samples[idx].consumed_bits.get(condition_index) {
                continue;
            }
            out.push(self.samples[idx]);
            if mark_consumed {
                self.samples[idx].consumed_bits.set(condition_index);
            }
        }
        out
    }
}

/// A fixed-capacity ring of [`RawFrame`]s for one `(frame_id, channel_id,
/// interval)` triple.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    capacity: usize,
    min_sample_interval_ms: u32,
    frames: Vec<RawFrame>,
    head: usize,
    len: usize,
    last_sample_monotonic: Option<Timestamp>,
}

impl FrameBuffer {
    /// Builds an empty frame buffer of the given capacity.
    pub fn new(capacity: usize, min_sample_interval_ms: u32) -> Self {
        FrameBuffer {
            capacity: capacity.max(1),
            min_sample_interval_ms,
            frames: Vec::new(),
            head: 0,
            len: 0,
            last_sample_monotonic: None,
        }
    }

    /// Accepts a frame under the same interval gate as
    /// [`SignalBuffer::accept`]. Returns whether the insert was accepted.
    pub fn accept(
        &mut self,
        frame_id: CanFrameId,
        channel_id: CanChannelId,
        payload: &[u8],
        length: u8,
        system_ts_ms: Timestamp,
        monotonic_now_ms: Timestamp,
    ) -> bool {
        let accept = match self.last_sample_monotonic {
            None => true,
            Some(last) => monotonic_now_ms >= last + self.min_sample_interval_ms as Timestamp,
        };
        if !accept {
            return false;
        }

        if self.len < self.capacity {
            self.frames.push(RawFrame::empty());
            let idx = self.frames.len() - 1;
            self.head = idx;
            self.len += 1;
        } else {
            self.head = (self.head + 1) % self.capacity;
        }

        let slot = &mut self.frames[self.head];
        slot.frame_id = frame_id;
        slot.channel_id = channel_id;
        slot.length = length.min(MAX_CAN_FRAME_BYTES as u8);
        slot.payload = [0u8; MAX_CAN_FRAME_BYTES];
        let n = slot.length as usize;
        slot.payload[..n].copy_from_slice(&payload[..n]);
        slot.system_ts_ms = system_ts_ms;
        slot.consumed_bits = ConditionMask::empty();

        self.last_sample_monotonic = Some(monotonic_now_ms);
        true
    }

    /// Walks the ring backwards yielding up to `max_count` unconsumed
    /// frames, newest first.
    pub fn collect_unconsumed(
        &mut self,
        condition_index: usize,
        max_count: usize,
        mark_consumed: bool,
    ) -> Vec<RawFrame> {
        let mut out = Vec::new();
        if self.len == 0 {
            return out;
        }
        for step in 0..self.len {
            if out.len() >= max_count {
                break;
            }
            let idx = (self.head + self.capacity - step) % self.capacity;
            if idx >= self.frames.len() {
                continue;
            }
            if self.frames[idx].consumed_bits.get(condition_index) {
                continue;
            }
            out.push(self.frames[idx]);
            if mark_consumed {
                self.frames[idx].consumed_bits.set(condition_index);
            }
        }
        out
    }
}

/// The per-matrix collection of signal and frame ring buffers, rebuilt
/// wholesale on every matrix swap.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    signal_buffers: FxHashMap<SignalBufferKey, SignalBuffer>,
    frame_buffers: FxHashMap<FrameBufferKey, FrameBuffer>,
}

impl HistoryStore {
    /// An empty store with no buffers.
    pub fn new() -> Self {
        HistoryStore::default()
    }

    /// Creates (or returns the existing) buffer for `key`, sized to
    /// `capacity` and fixed to `signal_type`. If a buffer already exists, it
    /// is left as-is (capacity/type were already reconciled to the max
    /// across conditions at matrix-build time).
    pub fn ensure_signal_buffer(
        &mut self,
        key: SignalBufferKey,
        capacity: usize,
        signal_type: SignalType,
    ) -> &mut SignalBuffer {
        let interval = key.min_sample_interval_ms;
        self.signal_buffers
            .entry(key)
            .or_insert_with(|| SignalBuffer::new(capacity, signal_type, interval))
    }

    /// Creates (or returns the existing) frame buffer for `key`.
    pub fn ensure_frame_buffer(&mut self, key: FrameBufferKey, capacity: usize) -> &mut FrameBuffer {
        let interval = key.min_sample_interval_ms;
        self.frame_buffers
            .entry(key)
            .or_insert_with(|| FrameBuffer::new(capacity, interval))
    }

    /// All signal buffers matching `signal_id`, regardless of interval.
    pub fn signal_buffers_for(&mut self, signal_id: SignalId) -> impl Iterator<Item = &mut SignalBuffer> {
        self.signal_buffers
            .iter_mut()
            .filter(move |(k, _)| k.signal_id == signal_id)
            .map(|(_, v)| v)
    }

    /// Looks up a specific signal buffer.
    pub fn signal_buffer(&self, key: &SignalBufferKey) -> Option<&SignalBuffer> {
        self.signal_buffers.get(key)
    }

    /// Looks up a specific signal buffer, mutably.
    pub fn signal_buffer_mut(&mut self, key: &SignalBufferKey) -> Option<&mut SignalBuffer> {
        self.signal_buffers.get_mut(key)
    }

    /// Every registered buffer key for `signal_id`, across all intervals.
    pub fn keys_for_signal(&self, signal_id: SignalId) -> Vec<SignalBufferKey> {
        self.signal_buffers
            .keys()
            .filter(|k| k.signal_id == signal_id)
            .copied()
            .collect()
    }

    /// Every registered frame buffer key for `(frame_id, channel_id)`,
    /// across all intervals.
    pub fn keys_for_frame(&self, frame_id: CanFrameId, channel_id: CanChannelId) -> Vec<FrameBufferKey> {
        self.frame_buffers
            .keys()
            .filter(|k| k.frame_id == frame_id && k.channel_id == channel_id)
            .copied()
            .collect()
    }

    /// Looks up a specific frame buffer, mutably.
    pub fn frame_buffer_mut(&mut self, key: &FrameBufferKey) -> Option<&mut FrameBuffer> {
        self.frame_buffers.get_mut(key)
    }

    /// The newest sample across every buffer for `signal_id`, used by the
    /// evaluator's `Signal(id)` node (buffers may disagree if multiple
    /// intervals are registered; the shortest interval's buffer is freshest
    /// and is what the evaluator should read — callers pass the specific
    /// key they need).
    pub fn newest_for_signal(&self, signal_id: SignalId) -> Option<&Sample> {
        self.signal_buffers
            .iter()
            .filter(|(k, _)| k.signal_id == signal_id)
            .filter_map(|(_, buf)| buf.newest())
            .max_by_key(|s| s.system_ts_ms)
    }

    /// Discards every buffer. Called on matrix swap before reallocation.
    pub fn clear(&mut self) {
        self.signal_buffers.clear();
        self.frame_buffers.clear();
    }

    /// Advances every registered window at time `t`; returns whether any
    /// mutated (for dirty-mask propagation on a bare timer tick).
    pub fn advance_all_windows(&mut self, t: Timestamp) -> bool {
        let mut mutated = false;
        for buf in self.signal_buffers.values_mut() {
            mutated |= buf.advance_windows(t);
        }
        mutated
    }

    /// Earliest upcoming window timeout across every buffer, for
    /// `wait_time_hint`.
    pub fn earliest_window_timeout(&self) -> Option<Timestamp> {
        self.signal_buffers
            .values()
            .flat_map(|b| b.window_timeouts())
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_wraps_at_capacity() {
        let mut buf = SignalBuffer::new(2, SignalType::F64, 0);
        buf.accept(SignalValue::F64(1.0), 10, 10);
        buf.accept(SignalValue::F64(2.0), 20, 20);
        buf.accept(SignalValue::F64(3.0), 30, 30);
        assert_eq!(buf.newest().unwrap().value, SignalValue::F64(3.0));

        let collected = buf.collect_unconsumed(0, 10, false);
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].value, SignalValue::F64(3.0));
        assert_eq!(collected[1].value, SignalValue::F64(2.0));
    }

    #[test]
    fn min_interval_zero_accepts_every_sample() {
        let mut buf = SignalBuffer::new(4, SignalType::F64, 0);
        assert!(buf.accept(SignalValue::F64(1.0), 0, 0).is_some());
        assert!(buf.accept(SignalValue::F64(2.0), 1, 1).is_some());
    }

    #[test]
    fn min_interval_gates_rapid_samples() {
        let mut buf = SignalBuffer::new(4, SignalType::F64, 100);
        assert!(buf.accept(SignalValue::F64(1.0), 0, 0).is_some());
        assert!(buf.accept(SignalValue::F64(2.0), 50, 50).is_none());
        assert!(buf.accept(SignalValue::F64(3.0), 100, 100).is_some());
    }

    #[test]
    fn eviction_returns_complex_handle() {
        let mut buf = SignalBuffer::new(1, SignalType::ComplexHandle, 0);
        buf.accept(SignalValue::ComplexHandle(7), 0, 0);
        let (_, _, evicted) = buf.accept(SignalValue::ComplexHandle(8), 1, 1).unwrap();
        assert_eq!(evicted, Some(7));
    }

    #[test]
    fn consumed_bits_prevent_duplicate_emission() {
        let mut buf = SignalBuffer::new(4, SignalType::F64, 0);
        buf.accept(SignalValue::F64(1.0), 0, 0);
        let first = buf.collect_unconsumed(0, 10, true);
        assert_eq!(first.len(), 1);
        let second = buf.collect_unconsumed(0, 10, true);
        assert!(second.is_empty());
        // A different condition index has not consumed it yet.
        let other = buf.collect_unconsumed(1, 10, true);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn clear_drops_all_buffers() {
        let mut store = HistoryStore::new();
        store.ensure_signal_buffer(
            SignalBufferKey {
                signal_id: 1,
                min_sample_interval_ms: 0,
            },
            4,
            SignalType::F64,
        );
        assert!(!store.signal_buffers.is_empty());
        store.clear();
        assert!(store.signal_buffers.is_empty());
    }
}
