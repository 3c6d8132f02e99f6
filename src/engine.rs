//! The inspection engine. Owns the history store, window aggregators and
//! evaluator, runs the single worker thread, and exposes the non-blocking
//! ingest/swap API producers call from arbitrary threads.
//!
//! A handle type holds bounded channel senders plus a `JoinHandle`, with all
//! mutable state living inside the spawned thread's closure and
//! `recv_timeout` driving both wake-up and sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender as ChannelSender};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;

use crate::clock::{Clock, TimePoint};
use crate::config::EngineConfig;
use crate::dtc::{ActiveDtcStore, DtcInfo};
use crate::error::{EngineError, EvaluationError, Result};
use crate::eval::{evaluate_condition, EvalContext};
use crate::geohash::GeohashTracker;
use crate::history::{FrameBufferKey, HistoryStore, SignalBufferKey};
use crate::matrix::{InspectionMatrix, PassThroughMetadata, WindowFunction};
use crate::metrics::{EvalErrorKind, Metrics};
use crate::signal::{
    CanChannelId, CanFrameId, ConditionMask, RawFrame, Sample, SignalId, SignalType, SignalValue,
    Timestamp,
};

/// Usage stage passed to [`ComplexPayloadStore`] ref-count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStage {
    /// The handle is held by a history ring buffer slot.
    HistoryBuffer,
    /// The handle is about to be copied into an outbound [`Snapshot`].
    Snapshot,
}

/// Collaborator-supplied reference-counted store for complex (non-numeric)
/// signal payloads. Shared process-wide; must be internally thread-safe.
pub trait ComplexPayloadStore: Send + Sync {
    /// Increments the reference count of `handle` for `signal_id` at `stage`.
    fn incref(&self, signal_id: SignalId, handle: u32, stage: PayloadStage);
    /// Decrements the reference count of `handle` for `signal_id` at `stage`.
    fn decref(&self, signal_id: SignalId, handle: u32, stage: PayloadStage);
    /// Borrows the raw bytes behind `handle`, if still live.
    fn borrow(&self, signal_id: SignalId, handle: u32) -> Option<Vec<u8>>;
}

/// Wake-up hook invoked after a snapshot is pushed to the egress queue. No
/// payload is passed; the sender is expected to drain the queue itself.
pub trait Sender: Send + Sync {
    /// Called once per successful egress push.
    fn notify(&self);
}

/// A geohash current/previous delta attached to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeohashDelta {
    /// Geohash at the time of the trigger.
    pub current: String,
    /// Geohash most recently reported before this one.
    pub previous: String,
}

/// One triggered condition's collected data, ready for transport.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Opaque metadata copied from the triggering condition.
    pub metadata: PassThroughMetadata,
    /// Wall-clock time of the trigger.
    pub trigger_time: Timestamp,
    /// Process-unique (until restart) event identifier.
    pub event_id: u32,
    /// Index of the condition that triggered, in matrix declaration order.
    pub condition_index: usize,
    /// Collected samples per signal, newest-first.
    pub signals: Vec<(SignalId, Vec<Sample>)>,
    /// Collected raw frames per `(frame_id, channel_id)`, newest-first.
    pub raw_frames: Vec<(CanFrameId, CanChannelId, Vec<RawFrame>)>,
    /// The active-DTC set, if the condition requested it.
    pub dtc_info: Option<DtcInfo>,
    /// The geohash delta, if the condition requested it.
    pub geohash: Option<GeohashDelta>,
}

/// Per-condition publish-policy bookkeeping: the IDLE/WAITING/SNAPSHOT state
/// machine, minus the state label itself (derived from the three
/// booleans/options below rather than stored explicitly).
#[derive(Debug, Clone, Default)]
struct ConditionState {
    currently_true: bool,
    last_trigger: Option<TimePoint>,
    last_publish: Option<Timestamp>,
    pending_publish: bool,
    pending_event_id: Option<u32>,
}

enum IngressItem {
    Signal {
        signal_id: SignalId,
        type_tag: SignalType,
        system_ts_ms: Timestamp,
        value: SignalValue,
    },
    Frame {
        frame_id: CanFrameId,
        channel_id: CanChannelId,
        system_ts_ms: Timestamp,
        payload: Vec<u8>,
        length: u8,
    },
    ActiveDtcs(DtcInfo),
}

struct ConditionEvalContext<'a> {
    history: &'a HistoryStore,
    signal_keys: &'a FxHashMap<SignalId, SignalBufferKey>,
    window_ms: &'a FxHashMap<SignalId, u64>,
}

impl EvalContext for ConditionEvalContext<'_> {
    fn signal_value(&self, signal_id: SignalId) -> Option<f64> {
        let key = self.signal_keys.get(&signal_id)?;
        self.history.signal_buffer(key)?.newest()?.value.as_f64()
    }

    fn window_value(&self, signal_id: SignalId, func: WindowFunction) -> Option<f64> {
        let key = self.signal_keys.get(&signal_id)?;
        let window_ms = *self.window_ms.get(&signal_id)?;
        let buf = self.history.signal_buffer(key)?;
        let window = buf.window(window_ms)?;
        Some(match func {
            WindowFunction::LastAvg => window.last()?.avg,
            WindowFunction::PrevLastAvg => window.prev_last()?.avg,
            WindowFunction::LastMin => window.last()?.min,
            WindowFunction::PrevLastMin => window.prev_last()?.min,
            WindowFunction::LastMax => window.last()?.max,
            WindowFunction::PrevLastMax => window.prev_last()?.max,
        })
    }
}

fn map_eval_error(kind: EvaluationError) -> EvalErrorKind {
    match kind {
        EvaluationError::SignalNotFound => EvalErrorKind::SignalNotFound,
        EvaluationError::WindowNotAvailable => EvalErrorKind::WindowNotAvailable,
        EvaluationError::DepthExceeded => EvalErrorKind::DepthExceeded,
        EvaluationError::TypeError => EvalErrorKind::TypeError,
    }
}

/// How many queued ingress items the worker drains per loop iteration
/// before re-evaluating, bounding worst-case tick latency when producers
/// outpace evaluation.
const MAX_DRAIN_PER_TICK: usize = 4_096;

/// The worker thread's private state: everything the history store, window
/// aggregators and evaluator own.
/// Reachable only from inside the spawned thread; never shared.
struct Worker {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    complex_store: Option<Arc<dyn ComplexPayloadStore>>,
    sender_hook: Option<Arc<dyn Sender>>,
    rng: ChaCha8Rng,
    event_counter: u8,
    matrix: InspectionMatrix,
    history: HistoryStore,
    dtc_store: ActiveDtcStore,
    geohash_trackers: Vec<Option<GeohashTracker>>,
    condition_state: Vec<ConditionState>,
    dirty: ConditionMask,
    signal_dependents: FxHashMap<SignalBufferKey, ConditionMask>,
    frame_dependents: FxHashMap<FrameBufferKey, ConditionMask>,
    condition_signal_keys: Vec<FxHashMap<SignalId, SignalBufferKey>>,
    condition_window_ms: Vec<FxHashMap<SignalId, u64>>,
    round_robin_cursor: usize,
}

impl Worker {
    fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn Metrics>,
        complex_store: Option<Arc<dyn ComplexPayloadStore>>,
        sender_hook: Option<Arc<dyn Sender>>,
    ) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
        Worker {
            config,
            clock,
            metrics,
            complex_store,
            sender_hook,
            rng,
            event_counter: 0,
            matrix: InspectionMatrix::default(),
            history: HistoryStore::new(),
            dtc_store: ActiveDtcStore::new(),
            geohash_trackers: Vec::new(),
            condition_state: Vec::new(),
            dirty: ConditionMask::empty(),
            signal_dependents: FxHashMap::default(),
            frame_dependents: FxHashMap::default(),
            condition_signal_keys: Vec::new(),
            condition_window_ms: Vec::new(),
            round_robin_cursor: 0,
        }
    }

    fn swap_matrix(&mut self, new_matrix: InspectionMatrix) -> Result<()> {
        new_matrix.validate()?;

        // Swapping in a matrix equal to the one already active is a no-op:
        // skip clearing history / rebuilding dependency maps / resetting
        // condition state so re-applying the same program never drops
        // in-flight samples.
        if new_matrix == self.matrix {
            return Ok(());
        }

        self.history.clear();
        self.signal_dependents.clear();
        self.frame_dependents.clear();

        let n = new_matrix.conditions.len();
        self.condition_signal_keys = vec![FxHashMap::default(); n];
        self.condition_window_ms = vec![FxHashMap::default(); n];
        self.geohash_trackers = vec![None; n];
        self.condition_state = (0..n).map(|_| ConditionState::default()).collect();

        for (idx, condition) in new_matrix.conditions.iter().enumerate() {
            for sig in &condition.signals {
                let key = SignalBufferKey {
                    signal_id: sig.signal_id,
                    min_sample_interval_ms: sig.min_sample_interval_ms,
                };
                let buf = self
                    .history
                    .ensure_signal_buffer(key, sig.sample_buffer_size as usize, sig.signal_type);
                if sig.fixed_window_period_ms > 0 {
                    buf.ensure_window(sig.fixed_window_period_ms as u64);
                    self.condition_window_ms[idx].insert(sig.signal_id, sig.fixed_window_period_ms as u64);
                }
                self.condition_signal_keys[idx].insert(sig.signal_id, key);
                self.signal_dependents.entry(key).or_insert_with(ConditionMask::empty).set(idx);
            }
            for frame in &condition.raw_frames {
                let key = FrameBufferKey {
                    frame_id: frame.frame_id,
                    channel_id: frame.channel_id,
                    min_sample_interval_ms: frame.min_sample_interval_ms,
                };
                self.history.ensure_frame_buffer(key, frame.sample_buffer_size as usize);
                self.frame_dependents.entry(key).or_insert_with(ConditionMask::empty).set(idx);
            }
            if condition.geohash.is_some() {
                self.geohash_trackers[idx] = Some(GeohashTracker::new());
            }
        }

        self.matrix = new_matrix;
        // Every condition is dirty on the first tick after a swap; this
        // subsumes "evaluate static conditions once" for signal-free trees,
        // since they are swept up in the same unconditional first pass.
        let mut dirty = ConditionMask::empty();
        for idx in 0..n {
            dirty.set(idx);
        }
        self.dirty = dirty;
        self.round_robin_cursor = 0;
        Ok(())
    }

    fn ingest_signal(&mut self, signal_id: SignalId, type_tag: SignalType, system_ts_ms: Timestamp, value: SignalValue) {
        let now = self.clock.now();
        let reference = TimePoint::new(system_ts_ms, now.monotonic_time_ms);
        let keys = self.history.keys_for_signal(signal_id);
        let mut newly_dirty = ConditionMask::empty();

        for key in keys {
            let Some(buf) = self.history.signal_buffer_mut(&key) else {
                continue;
            };
            if buf.signal_type() != type_tag {
                self.metrics.type_mismatch();
                tracing::warn!(signal_id, ?type_tag, expected = ?buf.signal_type(), "signal type mismatch, sample dropped");
                continue;
            }
            if let Some((dirty, _, evicted)) = buf.accept(value, system_ts_ms, reference.monotonic_time_ms) {
                if let Some(handle) = evicted {
                    if let Some(store) = &self.complex_store {
                        store.decref(signal_id, handle, PayloadStage::HistoryBuffer);
                    }
                }
                if let SignalValue::ComplexHandle(handle) = value {
                    if let Some(store) = &self.complex_store {
                        store.incref(signal_id, handle, PayloadStage::HistoryBuffer);
                    }
                }
                if dirty {
                    if let Some(mask) = self.signal_dependents.get(&key) {
                        newly_dirty.union_with(*mask);
                    }
                }
            }
        }
        self.dirty.union_with(newly_dirty);
    }

    fn ingest_frame(
        &mut self,
        frame_id: CanFrameId,
        channel_id: CanChannelId,
        system_ts_ms: Timestamp,
        payload: &[u8],
        length: u8,
    ) {
        let now = self.clock.now();
        let keys = self.history.keys_for_frame(frame_id, channel_id);
        let mut newly_dirty = ConditionMask::empty();

        for key in keys {
            let Some(buf) = self.history.frame_buffer_mut(&key) else {
                continue;
            };
            if buf.accept(frame_id, channel_id, payload, length, system_ts_ms, now.monotonic_time_ms) {
                if let Some(mask) = self.frame_dependents.get(&key) {
                    newly_dirty.union_with(*mask);
                }
            }
        }
        self.dirty.union_with(newly_dirty);
    }

    /// A mask with every currently-registered condition index set. Used
    /// instead of [`ConditionMask::all`] whenever the matrix has fewer than
    /// [`crate::signal::MAX_CONDITIONS`] conditions, since `evaluate_one`
    /// indexes directly into `self.matrix.conditions`.
    fn all_conditions_dirty_mask(&self) -> ConditionMask {
        let mut mask = ConditionMask::empty();
        for idx in 0..self.matrix.conditions.len() {
            mask.set(idx);
        }
        mask
    }

    fn evaluate_conditions(&mut self, now: TimePoint) {
        let dirty = self.dirty;
        for idx in dirty.iter_set() {
            self.dirty.clear(idx);
            self.evaluate_one(idx, now);
        }
    }

    fn evaluate_one(&mut self, idx: usize, now: TimePoint) {
        let condition = self.matrix.conditions[idx].clone();
        let ctx = ConditionEvalContext {
            history: &self.history,
            signal_keys: &self.condition_signal_keys[idx],
            window_ms: &self.condition_window_ms[idx],
        };
        let (mut verdict, err) = evaluate_condition(&self.matrix.expression_node_storage, condition.root, &ctx);
        if let Some(kind) = err {
            self.metrics.evaluation_error(map_eval_error(kind));
        }

        if let Some(spec) = &condition.geohash {
            let geohash_changed = match (ctx.signal_value(spec.lat_signal_id), ctx.signal_value(spec.lon_signal_id)) {
                (Some(lat_raw), Some(lon_raw)) => {
                    let lat = crate::geohash::to_decimal_degrees(lat_raw, spec.unit);
                    let lon = crate::geohash::to_decimal_degrees(lon_raw, spec.unit);
                    self.geohash_trackers[idx]
                        .get_or_insert_with(GeohashTracker::new)
                        .evaluate(lat, lon, spec.precision)
                }
                _ => false,
            };
            verdict = verdict && geohash_changed;
        }

        let state = &mut self.condition_state[idx];
        if !verdict {
            state.currently_true = false;
            return;
        }

        if condition.trigger_only_on_rising_edge && state.currently_true {
            return;
        }
        if let Some(last_publish) = state.last_publish {
            if now.monotonic_time_ms.saturating_sub(last_publish) < condition.min_publish_interval_ms {
                return;
            }
        }
        if !self.config.disable_probability && condition.probability_to_send < 1.0 {
            let draw: f64 = self.rng.gen();
            if draw > condition.probability_to_send {
                return;
            }
        }

        let event_id = self.next_event_id(now.system_time_ms);
        let state = &mut self.condition_state[idx];
        state.last_trigger = Some(now);
        state.currently_true = true;
        state.pending_publish = true;
        state.pending_event_id = Some(event_id);
        self.metrics.condition_triggered(idx);
    }

    fn next_event_id(&mut self, system_ts_ms: Timestamp) -> u32 {
        let counter = self.event_counter;
        self.event_counter = self.event_counter.wrapping_add(1);
        ((system_ts_ms as u32 & 0x00FF_FFFF) << 8) | counter as u32
    }

    fn collect_next_snapshot(&mut self, now: TimePoint) -> Option<Snapshot> {
        let n = self.matrix.conditions.len();
        if n == 0 {
            return None;
        }
        for step in 0..n {
            let idx = (self.round_robin_cursor + step) % n;
            let state = &self.condition_state[idx];
            if !state.pending_publish {
                continue;
            }
            if let Some(last_trigger) = state.last_trigger {
                let after = self.matrix.conditions[idx].after_duration_ms;
                if last_trigger.monotonic_time_ms + after > now.monotonic_time_ms {
                    continue;
                }
            }
            self.round_robin_cursor = (idx + 1) % n;
            return Some(self.build_snapshot(idx, now));
        }
        None
    }

    fn build_snapshot(&mut self, idx: usize, now: TimePoint) -> Snapshot {
        let condition = self.matrix.conditions[idx].clone();
        let send_once = self.config.send_only_once_per_condition;

        let mut signals = Vec::new();
        for sig in &condition.signals {
            if sig.is_condition_only {
                continue;
            }
            let key = SignalBufferKey {
                signal_id: sig.signal_id,
                min_sample_interval_ms: sig.min_sample_interval_ms,
            };
            if let Some(buf) = self.history.signal_buffer_mut(&key) {
                let collected = buf.collect_unconsumed(idx, sig.sample_buffer_size as usize, send_once);
                if !collected.is_empty() {
                    if let Some(store) = &self.complex_store {
                        for sample in &collected {
                            if let SignalValue::ComplexHandle(handle) = sample.value {
                                store.incref(sig.signal_id, handle, PayloadStage::Snapshot);
                            }
                        }
                    }
                    signals.push((sig.signal_id, collected));
                }
            }
        }

        let mut raw_frames = Vec::new();
        for frame in &condition.raw_frames {
            let key = FrameBufferKey {
                frame_id: frame.frame_id,
                channel_id: frame.channel_id,
                min_sample_interval_ms: frame.min_sample_interval_ms,
            };
            if let Some(buf) = self.history.frame_buffer_mut(&key) {
                let collected = buf.collect_unconsumed(idx, frame.sample_buffer_size as usize, send_once);
                if !collected.is_empty() {
                    raw_frames.push((frame.frame_id, frame.channel_id, collected));
                }
            }
        }

        let dtc_info = if condition.include_active_dtcs {
            self.dtc_store.current().cloned()
        } else {
            None
        };

        let geohash = if condition.geohash.is_some() {
            self.geohash_trackers[idx].as_mut().map(|tracker| {
                let (current, previous) = tracker.consume();
                GeohashDelta { current, previous }
            })
        } else {
            None
        };

        let state = &mut self.condition_state[idx];
        let event_id = state.pending_event_id.take().unwrap_or(0);
        let trigger_time = state.last_trigger.map(|tp| tp.system_time_ms).unwrap_or(now.system_time_ms);
        state.pending_publish = false;
        state.last_publish = Some(now.monotonic_time_ms);

        Snapshot {
            metadata: condition.metadata,
            trigger_time,
            event_id,
            condition_index: idx,
            signals,
            raw_frames,
            dtc_info,
            geohash,
        }
    }

    fn wait_time_hint(&self) -> Option<Timestamp> {
        let window_hint = self.history.earliest_window_timeout();
        let after_duration_hint = self
            .condition_state
            .iter()
            .enumerate()
            .filter(|(_, s)| s.pending_publish)
            .filter_map(|(idx, s)| {
                s.last_trigger
                    .map(|lt| lt.monotonic_time_ms + self.matrix.conditions[idx].after_duration_ms)
            })
            .min();
        [window_hint, after_duration_hint].into_iter().flatten().min()
    }

    fn apply(&mut self, item: IngressItem) {
        match item {
            IngressItem::Signal {
                signal_id,
                type_tag,
                system_ts_ms,
                value,
            } => self.ingest_signal(signal_id, type_tag, system_ts_ms, value),
            IngressItem::Frame {
                frame_id,
                channel_id,
                system_ts_ms,
                payload,
                length,
            } => self.ingest_frame(frame_id, channel_id, system_ts_ms, &payload, length),
            IngressItem::ActiveDtcs(info) => self.dtc_store.ingest(info),
        }
    }

    fn run(
        mut self,
        ingress: Receiver<IngressItem>,
        egress: ChannelSender<Snapshot>,
        pending_matrix: Arc<Mutex<Option<InspectionMatrix>>>,
        matrix_pending: Arc<AtomicBool>,
        stop_flag: Arc<AtomicBool>,
    ) {
        loop {
            if matrix_pending.swap(false, Ordering::AcqRel) {
                if let Some(new_matrix) = pending_matrix.lock().take() {
                    if let Err(err) = self.swap_matrix(new_matrix) {
                        tracing::warn!(%err, "matrix swap rejected, previous matrix remains active");
                    }
                }
            }

            let now = self.clock.now();
            let timeout_ms = self
                .wait_time_hint()
                .map(|hint| hint.saturating_sub(now.monotonic_time_ms))
                .unwrap_or(self.config.idle_timeout_ms)
                .min(self.config.idle_timeout_ms);

            match ingress.recv_timeout(Duration::from_millis(timeout_ms)) {
                Ok(first) => {
                    self.apply(first);
                    for _ in 0..MAX_DRAIN_PER_TICK {
                        match ingress.try_recv() {
                            Ok(item) => self.apply(item),
                            Err(_) => break,
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = self.clock.now();
                    if self.history.advance_all_windows(now.monotonic_time_ms) {
                        self.dirty = self.all_conditions_dirty_mask();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return;
                }
            }

            let now = self.clock.now();
            self.evaluate_conditions(now);

            if stop_flag.load(Ordering::Acquire) {
                return;
            }

            while let Some(snapshot) = self.collect_next_snapshot(now) {
                match egress.try_send(snapshot) {
                    Ok(()) => {
                        if let Some(hook) = &self.sender_hook {
                            hook.notify();
                        }
                    }
                    Err(_) => {
                        self.metrics.egress_overflow();
                        tracing::warn!("egress queue full, snapshot dropped");
                    }
                }
            }

            if stop_flag.load(Ordering::Acquire) {
                return;
            }
        }
    }
}

/// Builder/handle for a running [`InspectionEngine`]: holds the channel
/// senders producers and the matrix-swap caller use, plus the worker
/// thread's `JoinHandle`. Cloning is not supported; share via `Arc` if
/// multiple producer sites need a handle.
pub struct InspectionEngine {
    ingress_tx: ChannelSender<IngressItem>,
    egress_rx: Receiver<Snapshot>,
    pending_matrix: Arc<Mutex<Option<InspectionMatrix>>>,
    matrix_pending: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    worker_handle: Option<JoinHandle<()>>,
    metrics: Arc<dyn Metrics>,
}

impl InspectionEngine {
    /// Spawns the worker thread and returns a handle to it.
    pub fn spawn(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn Metrics>,
        complex_store: Option<Arc<dyn ComplexPayloadStore>>,
        sender_hook: Option<Arc<dyn Sender>>,
    ) -> Self {
        let (ingress_tx, ingress_rx) = bounded::<IngressItem>(config.ingress_queue_capacity);
        let (egress_tx, egress_rx) = bounded::<Snapshot>(config.egress_queue_capacity);
        let pending_matrix = Arc::new(Mutex::new(None));
        let matrix_pending = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let worker = Worker::new(config, clock, metrics.clone(), complex_store, sender_hook);

        let thread_pending_matrix = pending_matrix.clone();
        let thread_matrix_pending = matrix_pending.clone();
        let thread_stop_flag = stop_flag.clone();
        let worker_handle = std::thread::spawn(move || {
            worker.run(
                ingress_rx,
                egress_tx,
                thread_pending_matrix,
                thread_matrix_pending,
                thread_stop_flag,
            );
        });

        InspectionEngine {
            ingress_tx,
            egress_rx,
            pending_matrix,
            matrix_pending,
            stop_flag,
            worker_handle: Some(worker_handle),
            metrics,
        }
    }

    /// Non-blocking; drops the sample and increments a counter on overflow.
    pub fn ingest_signal(&self, signal_id: SignalId, type_tag: SignalType, system_ts_ms: Timestamp, value: SignalValue) {
        let item = IngressItem::Signal {
            signal_id,
            type_tag,
            system_ts_ms,
            value,
        };
        if self.ingress_tx.try_send(item).is_err() {
            self.metrics.ingress_overflow();
        }
    }

    /// Non-blocking; drops the frame and increments a counter on overflow.
    pub fn ingest_frame(&self, frame_id: CanFrameId, channel_id: CanChannelId, system_ts_ms: Timestamp, bytes: &[u8], length: u8) {
        let item = IngressItem::Frame {
            frame_id,
            channel_id,
            system_ts_ms,
            payload: bytes.to_vec(),
            length,
        };
        if self.ingress_tx.try_send(item).is_err() {
            self.metrics.ingress_overflow();
        }
    }

    /// Replaces the current active-DTC set.
    pub fn ingest_active_dtcs(&self, info: DtcInfo) {
        if self.ingress_tx.try_send(IngressItem::ActiveDtcs(info)).is_err() {
            self.metrics.ingress_overflow();
        }
    }

    /// Stages `matrix` for the worker to swap in at the top of its next
    /// loop iteration. Validation happens on the worker thread; rejection is
    /// only observable via a logged warning and the previous matrix
    /// remaining active.
    pub fn set_inspection_matrix(&self, matrix: InspectionMatrix) {
        *self.pending_matrix.lock() = Some(matrix);
        self.matrix_pending.store(true, Ordering::Release);
    }

    /// Pops the next available snapshot, if any, without blocking.
    pub fn try_recv_snapshot(&self) -> Option<Snapshot> {
        self.egress_rx.try_recv().ok()
    }

    /// Blocks up to `timeout` for the next snapshot.
    pub fn recv_snapshot_timeout(&self, timeout: Duration) -> Option<Snapshot> {
        self.egress_rx.recv_timeout(timeout).ok()
    }

    /// Signals the worker to stop after finishing its in-progress drain,
    /// and joins it. No new snapshots are emitted once `stop` is observed.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for InspectionEngine {
    fn drop(&mut self) {
        if self.worker_handle.is_some() {
            self.stop();
        }
    }
}
