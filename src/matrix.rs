//! The inspection matrix: the immutable "program" the engine runs.
//! Expression nodes live in a contiguous arena and reference each other by
//! index rather than pointer, so the whole matrix is a single owned,
//! value-comparable object.

use crate::error::{EngineError, Result};
use crate::geohash::GpsUnitType;
use crate::signal::{CanChannelId, CanFrameId, SignalId, SignalType, MAX_CONDITIONS};

/// Maximum depth of an expression tree rooted at a condition; a structurally
/// deeper tree is rejected at matrix-swap time (`EngineError::MatrixRejected`,
/// "too-deep tree"). The evaluator additionally enforces this as a runtime
/// recursion budget, see [`crate::eval`].
pub const MAX_EXPRESSION_DEPTH: u32 = 10;

/// Static memory budget for all signal sample buffers combined, across every
/// condition referencing them.
pub const MAX_SAMPLE_MEMORY_BYTES: usize = 20 * 1024 * 1024;

/// `func` argument of a [`ExpressionNodeKind::Window`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    /// Average of the most recently completed window.
    LastAvg,
    /// Average of the window before that.
    PrevLastAvg,
    /// Minimum of the most recently completed window.
    LastMin,
    /// Minimum of the window before that.
    PrevLastMin,
    /// Maximum of the most recently completed window.
    LastMax,
    /// Maximum of the window before that.
    PrevLastMax,
}

/// Binary arithmetic/comparison/logical operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==` (within [`crate::eval::FLOAT_EQUAL_TOLERANCE`] for floats)
    Eq,
    /// `!=`
    Ne,
    /// `&&`, short-circuiting.
    And,
    /// `||`, short-circuiting.
    Or,
}

impl BinaryOp {
    /// Whether this operator is a short-circuiting logical operator.
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Unary operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Boolean negation.
    Not,
}

/// One node in the expression arena. `left`/`right` are arena indices, not
/// pointers, so [`InspectionMatrix`] can be cloned, compared for value
/// equality, and swapped atomically as one owned value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpressionNodeKind {
    /// A floating-point literal.
    Float(f64),
    /// A boolean literal.
    Bool(bool),
    /// The newest sample of a signal.
    Signal(SignalId),
    /// A fixed-window aggregate over a signal.
    Window(WindowFunction, SignalId),
    /// A binary operator over `left`/`right` (indices into
    /// [`InspectionMatrix::expression_node_storage`]).
    OpBinary(BinaryOp, usize, usize),
    /// A unary operator over `inner` (an arena index).
    OpUnary(UnaryOp, usize),
}

/// An expression arena node. Stored by value in
/// [`InspectionMatrix::expression_node_storage`]; referenced by index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpressionNode {
    /// The node's operation and operands.
    pub kind: ExpressionNodeKind,
}

impl ExpressionNode {
    /// Builds a leaf, binary, or unary node directly from its kind.
    pub fn new(kind: ExpressionNodeKind) -> Self {
        ExpressionNode { kind }
    }
}

/// A per-condition signal collection request.
#[derive(Debug, Clone)]
pub struct SignalSpec {
    /// The signal to sample.
    pub signal_id: SignalId,
    /// At least this many of the most recent samples are retained.
    pub sample_buffer_size: u32,
    /// Minimum spacing between accepted samples; `0` accepts every sample.
    pub min_sample_interval_ms: u32,
    /// Window length for this signal's fixed-window aggregator, or `0` for
    /// no windowing.
    pub fixed_window_period_ms: u32,
    /// If `true`, the signal is only buffered for condition evaluation and
    /// never included in an emitted snapshot.
    pub is_condition_only: bool,
    /// The signal's declared type; the buffer is fixed to this type.
    pub signal_type: SignalType,
}

/// A per-condition raw-CAN-frame collection request.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    /// CAN arbitration id.
    pub frame_id: CanFrameId,
    /// Internal channel id.
    pub channel_id: CanChannelId,
    /// At least this many of the most recent frames are retained.
    pub sample_buffer_size: u32,
    /// Minimum spacing between accepted frames; `0` accepts every frame.
    pub min_sample_interval_ms: u32,
}

/// Opaque pass-through metadata copied verbatim into a triggered snapshot.
#[derive(Debug, Clone, Default)]
pub struct PassThroughMetadata {
    /// Whether the sender should compress the snapshot.
    pub compress: bool,
    /// Whether the sender should persist the snapshot before transport.
    pub persist: bool,
    /// Sender-defined priority; higher sends first.
    pub priority: u32,
    /// Identifier of the decoder manifest this condition was compiled
    /// against.
    pub decoder_id: String,
    /// Identifier of the campaign/collection scheme this condition belongs
    /// to.
    pub campaign_id: String,
}

/// Geohash-delta request attached to a condition.
#[derive(Debug, Clone, Copy)]
pub struct GeohashSpec {
    /// Signal carrying latitude, in `unit`.
    pub lat_signal_id: SignalId,
    /// Signal carrying longitude, in `unit`.
    pub lon_signal_id: SignalId,
    /// Geohash string length, in `[1, 9]`.
    pub precision: u8,
    /// Unit the lat/lon signals are expressed in.
    pub unit: GpsUnitType,
}

/// One trigger condition plus its collection policy.
#[derive(Debug, Clone)]
pub struct Condition {
    /// Arena index of the root expression node.
    pub root: usize,
    /// Floor on time between successive triggers of this condition.
    pub min_publish_interval_ms: u64,
    /// Delay after a true edge before snapshotting, to capture post-trigger
    /// samples.
    pub after_duration_ms: u64,
    /// Signals this condition reads or wants to collect.
    pub signals: Vec<SignalSpec>,
    /// Raw CAN frames this condition wants to collect.
    pub raw_frames: Vec<FrameSpec>,
    /// Whether the active-DTC set is part of the snapshot.
    pub include_active_dtcs: bool,
    /// One-shot (rising edge only) vs level-triggered.
    pub trigger_only_on_rising_edge: bool,
    /// Probability in `[0.0, 1.0]` that a true verdict actually publishes.
    pub probability_to_send: f64,
    /// Opaque metadata copied into the snapshot.
    pub metadata: PassThroughMetadata,
    /// If present, the snapshot carries a geohash delta computed from these
    /// signals.
    pub geohash: Option<GeohashSpec>,
}

/// The immutable "program" the engine runs: a set of conditions plus the
/// shared expression arena they reference into.
#[derive(Debug, Clone, Default)]
pub struct InspectionMatrix {
    /// Up to [`MAX_CONDITIONS`] conditions, in declaration order. Order is
    /// significant: ties within a tick are broken in favor of the
    /// earlier-indexed condition.
    pub conditions: Vec<Condition>,
    /// Arena of expression nodes referenced by index from `conditions` and
    /// from nodes within this vector. Traversal is depth-first pre-order.
    pub expression_node_storage: Vec<ExpressionNode>,
}

impl PartialEq for InspectionMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.expression_node_storage == other.expression_node_storage
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .zip(other.conditions.iter())
                .all(|(a, b)| {
                    a.root == b.root
                        && a.min_publish_interval_ms == b.min_publish_interval_ms
                        && a.after_duration_ms == b.after_duration_ms
                        && a.include_active_dtcs == b.include_active_dtcs
                        && a.trigger_only_on_rising_edge == b.trigger_only_on_rising_edge
                        && a.probability_to_send == b.probability_to_send
                })
    }
}

impl InspectionMatrix {
    /// Returns the static (root-to-leaf) depth of the expression tree rooted
    /// at arena index `root`, or `None` if the arena contains a cycle /
    /// out-of-range index reachable from `root`.
    fn static_depth(&self, root: usize, budget: u32) -> Option<u32> {
        if budget == 0 {
            return None;
        }
        let node = self.expression_node_storage.get(root)?;
        Some(match node.kind {
            ExpressionNodeKind::Float(_) | ExpressionNodeKind::Bool(_) => 1,
            ExpressionNodeKind::Signal(_) | ExpressionNodeKind::Window(_, _) => 1,
            ExpressionNodeKind::OpBinary(_, left, right) => {
                let l = self.static_depth(left, budget - 1)?;
                let r = self.static_depth(right, budget - 1)?;
                1 + l.max(r)
            }
            ExpressionNodeKind::OpUnary(_, inner) => 1 + self.static_depth(inner, budget - 1)?,
        })
    }

    /// Validates condition count, expression depth, and the 20 MiB
    /// sample-memory budget. Returns
    /// [`EngineError::MatrixRejected`] with a human-readable reason on the
    /// first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.conditions.len() > MAX_CONDITIONS {
            return Err(EngineError::MatrixRejected(format!(
                "{} conditions exceeds the {} condition cap",
                self.conditions.len(),
                MAX_CONDITIONS
            )));
        }

        for (index, condition) in self.conditions.iter().enumerate() {
            // Depth budget is MAX_EXPRESSION_DEPTH + 1 recursive calls so a
            // tree whose deepest path is exactly MAX_EXPRESSION_DEPTH nodes
            // resolves, and one node deeper reports None (rejected).
            match self.static_depth(condition.root, MAX_EXPRESSION_DEPTH + 1) {
                Some(depth) if depth <= MAX_EXPRESSION_DEPTH => {}
                _ => {
                    return Err(EngineError::MatrixRejected(format!(
                        "condition {index} expression tree exceeds depth {MAX_EXPRESSION_DEPTH}"
                    )));
                }
            }
        }

        let used_bytes = self.estimate_sample_memory_bytes();
        if used_bytes > MAX_SAMPLE_MEMORY_BYTES {
            return Err(EngineError::MatrixRejected(format!(
                "matrix requires {used_bytes} bytes of sample memory, exceeding the {MAX_SAMPLE_MEMORY_BYTES} byte budget"
            )));
        }

        Ok(())
    }

    /// Estimates total bytes needed for all signal and raw-frame ring
    /// buffers, merging requests for the same `(signal_id, interval)` or
    /// `(frame_id, channel_id, interval)` pair to the max requested size.
    pub fn estimate_sample_memory_bytes(&self) -> usize {
        use std::collections::HashMap;

        let mut signal_buffers: HashMap<(SignalId, u32), (u32, SignalType)> = HashMap::new();
        let mut frame_buffers: HashMap<(CanFrameId, CanChannelId, u32), u32> = HashMap::new();

        for condition in &self.conditions {
            for sig in &condition.signals {
                let key = (sig.signal_id, sig.min_sample_interval_ms);
                let entry = signal_buffers
                    .entry(key)
                    .or_insert((sig.sample_buffer_size, sig.signal_type));
                entry.0 = entry.0.max(sig.sample_buffer_size);
            }
            for frame in &condition.raw_frames {
                let key = (frame.frame_id, frame.channel_id, frame.min_sample_interval_ms);
                let entry = frame_buffers.entry(key).or_insert(frame.sample_buffer_size);
                *entry = (*entry).max(frame.sample_buffer_size);
            }
        }

        let sample_element_bytes = |ty: SignalType| -> usize {
            match ty {
                SignalType::U8 | SignalType::I8 | SignalType::Bool => 1,
                SignalType::U16 | SignalType::I16 => 2,
                SignalType::U32 | SignalType::I32 | SignalType::F32 | SignalType::ComplexHandle => 4,
                SignalType::U64 | SignalType::I64 | SignalType::F64 => 8,
            }
        };
        // consumed_bits (32 bytes) + timestamp (8 bytes) dominate small
        // value types; accounted for explicitly rather than folded into
        // size_of::<Sample>() so the estimate is independent of in-memory
        // layout/padding choices.
        const SAMPLE_OVERHEAD_BYTES: usize = 40;
        const FRAME_BYTES: usize = 64 + 40 + 8;

        let mut total = 0usize;
        for ((_, _), (size, ty)) in signal_buffers {
            total += size as usize * (sample_element_bytes(ty) + SAMPLE_OVERHEAD_BYTES);
        }
        for ((_, _, _), size) in frame_buffers {
            total += size as usize * FRAME_BYTES;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(kind: ExpressionNodeKind) -> ExpressionNode {
        ExpressionNode::new(kind)
    }

    #[test]
    fn depth_exactly_ten_is_accepted() {
        // Build a left-leaning chain of 10 binary ops over a float leaf:
        // depth = 10.
        let mut arena = vec![leaf(ExpressionNodeKind::Float(1.0))];
        let mut root = 0usize;
        for _ in 0..9 {
            let rhs = arena.len();
            arena.push(leaf(ExpressionNodeKind::Float(1.0)));
            let new_root = arena.len();
            arena.push(leaf(ExpressionNodeKind::OpBinary(BinaryOp::Add, root, rhs)));
            root = new_root;
        }
        let matrix = InspectionMatrix {
            conditions: vec![Condition {
                root,
                min_publish_interval_ms: 0,
                after_duration_ms: 0,
                signals: vec![],
                raw_frames: vec![],
                include_active_dtcs: false,
                trigger_only_on_rising_edge: false,
                probability_to_send: 1.0,
                metadata: PassThroughMetadata::default(),
                geohash: None,
            }],
            expression_node_storage: arena,
        };
        assert_eq!(matrix.static_depth(root, MAX_EXPRESSION_DEPTH + 1), Some(10));
        assert!(matrix.validate().is_ok());
    }

    #[test]
    fn depth_eleven_is_rejected() {
        let mut arena = vec![leaf(ExpressionNodeKind::Float(1.0))];
        let mut root = 0usize;
        for _ in 0..10 {
            let rhs = arena.len();
            arena.push(leaf(ExpressionNodeKind::Float(1.0)));
            let new_root = arena.len();
            arena.push(leaf(ExpressionNodeKind::OpBinary(BinaryOp::Add, root, rhs)));
            root = new_root;
        }
        let matrix = InspectionMatrix {
            conditions: vec![Condition {
                root,
                min_publish_interval_ms: 0,
                after_duration_ms: 0,
                signals: vec![],
                raw_frames: vec![],
                include_active_dtcs: false,
                trigger_only_on_rising_edge: false,
                probability_to_send: 1.0,
                metadata: PassThroughMetadata::default(),
                geohash: None,
            }],
            expression_node_storage: arena,
        };
        assert!(matrix.validate().is_err());
    }

    #[test]
    fn exactly_256_conditions_accepted_257_rejected() {
        let condition = || Condition {
            root: 0,
            min_publish_interval_ms: 0,
            after_duration_ms: 0,
            signals: vec![],
            raw_frames: vec![],
            include_active_dtcs: false,
            trigger_only_on_rising_edge: false,
            probability_to_send: 1.0,
            metadata: PassThroughMetadata::default(),
            geohash: None,
        };
        let arena = vec![leaf(ExpressionNodeKind::Bool(true))];

        let matrix_256 = InspectionMatrix {
            conditions: (0..256).map(|_| condition()).collect(),
            expression_node_storage: arena.clone(),
        };
        assert!(matrix_256.validate().is_ok());

        let matrix_257 = InspectionMatrix {
            conditions: (0..257).map(|_| condition()).collect(),
            expression_node_storage: arena,
        };
        assert!(matrix_257.validate().is_err());
    }

    #[test]
    fn shared_buffer_uses_max_requested_size() {
        let signal = |size: u32| SignalSpec {
            signal_id: 7,
            sample_buffer_size: size,
            min_sample_interval_ms: 0,
            fixed_window_period_ms: 0,
            is_condition_only: false,
            signal_type: SignalType::F64,
        };
        let matrix = InspectionMatrix {
            conditions: vec![
                Condition {
                    root: 0,
                    min_publish_interval_ms: 0,
                    after_duration_ms: 0,
                    signals: vec![signal(4)],
                    raw_frames: vec![],
                    include_active_dtcs: false,
                    trigger_only_on_rising_edge: false,
                    probability_to_send: 1.0,
                    metadata: PassThroughMetadata::default(),
                    geohash: None,
                },
                Condition {
                    root: 0,
                    min_publish_interval_ms: 0,
                    after_duration_ms: 0,
                    signals: vec![signal(10)],
                    raw_frames: vec![],
                    include_active_dtcs: false,
                    trigger_only_on_rising_edge: false,
                    probability_to_send: 1.0,
                    metadata: PassThroughMetadata::default(),
                    geohash: None,
                },
            ],
            expression_node_storage: vec![leaf(ExpressionNodeKind::Bool(true))],
        };
        // 10 samples of 8 (f64) + 40 overhead bytes each = 480.
        assert_eq!(matrix.estimate_sample_memory_bytes(), 10 * (8 + 40));
    }

    #[test]
    fn oversized_matrix_is_rejected() {
        let signal = SignalSpec {
            signal_id: 1,
            sample_buffer_size: 1_000_000,
            min_sample_interval_ms: 0,
            fixed_window_period_ms: 0,
            is_condition_only: false,
            signal_type: SignalType::F64,
        };
        let matrix = InspectionMatrix {
            conditions: vec![Condition {
                root: 0,
                min_publish_interval_ms: 0,
                after_duration_ms: 0,
                signals: vec![signal],
                raw_frames: vec![],
                include_active_dtcs: false,
                trigger_only_on_rising_edge: false,
                probability_to_send: 1.0,
                metadata: PassThroughMetadata::default(),
                geohash: None,
            }],
            expression_node_storage: vec![leaf(ExpressionNodeKind::Bool(true))],
        };
        assert!(matrix.validate().is_err());
    }
}
