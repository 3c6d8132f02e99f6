use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy for the inspection engine.
///
/// Only [`EngineError::MatrixRejected`] is ever returned from a public API in
/// normal operation (`set_inspection_matrix`); the rest describe conditions
/// that are local to a single tick or ingest call and are folded into a
/// metric increment plus a `false` evaluation result rather than propagated.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A candidate matrix was rejected at swap time: too-deep expression
    /// tree, too many conditions, or the signal-memory budget exceeded. The
    /// previously active matrix remains in effect.
    #[error("matrix rejected: {0}")]
    MatrixRejected(String),

    /// An ingest carried a type tag different from the buffer's fixed type.
    #[error("type mismatch for signal {signal_id}: buffer is {expected:?}, sample was {actual:?}")]
    TypeMismatch {
        /// Signal the mismatched sample targeted.
        signal_id: u32,
        /// Type the buffer was created with.
        expected: crate::signal::SignalType,
        /// Type carried by the rejected sample.
        actual: crate::signal::SignalType,
    },

    /// The bounded ingress queue was full; the sample was dropped.
    #[error("ingress queue overflow, sample dropped")]
    IngressOverflow,

    /// The bounded egress queue was full; the snapshot was dropped.
    #[error("egress queue overflow, snapshot dropped")]
    EgressOverflow,

    /// Expression evaluation failed for a reason local to this tick.
    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// A fixed window referenced by an expression has not completed yet.
    #[error("window not ready")]
    WindowNotReady,
}

/// Sub-taxonomy of [`EngineError::Evaluation`], matching the `kind` values
/// `eval()` can produce per the expression evaluator contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// The referenced signal has no sample yet (or is a complex handle the
    /// evaluator cannot inspect).
    #[error("signal not found")]
    SignalNotFound,
    /// A fixed window's `last`/`prev_last` generation is unavailable.
    #[error("window not available")]
    WindowNotAvailable,
    /// Recursion depth exceeded `MAX_EQUATION_DEPTH`.
    #[error("expression depth exceeded")]
    DepthExceeded,
    /// Division by zero, or an operator applied to an incompatible operand.
    #[error("type error")]
    TypeError,
}
