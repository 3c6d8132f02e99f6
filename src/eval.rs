//! The recursive boolean expression evaluator: a depth-limited walk over
//! [`crate::matrix::ExpressionNode`]s that never panics and never propagates
//! an error past the condition boundary — every failure mode collapses to
//! "this condition is false for this tick".

use crate::error::EvaluationError;
use crate::matrix::{BinaryOp, ExpressionNode, ExpressionNodeKind, UnaryOp, WindowFunction, MAX_EXPRESSION_DEPTH};
use crate::signal::SignalId;

/// Absolute tolerance used for `=`/`≠` comparisons between floats.
pub const FLOAT_EQUAL_TOLERANCE: f64 = 0.001;

/// An intermediate evaluator value: either a number (literals, arithmetic,
/// window reads, signal reads) or a bool (boolean literals, comparisons,
/// logical ops).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvalValue {
    /// A numeric intermediate.
    Number(f64),
    /// A boolean intermediate.
    Bool(bool),
}

impl EvalValue {
    fn as_f64(self) -> Result<f64, EvaluationError> {
        match self {
            EvalValue::Number(v) => Ok(v),
            EvalValue::Bool(_) => Err(EvaluationError::TypeError),
        }
    }

    fn as_bool(self) -> Result<bool, EvaluationError> {
        match self {
            EvalValue::Bool(v) => Ok(v),
            EvalValue::Number(_) => Err(EvaluationError::TypeError),
        }
    }
}

/// What the evaluator reads from the history store and window aggregator,
/// scoped to a single condition's signal/window map. The engine builds one
/// of these per condition per tick; it is never shared across conditions
/// (each condition's `signals` list can request a different sampling
/// interval for the same signal id).
pub trait EvalContext {
    /// The newest numeric value of `signal_id`, or `None` if there is no
    /// sample yet or the signal is a complex handle the evaluator cannot
    /// inspect.
    fn signal_value(&self, signal_id: SignalId) -> Option<f64>;

    /// The requested fixed-window statistic for `signal_id`, or `None` if
    /// that window generation is not available yet.
    fn window_value(&self, signal_id: SignalId, func: WindowFunction) -> Option<f64>;
}

/// Evaluates the expression rooted at arena index `root`, with recursion
/// budget `depth`. Callers evaluating a whole condition should pass
/// [`MAX_EXPRESSION_DEPTH`] as the initial budget, so a tree of exactly that
/// structural depth evaluates and one level deeper reports
/// [`EvaluationError::DepthExceeded`].
pub fn eval(
    arena: &[ExpressionNode],
    root: usize,
    ctx: &dyn EvalContext,
    depth: u32,
) -> Result<EvalValue, EvaluationError> {
    if depth == 0 {
        return Err(EvaluationError::DepthExceeded);
    }
    let node = arena.get(root).ok_or(EvaluationError::SignalNotFound)?;

    match node.kind {
        ExpressionNodeKind::Float(v) => Ok(EvalValue::Number(v)),
        ExpressionNodeKind::Bool(v) => Ok(EvalValue::Bool(v)),
        ExpressionNodeKind::Signal(id) => ctx
            .signal_value(id)
            .map(EvalValue::Number)
            .ok_or(EvaluationError::SignalNotFound),
        ExpressionNodeKind::Window(func, id) => ctx
            .window_value(id, func)
            .map(EvalValue::Number)
            .ok_or(EvaluationError::WindowNotAvailable),
        ExpressionNodeKind::OpUnary(UnaryOp::Not, inner) => {
            let value = eval(arena, inner, ctx, depth - 1)?.as_bool()?;
            Ok(EvalValue::Bool(!value))
        }
        ExpressionNodeKind::OpBinary(op, left, right) if op.is_logical() => {
            eval_logical(arena, op, left, right, ctx, depth)
        }
        ExpressionNodeKind::OpBinary(op, left, right) => {
            eval_non_logical(arena, op, left, right, ctx, depth)
        }
    }
}

fn eval_logical(
    arena: &[ExpressionNode],
    op: BinaryOp,
    left: usize,
    right: usize,
    ctx: &dyn EvalContext,
    depth: u32,
) -> Result<EvalValue, EvaluationError> {
    let left_value = eval(arena, left, ctx, depth - 1)?.as_bool()?;
    // Short-circuit: the right sub-expression is not evaluated (and its
    // errors are never observed) once the left side determines the result.
    match op {
        BinaryOp::And if !left_value => Ok(EvalValue::Bool(false)),
        BinaryOp::Or if left_value => Ok(EvalValue::Bool(true)),
        BinaryOp::And => {
            let right_value = eval(arena, right, ctx, depth - 1)?.as_bool()?;
            Ok(EvalValue::Bool(right_value))
        }
        BinaryOp::Or => {
            let right_value = eval(arena, right, ctx, depth - 1)?.as_bool()?;
            Ok(EvalValue::Bool(right_value))
        }
        _ => unreachable!("eval_logical called with a non-logical operator"),
    }
}

fn eval_non_logical(
    arena: &[ExpressionNode],
    op: BinaryOp,
    left: usize,
    right: usize,
    ctx: &dyn EvalContext,
    depth: u32,
) -> Result<EvalValue, EvaluationError> {
    let lhs = eval(arena, left, ctx, depth - 1)?.as_f64()?;
    let rhs = eval(arena, right, ctx, depth - 1)?.as_f64()?;

    Ok(match op {
        BinaryOp::Add => EvalValue::Number(lhs + rhs),
        BinaryOp::Sub => EvalValue::Number(lhs - rhs),
        BinaryOp::Mul => EvalValue::Number(lhs * rhs),
        BinaryOp::Div => {
            if rhs == 0.0 {
                return Err(EvaluationError::TypeError);
            }
            EvalValue::Number(lhs / rhs)
        }
        BinaryOp::Lt => EvalValue::Bool(lhs < rhs),
        BinaryOp::Le => EvalValue::Bool(lhs <= rhs),
        BinaryOp::Gt => EvalValue::Bool(lhs > rhs),
        BinaryOp::Ge => EvalValue::Bool(lhs >= rhs),
        BinaryOp::Eq => EvalValue::Bool((lhs - rhs).abs() <= FLOAT_EQUAL_TOLERANCE),
        BinaryOp::Ne => EvalValue::Bool((lhs - rhs).abs() > FLOAT_EQUAL_TOLERANCE),
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators are dispatched separately"),
    })
}

/// Evaluates the whole tree rooted at `root` and reduces it to a single
/// boolean: any [`EvaluationError`] (including an unavailable window) makes
/// the condition false for this tick rather than propagating. Returns the
/// verdict plus the error kind observed, if any, for metrics attribution.
pub fn evaluate_condition(
    arena: &[ExpressionNode],
    root: usize,
    ctx: &dyn EvalContext,
) -> (bool, Option<EvaluationError>) {
    match eval(arena, root, ctx, MAX_EXPRESSION_DEPTH) {
        Ok(EvalValue::Bool(v)) => (v, None),
        Ok(EvalValue::Number(_)) => (false, Some(EvaluationError::TypeError)),
        Err(kind) => (false, Some(kind)),
    }
}
